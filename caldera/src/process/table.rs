//! Global process registry and the fixed-size process pool.
//!
//! The registry is one spinlock-protected ordered map from pid to a
//! non-owning reference; membership says nothing about lifetime. It is only
//! ever touched for short, non-blocking mutations: insert at creation,
//! lookup by pid, removal at destruction.
//!
//! Process storage comes from a fixed-size pool. A [`PoolSlot`] is a
//! reservation against that pool; dropping it returns the slot. The free
//! list is an [`ArrayQueue`] pre-filled with every slot index.

use super::Process;
use crate::sync::SpinLock;
use crossbeam_queue::ArrayQueue;
use std::{
    collections::BTreeMap,
    sync::{Arc, LazyLock, Weak},
};

/// Capacity of the process pool.
pub const MAX_PROCESSES: usize = 64;

static PROCESS_TABLE: SpinLock<BTreeMap<u64, Weak<Process>>> =
    SpinLock::named(BTreeMap::new(), "process table");

static POOL: LazyLock<ArrayQueue<usize>> = LazyLock::new(|| {
    let pool = ArrayQueue::new(MAX_PROCESSES);
    for slot in 0..MAX_PROCESSES {
        let _ = pool.push(slot);
    }
    pool
});

/// A reservation of one slot in the process pool.
pub(crate) struct PoolSlot(usize);

impl PoolSlot {
    /// Takes a slot from the pool, or `None` when the pool is exhausted.
    pub(crate) fn reserve() -> Option<PoolSlot> {
        POOL.pop().map(PoolSlot)
    }

    pub(crate) fn index(&self) -> usize {
        self.0
    }
}

impl Drop for PoolSlot {
    fn drop(&mut self) {
        let _ = POOL.push(self.0);
    }
}

pub(crate) fn insert(pid: u64, proc: Weak<Process>) {
    let mut table = PROCESS_TABLE.lock();
    table.insert(pid, proc);
    table.unlock();
}

pub(crate) fn remove(pid: u64) {
    let mut table = PROCESS_TABLE.lock();
    table.remove(&pid);
    table.unlock();
}

/// Finds a live process by pid, returning an owned reference.
///
/// The upgrade happens under the registry lock, so the found process cannot
/// be destroyed between lookup and use.
pub(crate) fn find(pid: u64) -> Option<Arc<Process>> {
    let table = PROCESS_TABLE.lock();
    let found = table.get(&pid).and_then(Weak::upgrade);
    table.unlock();
    found
}

/// Owned references to every live process, in pid order.
///
/// Diagnostics iterate over this snapshot instead of holding the registry
/// lock while formatting.
pub(crate) fn snapshot() -> Vec<Arc<Process>> {
    let table = PROCESS_TABLE.lock();
    let procs = table.values().filter_map(Weak::upgrade).collect();
    table.unlock();
    procs
}

/// The number of live processes in the registry.
pub fn process_count() -> usize {
    let table = PROCESS_TABLE.lock();
    let count = table.values().filter(|p| p.strong_count() > 0).count();
    table.unlock();
    count
}

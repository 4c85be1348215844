//! Process lifecycle and the zombie-reap protocol.
//!
//! A [`Process`] is the unit of resource ownership: it owns an address
//! space, a descriptor table, and a group of threads, and it sits in a
//! parent/child graph. Lifetime is reference-counted through
//! [`Arc<Process>`]: [`Process::create`] hands out one reference, cloning
//! is retaining, dropping is releasing, and destruction runs exactly once
//! when the last reference goes away.
//!
//! ## States
//!
//! A process is [`ProcessState::Null`] while under construction, becomes
//! [`ProcessState::Ready`] when its first thread attaches, and turns into a
//! [`ProcessState::Zombie`] when its last thread exits. A zombie holds its
//! pid and exit code until the parent collects them with
//! [`Process::wait`]; only then do its per-thread resources go away.
//!
//! ## The reap protocol
//!
//! Exit flows bottom-up: the last exiting thread moves the process from its
//! parent's live-child list to the parent's zombie queue and signals two
//! condition variables — one on the child (for waiters on that specific
//! pid) and one on the parent (for wildcard waiters). Both are waited on
//! with the parent's zombie-protocol mutex. [`Process::wait`] consumes the
//! other end: it dequeues the zombie, packs `(pid << 16) | (code & 0xff)`,
//! and drains the child's thread-reclamation queue — a thread cannot free
//! its own control block while still running on it, so the final release is
//! always deferred to the reaper.
//!
//! Lock order on this path is fixed: the zombie-protocol mutex is taken
//! before any ordinary process spinlock, and the registry lock is never
//! held across a blocking call.

pub mod descriptor;
pub mod table;

use crate::{
    KernelError,
    mm::AddressSpace,
    sync::{
        ConditionVariable, Mutex, SpinLock,
        atomic::{AtomicI32, AtomicU8, AtomicU64},
    },
    thread::{JoinHandle, Thread, ThreadBuilder},
};
use descriptor::DescriptorTable;
use num_enum::{IntoPrimitive, TryFromPrimitive};
use std::{
    collections::VecDeque,
    sync::Arc,
};
use table::PoolSlot;

pub use table::{MAX_PROCESSES, process_count};

/// Pid of the init/root process, the first one created.
pub const INIT_PID: u64 = 1;

/// Longest process title kept, in characters; longer titles are truncated
/// at creation.
pub const TITLE_CAPACITY: usize = 32;

static NEXT_PID: AtomicU64 = AtomicU64::new(INIT_PID);

/// A possible state of a process.
#[repr(u8)]
#[derive(Debug, Clone, Copy, Eq, PartialEq, IntoPrimitive, TryFromPrimitive)]
pub enum ProcessState {
    /// Under construction, not yet schedulable.
    Null = 0,
    /// Running or runnable.
    Ready = 1,
    /// Exited, awaiting reap.
    Zombie = 2,
}

impl core::fmt::Display for ProcessState {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(match self {
            ProcessState::Null => "NULL",
            ProcessState::Ready => "READY",
            ProcessState::Zombie => "ZOMBIE",
        })
    }
}

/// The result of a successful [`Process::wait`].
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct WaitStatus {
    /// Pid of the reaped child.
    pub pid: u64,
    /// The child's exit code.
    pub code: i32,
}

impl WaitStatus {
    /// The system-call encoding of this status:
    /// `(pid << 16) | (code & 0xff)`.
    pub fn into_packed(self) -> usize {
        ((self.pid << 16) | (self.code as u64 & 0xff)) as usize
    }
}

struct ProcessInner {
    children: Vec<Arc<Process>>,
    threads: Vec<Arc<Thread>>,
    live_threads: usize,
}

struct ZombieQueue {
    queue: VecDeque<Arc<Process>>,
}

/// The unit of resource ownership.
///
/// Retain with [`Arc::clone`], release by dropping; destruction tears the
/// process down exactly once, when the final reference goes.
pub struct Process {
    /// Process id, unique for the lifetime of the system.
    pub pid: u64,
    /// Short human-readable title.
    pub title: String,
    parent: Option<u64>,
    state: AtomicU8,
    exit_code: AtomicI32,
    // Field order below is teardown order: descriptor table, condition
    // variables, zombie mutex, address space; the pool slot returns last.
    descriptors: SpinLock<Option<DescriptorTable>>,
    /// Signaled when this process itself becomes a zombie.
    exited: ConditionVariable,
    /// Signaled when any child of this process becomes a zombie.
    child_exited: ConditionVariable,
    /// Zombie-protocol mutex; both condition variables are waited on with
    /// this lock held.
    zombie: Mutex<ZombieQueue>,
    space: SpinLock<Option<AddressSpace>>,
    lock: SpinLock<ProcessInner>,
    reclaim: SpinLock<VecDeque<Arc<Thread>>>,
    _slot: PoolSlot,
}

impl Process {
    /// Creates a process, optionally as a child of `parent`.
    ///
    /// The new process is allocated from a fixed-size pool, gets the next
    /// monotonic pid (never reused), starts in [`ProcessState::Null`], is
    /// linked into the parent's child list and the global registry, and is
    /// returned as one owned reference.
    ///
    /// # Errors
    ///
    /// Returns [`KernelError::NoMemory`] when the pool is exhausted or the
    /// address-space collaborator cannot supply a new space. Callers treat
    /// this as resource exhaustion (fail the spawn), not as a condition to
    /// retry automatically.
    pub fn create(parent: Option<&Arc<Process>>, title: &str) -> Result<Arc<Process>, KernelError> {
        let Some(slot) = PoolSlot::reserve() else {
            log::warn!("process pool exhausted creating `{title}`");
            return Err(KernelError::NoMemory);
        };
        let space = AddressSpace::new()?;
        let pid = NEXT_PID.fetch_add(1);
        let title: String = title.chars().take(TITLE_CAPACITY).collect();

        let proc = Arc::new(Process {
            pid,
            title,
            parent: parent.map(|p| p.pid),
            state: AtomicU8::new(ProcessState::Null.into()),
            exit_code: AtomicI32::new(0),
            descriptors: SpinLock::named(Some(DescriptorTable::new()), "descriptor table"),
            exited: ConditionVariable::new(),
            child_exited: ConditionVariable::new(),
            zombie: Mutex::named(
                ZombieQueue {
                    queue: VecDeque::new(),
                },
                "zombie queue",
            ),
            space: SpinLock::named(Some(space), "address space"),
            lock: SpinLock::named(
                ProcessInner {
                    children: Vec::new(),
                    threads: Vec::new(),
                    live_threads: 0,
                },
                "process",
            ),
            reclaim: SpinLock::named(VecDeque::new(), "thread reclaim"),
            _slot: slot,
        });

        if let Some(parent) = parent {
            let mut inner = parent.lock.lock();
            inner.children.push(proc.clone());
            inner.unlock();
        }
        table::insert(pid, Arc::downgrade(&proc));

        log::debug!("created process {pid} `{}` slot {}", proc.title, proc.slot_index());
        Ok(proc)
    }

    /// Finds a live process by pid.
    ///
    /// The returned reference is taken under the registry lock, so the
    /// found process cannot be destroyed between lookup and use; the caller
    /// owns the reference and releases it by dropping.
    pub fn lookup(pid: u64) -> Option<Arc<Process>> {
        table::find(pid)
    }

    /// The current lifecycle state.
    pub fn state(&self) -> ProcessState {
        ProcessState::try_from(self.state.load()).unwrap_or(ProcessState::Null)
    }

    fn set_state(&self, state: ProcessState) {
        self.state.store(state.into());
    }

    /// The exit code passed by the final exiting thread. Meaningful once
    /// the process is a [`ProcessState::Zombie`].
    pub fn exit_code(&self) -> i32 {
        self.exit_code.load()
    }

    /// Pid of the parent, if the process was created with one. The parent
    /// is identified, not kept alive, by this value.
    pub fn parent_pid(&self) -> Option<u64> {
        self.parent
    }

    /// The number of live (not yet reaped) children.
    ///
    /// A wildcard [`wait`](Self::wait) with no children at all blocks
    /// forever; callers consult this first.
    pub fn child_count(&self) -> usize {
        let inner = self.lock.lock();
        let count = inner.children.len();
        inner.unlock();
        count
    }

    /// The number of live threads in this process.
    pub fn thread_count(&self) -> usize {
        let inner = self.lock.lock();
        let count = inner.live_threads;
        inner.unlock();
        count
    }

    /// The identifier of the owned address space, while one is attached.
    pub fn address_space_id(&self) -> Option<u64> {
        let space = self.space.lock();
        let asid = space.as_ref().map(AddressSpace::asid);
        space.unlock();
        asid
    }

    /// Runs `f` on the descriptor table. Returns `None` once the table has
    /// been torn down.
    pub fn with_descriptors<R>(&self, f: impl FnOnce(&mut DescriptorTable) -> R) -> Option<R> {
        let mut descriptors = self.descriptors.lock();
        let result = descriptors.as_mut().map(f);
        descriptors.unlock();
        result
    }

    pub(crate) fn slot_index(&self) -> usize {
        self._slot.index()
    }

    /// Spawns a thread inside this process.
    ///
    /// The thread is attached before it starts running, so the live-thread
    /// count is exact from the moment this returns; the first attach moves
    /// the process from [`ProcessState::Null`] to [`ProcessState::Ready`].
    /// The closure's return value — or the code given to
    /// [`Current::exit`](crate::thread::Current::exit) — becomes the
    /// thread's exit code, and the last thread's exit code becomes the
    /// process's.
    pub fn spawn_thread<F>(&self, name: &str, f: F) -> JoinHandle
    where
        F: FnOnce() -> i32 + Send + 'static,
    {
        let me = match table::find(self.pid) {
            Some(me) => me,
            // a live process is always in the registry
            None => unreachable!(),
        };
        ThreadBuilder::new(name).attach_process(&me).spawn(f)
    }

    pub(crate) fn adopt_thread(&self, th: &Arc<Thread>) {
        let mut inner = self.lock.lock();
        inner.threads.push(th.clone());
        inner.live_threads += 1;
        inner.unlock();
        let _ = self
            .state
            .compare_exchange(ProcessState::Null.into(), ProcessState::Ready.into());
    }

    pub(crate) fn on_thread_exit(proc: &Arc<Process>, th: &Arc<Thread>, exit_code: i32) {
        let mut inner = proc.lock.lock();
        if let Some(at) = inner.threads.iter().position(|t| t.tid == th.tid) {
            let th = inner.threads.swap_remove(at);
            // A thread cannot free its own control block; it is parked on
            // the reclamation queue until the parent reaps this process.
            let mut reclaim = proc.reclaim.lock();
            reclaim.push_back(th);
            reclaim.unlock();
        }
        inner.live_threads -= 1;
        let last = inner.live_threads == 0;
        inner.unlock();

        if last {
            Process::transition_to_zombie(proc, exit_code);
        }
    }

    /// The last thread is gone: unlink from the parent's live-child list,
    /// join the parent's zombie queue, and signal both condition variables.
    fn transition_to_zombie(proc: &Arc<Process>, exit_code: i32) {
        proc.exit_code.store(exit_code);

        let Some(parent) = proc.parent.and_then(Process::lookup) else {
            // No reaper exists; the zombie is destroyed when the last
            // reference goes away.
            proc.set_state(ProcessState::Zombie);
            log::debug!("process {} exited({exit_code}) with no parent", proc.pid);
            return;
        };

        let mut zombies = parent.zombie.lock();
        let mut inner = parent.lock.lock();
        let at = inner.children.iter().position(|child| child.pid == proc.pid);
        let me = at.map(|at| inner.children.swap_remove(at));
        inner.unlock();

        proc.set_state(ProcessState::Zombie);
        let Some(me) = me else {
            // Already unlinked by an earlier exit; wake pid waiters and
            // hand the parent nothing new.
            proc.exited.broadcast(zombies);
            return;
        };
        zombies.queue.push_back(me);
        // Waiters parked on this specific pid re-check state under the
        // zombie mutex; wildcard waiters re-check the queue.
        proc.exited.broadcast(zombies);
        let zombies = parent.zombie.lock();
        parent.child_exited.signal(zombies);

        log::debug!(
            "process {} `{}` exited({exit_code}), zombie child of {}",
            proc.pid,
            proc.title,
            parent.pid
        );
    }

    /// Collects one exited child, blocking until there is one to collect.
    ///
    /// With `pid == 0` this reaps the oldest pending zombie child (arrival
    /// order), blocking while the zombie queue is empty — and therefore
    /// forever if this process has no children at all; see
    /// [`child_count`](Self::child_count). With a specific `pid` it blocks
    /// until that process has exited, then removes it from this process's
    /// zombie queue.
    ///
    /// On success the reaped child's pending thread-control blocks are
    /// released and its packed status is returned.
    ///
    /// # Errors
    ///
    /// Returns [`KernelError::NoSuchEntry`] — without blocking — when `pid`
    /// names no live or zombie process, and after blocking when the exited
    /// `pid` was not an unreaped child of this process.
    pub fn wait(&self, pid: u64) -> Result<WaitStatus, KernelError> {
        let target = if pid == 0 {
            let mut zombies = self
                .child_exited
                .wait_while(&self.zombie, |z| z.queue.is_empty());
            let target = zombies.queue.pop_front();
            zombies.unlock();
            match target {
                Some(target) => target,
                // the predicate held the queue non-empty under the mutex
                None => unreachable!(),
            }
        } else {
            let Some(found) = Process::lookup(pid) else {
                return Err(KernelError::NoSuchEntry);
            };
            let mut zombies = found
                .exited
                .wait_while(&self.zombie, |_| found.state() != ProcessState::Zombie);
            let at = zombies.queue.iter().position(|z| z.pid == pid);
            let target = at.and_then(|at| zombies.queue.remove(at));
            zombies.unlock();
            match target {
                Some(target) => target,
                // exited, but never into our zombie queue (not our child,
                // or already reaped by a racing wait)
                None => return Err(KernelError::NoSuchEntry),
            }
        };

        let status = WaitStatus {
            pid: target.pid,
            code: target.exit_code(),
        };

        // Deferred reclamation: the child's threads could not free their
        // own control blocks, so their final release happens here, one at a
        // time under this process's ordinary lock.
        loop {
            let inner = self.lock.lock();
            let mut reclaim = target.reclaim.lock();
            let th = reclaim.pop_front();
            reclaim.unlock();
            inner.unlock();
            match th {
                Some(th) => {
                    assert_ne!(
                        th.owner_pid(),
                        INIT_PID,
                        "threads of the init process are never reclaimed"
                    );
                    drop(th);
                }
                None => break,
            }
        }

        log::debug!(
            "process {} reaped zombie {} (status {:#x})",
            self.pid,
            status.pid,
            status.into_packed()
        );
        Ok(status)
    }
}

impl Drop for Process {
    fn drop(&mut self) {
        // The registry entry goes away while the object is still intact;
        // owned resources then drop in field order (see the struct).
        table::remove(self.pid);
        log::trace!("destroyed process {} `{}`", self.pid, self.title);
    }
}

impl core::fmt::Debug for Process {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Process")
            .field("pid", &self.pid)
            .field("title", &self.title)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

/// System-call shape of [`Process::wait`]: the packed status on success,
/// or the negative errno of the failure.
pub fn wait_packed(parent: &Process, pid: u64) -> usize {
    match parent.wait(pid) {
        Ok(status) => status.into_packed(),
        Err(e) => e.into_usize(),
    }
}

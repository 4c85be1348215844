//! # Caldera kernel core: synchronization and process lifecycle.
//!
//! This crate is the synchronization and process-lifecycle core of the
//! Caldera kernel: the primitives that let kernel code block safely and the
//! process abstraction that tracks creation, reference-counted destruction,
//! the parent/child hierarchy, and zombie reaping.
//!
//! The components, leaves first:
//!
//! - [`sync::SpinLock`] — busy-wait mutual exclusion. Holding one raises the
//!   calling thread's *critical level*; any attempt to block while the level
//!   is non-zero is a fatal programming error.
//! - [`sync::WaitChannel`] — a named sleep/wake queue. It is the one place a
//!   thread is allowed to give up the processor, and it encodes the
//!   enqueue-then-release-then-park ordering that makes lost wakeups
//!   impossible.
//! - [`sync::Mutex`] — an owner-tracked sleeping lock, built from one
//!   spinlock (protecting its status and owner) and one wait channel (its
//!   sleep queue).
//! - [`sync::ConditionVariable`] — event notification over a [`sync::Mutex`].
//! - [`process::Process`] — the unit of resource ownership: address space,
//!   descriptor table, thread group, parent/child graph, and the
//!   zombie-reaping protocol consumed through [`process::Process::wait`].
//!
//! The thread scheduler itself is a collaborator, not part of this crate.
//! The [`thread`] module binds to it through a narrow contract: look up the
//! current execution context, stop running a blocked context, and make a
//! parked context runnable again. In this build the collaborator is the host
//! scheduler reached through `std::thread`, which keeps the whole core
//! executable under `cargo test`; nothing above the [`thread`] module knows
//! the difference.

pub mod debugging;
pub mod mm;
pub mod process;
pub mod sync;
pub mod thread;

/// Enum representing errors that can occur during a kernel operation.
///
/// This enum is used to categorize errors encountered by the kernel
/// operation. Each variant corresponds to a specific type of error that
/// might occur during the handling of a kernel operation. These errors can
/// be returned to the user program to indicate the nature of the failure.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum KernelError {
    /// Operation is not permitted. (EPERM)
    OperationNotPermitted,
    /// No such process or entry. (ENOENT)
    NoSuchEntry,
    /// Out of memory. (ENOMEM)
    NoMemory,
    /// Device or resource busy. (EBUSY)
    Busy,
    /// Invalid argument. (EINVAL)
    InvalidArgument,
}

impl KernelError {
    /// Converts the [`KernelError`] enum into a corresponding `usize` error
    /// code. The result is cast to `usize` for use as a return value in
    /// system calls.
    pub fn into_usize(self) -> usize {
        (match self {
            KernelError::OperationNotPermitted => -1isize,
            KernelError::NoSuchEntry => -2,
            KernelError::NoMemory => -12,
            KernelError::Busy => -16,
            KernelError::InvalidArgument => -22,
        }) as usize
    }
}

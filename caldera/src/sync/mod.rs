//! Synchronization primitives.
//!
//! Dependency order, leaves first:
//!
//! - [`SpinLock`] — busy-wait mutual exclusion; raises the holder's
//!   critical level; never suspends.
//! - [`WaitChannel`] — named sleep/wake queue; the one safe way to give up
//!   the processor.
//! - [`Mutex`] — owner-tracked sleeping lock built from one [`SpinLock`]
//!   and one [`WaitChannel`].
//! - [`ConditionVariable`] — event notification over a [`Mutex`].
//!
//! All blocking in this crate flows through the wait channel's
//! enqueue-then-release-then-park sequence; see
//! [`wait_channel`](self::wait_channel) for the ordering argument.

pub mod atomic;
pub mod condvar;
pub mod mutex;
pub mod spinlock;
pub mod wait_channel;

pub use condvar::ConditionVariable;
pub use mutex::{Mutex, MutexGuard};
pub use spinlock::{SpinLock, SpinLockGuard, SpinLockKind, WouldBlock};
pub use wait_channel::WaitChannel;

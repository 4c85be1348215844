//! # Mutex.
//!
//! Mutex is a synchronization primitive that allows **only one thread at a
//! time** to access a critical section of code, protecting shared resources
//! such as memory, files, or device state from concurrent modification.
//! Unlike the spin lock, it **blocks** threads trying to acquire it if
//! another thread already holds the lock.
//!
//! Although mutex and spin lock provide similar synchronization guarantees,
//! they are used in different circumstances. The following table compares
//! the spin lock and mutex.
//!
//! |                | SpinLock                 | Mutex                     |
//! |----------------|--------------------------|---------------------------|
//! | Waiting thread | Spins (busy-waits)       | Sleeps                    |
//! | CPU usage      | High (wastes CPU cycles) | Low (no busy waiting)     |
//! | Overhead       | Low (fast if uncontended)| Higher (due to sleep/wake)|
//!
//! These characteristics lead to the spin lock being suitable when critical
//! sections are extremely short and contention is rare, because spinning
//! wastes CPU cycles. On the other side, the mutex is better for longer
//! critical sections or when a lock may be held for a non-trivial amount of
//! time, as sleeping threads do not waste CPU.
//!
//! A mutex is built from one [`SpinLock`] protecting its own status and
//! owner, plus one [`WaitChannel`] as its sleep queue. The owner is recorded
//! as a thread id, never as a reference that keeps the thread alive; it is
//! meaningful only while the status is locked, and only the owner may
//! unlock (checked, fatal on violation).

use super::{
    spinlock::{SpinLock, WouldBlock},
    wait_channel::WaitChannel,
};
use crate::thread::{self, Current};
use core::{
    cell::UnsafeCell,
    ops::{Deref, DerefMut},
};

#[derive(Clone, Copy, Eq, PartialEq, Debug)]
enum MutexStatus {
    Unlocked,
    Locked,
}

struct MutexState {
    status: MutexStatus,
    owner: Option<u64>,
}

/// A mutual exclusion primitive useful for protecting shared data
///
/// This mutex will block threads waiting for the lock to become available.
/// The mutex can be created via a [`new`] constructor. Each mutex has a
/// type parameter which represents the data that it is protecting. The data
/// can only be accessed through the guards returned from [`lock`] and
/// [`try_lock`], which guarantees that the data is only ever accessed when
/// the mutex is locked.
///
/// [`new`]: Self::new
/// [`lock`]: Self::lock
/// [`try_lock`]: Self::try_lock
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use caldera::sync::Mutex;
/// use caldera::thread;
///
/// const N: usize = 10;
///
/// // Spawn a few threads to increment a shared variable (non-atomically).
/// //
/// // Here we're using an Arc to share memory among threads, and the data
/// // inside the Arc is protected with a mutex.
/// let data = Arc::new(Mutex::new(0));
///
/// let workers: Vec<_> = (0..N)
///     .map(|_| {
///         let data = Arc::clone(&data);
///         thread::ThreadBuilder::new("work").spawn(move || {
///             // The shared state can only be accessed once the lock is
///             // held. Our non-atomic increment is safe because we're the
///             // only thread which can access the shared state when the
///             // lock is held.
///             let mut data = data.lock();
///             *data += 1;
///             // the lock must be "explicitly" unlocked.
///             data.unlock();
///             0
///         })
///     })
///     .collect();
/// for worker in workers {
///     worker.join();
/// }
///
/// let guard = data.lock();
/// assert_eq!(*guard, N);
/// guard.unlock();
/// ```
pub struct Mutex<T: ?Sized> {
    state: SpinLock<MutexState>,
    chan: WaitChannel,
    data: UnsafeCell<T>,
}

unsafe impl<T: ?Sized + Send> Send for Mutex<T> {}
unsafe impl<T: ?Sized + Send> Sync for Mutex<T> {}

impl<T> Mutex<T> {
    /// Creates a new mutex in an unlocked state ready for use.
    ///
    /// # Examples
    ///
    /// ```
    /// use caldera::sync::Mutex;
    ///
    /// let mutex = Mutex::new(0);
    /// ```
    #[inline]
    pub const fn new(t: T) -> Mutex<T> {
        Self::named(t, "mutex")
    }

    /// Creates a new mutex carrying a debug tag, used in every diagnostic
    /// this lock emits. The tag names both the internal spinlock and the
    /// sleep queue.
    #[inline]
    pub const fn named(t: T, name: &'static str) -> Mutex<T> {
        Mutex {
            state: SpinLock::named(
                MutexState {
                    status: MutexStatus::Unlocked,
                    owner: None,
                },
                name,
            ),
            chan: WaitChannel::new(name),
            data: UnsafeCell::new(t),
        }
    }

    /// Consumes this mutex, returning the underlying data.
    pub fn into_inner(self) -> T
    where
        T: Sized,
    {
        self.data.into_inner()
    }
}

impl<T: ?Sized> Mutex<T> {
    /// Acquires the mutex, blocking the current thread until it is able to
    /// do so.
    ///
    /// This function will block the local thread until it is available to
    /// acquire the mutex. Upon returning, the thread is the only thread
    /// with the lock held and is recorded as the owner. A guard is returned
    /// to allow scoped access to the data; the guard must be explicitly
    /// [`unlock`]ed by the owning thread.
    ///
    /// # Panics
    ///
    /// Panics if the calling thread holds any spinlock: a mutex may sleep,
    /// and suspension inside a non-blocking critical section is a fatal
    /// programming error.
    ///
    /// The exact behavior on locking a mutex in the thread which already
    /// holds the lock is left unspecified. However, this function will not
    /// return on the second call (it might panic or deadlock, for example).
    ///
    /// [`unlock`]: MutexGuard::unlock
    pub fn lock(&self) -> MutexGuard<'_, T> {
        // You cannot hold a spinlock while trying to acquire a mutex that
        // may sleep.
        assert_eq!(
            thread::critical_level(),
            0,
            "mutex `{}`: lock() inside a non-blocking critical section",
            self.chan.name()
        );

        let mut state = self.state.lock();
        // Multiple sleepers may race to re-acquire after a single wake, so
        // the status must be re-checked on every wakeup.
        while state.status == MutexStatus::Locked {
            self.chan.sleep(state);
            state = self.state.lock();
        }
        state.status = MutexStatus::Locked;
        state.owner = Some(Current::get_tid());
        state.unlock();

        MutexGuard { lock: self }
    }

    /// Attempts to acquire this lock.
    ///
    /// If the lock could not be acquired at this time, then [`Err`] is
    /// returned. Otherwise, a guard is returned.
    ///
    /// This function does not block.
    ///
    /// # Errors
    ///
    /// If the mutex could not be acquired because it is already locked,
    /// then this call will return the [`WouldBlock`] error.
    pub fn try_lock(&self) -> Result<MutexGuard<'_, T>, WouldBlock> {
        let mut state = self.state.lock();
        if state.status == MutexStatus::Locked {
            state.unlock();
            Err(WouldBlock)
        } else {
            state.status = MutexStatus::Locked;
            state.owner = Some(Current::get_tid());
            state.unlock();
            Ok(MutexGuard { lock: self })
        }
    }

    /// Releases the lock on behalf of the guard.
    ///
    /// Asserts that the calling thread is the recorded owner: a release by
    /// any other thread means a double unlock or a cross-thread unlock bug,
    /// and is fatal. Exactly one waiter is woken, while the internal
    /// spinlock is still held.
    fn unlock_inner(&self) {
        let mut state = self.state.lock();
        let me = Current::get_tid();
        if state.owner != Some(me) {
            let owner = state.owner;
            state.unlock();
            panic!(
                "mutex `{}`: unlock by thread {} but owner is {:?}",
                self.chan.name(),
                me,
                owner
            );
        }
        state.status = MutexStatus::Unlocked;
        state.owner = None;
        self.chan.wake_one();
        state.unlock();
    }
}

impl<T: Default> Default for Mutex<T> {
    /// Creates a `Mutex<T>`, with the `Default` value for T.
    fn default() -> Mutex<T> {
        Mutex::new(Default::default())
    }
}

impl<T: ?Sized> core::fmt::Debug for Mutex<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Mutex")
            .field("name", &self.chan.name())
            .finish_non_exhaustive()
    }
}

/// An implementation of a "scoped lock" of a mutex. When this structure is
/// dropped (falls out of scope) without unlocking, a panic occurs.
///
/// The lock must be explicitly unlocked by the [`unlock`] method, by the
/// thread that acquired it. Ownership is enforced at runtime, not by the
/// type system: moving a guard to another thread and unlocking there hits
/// the fatal non-owner path.
///
/// The data protected by the mutex can be accessed through this guard.
///
/// This structure is created by the [`lock`] and [`try_lock`] methods on
/// [`Mutex`].
///
/// [`lock`]: Mutex::lock
/// [`try_lock`]: Mutex::try_lock
/// [`unlock`]: MutexGuard::unlock
pub struct MutexGuard<'a, T: ?Sized + 'a> {
    lock: &'a Mutex<T>,
}

impl<T: ?Sized> Deref for MutexGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        unsafe { &*self.lock.data.get() }
    }
}

impl<T: ?Sized> DerefMut for MutexGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.lock.data.get() }
    }
}

impl<T: ?Sized> MutexGuard<'_, T> {
    /// Releases the underlying [`Mutex`].
    ///
    /// As the guard does **not** automatically release the lock on drop,
    /// the caller must explicitly invoke [`unlock`] to mark the lock as
    /// available again.
    ///
    /// [`unlock`]: MutexGuard::unlock
    pub fn unlock(self) {
        self.lock.unlock_inner();
        core::mem::forget(self);
    }
}

impl<T: ?Sized> Drop for MutexGuard<'_, T> {
    fn drop(&mut self) {
        if std::thread::panicking() {
            return;
        }
        panic!(
            "`.unlock()` must be explicitly called for the guard of mutex `{}`.",
            self.lock.chan.name()
        );
    }
}

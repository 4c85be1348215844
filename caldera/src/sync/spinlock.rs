//! SMP-supported spinlock.
//!
//! A spinlock is the non-blocking mutual-exclusion primitive everything else
//! in this crate is built on. A thread that wants the lock 1) polls a
//! variable that represents whether the lock is held, 2) sets the variable
//! when it takes the lock, and 3) unsets the variable when it releases. The
//! poll and the set must be executed ATOMICALLY with an atomic
//! read-modify-write operation.
//!
//! Taking a spinlock also disables preemption of the holding thread, tracked
//! as the thread's *critical level* (see [`thread::critical_level`]). A
//! spinlock must only ever protect short, bounded sections: suspending while
//! one is held would carry the raised critical level into the scheduler, so
//! every blocking primitive asserts a critical level of zero before it
//! parks. Violating that is a fatal programming error, not a recoverable
//! condition.
//!
//! [`thread::critical_level`]: crate::thread::critical_level

use crate::thread::PreemptGuard;
use core::{
    cell::UnsafeCell,
    ops::{Deref, DerefMut},
};
use crossbeam_utils::CachePadded;

use super::atomic::AtomicBool;

/// The lock could not be acquired at this time because the operation would
/// otherwise block.
#[derive(Debug)]
pub struct WouldBlock;

/// The flavor of a spinlock.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum SpinLockKind {
    /// An ordinary lock, never taken from interrupt context.
    Normal,
    /// A lock shared with interrupt handlers.
    InterruptSafe,
}

/// A mutual exclusion primitive useful for protecting shared data
///
/// This spinlock will block threads waiting for the lock to become
/// available. The spinlock can be created via a [`new`] constructor. Each
/// spinlock has a type parameter which represents the data that it is
/// protecting. The data can only be accessed through the guards returned
/// from [`lock`] and [`try_lock`], which guarantees that the data is only
/// ever accessed when the spinlock is locked.
///
/// [`new`]: Self::new
/// [`lock`]: Self::lock
/// [`try_lock`]: Self::try_lock
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use caldera::sync::SpinLock;
/// use caldera::thread;
///
/// const N: usize = 10;
///
/// // Spawn a few threads to increment a shared variable (non-atomically).
/// //
/// // Here we're using an Arc to share memory among threads, and the data
/// // inside the Arc is protected with a spinlock.
/// let data = Arc::new(SpinLock::new(0));
///
/// let workers: Vec<_> = (0..N)
///     .map(|_| {
///         let data = Arc::clone(&data);
///         thread::ThreadBuilder::new("work").spawn(move || {
///             // The shared state can only be accessed once the lock is
///             // held.
///             let mut guard = data.lock();
///             *guard += 1;
///             // the lock must be "explicitly" unlocked before `guard`
///             // goes out of scope.
///             guard.unlock();
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
pub struct SpinLock<T: ?Sized> {
    name: &'static str,
    kind: SpinLockKind,
    locked: CachePadded<AtomicBool>,
    data: UnsafeCell<T>,
}

unsafe impl<T: ?Sized + Send> Send for SpinLock<T> {}
unsafe impl<T: ?Sized + Send> Sync for SpinLock<T> {}

impl<T> SpinLock<T> {
    /// Creates a new spinlock in an unlocked state ready for use.
    ///
    /// # Examples
    ///
    /// ```
    /// use caldera::sync::SpinLock;
    ///
    /// let spinlock = SpinLock::new(0);
    /// ```
    #[inline]
    pub const fn new(t: T) -> SpinLock<T> {
        Self::named(t, "spinlock")
    }

    /// Creates a new spinlock carrying a debug tag, used in every
    /// diagnostic this lock emits.
    #[inline]
    pub const fn named(t: T, name: &'static str) -> SpinLock<T> {
        Self::with_kind(t, name, SpinLockKind::Normal)
    }

    /// Creates a new spinlock of an explicit [`SpinLockKind`].
    #[inline]
    pub const fn with_kind(t: T, name: &'static str, kind: SpinLockKind) -> SpinLock<T> {
        SpinLock {
            name,
            kind,
            locked: CachePadded::new(AtomicBool::new(false)),
            data: UnsafeCell::new(t),
        }
    }
}

impl<T: ?Sized> SpinLock<T> {
    /// The debug tag this lock was created with.
    #[inline]
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// The flavor this lock was created with.
    #[inline]
    pub fn kind(&self) -> SpinLockKind {
        self.kind
    }

    /// Acquires a spinlock, spinning the current thread until it is able to
    /// do so.
    ///
    /// Upon returning, the thread is the only thread with the lock held, and
    /// its critical level is raised until the guard is unlocked. A guard is
    /// returned to allow scoped access to the data. When the guard goes out
    /// of scope without [`SpinLockGuard::unlock`], panic occurs.
    ///
    /// The exact behavior on locking a spinlock in the thread which already
    /// holds the lock is left unspecified. However, this function will not
    /// return on the second call (it might panic or deadlock, for example).
    #[track_caller]
    pub fn lock(&self) -> SpinLockGuard<'_, T> {
        let guard = loop {
            let guard = PreemptGuard::new();

            if !self.locked.fetch_or(true) {
                break guard;
            }

            drop(guard);
            core::hint::spin_loop();
            std::thread::yield_now();
        };

        SpinLockGuard {
            caller: core::panic::Location::caller(),
            lock: self,
            guard: Some(guard),
        }
    }

    /// Attempts to acquire this lock.
    ///
    /// If the lock could not be acquired at this time, then [`Err`] is
    /// returned. Otherwise, a guard is returned.
    ///
    /// This function does not spin.
    ///
    /// # Errors
    ///
    /// If the spinlock could not be acquired because it is already locked,
    /// then this call will return the [`WouldBlock`] error.
    #[track_caller]
    pub fn try_lock(&self) -> Result<SpinLockGuard<'_, T>, WouldBlock> {
        let guard = PreemptGuard::new();
        let acquired = !self.locked.fetch_or(true);
        if acquired {
            Ok(SpinLockGuard {
                caller: core::panic::Location::caller(),
                lock: self,
                guard: Some(guard),
            })
        } else {
            Err(WouldBlock)
        }
    }

    /// Consumes this spinlock, returning the underlying data.
    pub fn into_inner(self) -> T
    where
        T: Sized,
    {
        self.data.into_inner()
    }
}

impl<T: Default> Default for SpinLock<T> {
    /// Creates a `SpinLock<T>`, with the `Default` value for T.
    fn default() -> SpinLock<T> {
        SpinLock::new(Default::default())
    }
}

impl<T: ?Sized> core::fmt::Debug for SpinLock<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SpinLock")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}

impl<T: ?Sized> Deref for SpinLockGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        unsafe { &*self.lock.data.get() }
    }
}

impl<T: ?Sized> DerefMut for SpinLockGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.lock.data.get() }
    }
}

/// An implementation of a "scoped lock" of a spinlock. When this structure
/// is dropped (falls out of scope) without unlock, panic occurs.
///
/// The lock must be explicitly unlocked by the [`unlock`] method.
///
/// The data protected by the spinlock can be accessed through this guard.
///
/// This structure is created by the [`lock`] and [`try_lock`] methods on
/// [`SpinLock`].
///
/// [`lock`]: SpinLock::lock
/// [`try_lock`]: SpinLock::try_lock
/// [`unlock`]: Self::unlock
pub struct SpinLockGuard<'a, T: ?Sized + 'a> {
    caller: &'static core::panic::Location<'static>,
    lock: &'a SpinLock<T>,
    guard: Option<PreemptGuard>,
}

unsafe impl<T: ?Sized + Sync> Sync for SpinLockGuard<'_, T> {}

impl<T: ?Sized> SpinLockGuard<'_, T> {
    /// Releases the underlying [`SpinLock`].
    ///
    /// As the guard does **not** automatically release the lock on drop,
    /// the caller must explicitly invoke [`unlock`] to mark the lock
    /// as available again.
    ///
    /// [`unlock`]: Self::unlock
    pub fn unlock(mut self) {
        self.lock.locked.store(false);
        self.guard.take();
        core::mem::forget(self);
    }
}

impl<T: ?Sized> Drop for SpinLockGuard<'_, T> {
    fn drop(&mut self) {
        // A guard dropped by an unwind releases the lock without panicking.
        if std::thread::panicking() {
            self.lock.locked.store(false);
            return;
        }
        panic!(
            "`.unlock()` must be explicitly called before dropping the guard of spinlock `{}`.
The lock is held at {:?}.",
            self.lock.name, self.caller
        );
    }
}

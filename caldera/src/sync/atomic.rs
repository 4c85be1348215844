//! A wrapper around the standard atomics.
//!
//! # Atomic types
//!
//! Atomic types provide primitive shared-memory communication between
//! threads, and are the building blocks of other concurrent types.
//!
//! Every operation exposed here is sequentially consistent; the `Ordering`
//! parameter is not part of this surface.

use core::sync::atomic::Ordering;

/// A boolean type which can be safely shared between threads.
///
/// This type has the same size, alignment, and bit validity as a [`bool`].
#[derive(Default)]
pub struct AtomicBool(core::sync::atomic::AtomicBool);

impl AtomicBool {
    /// Creates a new `AtomicBool`.
    #[inline]
    #[must_use]
    pub const fn new(v: bool) -> AtomicBool {
        Self(core::sync::atomic::AtomicBool::new(v))
    }

    /// Loads the value.
    #[inline]
    pub fn load(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Stores a value.
    #[inline]
    pub fn store(&self, v: bool) {
        self.0.store(v, Ordering::SeqCst)
    }

    /// Stores a value, returning the previous value.
    #[inline]
    pub fn swap(&self, v: bool) -> bool {
        self.0.swap(v, Ordering::SeqCst)
    }

    /// Logical "or" with the current value, returning the previous value.
    #[inline]
    pub fn fetch_or(&self, v: bool) -> bool {
        self.0.fetch_or(v, Ordering::SeqCst)
    }
}

macro_rules! atomic_int {
    ($(#[$attr:meta])* $name:ident, $int:ty, $std:ty) => {
        $(#[$attr])*
        #[derive(Default)]
        pub struct $name($std);

        impl $name {
            /// Creates a new atomic integer.
            #[inline]
            #[must_use]
            pub const fn new(v: $int) -> Self {
                Self(<$std>::new(v))
            }

            /// Loads the value.
            #[inline]
            pub fn load(&self) -> $int {
                self.0.load(Ordering::SeqCst)
            }

            /// Stores a value.
            #[inline]
            pub fn store(&self, v: $int) {
                self.0.store(v, Ordering::SeqCst)
            }

            /// Adds to the current value, returning the previous value.
            #[inline]
            pub fn fetch_add(&self, v: $int) -> $int {
                self.0.fetch_add(v, Ordering::SeqCst)
            }

            /// Subtracts from the current value, returning the previous
            /// value.
            #[inline]
            pub fn fetch_sub(&self, v: $int) -> $int {
                self.0.fetch_sub(v, Ordering::SeqCst)
            }

            /// Stores `new` if the current value equals `current`, returning
            /// the previous value on success.
            #[inline]
            pub fn compare_exchange(&self, current: $int, new: $int) -> Result<$int, $int> {
                self.0
                    .compare_exchange(current, new, Ordering::SeqCst, Ordering::SeqCst)
            }
        }
    };
}

atomic_int!(
    /// An integer type which can be safely shared between threads.
    AtomicU8,
    u8,
    core::sync::atomic::AtomicU8
);
atomic_int!(
    /// An integer type which can be safely shared between threads.
    AtomicI32,
    i32,
    core::sync::atomic::AtomicI32
);
atomic_int!(
    /// An integer type which can be safely shared between threads.
    AtomicU64,
    u64,
    core::sync::atomic::AtomicU64
);
atomic_int!(
    /// An integer type which can be safely shared between threads.
    AtomicUsize,
    usize,
    core::sync::atomic::AtomicUsize
);

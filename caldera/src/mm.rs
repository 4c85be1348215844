//! Address-space collaborator facade.
//!
//! The page-table manager is not part of this crate; processes only need
//! the narrow contract below: create an address space, own it exclusively,
//! and tear it down with the process. An [`AddressSpace`] is an opaque
//! handle; creation can fail with [`KernelError::NoMemory`], which callers
//! treat as resource exhaustion rather than retrying.

use crate::{
    KernelError,
    sync::atomic::{AtomicU64, AtomicUsize},
};

/// Upper bound on concurrently live address spaces.
pub const MAX_ADDRESS_SPACES: usize = 128;

static NEXT_ASID: AtomicU64 = AtomicU64::new(1);
static LIVE_SPACES: AtomicUsize = AtomicUsize::new(0);

/// An opaque handle to one address space, owned exclusively by a process
/// once created.
#[derive(Debug)]
pub struct AddressSpace {
    asid: u64,
}

impl AddressSpace {
    /// Creates a fresh, empty address space.
    ///
    /// # Errors
    ///
    /// Returns [`KernelError::NoMemory`] when no address-space slot is
    /// available.
    pub fn new() -> Result<AddressSpace, KernelError> {
        if LIVE_SPACES.fetch_add(1) >= MAX_ADDRESS_SPACES {
            LIVE_SPACES.fetch_sub(1);
            return Err(KernelError::NoMemory);
        }
        Ok(AddressSpace {
            asid: NEXT_ASID.fetch_add(1),
        })
    }

    /// The address-space identifier, stable for the lifetime of the handle.
    pub fn asid(&self) -> u64 {
        self.asid
    }
}

impl Drop for AddressSpace {
    fn drop(&mut self) {
        LIVE_SPACES.fetch_sub(1);
    }
}

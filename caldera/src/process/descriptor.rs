//! Per-process descriptor table.
//!
//! Descriptor semantics live in a collaborator; this crate only owns the
//! table's lifecycle: it is initialized when the process is created and
//! torn down first when the process is destroyed. Descriptors 0, 1 and 2
//! are wired to the console at initialization.

use bitflags::bitflags;
use std::collections::BTreeMap;

bitflags! {
    /// Access mode bits of one descriptor.
    pub struct DescriptorFlags: u32 {
        const READABLE = 1 << 0;
        const WRITABLE = 1 << 1;
        const CLOEXEC  = 1 << 2;
    }
}

/// What a descriptor refers to.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum DescriptorKind {
    /// The operator console.
    Console,
}

/// One open descriptor.
#[derive(Debug, Clone)]
pub struct Descriptor {
    pub kind: DescriptorKind,
    pub flags: DescriptorFlags,
}

/// The per-process descriptor table.
#[derive(Debug)]
pub struct DescriptorTable {
    next_fd: u32,
    table: BTreeMap<u32, Descriptor>,
}

impl DescriptorTable {
    /// Creates a table with the console wired to descriptors 0, 1 and 2.
    pub fn new() -> DescriptorTable {
        let mut table = DescriptorTable {
            next_fd: 0,
            table: BTreeMap::new(),
        };
        for _ in 0..3 {
            table.allocate(Descriptor {
                kind: DescriptorKind::Console,
                flags: DescriptorFlags::READABLE | DescriptorFlags::WRITABLE,
            });
        }
        table
    }

    /// Installs `descriptor` at the lowest unused number and returns it.
    pub fn allocate(&mut self, descriptor: Descriptor) -> u32 {
        let fd = self.next_fd;
        self.table.insert(fd, descriptor);
        self.next_fd = fd + 1;
        fd
    }

    /// Looks up an open descriptor.
    pub fn get(&self, fd: u32) -> Option<&Descriptor> {
        self.table.get(&fd)
    }

    /// Closes a descriptor.
    pub fn close(&mut self, fd: u32) -> Option<Descriptor> {
        self.table.remove(&fd)
    }

    /// The next descriptor number that [`allocate`](Self::allocate) would
    /// hand out.
    pub fn next_fd(&self) -> u32 {
        self.next_fd
    }
}

impl Default for DescriptorTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn console_descriptors_preinstalled() {
        let table = DescriptorTable::new();
        for fd in 0..3 {
            let d = table.get(fd).unwrap();
            assert_eq!(d.kind, DescriptorKind::Console);
            assert!(d.flags.contains(DescriptorFlags::READABLE | DescriptorFlags::WRITABLE));
        }
        assert_eq!(table.next_fd(), 3);
    }

    #[test]
    fn close_frees_entry_but_not_number() {
        let mut table = DescriptorTable::new();
        assert!(table.close(1).is_some());
        assert!(table.get(1).is_none());
        assert_eq!(
            table.allocate(Descriptor {
                kind: DescriptorKind::Console,
                flags: DescriptorFlags::WRITABLE,
            }),
            3
        );
    }
}

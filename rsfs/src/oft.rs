//! The open file table: one slot per descriptor, claimed and released under a table lock.

use crate::fs::{AccessMode, Fd};
use crate::node::InodeNumber;
use spin::Mutex;

/// State bound to a descriptor while the file is open.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpenFile {
    pub mode: AccessMode,
    pub inode: InodeNumber,
    /// Byte offset used by the next read or write.
    pub cursor: usize,
}

/// Fixed pool of descriptor slots. A descriptor is the index of its slot.
///
/// Claiming and releasing slots is serialized by the table lock. Each slot also has its own lock
/// which data transfers hold, so the table lock is never held while bytes move.
pub struct OpenFileTable {
    table: Mutex<()>,
    slots: Box<[Mutex<Option<OpenFile>>]>,
}

impl OpenFileTable {
    pub fn new(capacity: usize) -> Self {
        Self {
            table: Mutex::new(()),
            slots: (0..capacity).map(|_| Mutex::new(None)).collect(),
        }
    }

    /// Claims the lowest free slot for `inode`, with the cursor at zero.
    pub fn allocate(&self, mode: AccessMode, inode: InodeNumber) -> Option<Fd> {
        let _table = self.table.lock();
        for (fd, slot) in self.slots.iter().enumerate() {
            let mut slot = slot.lock();
            if slot.is_none() {
                *slot = Some(OpenFile {
                    mode,
                    inode,
                    cursor: 0,
                });
                return Some(fd);
            }
        }
        None
    }

    /// Empties slot `fd` and hands back what it held. Out-of-range or unused slots yield `None`.
    pub fn free(&self, fd: Fd) -> Option<OpenFile> {
        let slot = self.slots.get(fd)?;
        let _table = self.table.lock();
        let entry = slot.lock().take();
        entry
    }

    /// Runs `f` on the open file behind `fd` with the slot locked, or returns `None` if `fd`
    /// does not name an open file.
    pub fn with<R>(&self, fd: Fd, f: impl FnOnce(&mut OpenFile) -> R) -> Option<R> {
        let mut slot = self.slots.get(fd)?.lock();
        slot.as_mut().map(f)
    }

    pub fn in_use(&self) -> usize {
        let _table = self.table.lock();
        self.slots.iter().filter(|slot| slot.lock().is_some()).count()
    }
}

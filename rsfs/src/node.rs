//! Inodes and the fixed inode table.

use crate::alloc::{Bitmap, BlockId};
use crate::gate::AccessGate;
use spin::{Mutex, RwLock};

/// Index of an inode in the inode table.
pub type InodeNumber = usize;

/// Maps one file's bytes onto data blocks. Pointer `i` covers bytes
/// `[i * block_size, (i + 1) * block_size)`; every pointer below the length is assigned and none
/// above it is.
#[derive(Debug)]
pub struct Inode {
    /// High-water mark of bytes written, not the capacity of the assigned blocks.
    length: usize,
    /// Direct block pointers, `None` until the slot is first written.
    blocks: Box<[Option<BlockId>]>,
}

impl Inode {
    fn new(pointers: usize) -> Self {
        Self {
            length: 0,
            blocks: vec![None; pointers].into_boxed_slice(),
        }
    }

    pub fn len(&self) -> usize {
        self.length
    }

    pub fn block(&self, index: usize) -> Option<BlockId> {
        self.blocks.get(index).copied().flatten()
    }

    pub fn set_block(&mut self, index: usize, block: BlockId) {
        debug_assert!(self.blocks[index].is_none(), "pointer {} reassigned", index);
        self.blocks[index] = Some(block);
    }

    /// Clears pointer `index`, returning the block it held.
    pub fn unhook(&mut self, index: usize) -> Option<BlockId> {
        self.blocks.get_mut(index).and_then(Option::take)
    }

    /// Only grows; used by append.
    pub fn extend_to(&mut self, length: usize) {
        self.length = self.length.max(length);
    }

    /// Cuts the file at `length`, unhooking every pointer past the last block the new length
    /// touches. The caller owns returning the unhooked blocks to the pool.
    pub fn truncate(&mut self, length: usize, block_size: usize) -> Vec<BlockId> {
        let keep = (length + block_size - 1) / block_size;
        self.length = length;
        self.blocks
            .iter_mut()
            .skip(keep)
            .filter_map(Option::take)
            .collect()
    }

    /// Empties the inode, returning every block it held.
    pub fn clear(&mut self) -> Vec<BlockId> {
        self.length = 0;
        self.blocks.iter_mut().filter_map(Option::take).collect()
    }
}

pub struct InodeEntry {
    pub content: RwLock<Inode>,
    pub gate: AccessGate,
}

/// Fixed table of inodes with an occupancy bitmap. Content and admission state live with each
/// entry; the bitmap lock covers allocation only.
pub struct InodeGroup {
    nodes: Box<[InodeEntry]>,
    alloc_tracker: Mutex<Bitmap>,
}

impl InodeGroup {
    pub fn new(count: usize, pointers: usize) -> Self {
        let nodes = (0..count)
            .map(|_| InodeEntry {
                content: RwLock::new(Inode::new(pointers)),
                gate: AccessGate::new(),
            })
            .collect();
        Self {
            nodes,
            alloc_tracker: Mutex::new(Bitmap::new(count)),
        }
    }

    /// Claims a free inode with an empty mapping.
    pub fn allocate(&self) -> Option<InodeNumber> {
        let inum = self.alloc_tracker.lock().reserve_next()?;
        let leftover = self.nodes[inum].content.write().clear();
        debug_assert!(leftover.is_empty(), "inode {} was freed holding blocks", inum);
        debug!("allocated inode {}", inum);
        Some(inum)
    }

    pub fn free(&self, inum: InodeNumber) {
        self.alloc_tracker.lock().set_free(inum);
        debug!("freed inode {}", inum);
    }

    pub fn get(&self, inum: InodeNumber) -> &InodeEntry {
        &self.nodes[inum]
    }

    pub fn total_nodes(&self) -> usize {
        self.nodes.len()
    }

    pub fn used(&self) -> usize {
        self.alloc_tracker.lock().used()
    }
}

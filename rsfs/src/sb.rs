use crate::fs::{FileSystem, FsError, Result};
use crate::io::{BlockStorage, MemoryBlocks};
use std::convert::TryFrom;

pub const DEFAULT_BLOCK_SIZE: usize = 32;
pub const DEFAULT_BLOCKS: usize = 50;
pub const DEFAULT_INODES: usize = 8;
pub const DEFAULT_POINTERS: usize = 8;
pub const DEFAULT_OPEN_FILES: usize = 16;

/// Geometry of a file system instance, fixed when the instance is built.
///
/// Every pool is sized from these counts up front and never grows: the inode count bounds how
/// many files can exist, the pointer count bounds how large any one of them can get.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SuperBlock {
    /// Bytes per data block.
    pub block_size: usize,
    /// Data blocks in the pool shared by all files.
    pub blocks_count: usize,
    /// Inodes, and so directory records.
    pub inodes_count: usize,
    /// Direct block pointers per inode.
    pub pointers_per_inode: usize,
    /// Descriptor slots in the open file table.
    pub open_files_count: usize,
}

impl Default for SuperBlock {
    fn default() -> Self {
        Self {
            block_size: DEFAULT_BLOCK_SIZE,
            blocks_count: DEFAULT_BLOCKS,
            inodes_count: DEFAULT_INODES,
            pointers_per_inode: DEFAULT_POINTERS,
            open_files_count: DEFAULT_OPEN_FILES,
        }
    }
}

impl SuperBlock {
    /// Largest length a single file can reach.
    pub fn max_file_size(&self) -> usize {
        self.pointers_per_inode * self.block_size
    }

    pub fn validate(&self) -> Result<()> {
        let dims = [
            ("block size", self.block_size),
            ("block count", self.blocks_count),
            ("inode count", self.inodes_count),
            ("pointers per inode", self.pointers_per_inode),
            ("open file count", self.open_files_count),
        ];
        if let Some((what, _)) = dims.iter().find(|(_, n)| *n == 0) {
            return Err(FsError::InvalidArgument(format!("{} must be non-zero", what)));
        }
        if u32::try_from(self.blocks_count).is_err() || u32::try_from(self.inodes_count).is_err() {
            return Err(FsError::InvalidArgument(
                "block and inode counts must fit in 32 bits".to_string(),
            ));
        }
        if self.pointers_per_inode.checked_mul(self.block_size).is_none() {
            return Err(FsError::InvalidArgument(
                "maximum file size overflows".to_string(),
            ));
        }
        Ok(())
    }
}

/// Assembles a file system from a geometry, starting from the defaults.
///
/// ```
/// let fs = rsfs::FileSystem::builder()
///     .with_block_size(64)
///     .with_inodes(4)
///     .build()
///     .unwrap();
/// assert_eq!(fs.super_block().max_file_size(), 64 * 8);
/// ```
#[derive(Debug, Default)]
pub struct FileSystemBuilder {
    super_block: SuperBlock,
}

impl FileSystemBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_block_size(mut self, block_size: usize) -> Self {
        self.super_block.block_size = block_size;
        self
    }

    pub fn with_blocks(mut self, blocks_count: usize) -> Self {
        self.super_block.blocks_count = blocks_count;
        self
    }

    pub fn with_inodes(mut self, inodes_count: usize) -> Self {
        self.super_block.inodes_count = inodes_count;
        self
    }

    pub fn with_pointers(mut self, pointers_per_inode: usize) -> Self {
        self.super_block.pointers_per_inode = pointers_per_inode;
        self
    }

    pub fn with_open_files(mut self, open_files_count: usize) -> Self {
        self.super_block.open_files_count = open_files_count;
        self
    }

    /// Builds over freshly allocated in-memory blocks.
    pub fn build(self) -> Result<FileSystem<MemoryBlocks>> {
        self.super_block.validate()?;
        let dev = MemoryBlocks::new(self.super_block.block_size, self.super_block.blocks_count);
        FileSystem::with_storage(self.super_block, dev)
    }

    /// Builds over caller-provided block storage, which must match the configured geometry.
    pub fn build_on<T: BlockStorage>(self, dev: T) -> Result<FileSystem<T>> {
        FileSystem::with_storage(self.super_block, dev)
    }
}

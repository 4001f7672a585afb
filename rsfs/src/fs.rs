use crate::alloc::{BlockId, BlockPool};
use crate::dir::{self, Directory};
use crate::io::{BlockStorage, MemoryBlocks};
use crate::node::{Inode, InodeGroup, InodeNumber};
use crate::oft::OpenFileTable;
use crate::sb::{FileSystemBuilder, SuperBlock};

use spin::Mutex;
use std::convert::TryFrom;
use std::fmt;
use std::io::ErrorKind;
use thiserror::Error;

/// A file descriptor: the index of a slot in the open file table.
pub type Fd = usize;

pub type Result<T> = std::result::Result<T, FsError>;

/// Integer flag for [`AccessMode::ReadOnly`].
pub const RSFS_RDONLY: i32 = 0;
/// Integer flag for [`AccessMode::ReadWrite`].
pub const RSFS_RDWR: i32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    ReadOnly,
    ReadWrite,
}

impl TryFrom<i32> for AccessMode {
    type Error = FsError;

    fn try_from(flag: i32) -> Result<Self> {
        match flag {
            RSFS_RDONLY => Ok(AccessMode::ReadOnly),
            RSFS_RDWR => Ok(AccessMode::ReadWrite),
            other => Err(FsError::InvalidArgument(format!(
                "unknown access flag {}",
                other
            ))),
        }
    }
}

#[derive(Error, Debug)]
pub enum FsError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("descriptor {0} is not open")]
    BadDescriptor(Fd),
    #[error("found no file with that name")]
    DoesNotExist,
    #[error("a file with that name already exists")]
    AlreadyExists,
    #[error("no free inode")]
    NoFreeInode,
    #[error("directory is full")]
    DirectoryFull,
    #[error("open file table is full")]
    NoFreeDescriptor,
    #[error("descriptor was opened read-only")]
    ReadOnly,
    #[error("seek to {offset} outside the file, cursor stays at {cursor}")]
    SeekOutOfBounds { offset: i64, cursor: usize },
    #[error("file is open")]
    Busy,
    #[error("invalid block access")]
    InvalidBlock(#[from] std::io::Error),
}

impl FsError {
    /// Negative status code for callers that speak integers.
    pub fn code(&self) -> i32 {
        match self {
            FsError::InvalidArgument(_)
            | FsError::BadDescriptor(_)
            | FsError::DoesNotExist
            | FsError::AlreadyExists
            | FsError::ReadOnly
            | FsError::SeekOutOfBounds { .. } => -1,
            FsError::NoFreeInode | FsError::DirectoryFull | FsError::NoFreeDescriptor => -2,
            FsError::Busy => -3,
            FsError::InvalidBlock(_) => -4,
        }
    }
}

/// A volatile, single-directory file system over a fixed pool of blocks.
///
/// All operations take `&self`; share an instance between threads through an `Arc`. Opening a
/// file negotiates reader/writer admission on its inode and may block until a conflicting
/// descriptor is closed. Everything else only takes short-held locks.
///
/// # Layout
/// ==================================================================================
/// | SuperBlock | Directory records | Inodes + bitmap | Block bitmap | Data blocks |
/// ==================================================================================
pub struct FileSystem<T: BlockStorage = MemoryBlocks> {
    dev: T,
    super_block: SuperBlock,
    root: Mutex<Directory>,
    inodes: InodeGroup,
    data_map: BlockPool,
    open_files: OpenFileTable,
    stat_lock: Mutex<()>,
}

impl FileSystem<MemoryBlocks> {
    /// Initializes a file system with the default geometry.
    pub fn new() -> Self {
        let super_block = SuperBlock::default();
        let dev = MemoryBlocks::new(super_block.block_size, super_block.blocks_count);
        Self::assemble(super_block, dev)
    }

    pub fn builder() -> FileSystemBuilder {
        FileSystemBuilder::new()
    }
}

impl Default for FileSystem<MemoryBlocks> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: BlockStorage> FileSystem<T> {
    /// Initializes the file system onto owned block storage.
    pub fn with_storage(super_block: SuperBlock, dev: T) -> Result<Self> {
        super_block.validate()?;
        if dev.block_size() != super_block.block_size {
            return Err(FsError::InvalidArgument(format!(
                "storage block size {} does not match {}",
                dev.block_size(),
                super_block.block_size
            )));
        }
        if dev.block_count() < super_block.blocks_count {
            return Err(FsError::InvalidArgument(format!(
                "storage holds {} blocks, {} required",
                dev.block_count(),
                super_block.blocks_count
            )));
        }
        Ok(Self::assemble(super_block, dev))
    }

    fn assemble(super_block: SuperBlock, dev: T) -> Self {
        info!(
            "initialized file system: {} blocks of {} bytes, {} inodes, {} descriptors",
            super_block.blocks_count,
            super_block.block_size,
            super_block.inodes_count,
            super_block.open_files_count
        );
        Self {
            dev,
            root: Mutex::new(Directory::new(super_block.inodes_count)),
            inodes: InodeGroup::new(super_block.inodes_count, super_block.pointers_per_inode),
            data_map: BlockPool::new(super_block.blocks_count),
            open_files: OpenFileTable::new(super_block.open_files_count),
            stat_lock: Mutex::new(()),
            super_block,
        }
    }

    pub fn super_block(&self) -> &SuperBlock {
        &self.super_block
    }

    /// Creates an empty file called `name`.
    pub fn create(&self, name: &str) -> Result<()> {
        dir::validate_name(name)?;
        let mut root = self.root.lock();
        if root.lookup(name).is_some() {
            warn!("create: file {:?} already exists", name);
            return Err(FsError::AlreadyExists);
        }
        let inum = self.inodes.allocate().ok_or_else(|| {
            warn!("create: failed to allocate an inode for {:?}", name);
            FsError::NoFreeInode
        })?;
        if let Err(e) = root.insert(name, inum) {
            self.inodes.free(inum);
            return Err(e);
        }
        info!("created {:?} with inode {}", name, inum);
        Ok(())
    }

    /// Removes `name` and returns its blocks and inode to their pools.
    ///
    /// A file that is open, or that an opener has been admitted to, is left alone and `Busy`
    /// is returned.
    pub fn delete(&self, name: &str) -> Result<()> {
        dir::validate_name(name)?;
        let inum = {
            let mut root = self.root.lock();
            let inum = root.lookup(name).ok_or(FsError::DoesNotExist)?;
            let gate = &self.inodes.get(inum).gate;
            if !gate.is_idle() {
                warn!("delete: {:?} is in use ({:?})", name, gate.state());
                return Err(FsError::Busy);
            }
            root.remove(name);
            inum
        };

        // Unlinked and idle: no descriptor can reach the inode any more.
        let blocks = self.inodes.get(inum).content.write().clear();
        for block in blocks {
            self.release_block(block);
        }
        self.inodes.free(inum);
        info!("deleted {:?}, inode {} reclaimed", name, inum);
        Ok(())
    }

    /// Opens `name`, blocking until `mode` is compatible with the descriptors already open on
    /// the file.
    pub fn open(&self, name: &str, mode: AccessMode) -> Result<Fd> {
        dir::validate_name(name)?;
        let mut inum = self.root.lock().lookup(name).ok_or_else(|| {
            debug!("open: {:?} does not exist", name);
            FsError::DoesNotExist
        })?;

        // The name may be deleted or recreated while we wait for admission. Once admitted the
        // inode cannot be deleted, so a matching lookup afterwards pins it.
        loop {
            let gate = &self.inodes.get(inum).gate;
            gate.admit(mode);
            let current = self.root.lock().lookup(name);
            match current {
                Some(found) if found == inum => break,
                _ => {
                    gate.release(mode);
                    inum = current.ok_or_else(|| {
                        debug!("open: {:?} was deleted while waiting", name);
                        FsError::DoesNotExist
                    })?;
                }
            }
        }

        match self.open_files.allocate(mode, inum) {
            Some(fd) => {
                debug!("opened {:?} (inode {}) as fd {} {:?}", name, inum, fd, mode);
                Ok(fd)
            }
            None => {
                self.inodes.get(inum).gate.release(mode);
                warn!("open: no free descriptor for {:?}", name);
                Err(FsError::NoFreeDescriptor)
            }
        }
    }

    /// Closes `fd`. The descriptor is invalid before the admission it held is given back.
    pub fn close(&self, fd: Fd) -> Result<()> {
        let file = self.open_files.free(fd).ok_or(FsError::BadDescriptor(fd))?;
        self.inodes.get(file.inode).gate.release(file.mode);
        debug!("closed fd {} (inode {})", fd, file.inode);
        Ok(())
    }

    /// Reads from the cursor towards the end of the file, up to `buf.len()` bytes. Returns the
    /// number of bytes read, zero at end of file.
    pub fn read(&self, fd: Fd, buf: &mut [u8]) -> Result<usize> {
        self.open_files
            .with(fd, |file| -> Result<usize> {
                let node = self.inodes.get(file.inode).content.read();
                let count = buf.len().min(node.len().saturating_sub(file.cursor));
                self.copy_out(&node, file.cursor, &mut buf[..count])?;
                file.cursor += count;
                Ok(count)
            })
            .unwrap_or(Err(FsError::BadDescriptor(fd)))
    }

    /// Writes `buf` at the cursor and truncates the file where the write ends.
    ///
    /// Returns the number of bytes written, which falls short of `buf.len()` when the block
    /// pool runs dry, the file reaches its maximum size or the storage faults after some bytes
    /// were already stored. A fault before the first byte is returned as an error.
    pub fn write(&self, fd: Fd, buf: &[u8]) -> Result<usize> {
        self.open_files
            .with(fd, |file| -> Result<usize> {
                check_writable(file.mode, buf)?;
                let mut node = self.inodes.get(file.inode).content.write();
                let fill = self.fill(&mut node, file.cursor, buf);
                file.cursor += fill.stored;
                for block in node.truncate(file.cursor, self.super_block.block_size) {
                    self.release_block(block);
                }
                let written = fill.into_result()?;
                if written < buf.len() {
                    warn!("write: fd {} wrote {} of {} bytes", fd, written, buf.len());
                }
                Ok(written)
            })
            .unwrap_or(Err(FsError::BadDescriptor(fd)))
    }

    /// Appends `buf` at the end of the file, wherever the cursor was. The cursor ends up after
    /// the appended bytes.
    pub fn append(&self, fd: Fd, buf: &[u8]) -> Result<usize> {
        self.open_files
            .with(fd, |file| -> Result<usize> {
                check_writable(file.mode, buf)?;
                let mut node = self.inodes.get(file.inode).content.write();
                file.cursor = node.len();
                let fill = self.fill(&mut node, file.cursor, buf);
                file.cursor += fill.stored;
                node.extend_to(file.cursor);
                let appended = fill.into_result()?;
                if appended < buf.len() {
                    warn!("append: fd {} appended {} of {} bytes", fd, appended, buf.len());
                }
                Ok(appended)
            })
            .unwrap_or(Err(FsError::BadDescriptor(fd)))
    }

    /// Moves the cursor to `offset`, which must lie within `[0, length]`. On a bad offset the
    /// cursor is untouched and reported back in the error.
    pub fn fseek(&self, fd: Fd, offset: i64) -> Result<usize> {
        self.open_files
            .with(fd, |file| -> Result<usize> {
                let length = self.inodes.get(file.inode).content.read().len();
                match usize::try_from(offset) {
                    Ok(position) if position <= length => {
                        file.cursor = position;
                        Ok(position)
                    }
                    _ => {
                        debug!("fseek: fd {} offset {} outside [0, {}]", fd, offset, length);
                        Err(FsError::SeekOutOfBounds {
                            offset,
                            cursor: file.cursor,
                        })
                    }
                }
            })
            .unwrap_or(Err(FsError::BadDescriptor(fd)))
    }

    /// Snapshot of the directory and pool usage. Concurrent stat calls are serialized; other
    /// operations may interleave with the collection.
    pub fn stat(&self) -> FsStat {
        let _stat = self.stat_lock.lock();
        let files = self
            .root
            .lock()
            .entries()
            .into_iter()
            .map(|(name, inode)| FileStat {
                length: self.inodes.get(inode).content.read().len(),
                name,
                inode,
            })
            .collect();

        let blocks_used = self.data_map.used();
        let inodes_used = self.inodes.used();
        FsStat {
            files,
            blocks_total: self.data_map.capacity(),
            blocks_used,
            inodes_total: self.inodes.total_nodes(),
            inodes_used,
            open_files: self.open_files.in_use(),
        }
    }

    /// Copies `buf.len()` bytes of content starting at `offset`, block by block.
    fn copy_out(&self, node: &Inode, mut offset: usize, buf: &mut [u8]) -> Result<()> {
        let block_size = self.super_block.block_size;
        let mut done = 0;
        while done < buf.len() {
            let within = offset % block_size;
            let span = (block_size - within).min(buf.len() - done);
            let block = node.block(offset / block_size).ok_or_else(|| {
                std::io::Error::new(ErrorKind::InvalidData, "unassigned block inside file")
            })?;
            self.dev
                .read_block(block.index(), within, &mut buf[done..done + span])?;
            done += span;
            offset += span;
        }
        Ok(())
    }

    /// Writes `buf` from `offset` onward, backing each pointer with a fresh block on first use.
    /// Stops early when the pool is exhausted, the last pointer is full or the storage faults.
    /// The inode length is left to the caller; a block allocated for a faulted write is unhooked
    /// again so no pointer ends up past the bytes actually stored.
    fn fill(&self, node: &mut Inode, mut offset: usize, buf: &[u8]) -> Fill {
        let block_size = self.super_block.block_size;
        let capacity = self.super_block.max_file_size();
        let mut done = 0;
        while done < buf.len() && offset < capacity {
            let index = offset / block_size;
            let (block, fresh) = match node.block(index) {
                Some(block) => (block, false),
                None => match self.data_map.allocate() {
                    Some(block) => {
                        node.set_block(index, block);
                        (block, true)
                    }
                    None => {
                        warn!("no data block left for pointer {}", index);
                        break;
                    }
                },
            };
            let within = offset % block_size;
            let span = (block_size - within).min(buf.len() - done);
            if let Err(e) = self
                .dev
                .write_block(block.index(), within, &buf[done..done + span])
            {
                error!("write to data block {} failed: {}", block.index(), e);
                if fresh {
                    node.unhook(index);
                    self.release_block(block);
                }
                return Fill {
                    stored: done,
                    fault: Some(e),
                };
            }
            done += span;
            offset += span;
        }
        Fill {
            stored: done,
            fault: None,
        }
    }

    fn release_block(&self, block: BlockId) {
        if let Err(e) = self.dev.clear_block(block.index()) {
            error!("failed to clear data block {}: {}", block.index(), e);
        }
        self.data_map.release(block);
    }
}

/// Outcome of a block fill: the bytes stored before it stopped, and the storage fault that
/// stopped it, if any.
struct Fill {
    stored: usize,
    fault: Option<std::io::Error>,
}

impl Fill {
    /// Progress wins over a fault; the fault only surfaces when nothing was stored.
    fn into_result(self) -> Result<usize> {
        match self.fault {
            Some(e) if self.stored == 0 => Err(e.into()),
            Some(e) => {
                warn!("storage fault after {} bytes: {}", self.stored, e);
                Ok(self.stored)
            }
            None => Ok(self.stored),
        }
    }
}

fn check_writable(mode: AccessMode, buf: &[u8]) -> Result<()> {
    if buf.is_empty() {
        return Err(FsError::InvalidArgument(
            "write size must be positive".to_string(),
        ));
    }
    if mode != AccessMode::ReadWrite {
        return Err(FsError::ReadOnly);
    }
    Ok(())
}

/// One directory entry as reported by [`FileSystem::stat`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileStat {
    pub name: String,
    pub length: usize,
    pub inode: InodeNumber,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FsStat {
    pub files: Vec<FileStat>,
    pub blocks_total: usize,
    pub blocks_used: usize,
    pub inodes_total: usize,
    pub inodes_used: usize,
    pub open_files: usize,
}

impl FsStat {
    pub fn file(&self, name: &str) -> Option<&FileStat> {
        self.files.iter().find(|file| file.name == name)
    }
}

impl fmt::Display for FsStat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Current status of the file system:")?;
        writeln!(f)?;
        writeln!(f, "{:>16}{:>10}{:>10}", "File Name", "Length", "iNode #")?;
        for file in &self.files {
            writeln!(f, "{:>16}{:>10}{:>10}", file.name, file.length, file.inode)?;
        }
        writeln!(f)?;
        writeln!(
            f,
            "Total Data Blocks: {:4},  Used: {},  Unused: {}",
            self.blocks_total,
            self.blocks_used,
            self.blocks_total - self.blocks_used
        )?;
        writeln!(
            f,
            "Total iNode Blocks: {:3},  Used: {},  Unused: {}",
            self.inodes_total,
            self.inodes_used,
            self.inodes_total - self.inodes_used
        )?;
        writeln!(f, "Total Opened Files: {:3}", self.open_files)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_fs() -> FileSystem {
        FileSystem::builder()
            .with_block_size(4)
            .with_blocks(8)
            .with_inodes(3)
            .with_pointers(4)
            .with_open_files(4)
            .build()
            .unwrap()
    }

    fn length_of<T: BlockStorage>(fs: &FileSystem<T>, name: &str) -> usize {
        fs.stat().file(name).unwrap().length
    }

    /// In-memory blocks that refuse every write to one block number.
    struct BrokenBlock {
        inner: MemoryBlocks,
        broken: usize,
    }

    impl BlockStorage for BrokenBlock {
        fn block_size(&self) -> usize {
            self.inner.block_size()
        }

        fn block_count(&self) -> usize {
            self.inner.block_count()
        }

        fn read_block(&self, blocknr: usize, offset: usize, buf: &mut [u8]) -> std::io::Result<()> {
            self.inner.read_block(blocknr, offset, buf)
        }

        fn write_block(&self, blocknr: usize, offset: usize, buf: &[u8]) -> std::io::Result<()> {
            if blocknr == self.broken {
                return Err(std::io::Error::new(ErrorKind::Other, "bad block"));
            }
            self.inner.write_block(blocknr, offset, buf)
        }

        fn clear_block(&self, blocknr: usize) -> std::io::Result<()> {
            self.inner.clear_block(blocknr)
        }
    }

    #[test]
    fn access_flags_map_to_modes() {
        assert_eq!(AccessMode::try_from(RSFS_RDONLY).unwrap(), AccessMode::ReadOnly);
        assert_eq!(AccessMode::try_from(RSFS_RDWR).unwrap(), AccessMode::ReadWrite);
        match AccessMode::try_from(7) {
            Err(FsError::InvalidArgument(_)) => (),
            other => panic!("unexpected result {:?}", other),
        }
    }

    #[test]
    fn error_codes_are_negative() {
        assert_eq!(FsError::DoesNotExist.code(), -1);
        assert_eq!(FsError::AlreadyExists.code(), -1);
        assert_eq!(FsError::NoFreeInode.code(), -2);
        assert_eq!(FsError::NoFreeDescriptor.code(), -2);
        assert_eq!(FsError::Busy.code(), -3);
    }

    #[test]
    fn write_spanning_blocks_allocates_each_pointer() {
        let fs = small_fs();
        fs.create("a").unwrap();
        let fd = fs.open("a", AccessMode::ReadWrite).unwrap();

        assert_eq!(fs.write(fd, b"0123456789").unwrap(), 10);
        assert_eq!(fs.stat().blocks_used, 3);
        assert_eq!(length_of(&fs, "a"), 10);

        fs.fseek(fd, 3).unwrap();
        let mut buf = [0; 6];
        assert_eq!(fs.read(fd, &mut buf).unwrap(), 6);
        assert_eq!(&buf, b"345678");
    }

    #[test]
    fn overwrite_in_the_middle_drops_the_tail() {
        let fs = small_fs();
        fs.create("a").unwrap();
        let fd = fs.open("a", AccessMode::ReadWrite).unwrap();
        fs.write(fd, b"0123456789ab").unwrap();

        fs.fseek(fd, 2).unwrap();
        assert_eq!(fs.write(fd, b"XY").unwrap(), 2);
        assert_eq!(length_of(&fs, "a"), 4);
        assert_eq!(fs.stat().blocks_used, 1);

        fs.fseek(fd, 0).unwrap();
        let mut buf = [0; 12];
        assert_eq!(fs.read(fd, &mut buf).unwrap(), 4);
        assert_eq!(&buf[..4], b"01XY");
    }

    #[test]
    fn fill_stops_at_pointer_capacity() {
        let fs = small_fs();
        fs.create("a").unwrap();
        let fd = fs.open("a", AccessMode::ReadWrite).unwrap();

        assert_eq!(fs.write(fd, &[1; 20]).unwrap(), 16);
        assert_eq!(fs.append(fd, b"more").unwrap(), 0);
        assert_eq!(length_of(&fs, "a"), 16);
    }

    #[test]
    fn third_create_on_two_inodes_runs_out_of_inodes() {
        let fs = FileSystem::builder()
            .with_block_size(4)
            .with_blocks(8)
            .with_inodes(2)
            .with_pointers(4)
            .build()
            .unwrap();
        fs.create("a").unwrap();
        fs.create("b").unwrap();

        let err = fs.create("c").unwrap_err();
        assert!(matches!(err, FsError::NoFreeInode));
        assert_eq!(err.code(), -2);

        let stat = fs.stat();
        assert_eq!(stat.files.len(), 2);
        assert_eq!(stat.inodes_used, 2);
    }

    #[test]
    fn storage_fault_keeps_the_bytes_already_stored() {
        let dev = BrokenBlock {
            inner: MemoryBlocks::new(4, 8),
            broken: 2,
        };
        let fs = FileSystem::builder()
            .with_block_size(4)
            .with_blocks(8)
            .with_inodes(3)
            .with_pointers(4)
            .build_on(dev)
            .unwrap();
        fs.create("a").unwrap();
        let fd = fs.open("a", AccessMode::ReadWrite).unwrap();

        // Blocks 0 and 1 take the first eight bytes; block 2 faults and goes back to the pool.
        assert_eq!(fs.write(fd, &[7; 10]).unwrap(), 8);
        assert_eq!(length_of(&fs, "a"), 8);
        assert_eq!(fs.stat().blocks_used, 2);

        // The append lands on block 2 again, stores nothing and surfaces the fault.
        let err = fs.append(fd, b"x").unwrap_err();
        assert!(matches!(err, FsError::InvalidBlock(_)));
        assert_eq!(err.code(), -4);
        assert_eq!(length_of(&fs, "a"), 8);
        assert_eq!(fs.stat().blocks_used, 2);

        fs.fseek(fd, 0).unwrap();
        let mut buf = [0; 12];
        assert_eq!(fs.read(fd, &mut buf).unwrap(), 8);
        assert_eq!(&buf[..8], &[7; 8]);
    }

    #[test]
    fn freed_blocks_come_back_zeroed() {
        let fs = small_fs();
        fs.create("a").unwrap();
        let fd = fs.open("a", AccessMode::ReadWrite).unwrap();
        fs.write(fd, &[0xaa; 8]).unwrap();
        fs.fseek(fd, 0).unwrap();
        fs.write(fd, b"z").unwrap();

        let mut raw = [0xff; 4];
        fs.dev.read_block(1, 0, &mut raw).unwrap();
        assert_eq!(raw, [0; 4]);
    }

    #[test]
    fn stat_renders_every_file() {
        let fs = small_fs();
        fs.create("alpha").unwrap();
        fs.create("beta").unwrap();
        let fd = fs.open("beta", AccessMode::ReadWrite).unwrap();
        fs.append(fd, b"hey").unwrap();

        let stat = fs.stat();
        assert_eq!(stat.open_files, 1);
        assert_eq!(stat.inodes_used, 2);
        assert_eq!(stat.file("beta").unwrap().length, 3);

        let rendered = stat.to_string();
        assert!(rendered.contains("alpha"));
        assert!(rendered.contains("Used: 1,  Unused: 7"));
        assert!(rendered.contains("Total Opened Files:   1"));
    }
}

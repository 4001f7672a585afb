//! An in-memory file system with a single flat directory.
//!
//! Files live in a fixed pool of data blocks, each mapped through a fixed array of direct block
//! pointers on its inode. Nothing is persisted. A [`FileSystem`] is shared between threads by
//! reference; opening a file admits the caller as a reader or as the sole writer of that file.
//!
//! ```
//! use rsfs::{AccessMode, FileSystem};
//!
//! let fs = FileSystem::new();
//! fs.create("a").unwrap();
//! let fd = fs.open("a", AccessMode::ReadWrite).unwrap();
//! assert_eq!(fs.write(fd, b"hello").unwrap(), 5);
//! fs.fseek(fd, 0).unwrap();
//!
//! let mut buf = [0; 5];
//! assert_eq!(fs.read(fd, &mut buf).unwrap(), 5);
//! assert_eq!(&buf, b"hello");
//! fs.close(fd).unwrap();
//! fs.delete("a").unwrap();
//! ```

#[macro_use]
extern crate log;

mod alloc;
mod dir;
mod fs;
mod gate;
pub mod io;
mod node;
mod oft;
mod sb;

pub use crate::dir::NAME_LEN;
pub use crate::fs::{
    AccessMode, Fd, FileStat, FileSystem, FsError, FsStat, Result, RSFS_RDONLY, RSFS_RDWR,
};
pub use crate::node::InodeNumber;
pub use crate::sb::{
    FileSystemBuilder, SuperBlock, DEFAULT_BLOCKS, DEFAULT_BLOCK_SIZE, DEFAULT_INODES,
    DEFAULT_OPEN_FILES, DEFAULT_POINTERS,
};

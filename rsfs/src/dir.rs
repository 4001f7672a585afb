//! The root directory: a flat table of `(name, inode)` records packed into one byte region.

use crate::fs::{FsError, Result};
use crate::node::InodeNumber;
use std::convert::TryFrom;
use zerocopy::{AsBytes, FromBytes, FromZeroes};

/// Longest file name, in bytes.
pub const NAME_LEN: usize = 28;

/// On-region layout of one directory record. An all-zero name marks a vacant record.
#[repr(C)]
#[derive(AsBytes, FromBytes, FromZeroes, Clone, Copy)]
struct DirEntry {
    name: [u8; NAME_LEN],
    /// Little-endian inode number.
    inode: [u8; 4],
}

const ENTRY_SIZE: usize = std::mem::size_of::<DirEntry>();

impl DirEntry {
    fn new(name: &str, inum: InodeNumber) -> Result<Self> {
        let inum = u32::try_from(inum)
            .map_err(|_| FsError::InvalidArgument(format!("inode {} exceeds u32", inum)))?;
        let mut entry = Self::new_zeroed();
        entry.name[..name.len()].copy_from_slice(name.as_bytes());
        entry.inode = inum.to_le_bytes();
        Ok(entry)
    }

    fn is_vacant(&self) -> bool {
        self.name[0] == 0
    }

    fn name(&self) -> &[u8] {
        let end = self.name.iter().position(|&b| b == 0).unwrap_or(NAME_LEN);
        &self.name[..end]
    }

    fn inode(&self) -> InodeNumber {
        u32::from_le_bytes(self.inode) as InodeNumber
    }
}

/// Rejects names that cannot be stored in a record.
pub fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(FsError::InvalidArgument("file name is empty".to_string()));
    }
    if name.len() > NAME_LEN {
        return Err(FsError::InvalidArgument(format!(
            "file name longer than {} bytes",
            NAME_LEN
        )));
    }
    if name.as_bytes().contains(&0) {
        return Err(FsError::InvalidArgument(
            "file name contains a NUL byte".to_string(),
        ));
    }
    Ok(())
}

pub struct Directory {
    data: Box<[u8]>,
}

impl Directory {
    pub fn new(capacity: usize) -> Self {
        Self {
            data: vec![0; capacity * ENTRY_SIZE].into_boxed_slice(),
        }
    }

    fn records(&self) -> impl Iterator<Item = DirEntry> + '_ {
        self.data
            .chunks_exact(ENTRY_SIZE)
            .filter_map(DirEntry::read_from)
            .filter(|entry| !entry.is_vacant())
    }

    pub fn lookup(&self, name: &str) -> Option<InodeNumber> {
        self.records()
            .find(|entry| entry.name() == name.as_bytes())
            .map(|entry| entry.inode())
    }

    /// Stores `name -> inum` in the first vacant record. Does not check for duplicates.
    pub fn insert(&mut self, name: &str, inum: InodeNumber) -> Result<()> {
        validate_name(name)?;
        let entry = DirEntry::new(name, inum)?;
        let record = self
            .data
            .chunks_exact_mut(ENTRY_SIZE)
            .find(|record| DirEntry::read_from(&record[..]).map_or(false, |e| e.is_vacant()))
            .ok_or(FsError::DirectoryFull)?;
        record.copy_from_slice(entry.as_bytes());
        Ok(())
    }

    /// Vacates the record for `name`, returning the inode it pointed at.
    pub fn remove(&mut self, name: &str) -> Option<InodeNumber> {
        for record in self.data.chunks_exact_mut(ENTRY_SIZE) {
            let entry = match DirEntry::read_from(&record[..]) {
                Some(entry) if !entry.is_vacant() && entry.name() == name.as_bytes() => entry,
                _ => continue,
            };
            record.iter_mut().for_each(|b| *b = 0);
            return Some(entry.inode());
        }
        None
    }

    /// Every live `(name, inode)` pair in record order.
    pub fn entries(&self) -> Vec<(String, InodeNumber)> {
        self.records()
            .map(|entry| {
                (
                    String::from_utf8_lossy(entry.name()).into_owned(),
                    entry.inode(),
                )
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_are_thirty_two_bytes() {
        assert_eq!(ENTRY_SIZE, 32);
    }

    #[test]
    fn insert_lookup_remove() {
        let mut dir = Directory::new(4);
        dir.insert("a", 0).unwrap();
        dir.insert("notes.txt", 3).unwrap();

        assert_eq!(dir.lookup("a"), Some(0));
        assert_eq!(dir.lookup("notes.txt"), Some(3));
        assert_eq!(dir.lookup("notes"), None);
        assert_eq!(dir.entries().len(), 2);

        assert_eq!(dir.remove("a"), Some(0));
        assert_eq!(dir.remove("a"), None);
        assert_eq!(dir.lookup("a"), None);
        assert_eq!(dir.entries(), vec![("notes.txt".to_string(), 3)]);
    }

    #[test]
    fn vacated_record_is_reused() {
        let mut dir = Directory::new(2);
        dir.insert("a", 0).unwrap();
        dir.insert("b", 1).unwrap();
        match dir.insert("c", 2) {
            Err(FsError::DirectoryFull) => (),
            other => panic!("unexpected result {:?}", other),
        }

        dir.remove("a");
        dir.insert("c", 2).unwrap();
        assert_eq!(dir.entries()[0], ("c".to_string(), 2));
    }

    #[test]
    fn full_length_name_round_trips() {
        let name = "x".repeat(NAME_LEN);
        let mut dir = Directory::new(1);
        dir.insert(&name, 7).unwrap();
        assert_eq!(dir.lookup(&name), Some(7));
    }

    #[test]
    fn bad_names_are_rejected() {
        assert!(validate_name("").is_err());
        assert!(validate_name(&"y".repeat(NAME_LEN + 1)).is_err());
        assert!(validate_name("a\0b").is_err());
        assert!(validate_name("ok").is_ok());
    }
}

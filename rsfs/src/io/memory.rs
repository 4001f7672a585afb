use crate::io::{BlockNumber, BlockStorage};
use spin::RwLock;
use std::io::ErrorKind;

/// Keeps every block in a preallocated heap buffer. Nothing survives the process; this is the
/// only storage the file system ships with.
pub struct MemoryBlocks {
    blocks: Box<[RwLock<Box<[u8]>>]>,
    block_size: usize,
}

impl MemoryBlocks {
    pub fn new(block_size: usize, block_count: usize) -> Self {
        let blocks = (0..block_count)
            .map(|_| RwLock::new(vec![0; block_size].into_boxed_slice()))
            .collect();
        Self { blocks, block_size }
    }

    fn check_range(&self, blocknr: BlockNumber, offset: usize, len: usize) -> std::io::Result<()> {
        if blocknr >= self.blocks.len() {
            return Err(std::io::Error::new(
                ErrorKind::InvalidInput,
                "block out of range",
            ));
        }
        match offset.checked_add(len) {
            Some(end) if end <= self.block_size => Ok(()),
            _ => Err(std::io::Error::new(
                ErrorKind::InvalidInput,
                "access crosses the end of the block",
            )),
        }
    }
}

impl BlockStorage for MemoryBlocks {
    fn block_size(&self) -> usize {
        self.block_size
    }

    fn block_count(&self) -> usize {
        self.blocks.len()
    }

    fn read_block(
        &self,
        blocknr: BlockNumber,
        offset: usize,
        buf: &mut [u8],
    ) -> std::io::Result<()> {
        self.check_range(blocknr, offset, buf.len())?;
        let block = self.blocks[blocknr].read();
        buf.copy_from_slice(&block[offset..offset + buf.len()]);
        Ok(())
    }

    fn write_block(&self, blocknr: BlockNumber, offset: usize, buf: &[u8]) -> std::io::Result<()> {
        self.check_range(blocknr, offset, buf.len())?;
        let mut block = self.blocks[blocknr].write();
        block[offset..offset + buf.len()].copy_from_slice(buf);
        Ok(())
    }

    fn clear_block(&self, blocknr: BlockNumber) -> std::io::Result<()> {
        self.check_range(blocknr, 0, 0)?;
        self.blocks[blocknr].write().iter_mut().for_each(|b| *b = 0);
        Ok(())
    }
}

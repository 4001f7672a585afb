/// The block number to access ranging from 0 (the first block) to n - 1 (the last
/// block) where n is number of blocks available.
pub type BlockNumber = usize;

/// Fixed-size block storage backing file content.
///
/// Every access addresses a byte range inside one block: `offset` is relative to the start of
/// the block and `offset + buf.len()` may not exceed the block size. Implementations take
/// `&self` and synchronize internally so that readers of distinct files never contend.
pub trait BlockStorage: Send + Sync {
    /// Size in bytes of every block.
    fn block_size(&self) -> usize;
    /// The total number of blocks available in the store.
    fn block_count(&self) -> usize;
    /// Reads `buf.len()` bytes starting at `offset` within block `blocknr`.
    ///
    /// # Errors
    ///
    /// Attempting to read a block out of range, or past the end of a block, will return an
    /// error.
    fn read_block(&self, blocknr: BlockNumber, offset: usize, buf: &mut [u8])
        -> std::io::Result<()>;
    /// Writes `buf` starting at `offset` within block `blocknr`.
    ///
    /// # Errors
    ///
    /// Attempting to write a block out of range, or past the end of a block, will return an
    /// error.
    fn write_block(&self, blocknr: BlockNumber, offset: usize, buf: &[u8]) -> std::io::Result<()>;
    /// Zeroes an entire block.
    fn clear_block(&self, blocknr: BlockNumber) -> std::io::Result<()> {
        let zeros = vec![0; self.block_size()];
        self.write_block(blocknr, 0, &zeros)
    }
}

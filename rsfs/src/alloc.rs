//! Occupancy bitmaps and the data block pool.

use crate::io::BlockNumber;
use spin::Mutex;

const WORD_BITS: usize = 64;

#[derive(Debug, PartialEq, Clone, Copy)]
pub enum State {
    Free,
    Used,
}

/// Occupancy map with one bit per pool slot. Slot `n` lives in word `n / 64` at bit `n % 64`;
/// trailing bits of the last word past `cap` are never handed out.
#[derive(Debug, Clone)]
pub struct Bitmap {
    bitmap: Vec<u64>,
    cap: usize,
}

impl Bitmap {
    pub fn new(cap: usize) -> Self {
        Self {
            bitmap: vec![0; (cap + WORD_BITS - 1) / WORD_BITS],
            cap,
        }
    }

    pub fn capacity(&self) -> usize {
        self.cap
    }

    pub fn get(&self, nr: usize) -> State {
        assert!(nr < self.cap, "bitmap slot {} out of range", nr);
        let word = self.bitmap[nr / WORD_BITS];
        let inner_offset = nr % WORD_BITS;
        match (word >> inner_offset) & 0b01 {
            0 => State::Free,
            _ => State::Used,
        }
    }

    pub fn set_reserved(&mut self, nr: usize) {
        assert!(nr < self.cap, "bitmap slot {} out of range", nr);
        self.bitmap[nr / WORD_BITS] |= 0b01_u64 << (nr % WORD_BITS);
    }

    pub fn set_free(&mut self, nr: usize) {
        assert!(nr < self.cap, "bitmap slot {} out of range", nr);
        self.bitmap[nr / WORD_BITS] &= !(0b01_u64 << (nr % WORD_BITS));
    }

    /// Number of slots currently marked used.
    pub fn used(&self) -> usize {
        self.bitmap.iter().map(|word| word.count_ones() as usize).sum()
    }

    /// Reserves the lowest free slot and returns it, or `None` when every slot is taken.
    pub fn reserve_next(&mut self) -> Option<usize> {
        let nr = NextAvailableAllocation::new(self).next()?;
        self.set_reserved(nr);
        Some(nr)
    }
}

/// Implements a naive first-fit allocation policy: walks the bitmap from the front and yields
/// each free slot in order. Fully occupied words are skipped whole.
pub struct NextAvailableAllocation<'a> {
    /// Keeps track of the next starting place for looking for available slots.
    marker: usize,
    bitmap: &'a Bitmap,
}

impl<'a> NextAvailableAllocation<'a> {
    pub fn new(bitmap: &'a Bitmap) -> Self {
        Self { marker: 0, bitmap }
    }
}

impl<'a> Iterator for NextAvailableAllocation<'a> {
    type Item = usize;

    fn next(&mut self) -> Option<Self::Item> {
        while self.marker < self.bitmap.cap {
            let word = self.bitmap.bitmap[self.marker / WORD_BITS];
            if word == u64::MAX && self.marker % WORD_BITS == 0 {
                self.marker += WORD_BITS;
                continue;
            }
            let nr = self.marker;
            self.marker += 1;
            if let State::Free = self.bitmap.get(nr) {
                return Some(nr);
            }
        }
        None
    }
}

/// Index of a data block in the block pool. Direct pointers hold `Option<BlockId>`, so an
/// unassigned pointer can never be mistaken for block zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockId(u32);

impl BlockId {
    pub fn index(self) -> BlockNumber {
        self.0 as BlockNumber
    }
}

/// Allocator for the data region. The bitmap lock is held only for a single bit flip.
pub struct BlockPool {
    data_map: Mutex<Bitmap>,
}

impl BlockPool {
    pub fn new(blocks: usize) -> Self {
        Self {
            data_map: Mutex::new(Bitmap::new(blocks)),
        }
    }

    pub fn allocate(&self) -> Option<BlockId> {
        let nr = self.data_map.lock().reserve_next()?;
        debug!("allocated data block {}", nr);
        Some(BlockId(nr as u32))
    }

    pub fn release(&self, block: BlockId) {
        self.data_map.lock().set_free(block.index());
        debug!("released data block {}", block.index());
    }

    pub fn capacity(&self) -> usize {
        self.data_map.lock().capacity()
    }

    pub fn used(&self) -> usize {
        self.data_map.lock().used()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn can_read_and_write_values_to_bitmap() {
        let mut bmp = Bitmap::new(128);

        bmp.set_reserved(2);

        assert_eq!(bmp.get(0), State::Free);
        assert_eq!(bmp.get(2), State::Used);
    }

    #[test]
    fn can_set_values_at_ends_of_bitmap() {
        let mut bmp = Bitmap::new(4096);

        bmp.set_reserved(0);
        bmp.set_reserved(4095);

        assert_eq!(bmp.get(0), State::Used);
        assert_eq!(bmp.get(4095), State::Used);
        assert_eq!(bmp.used(), 2);
    }

    #[test]
    fn can_toggle_block_between_free_and_used() {
        let mut bmp = Bitmap::new(64);

        bmp.set_reserved(10);
        bmp.set_reserved(11);
        assert_eq!(bmp.get(10), State::Used);

        bmp.set_free(10);
        assert_eq!(bmp.get(10), State::Free);
        // Neighbouring bits in the same word survive.
        assert_eq!(bmp.get(11), State::Used);
    }

    #[test]
    #[should_panic]
    fn touching_slot_past_capacity_panics() {
        let bmp = Bitmap::new(10);
        bmp.get(10);
    }

    #[test]
    fn reserve_next_is_first_fit_and_respects_capacity() {
        let mut bmp = Bitmap::new(70);
        for expected in 0..70 {
            assert_eq!(bmp.reserve_next(), Some(expected));
        }
        assert_eq!(bmp.reserve_next(), None);

        bmp.set_free(3);
        bmp.set_free(65);
        assert_eq!(bmp.reserve_next(), Some(3));
        assert_eq!(bmp.reserve_next(), Some(65));
        assert_eq!(bmp.reserve_next(), None);
    }

    #[test]
    fn pool_counts_follow_allocations() {
        let pool = BlockPool::new(3);
        let a = pool.allocate().unwrap();
        let b = pool.allocate().unwrap();
        let c = pool.allocate().unwrap();
        assert_eq!(pool.allocate(), None);
        assert_eq!(pool.used(), 3);

        pool.release(b);
        assert_eq!(pool.used(), 2);
        assert_eq!(pool.allocate(), Some(b));
        assert_ne!(a, c);
        assert_eq!(pool.capacity(), 3);
    }
}

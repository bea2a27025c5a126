//! Tag allocation.
//!
//! Tags are one-byte request identifiers multiplexing replies on a
//! connection. The pool is a bitmap allocator: an id handed out by
//! [`TagPool::acquire`] is not handed out again until released, and
//! acquisition blocks while the tag space is saturated.

use std::sync::{Condvar, Mutex};

/// A bounded allocator for request tags in `[0, max]`.
pub struct TagPool {
    bits: Mutex<Vec<u64>>,
    available: Condvar,
    max: u16,
}

impl TagPool {
    /// Creates a pool handing out ids in `[0, max]`.
    pub fn new(max: u16) -> Self {
        let words = (usize::from(max) + 64) / 64;
        Self {
            bits: Mutex::new(vec![0u64; words]),
            available: Condvar::new(),
            max,
        }
    }

    /// Returns an unused id, blocking until one is released if the whole
    /// tag space is in use.
    pub fn acquire(&self) -> u8 {
        let mut bits = self.bits.lock().expect("tag pool poisoned");
        loop {
            for id in 0..=usize::from(self.max) {
                let (word, bit) = (id / 64, id % 64);
                if bits[word] & (1 << bit) == 0 {
                    bits[word] |= 1 << bit;
                    return id as u8;
                }
            }
            bits = self
                .available
                .wait(bits)
                .expect("tag pool poisoned");
        }
    }

    /// Releases an id, making it immediately reusable.
    pub fn release(&self, id: u8) {
        let (word, bit) = (usize::from(id) / 64, usize::from(id) % 64);
        let mut bits = self.bits.lock().expect("tag pool poisoned");
        bits[word] &= !(1 << bit);
        drop(bits);
        self.available.notify_one();
    }
}

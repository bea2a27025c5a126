//! # cask-types: Core types for the cask block store
//!
//! This crate contains the types shared across the cask system:
//! - Block identity ([`Score`]) and scoring ([`HasherPool`])
//! - Block classification ([`BlockType`])
//! - Protocol constants ([`SCORE_SIZE`], [`MAX_BLOCK`])
//!
//! A block's identity is the SHA-1 digest of its contents, so writes are
//! idempotent and the store is append-only in semantics.

use std::fmt::{self, Debug, Display};
use std::sync::Mutex;

use sha1::{Digest, Sha1};

mod stats;

pub use stats::Stats;

/// Length of a score in bytes (SHA-1 digest).
pub const SCORE_SIZE: usize = 20;

/// Maximum block size, which also bounds a single protocol frame.
pub const MAX_BLOCK: usize = 56 * 1024;

// ============================================================================
// Score
// ============================================================================

/// The SHA-1 digest of a block's payload; the block's identity.
///
/// Scores are cheap 20-byte values. They name a block's contents and never
/// own the block itself.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Score([u8; SCORE_SIZE]);

impl Score {
    /// Length of a score in bytes.
    pub const LENGTH: usize = SCORE_SIZE;

    /// The score of the empty input.
    pub const ZERO: Score = Score([
        0xda, 0x39, 0xa3, 0xee, 0x5e, 0x6b, 0x4b, 0x0d, 0x32, 0x55, 0xbf, 0xef, 0x95, 0x60, 0x18,
        0x90, 0xaf, 0xd8, 0x07, 0x09,
    ]);

    /// Creates a score from raw bytes.
    #[must_use]
    pub const fn from_bytes(bytes: [u8; SCORE_SIZE]) -> Self {
        Self(bytes)
    }

    /// Creates a score from a byte slice, or `None` if the length is wrong.
    #[must_use]
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        let arr: [u8; SCORE_SIZE] = bytes.try_into().ok()?;
        Some(Self(arr))
    }

    /// Returns the score as a byte slice.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; SCORE_SIZE] {
        &self.0
    }

    /// Computes the score of a payload.
    #[must_use]
    pub fn digest(data: &[u8]) -> Self {
        Self(Sha1::digest(data).into())
    }
}

impl From<[u8; SCORE_SIZE]> for Score {
    fn from(value: [u8; SCORE_SIZE]) -> Self {
        Self(value)
    }
}

impl From<Score> for [u8; SCORE_SIZE] {
    fn from(value: Score) -> Self {
        value.0
    }
}

impl Display for Score {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in &self.0 {
            write!(f, "{b:02x}")?;
        }
        Ok(())
    }
}

impl Debug for Score {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Score({self})")
    }
}

// ============================================================================
// BlockType
// ============================================================================

/// An 8-bit block classification carried alongside the score.
///
/// Three families, each divided into 8 pointer depths by the low bits:
/// data blocks, directory blocks, and root blocks. The wire encoding goes
/// through fixed translation tables in the codec; illegal wire codes decode
/// to [`BlockType::CORRUPT`].
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BlockType(pub u8);

impl BlockType {
    /// Data block family.
    pub const DATA: BlockType = BlockType(0);
    /// Directory block family.
    pub const DIR: BlockType = BlockType(8);
    /// Root block family.
    pub const ROOT: BlockType = BlockType(16);
    /// Sentinel for an illegal wire code.
    pub const CORRUPT: BlockType = BlockType(0xff);

    /// Returns the type at the given pointer depth within this family.
    #[must_use]
    pub const fn at_depth(self, depth: u8) -> Self {
        BlockType(self.0 + (depth & 0x7))
    }

    /// Returns the pointer depth within the family.
    #[must_use]
    pub const fn depth(self) -> u8 {
        self.0 & 0x7
    }

    /// Returns the family with the depth bits cleared.
    #[must_use]
    pub const fn family(self) -> Self {
        BlockType(self.0 & !0x7)
    }
}

impl From<u8> for BlockType {
    fn from(value: u8) -> Self {
        Self(value)
    }
}

impl From<BlockType> for u8 {
    fn from(value: BlockType) -> Self {
        value.0
    }
}

impl Debug for BlockType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.family() {
            BlockType::DATA => write!(f, "Data+{}", self.depth()),
            BlockType::DIR => write!(f, "Dir+{}", self.depth()),
            BlockType::ROOT => write!(f, "Root+{}", self.depth()),
            _ => write!(f, "Corrupt({:#04x})", self.0),
        }
    }
}

// ============================================================================
// HasherPool
// ============================================================================

/// A bounded free list of SHA-1 contexts.
///
/// Scoring every written block allocates a hash context; under concurrent
/// write load the pool amortises that. `acquire` pops and resets a pooled
/// context or creates a fresh one; `release` drops the context when the
/// pool is full.
pub struct HasherPool {
    free: Mutex<Vec<Sha1>>,
    capacity: usize,
}

impl HasherPool {
    /// Default pool capacity.
    pub const DEFAULT_CAPACITY: usize = 32;

    /// Creates a pool holding at most `capacity` idle contexts.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            free: Mutex::new(Vec::with_capacity(capacity)),
            capacity,
        }
    }

    /// Computes the score of `data` using a pooled context.
    #[must_use]
    pub fn score(&self, data: &[u8]) -> Score {
        let mut hasher = self.acquire();
        hasher.update(data);
        let digest = hasher.finalize_reset();
        self.release(hasher);
        Score(digest.into())
    }

    fn acquire(&self) -> Sha1 {
        let mut free = self.free.lock().expect("hasher pool poisoned");
        free.pop().unwrap_or_default()
    }

    fn release(&self, hasher: Sha1) {
        let mut free = self.free.lock().expect("hasher pool poisoned");
        if free.len() < self.capacity {
            free.push(hasher);
        }
    }
}

impl Default for HasherPool {
    fn default() -> Self {
        Self::new(Self::DEFAULT_CAPACITY)
    }
}

impl Debug for HasherPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HasherPool")
            .field("capacity", &self.capacity)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_score_is_digest_of_empty_input() {
        assert_eq!(Score::ZERO, Score::digest(b""));
    }

    #[test]
    fn score_digest_matches_known_vector() {
        // SHA-1("hello")
        assert_eq!(
            Score::digest(b"hello").to_string(),
            "aaf4c61ddcc5e8a2dabede0f3b482cd9aea9434d"
        );
    }

    #[test]
    fn score_display_is_lowercase_hex() {
        assert_eq!(
            Score::ZERO.to_string(),
            "da39a3ee5e6b4b0d3255bfef95601890afd80709"
        );
    }

    #[test]
    fn score_from_slice_rejects_wrong_length() {
        assert!(Score::from_slice(&[0u8; 19]).is_none());
        assert!(Score::from_slice(&[0u8; 21]).is_none());
        assert!(Score::from_slice(&[0u8; 20]).is_some());
    }

    #[test]
    fn score_roundtrips_through_bytes() {
        let score = Score::digest(b"roundtrip");
        let bytes: [u8; SCORE_SIZE] = score.into();
        assert_eq!(Score::from(bytes), score);
    }

    #[test]
    fn block_type_families_and_depths() {
        let t = BlockType::DIR.at_depth(3);
        assert_eq!(t.family(), BlockType::DIR);
        assert_eq!(t.depth(), 3);
        assert_eq!(BlockType::DATA.depth(), 0);
    }

    #[test]
    fn hasher_pool_matches_one_shot_digest() {
        let pool = HasherPool::default();
        assert_eq!(pool.score(b"pooled"), Score::digest(b"pooled"));
        // a recycled context must produce the same result
        assert_eq!(pool.score(b"pooled"), Score::digest(b"pooled"));
    }

    #[test]
    fn hasher_pool_survives_overflow() {
        let pool = HasherPool::new(1);
        for _ in 0..8 {
            assert_eq!(pool.score(b"x"), Score::digest(b"x"));
        }
    }
}

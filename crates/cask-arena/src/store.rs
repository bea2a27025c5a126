//! The content-addressed store: an arena plus the score index.
//!
//! Startup scans the arena and rehashes every payload (scores are not
//! stored inline with records). Writes dedup by score before appending,
//! so putting the same block twice never grows the arena.

use std::collections::HashMap;
use std::hash::{BuildHasherDefault, Hasher};
use std::path::Path;
use std::sync::RwLock;
use std::time::Instant;

use bytes::Bytes;
use cask_types::{HasherPool, Score};
use tracing::info;

use crate::arena::{Arena, ArenaConfig, BlockRef};
use crate::error::ArenaResult;

/// Hashes a score by folding its first 8 bytes.
///
/// Scores are already cryptographic digests; any fixed window of their
/// bytes is uniformly distributed, so the map needs no further mixing.
#[derive(Default)]
pub struct ScoreHasher {
    state: u64,
    filled: usize,
}

impl Hasher for ScoreHasher {
    fn write(&mut self, bytes: &[u8]) {
        for &b in bytes {
            if self.filled < 8 {
                self.state = (self.state << 8) | u64::from(b);
                self.filled += 1;
            }
        }
    }

    // slice length prefixes carry no entropy for fixed-size keys and
    // must not displace the score bytes
    fn write_usize(&mut self, _n: usize) {}

    fn finish(&self) -> u64 {
        self.state
    }
}

type ScoreHashState = BuildHasherDefault<ScoreHasher>;

struct StoreInner {
    arena: Arena,
    index: HashMap<Score, BlockRef, ScoreHashState>,
}

/// A content-addressed block store over an arena file.
///
/// `put` and `sync` take the write half of the lock (the arena serialises
/// all writes); `get` runs shared. Index entries are installed only after
/// the payload copy completes, so readers never observe a partial block.
pub struct Store {
    inner: RwLock<StoreInner>,
    hashers: HasherPool,
}

impl Store {
    /// Opens an arena file and rebuilds the score index by scanning.
    pub fn open(path: impl AsRef<Path>, config: ArenaConfig) -> ArenaResult<Self> {
        let mut arena = Arena::open(path, config)?;
        let blocks = arena.recover()?;
        Ok(Self::index_blocks(arena, blocks))
    }

    /// Creates a zero-filled arena file of `size` bytes and opens it.
    pub fn create(path: impl AsRef<Path>, size: u64, config: ArenaConfig) -> ArenaResult<Self> {
        let mut arena = Arena::create(path, size, config)?;
        let blocks = arena.recover()?;
        Ok(Self::index_blocks(arena, blocks))
    }

    fn index_blocks(arena: Arena, blocks: Vec<BlockRef>) -> Self {
        let hashers = HasherPool::default();
        let start = Instant::now();
        let mut index =
            HashMap::with_capacity_and_hasher(blocks.len().max(1 << 12), ScoreHashState::default());
        let mut bytes = 0u64;
        for block in blocks {
            let score = hashers.score(arena.payload(block));
            bytes += u64::from(block.len());
            index.insert(score, block);
        }

        info!(
            blocks = index.len(),
            bytes,
            used = arena.tip(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "indexed arena"
        );

        Self {
            inner: RwLock::new(StoreInner { arena, index }),
            hashers,
        }
    }

    /// Looks up a block by score.
    pub fn get(&self, score: &Score) -> Option<Bytes> {
        let inner = self.inner.read().expect("store lock poisoned");
        let block = *inner.index.get(score)?;
        Some(Bytes::copy_from_slice(inner.arena.payload(block)))
    }

    /// Stores a block, returning its score.
    ///
    /// Writes are idempotent: a block whose score is already indexed is
    /// not appended again.
    pub fn put(&self, data: &[u8]) -> ArenaResult<Score> {
        let score = self.hashers.score(data);
        let mut inner = self.inner.write().expect("store lock poisoned");
        if !inner.index.contains_key(&score) {
            let block = inner.arena.write(data)?;
            inner.index.insert(score, block);
        }
        Ok(score)
    }

    /// Flushes all unflushed writes to stable storage.
    pub fn sync(&self) -> ArenaResult<()> {
        let mut inner = self.inner.write().expect("store lock poisoned");
        inner.arena.sync()
    }

    /// Returns `true` if a block with this score is stored.
    pub fn contains(&self, score: &Score) -> bool {
        let inner = self.inner.read().expect("store lock poisoned");
        inner.index.contains_key(score)
    }

    /// Number of indexed blocks.
    pub fn block_count(&self) -> usize {
        let inner = self.inner.read().expect("store lock poisoned");
        inner.index.len()
    }

    /// Offset where the next record will be written.
    pub fn tip(&self) -> u64 {
        let inner = self.inner.read().expect("store lock poisoned");
        inner.arena.tip()
    }

    /// Offset up to which the log has been flushed.
    pub fn synctip(&self) -> u64 {
        let inner = self.inner.read().expect("store lock poisoned");
        inner.arena.synctip()
    }
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.read().expect("store lock poisoned");
        f.debug_struct("Store")
            .field("blocks", &inner.index.len())
            .field("arena", &inner.arena)
            .finish_non_exhaustive()
    }
}

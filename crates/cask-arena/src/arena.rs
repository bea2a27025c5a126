//! The memory-mapped append-only record log.
//!
//! # Record Layout
//!
//! ```text
//! ┌─────────┬─────────┬─────────┬──────────────────┐
//! │ Magic   │ Size    │ Next    │     Payload      │
//! │ (2 B)   │ (2 B)   │ (4 B)   │     (size B)     │
//! └─────────┴─────────┴─────────┴──────────────────┘
//! ```
//!
//! - **Magic**: `0x28b4`
//! - **Size**: payload bytes
//! - **Next**: offset delta to the next record header
//! - A header slot reading all zeroes is the canonical end of the log
//!
//! All integers are big-endian. The file is divided into fixed-size
//! chunks and no record straddles a chunk boundary: a record that would
//! not fit advances the tip to the next chunk and patches the previous
//! record's `next` delta so the startup scan can follow the chain.
//!
//! # Durability
//!
//! Writes land in the shared mapping; [`Arena::sync`] flushes the span
//! `[synctip, tip)` with `msync(MS_SYNC)` per intersected chunk,
//! page-aligned at the low end. After a successful sync a crash loses
//! only unflushed writes and the startup scan recovers everything
//! acknowledged before the sync.

use std::fs::OpenOptions;
use std::path::Path;

use memmap2::MmapMut;
use tracing::debug;

use crate::error::{ArenaError, ArenaResult};

/// Record header magic.
pub const RECORD_MAGIC: u16 = 0x28b4;

/// Record header size: magic[2] size[2] next[4].
pub const RECORD_HEADER_SIZE: u64 = 8;

/// Page size assumed for flush alignment.
const PAGE_SIZE: u64 = 4096;

/// Arena layout options.
#[derive(Debug, Clone, Copy)]
pub struct ArenaConfig {
    /// Chunk size; records never straddle a chunk boundary.
    pub chunk_size: u64,
    /// Record alignment. Zero disables alignment; otherwise `next` is
    /// rounded up so successive records start on aligned offsets.
    pub align: u64,
}

impl ArenaConfig {
    /// Default chunk size (1 GiB).
    pub const DEFAULT_CHUNK_SIZE: u64 = 1024 * 1024 * 1024;

    /// Sets the chunk size.
    #[must_use]
    pub fn with_chunk_size(mut self, chunk_size: u64) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    /// Sets the record alignment.
    #[must_use]
    pub fn with_align(mut self, align: u64) -> Self {
        self.align = align;
        self
    }
}

impl Default for ArenaConfig {
    fn default() -> Self {
        Self {
            chunk_size: Self::DEFAULT_CHUNK_SIZE,
            align: 0,
        }
    }
}

/// Location of a record payload inside the arena mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockRef {
    offset: u64,
    len: u32,
}

impl BlockRef {
    /// Byte offset of the payload in the arena file.
    #[must_use]
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Payload length in bytes.
    #[must_use]
    pub fn len(&self) -> u32 {
        self.len
    }

    /// Returns `true` for an empty payload.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// The memory-mapped append-only log.
///
/// # Invariants
///
/// - `0 <= synctip <= tip <= file size`
/// - `tip` is always at a record boundary (a terminator position or the
///   start of a chunk)
/// - `lastip` is the offset of the most recently written record header
pub struct Arena {
    map: MmapMut,
    size: u64,
    chunk_size: u64,
    align: u64,
    tip: u64,
    synctip: u64,
    lastip: Option<u64>,
}

impl Arena {
    /// Opens an existing arena file and maps it.
    ///
    /// The offsets start at zero; call [`Arena::recover`] to scan the log
    /// and position the tip.
    pub fn open(path: impl AsRef<Path>, config: ArenaConfig) -> ArenaResult<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        let size = file.metadata()?.len();
        // Safety note from memmap2: the mapping is undefined behavior only
        // if the file is truncated or rewritten externally while mapped;
        // the arena owns its file for the process lifetime.
        let map = unsafe { MmapMut::map_mut(&file)? };

        Ok(Self {
            map,
            size,
            chunk_size: config.chunk_size,
            align: config.align,
            tip: 0,
            synctip: 0,
            lastip: None,
        })
    }

    /// Creates a zero-filled arena file of `size` bytes and opens it.
    pub fn create(path: impl AsRef<Path>, size: u64, config: ArenaConfig) -> ArenaResult<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(&path)?;
        file.set_len(size)?;
        drop(file);
        Self::open(path, config)
    }

    /// Offset where the next record will be written.
    #[must_use]
    pub fn tip(&self) -> u64 {
        self.tip
    }

    /// Offset up to which the log has been flushed.
    #[must_use]
    pub fn synctip(&self) -> u64 {
        self.synctip
    }

    /// Total file size in bytes.
    #[must_use]
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Returns the payload bytes of a record.
    ///
    /// The reference is a view into the mapping; no I/O happens.
    #[must_use]
    pub fn payload(&self, block: BlockRef) -> &[u8] {
        let start = block.offset as usize;
        &self.map[start..start + block.len as usize]
    }

    /// Length of the chunk starting at `chunk_start` (the final chunk may
    /// be shorter than the configured chunk size).
    fn chunk_len(&self, chunk_start: u64) -> u64 {
        self.chunk_size.min(self.size - chunk_start)
    }

    /// Appends a record and returns the payload location.
    ///
    /// # Errors
    ///
    /// - [`ArenaError::Full`] if no chunk can hold the record.
    /// - [`ArenaError::ShortWrite`] if the payload exceeds the record
    ///   header's size field.
    pub fn write(&mut self, data: &[u8]) -> ArenaResult<BlockRef> {
        if data.len() > u16::MAX as usize {
            return Err(ArenaError::ShortWrite);
        }
        let blksz = RECORD_HEADER_SIZE + data.len() as u64;

        let mut chunk_start = self.tip / self.chunk_size * self.chunk_size;
        if chunk_start >= self.size {
            return Err(ArenaError::Full);
        }
        if self.tip - chunk_start + blksz >= self.chunk_len(chunk_start) {
            // Advance to the next chunk and patch the previous record's
            // next delta so the startup scan can follow. The patch sits in
            // an already-synced region, so pull synctip back to cover it.
            chunk_start += self.chunk_size;
            if chunk_start >= self.size || blksz >= self.chunk_len(chunk_start) {
                return Err(ArenaError::Full);
            }

            if let Some(lastip) = self.lastip {
                let next = (chunk_start - lastip) as u32;
                let at = lastip as usize + 4;
                self.map[at..at + 4].copy_from_slice(&next.to_be_bytes());
                self.synctip = lastip;
            }
            self.tip = chunk_start;
        }

        let mut nextoff = self.tip + blksz;
        if self.align > 0 {
            nextoff = nextoff.div_ceil(self.align) * self.align;
        }

        let at = self.tip as usize;
        self.map[at..at + 2].copy_from_slice(&RECORD_MAGIC.to_be_bytes());
        self.map[at + 2..at + 4].copy_from_slice(&(data.len() as u16).to_be_bytes());
        self.map[at + 4..at + 8].copy_from_slice(&((nextoff - self.tip) as u32).to_be_bytes());
        self.map[at + 8..at + 8 + data.len()].copy_from_slice(data);

        let block = BlockRef {
            offset: self.tip + RECORD_HEADER_SIZE,
            len: data.len() as u32,
        };
        self.lastip = Some(self.tip);
        self.tip = nextoff;

        Ok(block)
    }

    /// Reads the record at the tip and advances, as the startup scan does.
    ///
    /// Returns `Ok(None)` at the canonical end of the log (an all-zero
    /// header slot, or too little room left for a header).
    fn read_block(&mut self) -> ArenaResult<Option<BlockRef>> {
        if self.tip + RECORD_HEADER_SIZE > self.size {
            return Ok(None);
        }

        let at = self.tip as usize;
        let magic = u16::from_be_bytes([self.map[at], self.map[at + 1]]);
        let size = u16::from_be_bytes([self.map[at + 2], self.map[at + 3]]);
        let next = u32::from_be_bytes([
            self.map[at + 4],
            self.map[at + 5],
            self.map[at + 6],
            self.map[at + 7],
        ]);

        if magic != RECORD_MAGIC {
            if magic == 0 && size == 0 {
                return Ok(None);
            }
            return Err(ArenaError::MagicNotFound);
        }

        if u64::from(next) < RECORD_HEADER_SIZE + u64::from(size)
            || self.tip + RECORD_HEADER_SIZE + u64::from(size) > self.size
        {
            return Err(ArenaError::ShortWrite);
        }

        let block = BlockRef {
            offset: self.tip + RECORD_HEADER_SIZE,
            len: u32::from(size),
        };
        self.lastip = Some(self.tip);
        self.tip += u64::from(next);

        Ok(Some(block))
    }

    /// Scans the log from the start, positioning the tip at the end and
    /// returning every record found.
    ///
    /// Termination: an all-zero header slot is the clean end of the log.
    /// A bad magic before any record means the file was never an arena
    /// log and it is treated as empty. A bad magic after at least one
    /// record is corruption.
    pub fn recover(&mut self) -> ArenaResult<Vec<BlockRef>> {
        self.tip = 0;
        self.lastip = None;

        let mut blocks = Vec::new();
        loop {
            match self.read_block() {
                Ok(Some(block)) => blocks.push(block),
                Ok(None) => break,
                Err(ArenaError::MagicNotFound) if blocks.is_empty() => {
                    self.tip = 0;
                    self.lastip = None;
                    break;
                }
                Err(e) => return Err(e),
            }
        }

        self.synctip = self.tip;
        debug!(blocks = blocks.len(), tip = self.tip, "arena scan complete");
        Ok(blocks)
    }

    /// Flushes `[synctip, tip)` to stable storage.
    ///
    /// Issues one flush per intersected chunk over the page-aligned span
    /// containing the range. `synctip` advances only once the whole range
    /// is flushed, so a failed flush leaves the range to be retried.
    pub fn sync(&mut self) -> ArenaResult<()> {
        let tip = self.tip;
        let mut off = self.synctip;
        let mut count = tip - self.synctip;
        if count == 0 {
            return Ok(());
        }
        if off + count > self.size {
            return Err(ArenaError::InvalidSyncRange);
        }

        while count > 0 {
            let chunk_start = off / self.chunk_size * self.chunk_size;
            let span = count.min(chunk_start + self.chunk_len(chunk_start) - off);
            let start = off & !(PAGE_SIZE - 1);
            self.map.flush_range(start as usize, (off + span - start) as usize)?;
            off += span;
            count -= span;
        }

        self.synctip = tip;
        Ok(())
    }
}

impl std::fmt::Debug for Arena {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Arena")
            .field("size", &self.size)
            .field("chunk_size", &self.chunk_size)
            .field("align", &self.align)
            .field("tip", &self.tip)
            .field("synctip", &self.synctip)
            .field("lastip", &self.lastip)
            .finish()
    }
}

//! # cask-arena: Append-only arena storage for the cask block store
//!
//! The reference storage engine: a memory-mapped file used as a log of
//! records, with an in-memory score index rebuilt by scanning at startup.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                       cask-arena                        │
//! │  ┌────────────┐    ┌──────────────┐    ┌─────────────┐  │
//! │  │   Store    │ →  │    Arena     │ →  │  mmap file  │  │
//! │  │ (score map)│    │ (record log) │    │ (msync)     │  │
//! │  └────────────┘    └──────────────┘    └─────────────┘  │
//! └─────────────────────────────────────────────────────────┘
//! ```
//!
//! The arena is append-only: records are never modified or deleted, and
//! the same block written twice is deduplicated by score.

mod arena;
mod error;
mod store;

pub use arena::{Arena, ArenaConfig, BlockRef, RECORD_HEADER_SIZE, RECORD_MAGIC};
pub use error::{ArenaError, ArenaResult};
pub use store::{ScoreHasher, Store};

//! # cask-wire: Binary wire protocol for the cask block store
//!
//! This crate implements the Venti "02" wire protocol used between cask
//! clients and servers.
//!
//! ## Frame Format
//!
//! ```text
//! ┌─────────┬─────────┬─────────┬──────────────────┐
//! │ Size    │ Id      │ Tag     │      Body        │
//! │ (2 B)   │ (1 B)   │ (1 B)   │      (var)       │
//! └─────────┴─────────┴─────────┴──────────────────┘
//! ```
//!
//! - **Size**: bytes following the size field (total frame length minus 2)
//! - **Id**: message kind (see [`message::ids`])
//! - **Tag**: per-connection id matching replies to requests
//! - **Body**: hand-packed big-endian fields per message kind
//!
//! Frames are self-delimiting, so send loops batch many frames into one
//! write and receive loops decode them one at a time from an accumulation
//! buffer. The total frame size is bounded by [`MAX_FRAME`].
//!
//! Connections start with a text banner exchange ([`banner`]) before the
//! first framed message.

mod banner;
pub mod codec;
mod error;
mod frame;
mod message;

pub use banner::{check_banner, exchange_banner, BANNER, MAX_BANNER};
pub use error::{WireError, WireResult};
pub use frame::{frame_size, pack, unpack, Frame, FRAME_HEADER_SIZE, MAX_FRAME};
pub use message::{block_type_from_wire, block_type_to_wire, ids, Call};

//! # cask-client: Pipelined RPC client for the cask block store
//!
//! The client keeps many tagged requests in flight over one TCP
//! connection. A sender thread batches packed frames into single writes;
//! a receiver thread matches replies to pending requests by tag, so the
//! server is free to answer out of order.
//!
//! ```ignore
//! use cask_client::Client;
//! use cask_types::BlockType;
//!
//! let client = Client::connect("127.0.0.1:17034")?;
//! let score = client.put(BlockType::DATA, b"hello".as_ref().into())?;
//! client.sync()?;
//! let data = client.get(score, BlockType::DATA, 5)?;
//! ```
//!
//! Writes are acknowledged lazily: [`Client::put`] returns the locally
//! computed score at once, and [`Client::sync`] waits for every
//! outstanding write plus a server-side flush.

mod client;
mod error;
mod pool;

pub use client::{Client, ClientConfig};
pub use error::{ClientError, ClientResult};
pub use pool::TagPool;

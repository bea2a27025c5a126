//! # cask-server: Server engine for the cask block store
//!
//! The server speaks the wire protocol from `cask-wire` and dispatches
//! requests to a user-supplied [`Ops`] implementation.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                       cask-server                        │
//! │  ┌───────────┐    ┌────────────────┐    ┌─────────────┐  │
//! │  │ Listener  │ →  │ Conn recv/send │ →  │ Ops handler │  │
//! │  │ (banner)  │    │ (frame loops)  │    │ (per-task)  │  │
//! │  └───────────┘    └────────────────┘    └─────────────┘  │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! Each connection runs a receive loop and a send loop on dedicated
//! threads; every request is dispatched on its own task and handlers are
//! free to respond out of order. [`Ops`] provides default behavior for
//! unimplemented operations.
//!
//! ```ignore
//! use cask_server::{Ops, Req, Server, ServerConfig};
//!
//! struct Hollow;
//! impl Ops for Hollow {
//!     fn hello(&self, req: Req) {
//!         req.respond_hello("anonymous", 0, 0);
//!     }
//! }
//!
//! let server = Arc::new(Server::bind(ServerConfig::default(), Hollow)?);
//! server.run()?;
//! ```

mod config;
mod conn;
mod error;
mod handler;
mod request;
mod server;

pub use config::ServerConfig;
pub use error::{ServerError, ServerResult};
pub use handler::Ops;
pub use request::{ConnInfo, Req};
pub use server::Server;

#[cfg(test)]
mod tests;

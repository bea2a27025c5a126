//! The handler capability surface.
//!
//! A store implements [`Ops`] by overriding the operations it supports;
//! the provided defaults give the protocol behavior for everything else.
//! `ping` and `sync` auto-reply, while `hello`, `read` and `write`
//! answer "unsupported operation" until overridden.

use crate::request::{ConnInfo, Req};

pub(crate) const EUNSUPPORTED: &str = "unsupported operation";

/// Server operations, dispatched per request on their own task.
///
/// Handlers may reply in any order; every request must eventually be
/// answered through one of the consuming `respond_*` methods on
/// [`Req`]. Replying `Rhello` establishes the connection.
pub trait Ops: Send + Sync + 'static {
    /// Connection setup. Override to reply with [`Req::respond_hello`].
    fn hello(&self, req: Req) {
        req.respond_error(EUNSUPPORTED);
    }

    /// Liveness probe.
    fn ping(&self, req: Req) {
        req.respond_ping();
    }

    /// Block lookup by score.
    fn read(&self, req: Req) {
        req.respond_error(EUNSUPPORTED);
    }

    /// Block write.
    fn write(&self, req: Req) {
        req.respond_error(EUNSUPPORTED);
    }

    /// Durability barrier.
    fn sync(&self, req: Req) {
        req.respond_sync();
    }

    /// Called when a connection finishes its banner exchange.
    fn conn_opened(&self, _conn: &ConnInfo) {}

    /// Called when a connection is torn down.
    fn conn_closed(&self, _conn: &ConnInfo) {}
}

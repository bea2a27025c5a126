//! Request envelopes and the reuse pool.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use cask_types::Score;
use cask_wire::Call;
use tracing::trace;

use crate::conn::{ConnCore, SendCmd};

/// Connection identity handed to the lifecycle hooks.
#[derive(Debug, Clone)]
pub struct ConnInfo {
    /// Peer address.
    pub peer: SocketAddr,
}

pub(crate) struct ReqInner {
    pub(crate) tc: Call,
    pub(crate) tag: u8,
    pub(crate) conn: Option<Arc<ConnCore>>,
}

/// An in-flight request.
///
/// The envelope owns the decoded T-message and the means to reply. Every
/// `respond_*` method consumes the request, so exactly one reply goes out
/// per request; dropping a request without responding leaves the client
/// waiting until its connection dies, so don't.
pub struct Req {
    inner: Box<ReqInner>,
}

impl Req {
    pub(crate) fn new(inner: Box<ReqInner>) -> Self {
        Self { inner }
    }

    /// The decoded request message.
    #[must_use]
    pub fn call(&self) -> &Call {
        &self.inner.tc
    }

    /// The request's routing tag.
    #[must_use]
    pub fn tag(&self) -> u8 {
        self.inner.tag
    }

    /// Peer address of the connection this request arrived on.
    #[must_use]
    pub fn peer(&self) -> SocketAddr {
        self.conn().info.peer
    }

    pub(crate) fn conn(&self) -> &Arc<ConnCore> {
        self.inner.conn.as_ref().expect("request already responded")
    }

    /// Sends a reply and recycles the envelope.
    pub fn respond(mut self, rc: Call) {
        let conn = self.inner.conn.take().expect("request already responded");
        if matches!(rc, Call::Rhello { .. }) {
            conn.set_established();
        }
        trace!(peer = %conn.info.peer, tag = self.inner.tag, reply = %rc, "respond");
        let _ = conn.reqout.send(SendCmd::Respond {
            tag: self.inner.tag,
            rc,
        });
        conn.pool.free(self.inner);
    }

    /// Replies `Rerror` with `ename` delivered to the client verbatim.
    pub fn respond_error(self, ename: impl Into<String>) {
        self.respond(Call::Rerror {
            ename: ename.into(),
        });
    }

    pub fn respond_ping(self) {
        self.respond(Call::Rping);
    }

    pub fn respond_hello(self, sid: impl Into<String>, rcrypto: u8, rcodec: u8) {
        self.respond(Call::Rhello {
            sid: sid.into(),
            rcrypto,
            rcodec,
        });
    }

    pub fn respond_read(self, data: Bytes) {
        self.respond(Call::Rread { data });
    }

    pub fn respond_write(self, score: Score) {
        self.respond(Call::Rwrite { score });
    }

    pub fn respond_sync(self) {
        self.respond(Call::Rsync);
    }

    /// Consumes the request without a reply (farewells get none).
    pub(crate) fn discard(mut self) {
        let conn = self.inner.conn.take().expect("request already responded");
        conn.note_unanswered();
        conn.pool.free(self.inner);
    }
}

impl std::fmt::Debug for Req {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Req")
            .field("tag", &self.inner.tag)
            .field("call", &self.inner.tc)
            .finish()
    }
}

/// A bounded free list of request envelopes shared across the server.
pub(crate) struct ReqPool {
    free: Mutex<Vec<Box<ReqInner>>>,
    capacity: usize,
}

impl ReqPool {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            free: Mutex::new(Vec::with_capacity(capacity)),
            capacity,
        }
    }

    pub(crate) fn alloc(&self, tc: Call, tag: u8, conn: Arc<ConnCore>) -> Req {
        let recycled = self.free.lock().expect("request pool poisoned").pop();
        let mut inner = recycled.unwrap_or_else(|| {
            Box::new(ReqInner {
                tc: Call::Tping,
                tag: 0,
                conn: None,
            })
        });
        inner.tc = tc;
        inner.tag = tag;
        inner.conn = Some(conn);
        Req::new(inner)
    }

    pub(crate) fn free(&self, mut inner: Box<ReqInner>) {
        inner.tc = Call::Tping;
        inner.conn = None;
        let mut free = self.free.lock().expect("request pool poisoned");
        if free.len() < self.capacity {
            free.push(inner);
        }
    }
}

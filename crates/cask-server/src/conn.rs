//! Per-connection receive and send loops.
//!
//! Every connection owns two long-running threads. The receive loop
//! decodes frames, enforces the frame-size bound, and dispatches each
//! request on its own task; handlers may reply in any order. The send
//! loop serialises replies onto the wire in the order they respond,
//! batching as many packed frames as fit per write.

use std::io::{Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::mpsc::{Receiver, Sender, TryRecvError};
use std::sync::{mpsc, Arc, Mutex};

use bytes::BytesMut;
use cask_types::Stats;
use cask_wire::{frame_size, pack, unpack, Call, WireError, MAX_FRAME};
use tracing::{debug, trace, warn};

use crate::handler::Ops;
use crate::request::{ConnInfo, Req, ReqPool};

/// Pre-hello state: only `Thello` is admitted.
const STATUS_NEW: u8 = 0;
/// Post-`Rhello` state: normal operation.
const STATUS_ESTABLISHED: u8 = 1;

pub(crate) enum SendCmd {
    Respond { tag: u8, rc: Call },
    Shutdown,
}

/// State shared between a connection's loops and its in-flight requests.
pub(crate) struct ConnCore {
    pub(crate) info: ConnInfo,
    pub(crate) reqout: Sender<SendCmd>,
    pub(crate) pool: Arc<ReqPool>,
    pub(crate) stats: Mutex<Stats>,
    status: AtomicU8,
}

impl ConnCore {
    pub(crate) fn set_established(&self) {
        self.status.store(STATUS_ESTABLISHED, Ordering::SeqCst);
    }

    fn set_new(&self) {
        self.status.store(STATUS_NEW, Ordering::SeqCst);
    }

    fn is_new(&self) -> bool {
        self.status.load(Ordering::SeqCst) == STATUS_NEW
    }

    /// Bookkeeping for requests that get no reply.
    pub(crate) fn note_unanswered(&self) {
        let mut stats = self.stats.lock().expect("conn lock poisoned");
        stats.npend = stats.npend.saturating_sub(1);
    }
}

impl ConnCore {
    pub(crate) fn new(peer: SocketAddr, pool: Arc<ReqPool>) -> (Arc<Self>, Receiver<SendCmd>) {
        let (reqout, reqin) = mpsc::channel();
        let conn = Arc::new(ConnCore {
            info: ConnInfo { peer },
            reqout,
            pool,
            stats: Mutex::new(Stats::default()),
            status: AtomicU8::new(STATUS_NEW),
        });
        (conn, reqin)
    }

    /// Snapshot of this connection's counters.
    pub(crate) fn stats(&self) -> Stats {
        *self.stats.lock().expect("conn lock poisoned")
    }
}

/// Runs one connection to completion; returns its final counters.
///
/// The caller has already completed the banner exchange and registered
/// the connection. This spawns the send loop, runs the receive loop on
/// the current thread, and tears both down when the connection dies.
pub(crate) fn serve_conn(
    ops: &Arc<dyn Ops>,
    conn: Arc<ConnCore>,
    reqin: Receiver<SendCmd>,
    stream: TcpStream,
    read_buffer_size: usize,
    write_buffer_size: usize,
) -> Stats {
    let peer = conn.info.peer;
    ops.conn_opened(&conn.info);

    let write_half = match stream.try_clone() {
        Ok(s) => s,
        Err(e) => {
            warn!(peer = %peer, error = %e, "cannot split connection");
            ops.conn_closed(&conn.info);
            return Stats::default();
        }
    };
    let sender = {
        let conn = Arc::clone(&conn);
        std::thread::spawn(move || send_loop(&conn, &reqin, write_half, write_buffer_size))
    };

    recv_loop(ops, &conn, &stream, read_buffer_size);

    let _ = conn.reqout.send(SendCmd::Shutdown);
    let _ = stream.shutdown(Shutdown::Both);
    let _ = sender.join();

    ops.conn_closed(&conn.info);
    let stats = conn.stats();
    debug!(peer = %peer, nreqs = stats.nreqs, "connection closed");
    stats
}

/// Decodes requests and fires a task per request.
fn recv_loop(ops: &Arc<dyn Ops>, conn: &Arc<ConnCore>, stream: &TcpStream, bufsize: usize) {
    let mut stream = stream;
    let mut buf = BytesMut::with_capacity(bufsize);
    let mut tmp = vec![0u8; 64 * 1024];

    loop {
        loop {
            match frame_size(&buf) {
                Some(total) if total > MAX_FRAME => {
                    warn!(peer = %conn.info.peer, total, "oversized frame");
                    return;
                }
                Some(total) if buf.len() >= total => {
                    let tag = buf[3];
                    match unpack(&mut buf) {
                        Ok(Some(frame)) => {
                            trace!(peer = %conn.info.peer, tag, call = %frame.call, "request");
                            {
                                let mut stats = conn.stats.lock().expect("conn lock poisoned");
                                stats.nreqs += 1;
                                stats.tsz += frame.len as u64;
                                stats.npend += 1;
                                stats.maxpend = stats.maxpend.max(stats.npend);
                            }

                            let req = conn.pool.alloc(frame.call, tag, Arc::clone(conn));
                            let ops = Arc::clone(ops);
                            std::thread::spawn(move || process(&*ops, req));
                        }
                        // the frame header was readable, so answer with
                        // its tag and keep the connection
                        Err(e @ (WireError::Packet | WireError::BlockType)) => {
                            debug!(peer = %conn.info.peer, tag, error = %e, "bad request body");
                            let _ = conn.reqout.send(SendCmd::Respond {
                                tag,
                                rc: Call::Rerror {
                                    ename: e.to_string(),
                                },
                            });
                        }
                        Ok(None) | Err(_) => {
                            warn!(peer = %conn.info.peer, "undecodable frame");
                            return;
                        }
                    }
                }
                _ => break, // need more bytes
            }
        }

        match stream.read(&mut tmp) {
            Ok(0) => return,
            Ok(n) => {
                buf.extend_from_slice(&tmp[..n]);
                let mut stats = conn.stats.lock().expect("conn lock poisoned");
                stats.nreads += 1;
            }
            Err(e) => {
                debug!(peer = %conn.info.peer, error = %e, "read failed");
                return;
            }
        }
    }
}

/// Applies the connection state machine and dispatches to the handler.
fn process(ops: &dyn Ops, req: Req) {
    let conn = Arc::clone(req.conn());

    if conn.is_new() && !matches!(req.call(), Call::Thello { .. }) {
        req.respond_error("expecting hello message");
        return;
    }

    match req.call() {
        Call::Tping => ops.ping(req),
        Call::Thello { .. } => ops.hello(req),
        Call::Tgoodbye => {
            // back to square one; the client closes the connection next
            conn.set_new();
            req.discard();
        }
        Call::Tread { .. } => ops.read(req),
        Call::Twrite { .. } => ops.write(req),
        Call::Tsync => ops.sync(req),
        _ => req.respond_error("unknown message type"),
    }
}

/// Serialises replies onto the wire, batching packed frames per write.
fn send_loop(conn: &Arc<ConnCore>, reqin: &Receiver<SendCmd>, mut stream: TcpStream, bufsize: usize) {
    let mut buf = vec![0u8; bufsize];

    'outer: loop {
        let Ok(mut cmd) = reqin.recv() else {
            break;
        };

        let mut pos = 0;
        let mut nreqs = 0u64;
        loop {
            let (tag, rc) = match cmd {
                SendCmd::Shutdown => break 'outer,
                SendCmd::Respond { tag, rc } => (tag, rc),
            };

            match pack(&rc, tag, &mut buf[pos..]) {
                Ok(n) => {
                    pos += n;
                    nreqs += 1;
                }
                Err(WireError::BufferTooSmall { .. }) if pos > 0 => {
                    if !flush(conn, &mut stream, &buf[..pos], nreqs) {
                        break 'outer;
                    }
                    pos = 0;
                    nreqs = 0;
                    cmd = SendCmd::Respond { tag, rc };
                    continue; // retry against an empty buffer
                }
                Err(e) => {
                    warn!(peer = %conn.info.peer, tag, error = %e, "cannot pack reply");
                    conn.note_unanswered();
                }
            }

            match reqin.try_recv() {
                Ok(next) => cmd = next,
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => break,
            }
        }

        if pos > 0 && !flush(conn, &mut stream, &buf[..pos], nreqs) {
            break;
        }
    }
    trace!(peer = %conn.info.peer, "sender exiting");
}

/// Writes one batch of replies; on failure closes the socket so the
/// receive loop tears the connection down.
fn flush(conn: &ConnCore, stream: &mut TcpStream, batch: &[u8], nreqs: u64) -> bool {
    if let Err(e) = stream.write_all(batch) {
        debug!(peer = %conn.info.peer, error = %e, "error while writing");
        let _ = stream.shutdown(Shutdown::Both);
        return false;
    }

    let mut stats = conn.stats.lock().expect("conn lock poisoned");
    stats.rsz += batch.len() as u64;
    stats.npend = stats.npend.saturating_sub(nreqs);
    stats.nwrites += 1;
    true
}

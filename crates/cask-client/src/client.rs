//! The pipelined client engine.
//!
//! A connection owns two long-running threads. The sender drains a queue
//! of tagged requests, packing as many frames as fit into one buffer
//! before each write. The receiver decodes complete frames from an
//! accumulation buffer and matches each reply to its pending request by
//! tag; the server may reply in any order.
//!
//! Requests live in a pending table indexed by tag from the moment they
//! are queued until their reply (or the connection's terminal error)
//! completes them. [`Client::put`] never waits for the server: it returns
//! the locally computed score and [`Client::sync`] is the barrier that
//! collects every outstanding write.

use std::io::{Read, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use bytes::{Bytes, BytesMut};
use cask_types::{BlockType, HasherPool, Score, Stats, MAX_BLOCK};
use cask_wire::{exchange_banner, frame_size, pack, unpack, Call, WireError, MAX_FRAME};
use tracing::{debug, trace};

use crate::error::{ClientError, ClientResult};
use crate::pool::TagPool;

/// Client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// User name sent in the hello exchange.
    pub uid: String,
    /// Size of the batched write buffer.
    pub write_buffer_size: usize,
    /// Envelopes kept for reuse; beyond this they are dropped and their
    /// tags returned to the pool.
    pub reuse_capacity: usize,
}

impl ClientConfig {
    /// Sets the uid sent in the hello exchange.
    #[must_use]
    pub fn with_uid(mut self, uid: impl Into<String>) -> Self {
        self.uid = uid.into();
        self
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            uid: "anonymous".to_string(),
            write_buffer_size: 8 * MAX_BLOCK,
            reuse_capacity: 16,
        }
    }
}

/// Where a completed request envelope goes.
enum Done {
    /// Fire-and-forget; the envelope is recycled on completion.
    None,
    /// Routed back whole; the waiter recycles it.
    Internal(Sender<Box<Request>>),
    /// Extracted into a read result for [`Client::get_async`].
    Read(Sender<ClientResult<Bytes>>),
}

/// A request/response envelope, the unit of multiplexing.
struct Request {
    tc: Call,
    rc: Option<Call>,
    err: Option<ClientError>,
    tag: u8,
    done: Done,
}

impl Request {
    fn new(tag: u8) -> Self {
        Self {
            tc: Call::Tping,
            rc: None,
            err: None,
            tag,
            done: Done::None,
        }
    }

    /// Clears everything except the tag, which pooled envelopes retain.
    fn reset(&mut self) {
        self.tc = Call::Tping;
        self.rc = None;
        self.err = None;
        self.done = Done::None;
    }
}

enum SenderCmd {
    Queue(u8),
    Shutdown,
}

/// Connection-wide state under one lock: the pending table, the envelope
/// free list, the terminal error, and the stats counters.
struct State {
    pending: Vec<Option<Box<Request>>>,
    free: Vec<Box<Request>>,
    err: Option<String>,
    stats: Stats,
}

struct Core {
    state: Mutex<State>,
    reqout: Sender<SenderCmd>,
    socket: TcpStream,
    tags: TagPool,
    hashers: HasherPool,
    reuse_capacity: usize,
}

/// A connection to a block store server.
///
/// All operations take `&self`; wrap the client in an [`Arc`] to share it
/// across threads. Many requests may be in flight at once, bounded by the
/// 256-tag space.
pub struct Client {
    core: Arc<Core>,
    sender: Option<JoinHandle<()>>,
    receiver: Option<JoinHandle<()>>,
}

impl Client {
    /// Connects with the default configuration.
    pub fn connect(addr: impl ToSocketAddrs) -> ClientResult<Self> {
        Self::connect_with(addr, ClientConfig::default())
    }

    /// Connects, performs the banner exchange and the hello handshake.
    pub fn connect_with(addr: impl ToSocketAddrs, config: ClientConfig) -> ClientResult<Self> {
        let mut stream = TcpStream::connect(addr)?;
        exchange_banner(&mut stream)?;

        let client = Self::start(stream, &config)?;

        let (tx, rx) = mpsc::channel();
        let mut req = client.req_alloc();
        req.tc = Call::Thello {
            version: "02".to_string(),
            uid: config.uid.clone(),
            strength: 0,
            crypto: Bytes::new(),
            codec: Bytes::new(),
        };
        req.done = Done::Internal(tx);
        client.rpc_queue(req)?;

        let mut req = rx
            .recv()
            .map_err(|_| ClientError::Connection("client shut down".to_string()))?;
        let result = match req.err.take() {
            Some(e) => Err(e),
            None => match req.rc.take() {
                Some(Call::Rhello { sid, .. }) => {
                    debug!(sid = %sid, "connected");
                    Ok(())
                }
                _ => Err(ClientError::InvalidResponse),
            },
        };
        client.req_free(req);
        result.map(|()| client)
    }

    /// Spawns the send and receive loops over an established stream.
    fn start(stream: TcpStream, config: &ClientConfig) -> ClientResult<Self> {
        let (reqout, reqin) = mpsc::channel();
        let core = Arc::new(Core {
            state: Mutex::new(State {
                pending: (0..256).map(|_| None).collect(),
                free: Vec::with_capacity(config.reuse_capacity),
                err: None,
                stats: Stats::default(),
            }),
            reqout,
            socket: stream.try_clone()?,
            tags: TagPool::new(255),
            hashers: HasherPool::default(),
            reuse_capacity: config.reuse_capacity,
        });

        let write_half = stream.try_clone()?;
        let sender = {
            let core = Arc::clone(&core);
            let size = config.write_buffer_size;
            std::thread::spawn(move || send_loop(&core, &reqin, write_half, size))
        };
        let receiver = {
            let core = Arc::clone(&core);
            std::thread::spawn(move || recv_loop(&core, stream))
        };

        Ok(Self {
            core,
            sender: Some(sender),
            receiver: Some(receiver),
        })
    }

    /// Round-trips a ping.
    pub fn ping(&self) -> ClientResult<()> {
        let (tx, rx) = mpsc::channel();
        let mut req = self.req_alloc();
        req.tc = Call::Tping;
        req.done = Done::Internal(tx);
        self.rpc_queue(req)?;

        let mut req = rx
            .recv()
            .map_err(|_| ClientError::Connection("client shut down".to_string()))?;
        let result = match req.err.take() {
            Some(e) => Err(e),
            None => match req.rc.take() {
                Some(Call::Rping) => Ok(()),
                _ => Err(ClientError::InvalidResponse),
            },
        };
        self.req_free(req);
        result
    }

    /// Reads a block, blocking until the reply arrives.
    ///
    /// Fails with the server's error string or, if the connection dies,
    /// with its terminal error.
    pub fn get(&self, score: Score, btype: BlockType, count: u16) -> ClientResult<Bytes> {
        let (tx, rx) = mpsc::channel();
        let mut req = self.req_alloc();
        req.tc = Call::Tread {
            score,
            btype,
            count,
        };
        req.done = Done::Internal(tx);
        self.rpc_queue(req)?;

        let mut req = rx
            .recv()
            .map_err(|_| ClientError::Connection("client shut down".to_string()))?;
        let result = match req.err.take() {
            Some(e) => Err(e),
            None => match req.rc.take() {
                Some(Call::Rread { data }) => Ok(data),
                _ => Err(ClientError::InvalidResponse),
            },
        };
        self.req_free(req);
        result
    }

    /// Queues a read whose result is delivered on `done`.
    pub fn get_async(
        &self,
        score: Score,
        btype: BlockType,
        count: u16,
        done: Sender<ClientResult<Bytes>>,
    ) -> ClientResult<()> {
        let mut req = self.req_alloc();
        req.tc = Call::Tread {
            score,
            btype,
            count,
        };
        req.done = Done::Read(done);
        self.rpc_queue(req)
    }

    /// Writes a block asynchronously, returning its score immediately.
    ///
    /// The score is computed locally; the server's acknowledgement is not
    /// awaited. Call [`Client::sync`] to confirm every outstanding write.
    pub fn put(&self, btype: BlockType, data: Bytes) -> ClientResult<Score> {
        let score = self.core.hashers.score(&data);
        let mut req = self.req_alloc();
        req.tc = Call::Twrite { btype, data };
        self.rpc_queue(req)?;
        Ok(score)
    }

    /// Waits for every outstanding write and a server sync.
    ///
    /// Routes the completion of every currently pending write into one
    /// channel alongside a `Tsync`, then waits for all of them. Returns
    /// the first error observed.
    pub fn sync(&self) -> ClientResult<()> {
        let (tx, rx) = mpsc::channel();

        // route every currently pending write into the sync channel, then
        // issue the Tsync itself; whatever completes each of them (reply
        // or teardown) lands in rx
        let mut waiting = 0;
        {
            let mut state = self.core.state.lock().expect("client lock poisoned");
            for slot in &mut state.pending {
                if let Some(r) = slot {
                    if matches!(r.tc, Call::Twrite { .. }) {
                        r.done = Done::Internal(tx.clone());
                        waiting += 1;
                    }
                }
            }
        }

        let mut req = self.req_alloc();
        req.tc = Call::Tsync;
        req.done = Done::Internal(tx.clone());
        let mut first_err = match self.rpc_queue(req) {
            Ok(()) => {
                waiting += 1;
                None
            }
            Err(e) => Some(e),
        };

        for _ in 0..waiting {
            let Ok(mut req) = rx.recv() else {
                return Err(ClientError::Connection("client shut down".to_string()));
            };
            if let Some(e) = req.err.take() {
                first_err.get_or_insert(e);
            }
            self.req_free(req);
        }

        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Issues `Tgoodbye`, flushes it, and closes the connection.
    pub fn hangup(mut self) -> ClientResult<()> {
        let mut req = self.req_alloc();
        req.tc = Call::Tgoodbye;
        self.rpc_queue(req)?;
        self.shutdown();
        Ok(())
    }

    /// Snapshot of this connection's counters.
    pub fn stats(&self) -> Stats {
        self.core.state.lock().expect("client lock poisoned").stats
    }

    /// Allocates an envelope, reusing a pooled one when available.
    fn req_alloc(&self) -> Box<Request> {
        let recycled = {
            let mut state = self.core.state.lock().expect("client lock poisoned");
            state.free.pop()
        };
        match recycled {
            Some(req) => req,
            None => {
                let tag = self.core.tags.acquire();
                Box::new(Request::new(tag))
            }
        }
    }

    fn req_free(&self, req: Box<Request>) {
        self.core.req_free(req);
    }

    /// Installs the envelope in the pending table and hands its tag to
    /// the sender.
    fn rpc_queue(&self, req: Box<Request>) -> ClientResult<()> {
        let tag = req.tag;
        {
            let mut state = self.core.state.lock().expect("client lock poisoned");
            if let Some(err) = &state.err {
                let e = ClientError::Connection(err.clone());
                drop(state);
                self.req_free(req);
                return Err(e);
            }
            state.stats.nreqs += 1;
            state.stats.npend += 1;
            state.stats.maxpend = state.stats.maxpend.max(state.stats.npend);
            state.pending[usize::from(tag)] = Some(req);
        }

        if self.core.reqout.send(SenderCmd::Queue(tag)).is_err() {
            let req = {
                let mut state = self.core.state.lock().expect("client lock poisoned");
                let req = state.pending[usize::from(tag)].take();
                if req.is_some() {
                    state.stats.npend -= 1;
                }
                req
            };
            if let Some(req) = req {
                self.req_free(req);
            }
            return Err(ClientError::Connection("client shut down".to_string()));
        }
        Ok(())
    }

    /// Stops both loops and closes the socket.
    fn shutdown(&mut self) {
        let _ = self.core.reqout.send(SenderCmd::Shutdown);
        if let Some(sender) = self.sender.take() {
            let _ = sender.join();
        }
        let _ = self.core.socket.shutdown(Shutdown::Both);
        if let Some(receiver) = self.receiver.take() {
            let _ = receiver.join();
        }
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

impl Core {
    /// Completes an envelope, routing it to its waiter or recycling it.
    fn complete(&self, mut req: Box<Request>) {
        match std::mem::replace(&mut req.done, Done::None) {
            Done::Internal(tx) => {
                // the waiter recycles the envelope
                let _ = tx.send(req);
            }
            Done::Read(tx) => {
                let result = match req.err.take() {
                    Some(e) => Err(e),
                    None => match req.rc.take() {
                        Some(Call::Rread { data }) => Ok(data),
                        _ => Err(ClientError::InvalidResponse),
                    },
                };
                let _ = tx.send(result);
                self.req_free(req);
            }
            Done::None => self.req_free(req),
        }
    }

    fn req_free(&self, mut req: Box<Request>) {
        req.reset();
        let tag = req.tag;
        let mut state = self.state.lock().expect("client lock poisoned");
        if state.free.len() < self.reuse_capacity {
            state.free.push(req);
        } else {
            drop(state);
            drop(req);
            self.tags.release(tag);
        }
    }

    /// Records the terminal error (first writer wins) and wakes everyone:
    /// the socket is shut down, the sender is told to exit, and every
    /// pending envelope completes with the error.
    fn teardown(&self, err: &str) {
        let drained = {
            let mut state = self.state.lock().expect("client lock poisoned");
            if state.err.is_none() {
                state.err = Some(err.to_string());
            }
            let terminal = state.err.clone().expect("just set");
            let State {
                pending, stats, ..
            } = &mut *state;
            let mut drained = Vec::new();
            for slot in pending.iter_mut() {
                if let Some(mut req) = slot.take() {
                    req.err = Some(ClientError::Connection(terminal.clone()));
                    stats.npend = stats.npend.saturating_sub(1);
                    drained.push(req);
                }
            }
            drained
        };

        let _ = self.socket.shutdown(Shutdown::Both);
        let _ = self.reqout.send(SenderCmd::Shutdown);

        for req in drained {
            self.complete(req);
        }
    }

    /// Fails a single queued request before it reached the wire.
    fn fail_tag(&self, tag: u8, err: ClientError) {
        let req = {
            let mut state = self.state.lock().expect("client lock poisoned");
            let req = state.pending[usize::from(tag)].take();
            if req.is_some() {
                state.stats.npend = state.stats.npend.saturating_sub(1);
            }
            req
        };
        if let Some(mut req) = req {
            req.err = Some(err);
            self.complete(req);
        }
    }
}

/// Drains the request queue, batching packed frames into one buffer per
/// write.
fn send_loop(core: &Core, reqin: &Receiver<SenderCmd>, mut stream: TcpStream, bufsize: usize) {
    let mut buf = vec![0u8; bufsize];

    'outer: loop {
        let Ok(mut cmd) = reqin.recv() else {
            break;
        };

        let mut pos = 0;
        let mut shutdown = false;
        loop {
            let tag = match cmd {
                SenderCmd::Shutdown => {
                    shutdown = true;
                    break;
                }
                SenderCmd::Queue(tag) => tag,
            };

            let packed = {
                let state = core.state.lock().expect("client lock poisoned");
                match &state.pending[usize::from(tag)] {
                    Some(req) => pack(&req.tc, tag, &mut buf[pos..]),
                    // completed by teardown before we got here
                    None => Ok(0),
                }
            };

            match packed {
                Ok(n) => pos += n,
                Err(WireError::BufferTooSmall { .. }) if pos > 0 => {
                    if !flush(core, &mut stream, &buf[..pos]) {
                        break 'outer;
                    }
                    pos = 0;
                    continue; // retry the same tag against an empty buffer
                }
                Err(e) => {
                    core.fail_tag(tag, e.into());
                }
            }

            match reqin.try_recv() {
                Ok(next) => cmd = next,
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    shutdown = true;
                    break;
                }
            }
        }

        if pos > 0 && !flush(core, &mut stream, &buf[..pos]) {
            break;
        }
        if shutdown {
            break;
        }
    }
    trace!("sender exiting");
}

/// Writes one batch; on failure records the terminal error and shuts the
/// socket so the receiver runs the teardown.
fn flush(core: &Core, stream: &mut TcpStream, batch: &[u8]) -> bool {
    if let Err(e) = stream.write_all(batch) {
        debug!(error = %e, "error while writing");
        let mut state = core.state.lock().expect("client lock poisoned");
        if state.err.is_none() {
            state.err = Some(e.to_string());
        }
        drop(state);
        let _ = core.socket.shutdown(Shutdown::Both);
        return false;
    }

    let mut state = core.state.lock().expect("client lock poisoned");
    state.stats.tsz += batch.len() as u64;
    state.stats.nwrites += 1;
    true
}

/// Reads frames, matches tags, and completes pending requests.
fn recv_loop(core: &Core, mut stream: TcpStream) {
    let mut buf = BytesMut::with_capacity(8 * MAX_BLOCK);
    let mut tmp = vec![0u8; 64 * 1024];

    let err: String = 'outer: loop {
        loop {
            match frame_size(&buf) {
                Some(total) if total > MAX_FRAME => {
                    break 'outer format!("bad server connection: {total} byte frame");
                }
                Some(total) if buf.len() >= total => {
                    let tag = buf[3];
                    let frame = match unpack(&mut buf) {
                        Ok(Some(frame)) => frame,
                        Ok(None) => break 'outer "invalid packet".to_string(),
                        Err(e) => break 'outer e.to_string(),
                    };
                    trace!(tag, call = %frame.call, "received");

                    let Some(mut req) = ({
                        let mut state = core.state.lock().expect("client lock poisoned");
                        let req = state.pending[usize::from(tag)].take();
                        if req.is_some() {
                            state.stats.rsz += frame.len as u64;
                            state.stats.npend -= 1;
                        }
                        req
                    }) else {
                        break 'outer "unexpected response".to_string();
                    };

                    if frame.call.id() != req.tc.id() + 1 {
                        req.err = Some(match &frame.call {
                            Call::Rerror { ename } => ClientError::Remote(ename.clone()),
                            _ => ClientError::InvalidResponse,
                        });
                    }
                    req.rc = Some(frame.call);
                    core.complete(req);
                }
                _ => break, // need more bytes
            }
        }

        match stream.read(&mut tmp) {
            Ok(0) => break 'outer "connection closed".to_string(),
            Ok(n) => {
                buf.extend_from_slice(&tmp[..n]);
                let mut state = core.state.lock().expect("client lock poisoned");
                state.stats.nreads += 1;
            }
            Err(e) => break 'outer e.to_string(),
        }
    };

    debug!(error = %err, "connection done");
    core.teardown(&err);
}

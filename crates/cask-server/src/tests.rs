//! Engine tests: the real client driving in-process servers.
//!
//! The in-memory store here is the reference handler; one test runs the
//! arena store end-to-end. A few tests speak raw frames over a plain
//! socket to poke at states the client never enters.

use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc, Mutex};

use bytes::{Bytes, BytesMut};
use cask_client::{Client, ClientError};
use cask_types::{BlockType, HasherPool, Score};
use cask_wire::{pack, unpack, Call, Frame, BANNER, MAX_FRAME};

use crate::{ConnInfo, Ops, Req, Server, ServerConfig};

/// In-memory block store.
struct MemStore {
    blocks: Mutex<HashMap<Score, Bytes>>,
    hashers: HasherPool,
}

impl MemStore {
    fn new() -> Self {
        Self {
            blocks: Mutex::new(HashMap::new()),
            hashers: HasherPool::default(),
        }
    }
}

impl Ops for MemStore {
    fn hello(&self, req: Req) {
        req.respond_hello("anonymous", 0, 0);
    }

    fn read(&self, req: Req) {
        let Call::Tread { score, count, .. } = req.call() else {
            return req.respond_error("unknown message type");
        };
        let count = usize::from(*count);
        let block = self.blocks.lock().unwrap().get(score).cloned();
        match block {
            Some(data) => {
                let n = count.min(data.len());
                req.respond_read(data.slice(..n));
            }
            None => req.respond_error("not found"),
        }
    }

    fn write(&self, req: Req) {
        let Call::Twrite { data, .. } = req.call() else {
            return req.respond_error("unknown message type");
        };
        let data = data.clone();
        let score = self.hashers.score(&data);
        self.blocks.lock().unwrap().entry(score).or_insert(data);
        req.respond_write(score);
    }
}

fn start_server(ops: impl Ops) -> (Arc<Server>, SocketAddr) {
    let config = ServerConfig::new(SocketAddr::from(([127, 0, 0, 1], 0)));
    let server = Arc::new(Server::bind(config, ops).unwrap());
    let addr = server.local_addr().unwrap();
    let runner = Arc::clone(&server);
    std::thread::spawn(move || runner.run());
    (server, addr)
}

// ============================================================================
// Client-driven scenarios
// ============================================================================

#[test]
fn hello_ping_goodbye() {
    let (server, addr) = start_server(MemStore::new());

    let client = Client::connect(addr).unwrap();
    client.ping().unwrap();

    // Thello("02", "anonymous") is 22 bytes framed, Tping is 4
    let stats = server.stats();
    assert_eq!(stats.nreqs, 2);
    assert_eq!(stats.tsz, 22 + 4);

    client.hangup().unwrap();
}

#[test]
fn write_then_read() {
    let (_server, addr) = start_server(MemStore::new());
    let client = Client::connect(addr).unwrap();

    let score = client
        .put(BlockType::DATA, Bytes::from_static(b"hello"))
        .unwrap();
    assert_eq!(
        score.to_string(),
        "aaf4c61ddcc5e8a2dabede0f3b482cd9aea9434d"
    );
    client.sync().unwrap();

    let data = client.get(score, BlockType::DATA, 5).unwrap();
    assert_eq!(data.as_ref(), b"hello");
}

#[test]
fn read_truncates_to_the_requested_count() {
    let (_server, addr) = start_server(MemStore::new());
    let client = Client::connect(addr).unwrap();

    let score = client
        .put(BlockType::DATA, Bytes::from_static(b"hello world"))
        .unwrap();
    client.sync().unwrap();

    let data = client.get(score, BlockType::DATA, 5).unwrap();
    assert_eq!(data.as_ref(), b"hello");

    // a count past the end of the block returns the whole block
    let data = client.get(score, BlockType::DATA, 4096).unwrap();
    assert_eq!(data.as_ref(), b"hello world");
}

#[test]
fn pipelined_reads_with_partial_hits() {
    let (_server, addr) = start_server(MemStore::new());
    let client = Client::connect(addr).unwrap();

    let s3 = client.put(BlockType::DATA, Bytes::from_static(b"three")).unwrap();
    let s7 = client.put(BlockType::DATA, Bytes::from_static(b"seven")).unwrap();
    client.sync().unwrap();

    let mut waiters = Vec::new();
    for i in 0..10u8 {
        let score = match i {
            3 => s3,
            7 => s7,
            _ => Score::digest(&[i]),
        };
        let (tx, rx) = mpsc::channel();
        client.get_async(score, BlockType::DATA, 5, tx).unwrap();
        waiters.push((i, rx));
    }

    for (i, rx) in waiters {
        let result = rx.recv().unwrap();
        match (i, result) {
            (3, Ok(data)) => assert_eq!(data.as_ref(), b"three"),
            (7, Ok(data)) => assert_eq!(data.as_ref(), b"seven"),
            (3 | 7, other) => panic!("expected hit for {i}, got {other:?}"),
            (_, Err(ClientError::Remote(ename))) => assert_eq!(ename, "not found"),
            (_, other) => panic!("expected miss for {i}, got {other:?}"),
        }
    }
}

#[test]
fn default_handlers_reject_unimplemented_operations() {
    struct HelloOnly;
    impl Ops for HelloOnly {
        fn hello(&self, req: Req) {
            req.respond_hello("anonymous", 0, 0);
        }
    }

    let (_server, addr) = start_server(HelloOnly);
    let client = Client::connect(addr).unwrap();

    // ping and sync auto-reply even without a handler
    client.ping().unwrap();
    client.sync().unwrap();

    match client.get(Score::ZERO, BlockType::DATA, 1) {
        Err(ClientError::Remote(ename)) => assert_eq!(ename, "unsupported operation"),
        other => panic!("expected unsupported operation, got {other:?}"),
    }
}

#[test]
fn hello_less_server_rejects_connect() {
    struct Nothing;
    impl Ops for Nothing {}

    let (_server, addr) = start_server(Nothing);
    match Client::connect(addr) {
        Err(ClientError::Remote(ename)) => assert_eq!(ename, "unsupported operation"),
        other => panic!("expected unsupported operation, got {other:?}"),
    }
}

#[test]
fn connection_hooks_fire() {
    struct Hooked {
        opened: AtomicUsize,
        closed: AtomicUsize,
        done: mpsc::Sender<()>,
    }
    impl Ops for Hooked {
        fn hello(&self, req: Req) {
            req.respond_hello("anonymous", 0, 0);
        }
        fn conn_opened(&self, _conn: &ConnInfo) {
            self.opened.fetch_add(1, Ordering::SeqCst);
        }
        fn conn_closed(&self, _conn: &ConnInfo) {
            self.closed.fetch_add(1, Ordering::SeqCst);
            let _ = self.done.send(());
        }
    }

    let (tx, rx) = mpsc::channel();
    let (_server, addr) = start_server(Hooked {
        opened: AtomicUsize::new(0),
        closed: AtomicUsize::new(0),
        done: tx,
    });

    let client = Client::connect(addr).unwrap();
    client.hangup().unwrap();
    rx.recv().unwrap();
}

// ============================================================================
// Arena-backed end-to-end
// ============================================================================

mod arena {
    use cask_arena::{ArenaConfig, Store};
    use tempfile::TempDir;

    use super::*;

    struct StoreOps {
        store: Arc<Store>,
    }

    impl Ops for StoreOps {
        fn hello(&self, req: Req) {
            req.respond_hello("anonymous", 0, 0);
        }

        fn read(&self, req: Req) {
            let Call::Tread { score, count, .. } = req.call() else {
                return req.respond_error("unknown message type");
            };
            let count = usize::from(*count);
            match self.store.get(score) {
                Some(data) => {
                    let n = count.min(data.len());
                    req.respond_read(data.slice(..n));
                }
                None => req.respond_error("not found"),
            }
        }

        fn write(&self, req: Req) {
            let Call::Twrite { data, .. } = req.call() else {
                return req.respond_error("unknown message type");
            };
            let data = data.clone();
            match self.store.put(&data) {
                Ok(score) => req.respond_write(score),
                Err(e) => req.respond_error(e.to_string()),
            }
        }

        fn sync(&self, req: Req) {
            match self.store.sync() {
                Ok(()) => req.respond_sync(),
                Err(e) => req.respond_error(e.to_string()),
            }
        }
    }

    #[test]
    fn blocks_survive_a_server_restart() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("arena");

        let store = Arc::new(Store::create(&path, 1 << 20, ArenaConfig::default()).unwrap());
        let (_server, addr) = start_server(StoreOps {
            store: Arc::clone(&store),
        });

        let client = Client::connect(addr).unwrap();
        let mut scores = Vec::new();
        for payload in [b"alpha".as_slice(), b"beta", b"gamma"] {
            scores.push(client.put(BlockType::DATA, Bytes::copy_from_slice(payload)).unwrap());
        }
        client.sync().unwrap();

        // repeated write of the same block must not grow the arena
        let tip = store.tip();
        client.put(BlockType::DATA, Bytes::from_static(b"alpha")).unwrap();
        client.sync().unwrap();
        assert_eq!(store.tip(), tip);

        client.hangup().unwrap();
        drop(store);

        // reopen as a restarted server would; recovery reindexes by scan
        let store = Arc::new(Store::open(&path, ArenaConfig::default()).unwrap());
        assert_eq!(store.block_count(), 3);
        let (_server, addr) = start_server(StoreOps {
            store: Arc::clone(&store),
        });

        let client = Client::connect(addr).unwrap();
        for (score, payload) in scores.iter().zip([b"alpha".as_slice(), b"beta", b"gamma"]) {
            let data = client.get(*score, BlockType::DATA, payload.len() as u16).unwrap();
            assert_eq!(data.as_ref(), payload);
        }
    }
}

// ============================================================================
// Raw-socket protocol edges
// ============================================================================

fn raw_connect(addr: SocketAddr) -> (TcpStream, BytesMut) {
    let mut stream = TcpStream::connect(addr).unwrap();
    stream.write_all(BANNER.as_bytes()).unwrap();
    let mut byte = [0u8; 1];
    loop {
        stream.read_exact(&mut byte).unwrap();
        if byte[0] == b'\n' {
            break;
        }
    }
    (stream, BytesMut::new())
}

fn raw_send(stream: &mut TcpStream, call: &Call, tag: u8) {
    let mut buf = vec![0u8; MAX_FRAME];
    let n = pack(call, tag, &mut buf).unwrap();
    stream.write_all(&buf[..n]).unwrap();
}

fn raw_recv(stream: &mut TcpStream, buf: &mut BytesMut) -> Frame {
    let mut tmp = [0u8; 4096];
    loop {
        if let Some(frame) = unpack(buf).unwrap() {
            return frame;
        }
        let n = stream.read(&mut tmp).unwrap();
        assert_ne!(n, 0, "server closed mid-frame");
        buf.extend_from_slice(&tmp[..n]);
    }
}

fn raw_hello(stream: &mut TcpStream, buf: &mut BytesMut) {
    raw_send(
        stream,
        &Call::Thello {
            version: "02".to_string(),
            uid: "anonymous".to_string(),
            strength: 0,
            crypto: Bytes::new(),
            codec: Bytes::new(),
        },
        0,
    );
    let frame = raw_recv(stream, buf);
    assert!(matches!(frame.call, Call::Rhello { .. }), "{:?}", frame.call);
}

#[test]
fn requests_before_hello_are_rejected() {
    let (_server, addr) = start_server(MemStore::new());
    let (mut stream, mut buf) = raw_connect(addr);

    raw_send(&mut stream, &Call::Tping, 5);
    let frame = raw_recv(&mut stream, &mut buf);
    assert_eq!(frame.tag, 5);
    match frame.call {
        Call::Rerror { ename } => assert_eq!(ename, "expecting hello message"),
        other => panic!("expected Rerror, got {other}"),
    }
}

#[test]
fn goodbye_returns_the_connection_to_new() {
    let (_server, addr) = start_server(MemStore::new());
    let (mut stream, mut buf) = raw_connect(addr);

    raw_hello(&mut stream, &mut buf);
    raw_send(&mut stream, &Call::Tgoodbye, 1);
    raw_send(&mut stream, &Call::Tping, 2);

    let frame = raw_recv(&mut stream, &mut buf);
    assert_eq!(frame.tag, 2);
    match frame.call {
        Call::Rerror { ename } => assert_eq!(ename, "expecting hello message"),
        other => panic!("expected Rerror, got {other}"),
    }
}

#[test]
fn malformed_banner_closes_before_framing() {
    let (_server, addr) = start_server(MemStore::new());
    let mut stream = TcpStream::connect(addr).unwrap();
    stream.write_all(b"hello\n").unwrap();

    // the server sends its own banner and then closes without framing
    let mut data = Vec::new();
    stream.read_to_end(&mut data).unwrap();
    assert_eq!(data, BANNER.as_bytes());
}

#[test]
fn oversized_frame_closes_the_connection() {
    let (_server, addr) = start_server(MemStore::new());
    let (mut stream, mut buf) = raw_connect(addr);
    raw_hello(&mut stream, &mut buf);

    // announce a 60 KiB frame: the size prefix alone trips the bound
    let announced = (60 * 1024u16).to_be_bytes();
    stream.write_all(&announced).unwrap();

    let mut data = Vec::new();
    stream.read_to_end(&mut data).unwrap();
    assert!(data.is_empty());
}

#[test]
fn bad_block_type_is_answered_with_rerror() {
    let (_server, addr) = start_server(MemStore::new());
    let (mut stream, mut buf) = raw_connect(addr);
    raw_hello(&mut stream, &mut buf);

    // Tread with reserved wire type code 10
    let mut frame = vec![0x00, 0x1a, 12, 0x09];
    frame.extend_from_slice(Score::ZERO.as_bytes());
    frame.extend_from_slice(&[10, 0x00, 0x00, 0x01]);
    stream.write_all(&frame).unwrap();

    let reply = raw_recv(&mut stream, &mut buf);
    assert_eq!(reply.tag, 0x09);
    match reply.call {
        Call::Rerror { ename } => assert_eq!(ename, "invalid block type"),
        other => panic!("expected Rerror, got {other}"),
    }

    // the connection survives a rejected body
    raw_send(&mut stream, &Call::Tping, 0x0a);
    let pong = raw_recv(&mut stream, &mut buf);
    assert!(matches!(pong.call, Call::Rping));
}

//! The TCP listener and per-server bookkeeping.

use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::{Arc, Mutex};

use cask_types::Stats;
use cask_wire::exchange_banner;
use tracing::{debug, info, warn};

use crate::config::ServerConfig;
use crate::conn::{serve_conn, ConnCore};
use crate::error::{ServerError, ServerResult};
use crate::handler::Ops;
use crate::request::ReqPool;

/// A block store server: a listener plus the handler it dispatches to.
///
/// Each accepted connection performs the banner exchange and then runs a
/// receive loop and a send loop on their own threads; every decoded
/// request is handled on its own task.
pub struct Server {
    listener: TcpListener,
    config: ServerConfig,
    ops: Arc<dyn Ops>,
    pool: Arc<ReqPool>,
    /// Counters folded from closed connections.
    folded: Mutex<Stats>,
    /// Live connections, for the stats snapshot.
    live: Mutex<Vec<Arc<ConnCore>>>,
}

impl Server {
    /// Binds the listener for the given configuration.
    pub fn bind(config: ServerConfig, ops: impl Ops) -> ServerResult<Self> {
        let listener = TcpListener::bind(config.bind_addr).map_err(|e| ServerError::Bind {
            addr: config.bind_addr,
            source: e,
        })?;
        info!(addr = %config.bind_addr, "listening");

        Ok(Self {
            listener,
            pool: Arc::new(ReqPool::new(config.reuse_capacity)),
            config,
            ops: Arc::new(ops),
            folded: Mutex::new(Stats::default()),
            live: Mutex::new(Vec::new()),
        })
    }

    /// Returns the address the server is listening on.
    pub fn local_addr(&self) -> ServerResult<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Server totals: counters folded over closed connections plus a
    /// snapshot of every live one.
    pub fn stats(&self) -> Stats {
        let mut total = *self.folded.lock().expect("server lock poisoned");
        let live = self.live.lock().expect("server lock poisoned");
        for conn in live.iter() {
            total.absorb(&conn.stats());
        }
        total
    }

    /// Accepts connections until the listener fails.
    ///
    /// This method blocks; run it on its own thread to do anything else.
    pub fn run(self: Arc<Self>) -> ServerResult<()> {
        loop {
            let (stream, peer) = match self.listener.accept() {
                Ok(accepted) => accepted,
                Err(e) => {
                    warn!(error = %e, "accept failed");
                    return Err(e.into());
                }
            };

            let server = Arc::clone(&self);
            std::thread::spawn(move || server.serve(stream, peer));
        }
    }

    /// Runs one connection: banner first, then the engine loops.
    fn serve(&self, mut stream: TcpStream, peer: SocketAddr) {
        if let Err(e) = exchange_banner(&mut stream) {
            debug!(peer = %peer, error = %e, "banner rejected");
            return;
        }
        debug!(peer = %peer, "accepted");

        let (conn, reqin) = ConnCore::new(peer, Arc::clone(&self.pool));
        self.live
            .lock()
            .expect("server lock poisoned")
            .push(Arc::clone(&conn));

        let stats = serve_conn(
            &self.ops,
            Arc::clone(&conn),
            reqin,
            stream,
            self.config.read_buffer_size,
            self.config.write_buffer_size,
        );

        let mut live = self.live.lock().expect("server lock poisoned");
        live.retain(|c| !Arc::ptr_eq(c, &conn));
        drop(live);

        let mut folded = self.folded.lock().expect("server lock poisoned");
        folded.absorb(&stats);
    }
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("bind_addr", &self.config.bind_addr)
            .finish_non_exhaustive()
    }
}

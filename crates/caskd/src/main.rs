//! The cask block store daemon.
//!
//! Serves the wire protocol over a memory-mapped arena file: blocks go
//! in, scores come out, and blocks come back by score.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use cask_arena::{ArenaConfig, Store};
use cask_server::{Ops, Req, Server, ServerConfig};
use cask_wire::Call;
use clap::Parser;
use tracing::info;

/// Content-addressed block store daemon.
#[derive(Parser)]
#[command(name = "caskd")]
#[command(about = "Content-addressed block store daemon", long_about = None)]
struct Cli {
    /// Address to listen on.
    #[arg(short, long, default_value = "127.0.0.1:17034")]
    addr: SocketAddr,

    /// Record alignment in bytes (0 disables alignment).
    #[arg(long, default_value = "0")]
    align: u64,

    /// Chunk size in bytes.
    #[arg(long, default_value_t = ArenaConfig::DEFAULT_CHUNK_SIZE)]
    chunk_size: u64,

    /// Create the arena file with this many bytes instead of opening an
    /// existing one.
    #[arg(long)]
    create: Option<u64>,

    /// Path to the arena file.
    file: PathBuf,
}

/// Protocol handler over the arena store.
struct StoreOps {
    store: Store,
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

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let config = ArenaConfig::default()
        .with_chunk_size(cli.chunk_size)
        .with_align(cli.align);
    let store = match cli.create {
        Some(size) => Store::create(&cli.file, size, config)
            .with_context(|| format!("failed to create arena {}", cli.file.display()))?,
        None => Store::open(&cli.file, config)
            .with_context(|| format!("failed to open arena {}", cli.file.display()))?,
    };
    info!(file = %cli.file.display(), blocks = store.block_count(), "store ready");

    let server = Arc::new(
        Server::bind(ServerConfig::new(cli.addr), StoreOps { store })
            .with_context(|| format!("failed to bind {}", cli.addr))?,
    );
    server.run()?;
    Ok(())
}

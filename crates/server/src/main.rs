//! isoprobe HTTP server
//!
//! Starts the in-process cluster described by the configuration, optionally
//! seeds it, and serves the JSON API over HTTP/1.1.
//!
//! ```text
//! isoprobe --config isoprobe.toml --listen 127.0.0.1:8080 --seed titles.json
//! ```

mod app;
mod routes;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use isoprobe_core::{Clock, ProbeConfig, TokioClock};
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

use crate::app::AppState;

/// Isolation-level anomaly harness for multi-node relational stores.
#[derive(Debug, Parser)]
#[command(name = "isoprobe", version, about)]
struct Args {
    /// TOML configuration file; built-in three-node defaults when omitted
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Address to listen on, overriding `server.listen`
    #[arg(short, long)]
    listen: Option<String>,

    /// JSON array of rows to seed, overriding `server.seed_file`
    #[arg(short, long)]
    seed: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with_target(true)
        .init();

    let args = Args::parse();
    let mut config = match &args.config {
        Some(path) => ProbeConfig::load(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => ProbeConfig::default(),
    };
    if let Some(listen) = args.listen {
        config.server.listen = listen;
    }
    if let Some(seed) = args.seed {
        config.server.seed_file = Some(seed);
    }

    let clock: Arc<dyn Clock> = Arc::new(TokioClock::new());
    let state = Arc::new(AppState::build(&config, clock));
    match &config.server.seed_file {
        Some(path) => {
            let rows = app::load_seed(path)?;
            let total = rows.len();
            let placed = state.seed(rows);
            info!(target: "isoprobe::engine", rows = total, placements = placed, "Cluster seeded");
        }
        None => warn!(target: "isoprobe::engine", "No seed file configured; nodes start empty"),
    }

    let listener = TcpListener::bind(&config.server.listen)
        .await
        .with_context(|| format!("binding {}", config.server.listen))?;
    info!(
        target: "isoprobe::http",
        addr = %listener.local_addr()?, nodes = config.nodes.len(),
        "Listening"
    );

    loop {
        let accepted = tokio::select! {
            accepted = listener.accept() => accepted,
            _ = tokio::signal::ctrl_c() => {
                info!(target: "isoprobe::http", "Shutting down");
                return Ok(());
            }
        };
        let (stream, peer) = match accepted {
            Ok(conn) => conn,
            Err(e) => {
                warn!(target: "isoprobe::http", error = %e, "Accept failed");
                continue;
            }
        };

        let state = Arc::clone(&state);
        tokio::spawn(async move {
            let io = TokioIo::new(stream);
            let service = service_fn(move |req| routes::handle(Arc::clone(&state), req));
            if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                debug!(target: "isoprobe::http", %peer, error = %e, "Connection closed with error");
            }
        });
    }
}

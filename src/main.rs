//! StackDebt analysis gateway.
//!
//! # Architecture Overview
//!
//! ```text
//!                     ┌────────────────────────────────────────────────────┐
//!                     │                  ANALYSIS GATEWAY                  │
//!                     │                                                    │
//!   POST /api/analyze │  ┌──────────┐   ┌────────────┐   ┌─────────────┐   │
//!   ──────────────────┼─▶│   http   │──▶│ rate limit │──▶│  pipeline   │   │
//!                     │  │  server  │   │ (per IP)   │   │             │   │
//!                     │  └──────────┘   └────────────┘   └──────┬──────┘   │
//!                     │                                         │          │
//!                     │                      hit ┌──────────────┤          │
//!                     │                          ▼              ▼ miss     │
//!                     │                   ┌────────────┐ ┌─────────────┐   │
//!                     │                   │   cache    │ │ retry + CB  │───┼──▶ target site /
//!                     │                   │ (TTL, LRU) │ │ (per svc)   │   │    GitHub API
//!                     │                   └────────────┘ └─────────────┘   │
//!                     │                                                    │
//!                     │  ┌──────────────────────────────────────────────┐  │
//!                     │  │ config (hot reload) · observability · admin  │  │
//!                     │  │ lifecycle (signals, maintenance tasks)       │  │
//!                     │  └──────────────────────────────────────────────┘  │
//!                     └────────────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;

use clap::Parser;
use tokio::net::TcpListener;
use tokio::sync::mpsc;

use stackdebt_gateway::config::{load_config, watcher::ConfigWatcher, GatewayConfig};
use stackdebt_gateway::lifecycle::{signals, Shutdown};
use stackdebt_gateway::observability::{logging, metrics};
use stackdebt_gateway::HttpServer;

#[derive(Parser)]
#[command(name = "stackdebt-gateway", version, about = "Analysis gateway with caching, rate limiting and circuit breaking")]
struct Args {
    /// Path to a TOML configuration file. Defaults apply when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => load_config(path)?,
        None => GatewayConfig::default(),
    };

    logging::init_logging(&config.observability);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "stackdebt-gateway starting");
    tracing::info!(
        bind_address = %config.listener.bind_address,
        cache_max_size = config.cache.max_size,
        requests_per_minute = config.rate_limit.requests_per_minute,
        request_timeout_secs = config.timeouts.request_secs,
        "Configuration loaded"
    );

    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    tracing::info!(address = %listener.local_addr()?, "Listening for connections");

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    // The watcher must outlive the server.
    let (_watcher, config_updates) = match &args.config {
        Some(path) => {
            let (watcher, updates) = ConfigWatcher::new(path);
            (Some(watcher.run()?), updates)
        }
        None => {
            let (_, updates) = mpsc::unbounded_channel();
            (None, updates)
        }
    };

    let shutdown = Shutdown::new();
    let server = HttpServer::new(config)?;
    let server_shutdown = shutdown.subscribe();

    let signal_shutdown = shutdown.clone();
    let signal_task = tokio::spawn(async move {
        signals::wait_for_signal(&signal_shutdown).await;
    });

    server.run(listener, config_updates, server_shutdown).await?;
    signal_task.abort();

    tracing::info!(
        signalled = shutdown.is_triggered(),
        pending_tasks = shutdown.pending_tasks(),
        "Shutdown complete"
    );
    Ok(())
}

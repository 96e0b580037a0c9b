//! Outside endpoint: the publicly reachable pool consumer.
//!
//! Listens on the bridge port, the sync port (when auto-sync is enabled),
//! and every currently-active public user port; dispatches incoming user
//! connections onto pooled bridge sessions.

mod bridge;
mod listener;
mod sync;

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tokio::sync::{Mutex, Notify};

use crate::auth::AuthToken;
use crate::config::Config;
use crate::pool::BridgePool;
use crate::rate_limit::RateLimiter;

pub use listener::ActivePort;

/// Shared state handed to the bridge acceptor, the sync consumer, and every
/// per-port user listener.
pub struct Outside {
    pub pool: BridgePool,
    pub token: AuthToken,
    pub active_ports: Mutex<HashMap<u16, ActivePort>>,
    pub rate_limiter: RateLimiter,
    pub shutdown: Arc<Notify>,
}

/// Run the Outside endpoint until `shutdown` is notified.
pub async fn run(config: Config, shutdown: Arc<Notify>) -> Result<()> {
    let state = Arc::new(Outside {
        pool: BridgePool::new(config.pool_capacity),
        token: AuthToken::derive(&config.key),
        active_ports: Mutex::new(HashMap::new()),
        rate_limiter: RateLimiter::new(crate::constants::LOG_RATE_LIMIT_WINDOW),
        shutdown: Arc::clone(&shutdown),
    });

    let bridge_listener = TcpListener::bind(("0.0.0.0", config.bridge_port))
        .await
        .with_context(|| format!("failed to bind bridge port {}", config.bridge_port))?;
    log::info!("bridge listener bound on port {}", config.bridge_port);
    let bridge_task = tokio::spawn(bridge::accept_loop(bridge_listener, Arc::clone(&state)));

    let sync_task = if config.auto_sync {
        let sync_listener = TcpListener::bind(("0.0.0.0", config.sync_port))
            .await
            .with_context(|| format!("failed to bind sync port {}", config.sync_port))?;
        log::info!("sync listener bound on port {}", config.sync_port);
        Some(tokio::spawn(sync::accept_loop(sync_listener, Arc::clone(&state))))
    } else {
        for &port in &config.manual_ports {
            if let Err(err) = listener::open_port(port, Arc::clone(&state)).await {
                log::error!("failed to open manual port {port}: {err}");
            }
        }
        log::info!("manual ports opened: {:?}", config.manual_ports);
        None
    };

    shutdown.notified().await;
    log::info!("outside endpoint shutting down");

    bridge_task.abort();
    if let Some(task) = sync_task {
        task.abort();
    }
    let mut active = state.active_ports.lock().await;
    for (_, port) in active.drain() {
        port.task.abort();
    }

    Ok(())
}

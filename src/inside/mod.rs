//! Inside endpoint: the bridge-session producer.
//!
//! Dials the Outside endpoint's bridge port with a fixed pool of workers and
//! separately pushes the local backend-port set on a timer.

mod bridge;
mod sync;

use std::sync::Arc;

use anyhow::Result;
use tokio::sync::Notify;

use crate::config::Config;
use crate::constants::LOG_RATE_LIMIT_WINDOW;
use crate::rate_limit::RateLimiter;

/// Run the Inside endpoint until `shutdown` is notified.
pub async fn run(config: Config, shutdown: Arc<Notify>) -> Result<()> {
    let config = Arc::new(config);
    let rate_limiter = Arc::new(RateLimiter::new(LOG_RATE_LIMIT_WINDOW));

    let bridge_task = tokio::spawn(bridge::run(
        Arc::clone(&config),
        Arc::clone(&rate_limiter),
        Arc::clone(&shutdown),
    ));
    let sync_task = tokio::spawn(sync::run(
        Arc::clone(&config),
        Arc::clone(&rate_limiter),
        Arc::clone(&shutdown),
    ));

    shutdown.notified().await;
    log::info!("inside endpoint shutting down");

    let _ = tokio::join!(bridge_task, sync_task);
    Ok(())
}

//! Per-port public user listener.
//!
//! On every accepted connection: dequeue one idle bridge session from the
//! pool, tell the Inside which backend port to use, then splice bytes.
//! Grounded in the teacher's `socket/server.rs` accept-loop shape
//! (`TcpListener::accept()` in a loop, spawn-per-connection).

use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

use super::Outside;
use crate::constants::{IDLE_TIMEOUT, POOL_TIMEOUT};
use crate::net;
use crate::protocol::DispatchHeader;
use crate::splice;

/// One entry in the Outside endpoint's `ActivePortMap`: the listener's
/// accept-loop task, cancellable on withdrawal.
pub struct ActivePort {
    pub task: JoinHandle<()>,
}

/// Open a public listener on `port` and register it in `ActivePortMap`.
/// A no-op if `port` is already active — reopening an already-open port
/// produces no visible churn, matching the idempotence requirement.
pub async fn open_port(port: u16, state: Arc<Outside>) -> std::io::Result<()> {
    let mut active = state.active_ports.lock().await;
    if active.contains_key(&port) {
        return Ok(());
    }
    let listener = TcpListener::bind(("0.0.0.0", port)).await?;
    let task = tokio::spawn(serve(listener, Arc::clone(&state), port));
    active.insert(port, ActivePort { task });
    log::info!("user port active: {port}");
    Ok(())
}

/// Withdraw `port`: cancel its accept-loop task and drop its listener.
pub async fn close_port(state: &Arc<Outside>, port: u16) {
    let mut active = state.active_ports.lock().await;
    if let Some(entry) = active.remove(&port) {
        entry.task.abort();
        log::info!("user port withdrawn: {port}");
    }
}

async fn serve(listener: TcpListener, state: Arc<Outside>, port: u16) {
    loop {
        tokio::select! {
            () = state.shutdown.notified() => break,
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, _addr)) => {
                        tokio::spawn(handle_user_connection(stream, Arc::clone(&state), port));
                    }
                    Err(err) => {
                        log::warn!("user listener on port {port}: accept error: {err}");
                    }
                }
            }
        }
    }
}

async fn handle_user_connection(user_stream: TcpStream, state: Arc<Outside>, port: u16) {
    net::tune(&user_stream);

    let Some(bridge_stream) = state.pool.get(POOL_TIMEOUT).await else {
        if state.rate_limiter.allow("no-bridge-available") {
            log::debug!("no bridge session available for port {port} within {POOL_TIMEOUT:?}");
        }
        return;
    };

    let mut bridge_stream = bridge_stream;
    let header = DispatchHeader { target_port: port };
    if let Err(err) = header.write(&mut bridge_stream).await {
        log::debug!("failed to write dispatch header for port {port}: {err}");
        return;
    }

    splice::splice(user_stream, bridge_stream, IDLE_TIMEOUT).await;
}

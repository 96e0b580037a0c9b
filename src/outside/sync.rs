//! Sync consumer: accepts Inside-initiated sync connections and reconciles
//! `ActivePortMap` against the pushed port set.

use std::collections::HashSet;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::time::timeout;

use super::{listener, Outside};
use crate::auth::{self, AuthToken};
use crate::constants::IDLE_TIMEOUT;
use crate::protocol::{SyncDecodeError, SyncMessage};

pub async fn accept_loop(listener: TcpListener, state: Arc<Outside>) {
    loop {
        tokio::select! {
            () = state.shutdown.notified() => break,
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, _addr)) => {
                        tokio::spawn(handle_sync_connection(stream, Arc::clone(&state)));
                    }
                    Err(err) => log::warn!("sync listener: accept error: {err}"),
                }
            }
        }
    }
}

/// All reads for one sync connection share a single 30s deadline (spec's
/// "the handler as a whole may not exceed 30 s" rule), rather than each read
/// getting its own fresh timeout — otherwise a slow trickle sender could
/// hold a spawned task open for up to `MAX_SYNC_COUNT` individual deadlines.
async fn handle_sync_connection(mut stream: tokio::net::TcpStream, state: Arc<Outside>) {
    let result = timeout(IDLE_TIMEOUT, async {
        let received = auth::read_token(&mut stream).await?;
        let ports = SyncMessage::read_body(&mut stream).await?;
        Ok::<(AuthToken, Vec<u16>), SyncDecodeError>((received, ports))
    })
    .await;

    let (received, ports) = match result {
        Ok(Ok(pair)) => pair,
        Ok(Err(SyncDecodeError::CountTooLarge(n))) => {
            log::warn!("sync connection: port count {n} exceeds limit, closing without applying");
            return;
        }
        Ok(Err(SyncDecodeError::Io(err))) => {
            log::warn!("sync connection: frame truncated or timed out: {err}");
            return;
        }
        Err(_elapsed) => {
            log::warn!("sync connection: exceeded the shared 30s read deadline, closing");
            return;
        }
    };

    if !state.token.verify(&received) {
        log::warn!("sync connection: auth token mismatch, closing");
        return;
    }

    reconcile(&state, ports.into_iter().collect()).await;
}

/// Open every port in `new_ports` not currently active, then close every
/// currently active port not in `new_ports`. Open-then-close within one
/// handler call is the spec's "atomic from the operator's standpoint"
/// guarantee; overlap between two concurrent handlers is acceptable since
/// `ActivePortMap` is guarded by its own mutex.
async fn reconcile(state: &Arc<Outside>, new_ports: HashSet<u16>) {
    let currently_active: Vec<u16> = state.active_ports.lock().await.keys().copied().collect();

    for &port in &new_ports {
        if !currently_active.contains(&port) {
            if let Err(err) = listener::open_port(port, Arc::clone(state)).await {
                log::error!("sync reconciliation: failed to open port {port}: {err}");
            }
        }
    }

    for port in currently_active {
        if !new_ports.contains(&port) {
            listener::close_port(state, port).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::AuthToken;
    use crate::pool::BridgePool;
    use std::collections::HashMap;
    use tokio::sync::{Mutex, Notify};

    fn test_state() -> Arc<Outside> {
        Arc::new(Outside {
            pool: BridgePool::new(4),
            token: AuthToken::derive("opensesame"),
            active_ports: Mutex::new(HashMap::new()),
            rate_limiter: crate::rate_limit::RateLimiter::new(std::time::Duration::from_secs(30)),
            shutdown: Arc::new(Notify::new()),
        })
    }

    #[tokio::test]
    async fn reconcile_opens_new_and_closes_withdrawn_ports() {
        let state = test_state();
        reconcile(&state, HashSet::from([9000, 9001])).await;
        {
            let active = state.active_ports.lock().await;
            assert_eq!(active.len(), 2);
        }

        reconcile(&state, HashSet::from([9000])).await;
        let active = state.active_ports.lock().await;
        assert_eq!(active.keys().copied().collect::<Vec<_>>(), vec![9000]);
    }

    #[tokio::test]
    async fn reconcile_with_empty_set_closes_everything() {
        let state = test_state();
        reconcile(&state, HashSet::from([9000, 9001])).await;
        reconcile(&state, HashSet::new()).await;
        let active = state.active_ports.lock().await;
        assert!(active.is_empty());
    }

    #[tokio::test]
    async fn reopening_an_already_active_port_causes_no_churn() {
        let state = test_state();
        reconcile(&state, HashSet::from([9000])).await;
        reconcile(&state, HashSet::from([9000])).await;
        let active = state.active_ports.lock().await;
        assert_eq!(active.len(), 1, "reopening an active port must not duplicate it");
    }
}

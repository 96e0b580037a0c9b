//! Bridge acceptor: accepts Inside-initiated bridge sessions and enqueues
//! them into the `BridgePool`.

use std::sync::Arc;

use tokio::net::TcpListener;

use super::Outside;
use crate::auth;
use crate::constants::POOL_TIMEOUT;
use crate::net;

pub async fn accept_loop(listener: TcpListener, state: Arc<Outside>) {
    loop {
        tokio::select! {
            () = state.shutdown.notified() => break,
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, _addr)) => {
                        tokio::spawn(handle_bridge_connection(stream, Arc::clone(&state)));
                    }
                    Err(err) => log::warn!("bridge listener: accept error: {err}"),
                }
            }
        }
    }
}

async fn handle_bridge_connection(mut stream: tokio::net::TcpStream, state: Arc<Outside>) {
    net::tune(&stream);

    if let Err(err) = auth::write_token(&mut stream, &state.token).await {
        log::debug!("bridge session: failed to write auth token: {err}");
        return;
    }

    if !state.pool.put(stream, POOL_TIMEOUT).await
        && state.rate_limiter.allow("bridge-pool-full")
    {
        log::warn!("bridge pool full, dropping a session after {POOL_TIMEOUT:?} wait");
    }
}

//! Bridge-session producer: a fixed pool of workers, each dialing the
//! Outside endpoint, authenticating, waiting for a dispatch header, then
//! splicing to the named loopback backend.
//!
//! State machine per worker: Connecting -> AwaitingServerAuth ->
//! AwaitingDispatch -> ConnectingBackend -> Splicing -> Connecting.
//! An auth mismatch with the Outside endpoint is the one failure that ends
//! a worker permanently; every other failure backs off and retries.

use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::sync::{Notify, Semaphore};
use tokio::time::timeout;

use crate::auth::{self, AuthToken};
use crate::config::Config;
use crate::constants::{BACKOFF_BASE, BACKOFF_CAP, CONNECT_TIMEOUT, IDLE_TIMEOUT};
use crate::net;
use crate::protocol::DispatchHeader;
use crate::rate_limit::RateLimiter;
use crate::splice;

enum WorkerError {
    AuthMismatch,
    /// Fewer than the expected bytes arrived before EOF on a protocol-framing
    /// read. Normal — happens whenever the Outside drops an over-capacity
    /// bridge session — so it's logged at debug with rate limiting rather
    /// than `warn!`, per the spec's `IncompleteRead` branch.
    IncompleteRead,
    /// The dispatch header named a port outside `[1, 65535]`. Distinct from
    /// `Other` because this branch resets backoff and reconnects immediately
    /// instead of sleeping and escalating.
    InvalidDispatchPort(u16),
    Other(anyhow::Error),
}

impl<E: Into<anyhow::Error>> From<E> for WorkerError {
    fn from(err: E) -> Self {
        WorkerError::Other(err.into())
    }
}

/// Spawn exactly `pool_capacity` bridge workers and run until `shutdown`.
pub async fn run(config: Arc<Config>, rate_limiter: Arc<RateLimiter>, shutdown: Arc<Notify>) {
    let semaphore = Arc::new(Semaphore::new(config.pool_capacity));
    let mut tasks = Vec::with_capacity(config.pool_capacity);

    for worker_id in 0..config.pool_capacity {
        tasks.push(tokio::spawn(worker_loop(
            worker_id,
            Arc::clone(&config),
            Arc::clone(&rate_limiter),
            Arc::clone(&shutdown),
            Arc::clone(&semaphore),
        )));
    }

    for task in tasks {
        let _ = task.await;
    }
}

async fn worker_loop(
    worker_id: usize,
    config: Arc<Config>,
    rate_limiter: Arc<RateLimiter>,
    shutdown: Arc<Notify>,
    semaphore: Arc<Semaphore>,
) {
    let token = AuthToken::derive(&config.key);
    let mut backoff = BACKOFF_BASE;

    loop {
        tokio::select! {
            () = shutdown.notified() => break,
            result = run_once(&config, &token, Arc::clone(&semaphore)) => {
                match result {
                    Ok(()) => backoff = BACKOFF_BASE,
                    Err(WorkerError::AuthMismatch) => {
                        log::error!("bridge worker {worker_id}: auth mismatch, exiting permanently");
                        return;
                    }
                    Err(WorkerError::IncompleteRead) => {
                        if rate_limiter.allow("bridge-incomplete-read") {
                            log::debug!(
                                "bridge worker {worker_id}: bridge session closed before a full frame arrived"
                            );
                        }
                        tokio::select! {
                            () = shutdown.notified() => break,
                            () = tokio::time::sleep(backoff) => {}
                        }
                        backoff = (backoff * 2).min(BACKOFF_CAP);
                    }
                    Err(WorkerError::InvalidDispatchPort(port)) => {
                        log::warn!("bridge worker {worker_id}: dispatch header named invalid port {port}, reconnecting");
                        backoff = BACKOFF_BASE;
                    }
                    Err(WorkerError::Other(err)) => {
                        if rate_limiter.allow("bridge-worker-error") {
                            log::warn!("bridge worker {worker_id}: {err}, backing off {backoff:?}");
                        }
                        tokio::select! {
                            () = shutdown.notified() => break,
                            () = tokio::time::sleep(backoff) => {}
                        }
                        backoff = (backoff * 2).min(BACKOFF_CAP);
                    }
                }
            }
        }
    }
}

async fn run_once(
    config: &Config,
    token: &AuthToken,
    semaphore: Arc<Semaphore>,
) -> Result<(), WorkerError> {
    let _permit = semaphore
        .acquire_owned()
        .await
        .map_err(|err| WorkerError::Other(err.into()))?;

    let iran_ip = config
        .iran_ip
        .as_deref()
        .ok_or_else(|| WorkerError::Other(anyhow::anyhow!("IRAN_IP is not configured")))?;

    let mut bridge_stream = timeout(
        CONNECT_TIMEOUT,
        TcpStream::connect((iran_ip, config.bridge_port)),
    )
    .await??;
    net::tune(&bridge_stream);

    let received = match auth::read_token(&mut bridge_stream).await {
        Ok(received) => received,
        Err(err) if err.kind() == std::io::ErrorKind::UnexpectedEof => {
            return Err(WorkerError::IncompleteRead);
        }
        Err(err) => return Err(WorkerError::Other(err.into())),
    };
    if !token.verify(&received) {
        return Err(WorkerError::AuthMismatch);
    }

    let header = match DispatchHeader::read(&mut bridge_stream).await {
        Ok(header) => header,
        Err(err) if err.kind() == std::io::ErrorKind::UnexpectedEof => {
            return Err(WorkerError::IncompleteRead);
        }
        Err(err) => {
            return Err(WorkerError::Other(anyhow::anyhow!(
                "bridge session ended before a dispatch header arrived: {err}"
            )));
        }
    };
    if !net::is_valid_port(header.target_port) {
        return Err(WorkerError::InvalidDispatchPort(header.target_port));
    }

    let backend_stream = timeout(
        CONNECT_TIMEOUT,
        TcpStream::connect(("127.0.0.1", header.target_port)),
    )
    .await??;

    splice::splice(bridge_stream, backend_stream, IDLE_TIMEOUT).await;
    Ok(())
}

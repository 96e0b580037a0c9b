//! `BridgePool`: the Outside endpoint's bounded FIFO of idle bridge
//! sessions.
//!
//! Grounded in the teacher's background-worker channel pattern
//! (`hub/workers.rs`), adapted from a `std::sync::mpsc` channel to a
//! `tokio::sync::mpsc` bounded channel so `put`/`get` can each carry their
//! own 5-second deadline without blocking a worker thread.

use std::time::Duration;

use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::timeout;

/// A bounded FIFO of `Idle` bridge sessions, capacity `MAX_POOL`.
///
/// `put` and `get` both race against a caller-supplied deadline; on timeout
/// the session is dropped (for `put`) or the caller receives `None` (for
/// `get`) rather than blocking indefinitely.
#[derive(Debug)]
pub struct BridgePool {
    tx: mpsc::Sender<TcpStream>,
    rx: tokio::sync::Mutex<mpsc::Receiver<TcpStream>>,
}

impl BridgePool {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity);
        Self {
            tx,
            rx: tokio::sync::Mutex::new(rx),
        }
    }

    /// Enqueue `session`, waiting up to `deadline` for room in the pool.
    /// Returns `true` if the session was accepted. On a full-queue timeout
    /// the session is simply dropped (and thus closed) — this is the
    /// spec's documented "drop on timeout" behavior, not a recoverable
    /// error, so nothing is handed back to the caller.
    pub async fn put(&self, session: TcpStream, deadline: Duration) -> bool {
        matches!(timeout(deadline, self.tx.send(session)).await, Ok(Ok(())))
    }

    /// Dequeue one session, waiting up to `deadline`.
    pub async fn get(&self, deadline: Duration) -> Option<TcpStream> {
        let mut rx = self.rx.lock().await;
        timeout(deadline, rx.recv()).await.ok().flatten()
    }

    /// Number of sessions currently available without blocking, for tests
    /// and diagnostics.
    #[cfg(test)]
    pub fn capacity(&self) -> usize {
        self.tx.capacity()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    async fn dummy_stream() -> TcpStream {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let client = tokio::spawn(async move { TcpStream::connect(addr).await.unwrap() });
        let (server, _) = listener.accept().await.unwrap();
        drop(client.await.unwrap());
        server
    }

    #[tokio::test]
    async fn put_then_get_round_trips_one_session() {
        let pool = BridgePool::new(4);
        let session = dummy_stream().await;
        assert!(pool.put(session, Duration::from_millis(500)).await);
        assert!(pool.get(Duration::from_millis(500)).await.is_some());
    }

    #[tokio::test]
    async fn get_times_out_on_empty_pool() {
        let pool = BridgePool::new(4);
        let got = pool.get(Duration::from_millis(50)).await;
        assert!(got.is_none());
    }

    #[tokio::test]
    async fn put_times_out_and_drops_session_when_full() {
        let pool = BridgePool::new(1);
        let first = dummy_stream().await;
        assert!(pool.put(first, Duration::from_millis(200)).await);

        let second = dummy_stream().await;
        let accepted = pool.put(second, Duration::from_millis(50)).await;
        assert!(!accepted);
    }

    #[tokio::test]
    async fn each_enqueued_session_is_dequeued_at_most_once() {
        let pool = BridgePool::new(4);
        for _ in 0..3 {
            let session = dummy_stream().await;
            assert!(pool.put(session, Duration::from_millis(500)).await);
        }
        let mut dequeued = 0;
        while pool.get(Duration::from_millis(50)).await.is_some() {
            dequeued += 1;
        }
        assert_eq!(dequeued, 3);
    }
}

//! Bidirectional byte copy between two streams with an idle timeout and
//! half-close semantics.
//!
//! Grounded in the split read/write task shape of the teacher's
//! `SocketClientConn` (`stream.into_split()` plus independent loops).

use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::time::timeout;

use crate::constants::BUFFER_SIZE;

/// Copy bytes from `source` to `sink` until EOF or error, subject to
/// `idle_timeout` on every read and every write. `sink` is guaranteed closed
/// on every exit path, including an early return on timeout.
///
/// This is one direction of a splice; it never propagates an error to the
/// caller — timeouts and I/O errors both just end the copy, matching the
/// spec's "errors are logged at debug level only" policy.
pub async fn pipe(mut source: OwnedReadHalf, mut sink: OwnedWriteHalf, idle_timeout: Duration) {
    let mut buf = vec![0u8; BUFFER_SIZE];
    loop {
        let read = match timeout(idle_timeout, source.read(&mut buf)).await {
            Ok(Ok(0)) => break,
            Ok(Ok(n)) => n,
            Ok(Err(err)) => {
                log::debug!("splice: read error: {err}");
                break;
            }
            Err(_) => {
                log::debug!("splice: read idle timeout");
                break;
            }
        };

        match timeout(idle_timeout, sink.write_all(&buf[..read])).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                log::debug!("splice: write error: {err}");
                break;
            }
            Err(_) => {
                log::debug!("splice: write idle timeout");
                break;
            }
        }
    }

    // Every loop exit above is a `break`, never an early `return`, so this
    // always runs — the sink is guaranteed closed on every exit path.
    let _ = sink.shutdown().await;
}

/// Splice `a` and `b` together: copy `a`→`b` and `b`→`a` concurrently, each
/// direction independently half-closing when its source reaches EOF. Returns
/// once both directions have finished; both streams are fully closed by
/// then regardless of which direction ended first or why.
pub async fn splice(a: TcpStream, b: TcpStream, idle_timeout: Duration) {
    let (a_read, a_write) = a.into_split();
    let (b_read, b_write) = b.into_split();

    tokio::join!(
        pipe(a_read, b_write, idle_timeout),
        pipe(b_read, a_write, idle_timeout),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    async fn loopback_pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let client = tokio::spawn(async move { TcpStream::connect(addr).await.unwrap() });
        let (server, _) = listener.accept().await.unwrap();
        (server, client.await.unwrap())
    }

    #[tokio::test]
    async fn splice_echoes_bytes_both_ways() {
        let (user_a, user_b) = loopback_pair().await;
        let (backend_a, backend_b) = loopback_pair().await;

        let splice_task = tokio::spawn(splice(user_a, backend_a, Duration::from_secs(5)));

        let mut user_side = user_b;
        let mut backend_side = backend_b;

        user_side.write_all(b"hello").await.unwrap();
        let mut buf = [0u8; 5];
        backend_side.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"hello");

        backend_side.write_all(b"world").await.unwrap();
        let mut buf2 = [0u8; 5];
        user_side.read_exact(&mut buf2).await.unwrap();
        assert_eq!(&buf2, b"world");

        drop(user_side);
        drop(backend_side);
        splice_task.await.unwrap();
    }

    #[tokio::test]
    async fn pipe_ends_on_idle_timeout_without_panicking() {
        let (a, b) = loopback_pair().await;
        let (read, _keep_a_alive) = a.into_split();
        let (_, write) = b.into_split();
        pipe(read, write, Duration::from_millis(20)).await;
    }
}

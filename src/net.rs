//! Socket tuning and small address/port helpers shared by both endpoints.

use socket2::SockRef;
use tokio::net::TcpStream;

use crate::constants::SOCKET_BUFFER_SIZE;

/// Disable Nagle and widen the send/receive buffers on `stream`.
///
/// Best-effort: every step is independent and a failure only produces a
/// debug-level log line, matching the "failures are logged at debug but do
/// not abort" tuning policy.
pub fn tune(stream: &TcpStream) {
    let sock = SockRef::from(stream);

    if let Err(err) = sock.set_nodelay(true) {
        log::debug!("socket tuning: failed to set TCP_NODELAY: {err}");
    }
    if let Err(err) = sock.set_send_buffer_size(SOCKET_BUFFER_SIZE) {
        log::debug!("socket tuning: failed to set SO_SNDBUF: {err}");
    }
    if let Err(err) = sock.set_recv_buffer_size(SOCKET_BUFFER_SIZE) {
        log::debug!("socket tuning: failed to set SO_RCVBUF: {err}");
    }
}

/// True if `port` is a valid [`PortNumber`](crate::protocol) — any value in
/// `[1, 65535]`. `0` is the only value `u16` can hold that's out of range.
#[must_use]
pub fn is_valid_port(port: u16) -> bool {
    port != 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn port_zero_is_invalid() {
        assert!(!is_valid_port(0));
    }

    #[test]
    fn port_one_and_max_are_valid() {
        assert!(is_valid_port(1));
        assert!(is_valid_port(65535));
    }

    #[tokio::test]
    async fn tune_does_not_panic_on_a_live_socket() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let client = tokio::spawn(async move { TcpStream::connect(addr).await.unwrap() });
        let (server_stream, _) = listener.accept().await.unwrap();
        let client_stream = client.await.unwrap();
        tune(&server_stream);
        tune(&client_stream);
    }
}

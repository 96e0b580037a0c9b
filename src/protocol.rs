//! Wire framing for the two control messages that ride over the bridge and
//! sync connections. All multi-byte integers are big-endian.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::timeout;

use crate::auth::AuthToken;
use crate::constants::{IDLE_TIMEOUT, MAX_SYNC_COUNT};
use crate::net::is_valid_port;

/// `[2 bytes BE: target backend port]`, sent by the Outside endpoint to the
/// Inside endpoint immediately after the bridge handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchHeader {
    pub target_port: u16,
}

impl DispatchHeader {
    pub async fn write<W>(&self, stream: &mut W) -> std::io::Result<()>
    where
        W: AsyncWrite + Unpin,
    {
        timeout(IDLE_TIMEOUT, async {
            stream.write_all(&self.target_port.to_be_bytes()).await?;
            stream.flush().await
        })
        .await
        .map_err(|_| timed_out("dispatch header write"))?
    }

    /// Read a dispatch header. Does not validate the port — callers must
    /// check [`is_valid_port`] before acting on `target_port`, per the
    /// spec's "Inside MUST validate the port" requirement.
    pub async fn read<R>(stream: &mut R) -> std::io::Result<Self>
    where
        R: AsyncRead + Unpin,
    {
        let mut buf = [0u8; 2];
        timeout(IDLE_TIMEOUT, stream.read_exact(&mut buf))
            .await
            .map_err(|_| timed_out("dispatch header read"))??;
        Ok(Self {
            target_port: u16::from_be_bytes(buf),
        })
    }
}

/// `[32 bytes AuthToken][2 bytes BE count N][N x 2 bytes BE port]`, sent by
/// the Inside endpoint to the Outside endpoint on every sync cycle. Always a
/// full replacement of the Outside's active port set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncMessage {
    pub token: AuthTokenBytes,
    pub ports: Vec<u16>,
}

/// Thin newtype so `SyncMessage`'s `Debug`/`PartialEq` don't need to flow
/// through [`AuthToken`]'s hand-rolled `Debug`.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct AuthTokenBytes(pub [u8; 32]);

impl std::fmt::Debug for AuthTokenBytes {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("AuthTokenBytes(..)")
    }
}

impl From<AuthToken> for AuthTokenBytes {
    fn from(token: AuthToken) -> Self {
        Self(*token.as_bytes())
    }
}

impl From<AuthTokenBytes> for AuthToken {
    fn from(bytes: AuthTokenBytes) -> Self {
        AuthToken::from_bytes(bytes.0)
    }
}

/// Error returned while decoding a sync message body (after the token has
/// already been read and verified separately by the caller).
#[derive(Debug)]
pub enum SyncDecodeError {
    /// `count` exceeded [`MAX_SYNC_COUNT`] — the runaway-input defense.
    CountTooLarge(u16),
    Io(std::io::Error),
}

impl From<std::io::Error> for SyncDecodeError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err)
    }
}

impl std::fmt::Display for SyncDecodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::CountTooLarge(n) => write!(f, "sync count {n} exceeds {MAX_SYNC_COUNT}"),
            Self::Io(err) => write!(f, "{err}"),
        }
    }
}

impl std::error::Error for SyncDecodeError {}

impl SyncMessage {
    /// Encode and write the full message: token, count, then each port.
    /// Ports beyond `u16::MAX` entries are impossible by construction since
    /// `ports` is itself bounded by callers to `MAX_SYNC_COUNT`.
    pub async fn write<W>(&self, stream: &mut W) -> std::io::Result<()>
    where
        W: AsyncWrite + Unpin,
    {
        timeout(IDLE_TIMEOUT, async {
            stream.write_all(&self.token.0).await?;
            #[allow(clippy::cast_possible_truncation, reason = "ports is bounded by callers to <= MAX_SYNC_COUNT")]
            let count = self.ports.len() as u16;
            stream.write_all(&count.to_be_bytes()).await?;
            for port in &self.ports {
                stream.write_all(&port.to_be_bytes()).await?;
            }
            stream.flush().await
        })
        .await
        .map_err(|_| timed_out("sync message write"))?
    }

    /// Read the token-independent body of a sync message: the `count` field
    /// and then `count` ports. The 32-byte token prelude is read and
    /// verified by the caller via [`crate::auth::read_token`] first, since
    /// auth handling is shared between the bridge and sync handshakes.
    ///
    /// Invalid ports (`0`) are silently dropped, matching `PortNumber`'s
    /// "invalid values are silently dropped on receive" rule; `count` itself
    /// is rejected outright if it exceeds [`MAX_SYNC_COUNT`].
    pub async fn read_body<R>(stream: &mut R) -> Result<Vec<u16>, SyncDecodeError>
    where
        R: AsyncRead + Unpin,
    {
        let mut count_buf = [0u8; 2];
        timeout(IDLE_TIMEOUT, stream.read_exact(&mut count_buf))
            .await
            .map_err(|_| timed_out("sync count read"))??;
        let count = u16::from_be_bytes(count_buf);
        if count > MAX_SYNC_COUNT {
            return Err(SyncDecodeError::CountTooLarge(count));
        }

        let mut ports = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let mut port_buf = [0u8; 2];
            timeout(IDLE_TIMEOUT, stream.read_exact(&mut port_buf))
                .await
                .map_err(|_| timed_out("sync port read"))??;
            let port = u16::from_be_bytes(port_buf);
            if is_valid_port(port) {
                ports.push(port);
            }
        }
        Ok(ports)
    }
}

fn timed_out(what: &str) -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::TimedOut, format!("{what} timed out"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    #[tokio::test]
    async fn dispatch_header_round_trips() {
        let (mut a, mut b) = duplex(64);
        let header = DispatchHeader { target_port: 9000 };
        header.write(&mut a).await.unwrap();
        let decoded = DispatchHeader::read(&mut b).await.unwrap();
        assert_eq!(header, decoded);
    }

    #[tokio::test]
    async fn sync_message_round_trips_port_set() {
        let (mut a, mut b) = duplex(4096);
        let msg = SyncMessage {
            token: AuthTokenBytes([7u8; 32]),
            ports: vec![80, 443, 9000],
        };
        msg.write(&mut a).await.unwrap();

        let mut token_buf = [0u8; 32];
        b.read_exact(&mut token_buf).await.unwrap();
        assert_eq!(token_buf, [7u8; 32]);

        let ports = SyncMessage::read_body(&mut b).await.unwrap();
        assert_eq!(ports, vec![80, 443, 9000]);
    }

    #[tokio::test]
    async fn count_zero_decodes_to_empty_set() {
        let (mut a, mut b) = duplex(64);
        let msg = SyncMessage {
            token: AuthTokenBytes([0u8; 32]),
            ports: vec![],
        };
        msg.write(&mut a).await.unwrap();
        let mut token_buf = [0u8; 32];
        b.read_exact(&mut token_buf).await.unwrap();
        let ports = SyncMessage::read_body(&mut b).await.unwrap();
        assert!(ports.is_empty());
    }

    #[tokio::test]
    async fn count_over_limit_is_rejected() {
        let (mut a, mut b) = duplex(64);
        let over = MAX_SYNC_COUNT + 1;
        a.write_all(&over.to_be_bytes()).await.unwrap();
        drop(a);
        let err = SyncMessage::read_body(&mut b).await.unwrap_err();
        assert!(matches!(err, SyncDecodeError::CountTooLarge(n) if n == over));
    }

    #[tokio::test]
    async fn port_zero_is_silently_dropped() {
        let (mut a, mut b) = duplex(64);
        a.write_all(&2u16.to_be_bytes()).await.unwrap();
        a.write_all(&0u16.to_be_bytes()).await.unwrap();
        a.write_all(&80u16.to_be_bytes()).await.unwrap();
        drop(a);
        let ports = SyncMessage::read_body(&mut b).await.unwrap();
        assert_eq!(ports, vec![80]);
    }

    #[tokio::test]
    async fn dispatch_header_zero_port_is_not_validated_by_read() {
        let (mut a, mut b) = duplex(64);
        let header = DispatchHeader { target_port: 0 };
        header.write(&mut a).await.unwrap();
        let decoded = DispatchHeader::read(&mut b).await.unwrap();
        assert_eq!(decoded.target_port, 0);
        assert!(!is_valid_port(decoded.target_port));
    }
}

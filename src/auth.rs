//! Shared-secret authentication for bridge and sync connections.
//!
//! Both endpoints derive the same [`AuthToken`] from an operator-supplied
//! pre-shared key and exchange it as a fixed 32-byte prelude on every
//! connection. Neither side trusts a plaintext prelude from the network, so
//! the handshake runs in both directions: the Outside sends its token first
//! on bridge connections, the Inside sends its token first on sync
//! connections.

use std::fmt;

use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::time::timeout;

use crate::constants::IDLE_TIMEOUT;

/// A 32-byte shared secret derived from the operator's pre-shared key.
///
/// `Debug` is hand-rolled to avoid ever printing the token to a log line.
#[derive(Clone, Copy, Eq, PartialEq)]
pub struct AuthToken([u8; 32]);

impl AuthToken {
    /// Derive the token deterministically from a pre-shared key.
    #[must_use]
    pub fn derive(key: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(key.as_bytes());
        let digest = hasher.finalize();
        let mut bytes = [0u8; 32];
        bytes.copy_from_slice(&digest);
        Self(bytes)
    }

    /// Constant-time comparison against another token.
    #[must_use]
    pub fn verify(&self, other: &Self) -> bool {
        self.0.ct_eq(&other.0).into()
    }

    /// Raw bytes, for writing onto the wire.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Reconstruct a token from 32 bytes read off the wire.
    #[must_use]
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

impl fmt::Debug for AuthToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AuthToken(..)")
    }
}

/// Write our token onto `stream`, bounded by the idle timeout.
pub async fn write_token<W>(stream: &mut W, token: &AuthToken) -> std::io::Result<()>
where
    W: tokio::io::AsyncWrite + Unpin,
{
    timeout(IDLE_TIMEOUT, async {
        stream.write_all(token.as_bytes()).await?;
        stream.flush().await
    })
    .await
    .map_err(|_| std::io::Error::new(std::io::ErrorKind::TimedOut, "auth token write timed out"))?
}

/// Read exactly 32 bytes off `stream` and return them as a token, bounded by
/// the idle timeout. An EOF before 32 bytes arrive surfaces as an ordinary
/// `UnexpectedEof` I/O error — callers treat it as a normal reconnect branch,
/// not an exceptional one.
pub async fn read_token<R>(stream: &mut R) -> std::io::Result<AuthToken>
where
    R: tokio::io::AsyncRead + Unpin,
{
    let mut buf = [0u8; 32];
    timeout(IDLE_TIMEOUT, stream.read_exact(&mut buf))
        .await
        .map_err(|_| std::io::Error::new(std::io::ErrorKind::TimedOut, "auth token read timed out"))??;
    Ok(AuthToken::from_bytes(buf))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    #[test]
    fn derive_is_deterministic() {
        let a = AuthToken::derive("opensesame");
        let b = AuthToken::derive("opensesame");
        assert!(a.verify(&b));
    }

    #[test]
    fn derive_differs_for_different_keys() {
        let a = AuthToken::derive("opensesame");
        let b = AuthToken::derive("opensesam3");
        assert!(!a.verify(&b));
    }

    #[test]
    fn debug_does_not_leak_bytes() {
        let token = AuthToken::derive("opensesame");
        let rendered = format!("{token:?}");
        assert_eq!(rendered, "AuthToken(..)");
    }

    #[tokio::test]
    async fn round_trips_over_a_stream() {
        let (mut a, mut b) = duplex(64);
        let token = AuthToken::derive("opensesame");
        write_token(&mut a, &token).await.unwrap();
        let received = read_token(&mut b).await.unwrap();
        assert!(token.verify(&received));
    }

    #[tokio::test]
    async fn short_write_surfaces_as_eof_not_panic() {
        let (mut a, mut b) = duplex(64);
        a.write_all(&[0u8; 16]).await.unwrap();
        drop(a);
        let err = read_token(&mut b).await.unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::UnexpectedEof);
    }
}

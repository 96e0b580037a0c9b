//! Port-sync producer: every `sync_interval`, dial the Outside endpoint's
//! sync port, probe local backend ports, and push the full replacement set.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::sync::Notify;
use tokio::time::timeout;

use crate::auth::AuthToken;
use crate::config::Config;
use crate::constants::CONNECT_TIMEOUT;
use crate::net;
use crate::probe::{self, SsPortLister};
use crate::protocol::{AuthTokenBytes, SyncMessage};
use crate::rate_limit::RateLimiter;

pub async fn run(config: Arc<Config>, rate_limiter: Arc<RateLimiter>, shutdown: Arc<Notify>) {
    let token = AuthToken::derive(&config.key);

    loop {
        if let Err(err) = send_sync(&config, &token).await {
            if rate_limiter.allow("sync-producer-error") {
                log::warn!("port-sync producer: {err}");
            }
        }

        tokio::select! {
            () = shutdown.notified() => break,
            () = tokio::time::sleep(config.sync_interval) => {}
        }
    }
}

async fn send_sync(config: &Config, token: &AuthToken) -> Result<()> {
    let iran_ip = config
        .iran_ip
        .as_deref()
        .context("IRAN_IP is required to run the port-sync producer")?;

    let mut stream = timeout(CONNECT_TIMEOUT, TcpStream::connect((iran_ip, config.sync_port)))
        .await
        .context("connect timed out")??;
    net::tune(&stream);

    let process_name = config.probe_process_name.clone();
    let bridge_port = config.bridge_port;
    let sync_port = config.sync_port;
    let ports: Vec<u16> = tokio::task::spawn_blocking(move || {
        probe::probe(&SsPortLister, &process_name, bridge_port, sync_port)
            .into_iter()
            .collect()
    })
    .await
    .context("backend-port probe task panicked")?;

    let message = SyncMessage {
        token: AuthTokenBytes::from(*token),
        ports,
    };
    message.write(&mut stream).await?;
    let _ = stream.shutdown().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn send_sync_fails_fast_without_iran_ip() {
        let config = Config {
            role: crate::config::Role::Inside,
            iran_ip: None,
            bridge_port: 4430,
            sync_port: 4431,
            auto_sync: true,
            manual_ports: vec![],
            key: "opensesame".to_string(),
            sync_interval: Duration::from_secs(5),
            probe_process_name: "xray".to_string(),
            pool_capacity: 4,
        };
        let token = AuthToken::derive(&config.key);
        let err = send_sync(&config, &token).await.unwrap_err();
        assert!(err.to_string().contains("IRAN_IP"));
    }
}

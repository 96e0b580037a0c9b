//! Backend-port probe: discovers the local TCP ports a nominated process is
//! currently listening on.
//!
//! Grounded in `original_source/blutunnel.py`'s `get_xray_ports()`: shell out
//! to `ss -tlnp`, keep lines whose process column matches a configured
//! substring, extract the local port, drop loopback-bound entries and the
//! tunnel's own ports, keep the rest above port 100.
//!
//! The listing step sits behind [`PortLister`] so tests can supply canned
//! `ss` output instead of shelling out; production code always goes through
//! [`SsPortLister`].

use std::collections::HashSet;
use std::process::Command;

use crate::constants::PROBE_MIN_PORT;

/// Source of raw `ss -tlnp`-shaped listener text.
pub trait PortLister: Send + Sync {
    /// Return the raw listing text, one socket per line, in `ss -tlnp`'s
    /// column layout (`State Recv-Q Send-Q Local-Address:Port
    /// Peer-Address:Port Process`).
    fn list(&self) -> std::io::Result<String>;
}

/// Shells out to `ss -tlnp`, matching the original implementation.
#[derive(Debug, Default)]
pub struct SsPortLister;

impl PortLister for SsPortLister {
    fn list(&self) -> std::io::Result<String> {
        let output = Command::new("ss").arg("-tlnp").output()?;
        if !output.status.success() {
            return Err(std::io::Error::other(format!(
                "ss exited with status {}",
                output.status
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// Run the probe: enumerate listeners, filter by `process_name`, exclude
/// loopback and the tunnel's own `bridge_port`/`sync_port`, keep ports in
/// `(100, 65535]`.
///
/// On enumeration failure, returns the empty set — per the spec, this is an
/// acceptable degraded condition: the next sync cycle will request closure
/// of all public ports.
pub fn probe(
    lister: &dyn PortLister,
    process_name: &str,
    bridge_port: u16,
    sync_port: u16,
) -> HashSet<u16> {
    let text = match lister.list() {
        Ok(text) => text,
        Err(err) => {
            log::error!("backend-port probe: failed to enumerate listeners: {err}");
            return HashSet::new();
        }
    };

    let mut ports = HashSet::new();
    for line in text.lines() {
        if !line.contains(process_name) {
            continue;
        }
        let Some(local_addr) = line.split_whitespace().nth(3) else {
            continue;
        };
        let Some((host, port)) = split_host_port(local_addr) else {
            continue;
        };
        if host == "127.0.0.1" || host == "::1" || host == "*" {
            continue;
        }
        if port > PROBE_MIN_PORT && port != bridge_port && port != sync_port {
            ports.insert(port);
        }
    }
    ports
}

/// Split an `ss` local-address column (`1.2.3.4:80`, `[::1]:80`, `*:80`)
/// into host and port.
fn split_host_port(addr: &str) -> Option<(&str, u16)> {
    if let Some(rest) = addr.strip_prefix('[') {
        let (host, rest) = rest.split_once(']')?;
        let port_str = rest.strip_prefix(':')?;
        let port = port_str.parse().ok()?;
        return Some((host, port));
    }
    let (host, port_str) = addr.rsplit_once(':')?;
    let port = port_str.parse().ok()?;
    Some((host, port))
}

//! Configuration loading and the small bit of cross-run state persistence
//! the core needs (`last_europe`/`last_iran`, per `spec.md` §6).
//!
//! Mirrors the teacher's `config.rs`: environment-variable overrides with a
//! serde/JSON file underneath, owner-only file permissions, and a
//! `config_dir()` resolution order (test override, env override, platform
//! default). The tunnel's actual operator-facing config *store*
//! (`get`/`set` CRUD) is out of scope per `spec.md`; this module only reads
//! and writes the two keys the core itself needs.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;

use crate::constants::{DEFAULT_PROBE_PROCESS_NAME, DEFAULT_SYNC_INTERVAL, MAX_POOL};

/// Which of the two coupled state machines this process instance runs.
///
/// `spec.md`'s `MODE` values are historical and, read literally, ambiguous
/// about which name maps to which role — see `SPEC_FULL.md` §0 and
/// `DESIGN.md` for the resolution. `iran` is the listening Outside endpoint;
/// `europe` is the dialing Inside endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Dials out to the Outside endpoint, probes backend ports, splices to
    /// loopback backends. `MODE=europe`.
    Inside,
    /// Listens for bridge/sync/user connections, dispatches sessions.
    /// `MODE=iran`.
    Outside,
}

impl Role {
    fn parse(mode: &str) -> Option<Self> {
        match mode.trim().to_ascii_lowercase().as_str() {
            "europe" => Some(Self::Inside),
            "iran" => Some(Self::Outside),
            _ => None,
        }
    }
}

/// Fully resolved runtime configuration for one process instance.
#[derive(Debug, Clone)]
pub struct Config {
    pub role: Role,
    /// Outside endpoint's public address. Required when `role == Inside`.
    pub iran_ip: Option<String>,
    pub bridge_port: u16,
    pub sync_port: u16,
    /// Only meaningful for `role == Outside`: when false, the static
    /// `manual_ports` set is used instead of the sync consumer.
    pub auto_sync: bool,
    pub manual_ports: Vec<u16>,
    /// Pre-shared key the `AuthToken` is derived from.
    pub key: String,
    pub sync_interval: Duration,
    pub probe_process_name: String,
    pub pool_capacity: usize,
}

impl Config {
    /// Load configuration from the environment, falling back to the
    /// persisted `last_europe`/`last_iran` state for `iran_ip` and the two
    /// ports when the corresponding environment variables are absent.
    ///
    /// Returns an error (intended to map to a nonzero exit code) on any of
    /// `spec.md` §7's "Fatal configuration" conditions.
    pub fn load() -> Result<Self> {
        let mode = std::env::var("MODE").unwrap_or_default();
        let role = Role::parse(&mode)
            .with_context(|| format!("MODE must be 'iran' or 'europe', got {mode:?}"))?;

        let state = PersistedState::load().unwrap_or_default();
        let fallback = match role {
            Role::Inside => state.last_europe.as_ref(),
            Role::Outside => state.last_iran.as_ref(),
        };

        let iran_ip = match std::env::var("IRAN_IP") {
            Ok(v) if !v.trim().is_empty() => Some(v),
            _ => fallback.and_then(|f| f.iran_ip.clone()),
        };

        let bridge_port = parse_port_env("BRIDGE_PORT")?
            .or_else(|| fallback.map(|f| f.bridge_port))
            .context("BRIDGE_PORT is required (1-65535)")?;
        let sync_port = parse_port_env("SYNC_PORT")?
            .or_else(|| fallback.map(|f| f.sync_port))
            .context("SYNC_PORT is required (1-65535)")?;
        anyhow::ensure!(
            bridge_port != sync_port,
            "BRIDGE_PORT and SYNC_PORT must be distinct, both are {bridge_port}"
        );

        if matches!(role, Role::Inside) {
            anyhow::ensure!(
                iran_ip.as_ref().is_some_and(|ip| !ip.is_empty()),
                "IRAN_IP is required in europe (Inside) mode"
            );
        }

        let auto_sync = parse_bool_env("AUTO_SYNC", true);
        let manual_ports = parse_manual_ports(&std::env::var("MANUAL_PORTS").unwrap_or_default());
        if matches!(role, Role::Outside) && !auto_sync && manual_ports.is_empty() {
            anyhow::bail!("MANUAL_PORTS is required when AUTO_SYNC is off");
        }

        let key = std::env::var("KEY").context("KEY is required")?;
        anyhow::ensure!(key.len() >= 8, "KEY must be at least 8 characters");

        let sync_interval = std::env::var("SYNC_INTERVAL_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_SYNC_INTERVAL);

        let probe_process_name = std::env::var("PROBE_PROCESS_NAME")
            .ok()
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| DEFAULT_PROBE_PROCESS_NAME.to_string());

        let pool_capacity = std::env::var("POOL_CAPACITY")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
            .unwrap_or(MAX_POOL);

        let config = Self {
            role,
            iran_ip,
            bridge_port,
            sync_port,
            auto_sync,
            manual_ports,
            key,
            sync_interval,
            probe_process_name,
            pool_capacity,
        };

        if let Err(err) = config.persist() {
            log::debug!("failed to persist last-known endpoint state: {err}");
        }

        Ok(config)
    }

    /// Returns the configuration directory, creating it if necessary.
    ///
    /// Priority: `#[cfg(test)]` always uses a repo-local `tmp/` directory;
    /// otherwise `REVTUNNEL_CONFIG_DIR` if set; otherwise the platform
    /// config directory.
    pub fn config_dir() -> Result<PathBuf> {
        let dir = {
            #[cfg(test)]
            {
                PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tmp/revtunnel-test")
            }
            #[cfg(not(test))]
            {
                if let Ok(dir) = std::env::var("REVTUNNEL_CONFIG_DIR") {
                    PathBuf::from(dir)
                } else {
                    dirs::config_dir()
                        .context("could not determine config directory")?
                        .join("revtunnel")
                }
            }
        };
        std::fs::create_dir_all(&dir)?;
        Ok(dir)
    }

    fn persist(&self) -> Result<()> {
        let mut state = PersistedState::load().unwrap_or_default();
        let entry = EndpointState {
            iran_ip: self.iran_ip.clone(),
            bridge_port: self.bridge_port,
            sync_port: self.sync_port,
            updated_at: Utc::now(),
        };
        match self.role {
            Role::Inside => state.last_europe = Some(entry),
            Role::Outside => state.last_iran = Some(entry),
        }
        state.save()
    }
}

fn parse_port_env(name: &str) -> Result<Option<u16>> {
    match std::env::var(name) {
        Ok(v) if !v.trim().is_empty() => {
            let port: u16 = v
                .trim()
                .parse()
                .with_context(|| format!("{name} must be an integer in 1-65535, got {v:?}"))?;
            anyhow::ensure!(port != 0, "{name} must be in 1-65535, got 0");
            Ok(Some(port))
        }
        _ => Ok(None),
    }
}

fn parse_bool_env(name: &str, default: bool) -> bool {
    match std::env::var(name) {
        Ok(v) => matches!(
            v.trim().to_ascii_lowercase().as_str(),
            "1" | "true" | "yes" | "y" | "on"
        ),
        Err(_) => default,
    }
}

fn parse_manual_ports(raw: &str) -> Vec<u16> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .filter_map(|s| s.parse::<u16>().ok())
        .filter(|&p| p != 0)
        .collect()
}

/// One endpoint's last-known bind parameters, as described by `spec.md`
/// §6's persisted-state layout.
#[derive(Serialize, Deserialize, Clone, Debug)]
struct EndpointState {
    #[serde(skip_serializing_if = "Option::is_none")]
    iran_ip: Option<String>,
    bridge_port: u16,
    sync_port: u16,
    updated_at: DateTime<Utc>,
}

#[derive(Serialize, Deserialize, Default, Debug)]
struct PersistedState {
    #[serde(skip_serializing_if = "Option::is_none")]
    last_europe: Option<EndpointState>,
    #[serde(skip_serializing_if = "Option::is_none")]
    last_iran: Option<EndpointState>,
}

impl PersistedState {
    fn path() -> Result<PathBuf> {
        Ok(Config::config_dir()?.join("state.json"))
    }

    fn load() -> Result<Self> {
        let path = Self::path()?;
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(&path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Write via a sibling temp file and rename into place, so a reader never
    /// observes a half-written state file. The temp file is removed if any
    /// step fails before the rename lands.
    fn save(&self) -> Result<()> {
        let path = Self::path()?;
        let tmp_path = path.with_extension("json.tmp");
        let tmp_path_guard = scopeguard::guard(tmp_path.clone(), |tmp_path| {
            let _ = std::fs::remove_file(tmp_path);
        });

        std::fs::write(&*tmp_path_guard, serde_json::to_string_pretty(self)?)?;
        #[cfg(unix)]
        std::fs::set_permissions(&*tmp_path_guard, std::fs::Permissions::from_mode(0o600))?;
        std::fs::rename(&*tmp_path_guard, &path)?;
        scopeguard::ScopeGuard::into_inner(tmp_path_guard);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Environment variables are process-global; serialize tests that touch
    /// them so they don't stomp on each other.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    fn clear_env() {
        for var in [
            "MODE",
            "IRAN_IP",
            "BRIDGE_PORT",
            "SYNC_PORT",
            "AUTO_SYNC",
            "MANUAL_PORTS",
            "KEY",
            "SYNC_INTERVAL_SECS",
            "PROBE_PROCESS_NAME",
            "POOL_CAPACITY",
        ] {
            std::env::remove_var(var);
        }
    }

    #[test]
    fn role_parse_maps_europe_to_inside_and_iran_to_outside() {
        assert_eq!(Role::parse("europe"), Some(Role::Inside));
        assert_eq!(Role::parse("iran"), Some(Role::Outside));
        assert_eq!(Role::parse("EUROPE"), Some(Role::Inside));
        assert_eq!(Role::parse("mars"), None);
    }

    #[test]
    fn missing_mode_is_a_fatal_config_error() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_env();
        let err = Config::load().unwrap_err();
        assert!(err.to_string().contains("MODE"));
    }

    #[test]
    fn inside_mode_requires_iran_ip() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_env();
        std::env::set_var("MODE", "europe");
        std::env::set_var("BRIDGE_PORT", "4430");
        std::env::set_var("SYNC_PORT", "4431");
        std::env::set_var("KEY", "opensesame");
        let err = Config::load().unwrap_err();
        assert!(err.to_string().contains("IRAN_IP"));
        clear_env();
    }

    #[test]
    fn outside_mode_without_auto_sync_requires_manual_ports() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_env();
        std::env::set_var("MODE", "iran");
        std::env::set_var("BRIDGE_PORT", "4430");
        std::env::set_var("SYNC_PORT", "4431");
        std::env::set_var("KEY", "opensesame");
        std::env::set_var("AUTO_SYNC", "n");
        let err = Config::load().unwrap_err();
        assert!(err.to_string().contains("MANUAL_PORTS"));
        clear_env();
    }

    #[test]
    fn short_key_is_rejected() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_env();
        std::env::set_var("MODE", "iran");
        std::env::set_var("BRIDGE_PORT", "4430");
        std::env::set_var("SYNC_PORT", "4431");
        std::env::set_var("KEY", "short");
        let err = Config::load().unwrap_err();
        assert!(err.to_string().contains("KEY"));
        clear_env();
    }

    #[test]
    fn happy_path_outside_config_loads() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_env();
        std::env::set_var("MODE", "iran");
        std::env::set_var("BRIDGE_PORT", "4430");
        std::env::set_var("SYNC_PORT", "4431");
        std::env::set_var("KEY", "opensesame");
        let config = Config::load().unwrap();
        assert_eq!(config.role, Role::Outside);
        assert_eq!(config.bridge_port, 4430);
        assert_eq!(config.sync_port, 4431);
        assert!(config.auto_sync);
        clear_env();
    }

    #[test]
    fn manual_ports_parses_and_drops_invalid_entries() {
        assert_eq!(parse_manual_ports("80,443,0,abc, 2083 "), vec![80, 443, 2083]);
    }
}

//! Application-wide constants for the tunnel.
//!
//! Centralizes magic numbers so they're discoverable and documented in one
//! place rather than scattered across the protocol/pool/splice modules.

use std::time::Duration;

// ============================================================================
// Sizes
// ============================================================================

/// Read chunk size used by the splicer.
pub const BUFFER_SIZE: usize = 64 * 1024;

/// Send/receive socket buffer size applied to every stream socket.
pub const SOCKET_BUFFER_SIZE: usize = 2 * 1024 * 1024;

/// Target and hard capacity of the Outside endpoint's bridge pool, and the
/// number of bridge worker tasks the Inside endpoint runs. Deliberately
/// duplicated — see DESIGN.md's note on the redundant semaphore cap.
pub const MAX_POOL: usize = 300;

/// Maximum port count accepted in a single sync message.
pub const MAX_SYNC_COUNT: u16 = 1000;

/// Lower exclusive bound for probe-discovered backend ports.
pub const PROBE_MIN_PORT: u16 = 100;

// ============================================================================
// Timeouts
// ============================================================================

/// Idle timeout applied to every read/write in the splicer and to protocol
/// framing reads (AuthToken, DispatchHeader, sync frames).
pub const IDLE_TIMEOUT: Duration = Duration::from_secs(30);

/// Ceiling on BridgePool `put`/`get` operations.
pub const POOL_TIMEOUT: Duration = Duration::from_secs(5);

/// Connect timeout used for outbound bridge/sync/backend dials.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Base delay for the Inside bridge-worker reconnect backoff.
pub const BACKOFF_BASE: Duration = Duration::from_secs(1);

/// Cap on the Inside bridge-worker reconnect backoff.
pub const BACKOFF_CAP: Duration = Duration::from_secs(10);

/// Default port-sync producer cadence (spec's Open Question resolves to 5 s).
pub const DEFAULT_SYNC_INTERVAL: Duration = Duration::from_secs(5);

/// Window for rate-limited log categories (one identical message per window).
pub const LOG_RATE_LIMIT_WINDOW: Duration = Duration::from_secs(30);

// ============================================================================
// Backend-port probe
// ============================================================================

/// Default process-name substring used to filter `ss -tlnp` output.
pub const DEFAULT_PROBE_PROCESS_NAME: &str = "xray";

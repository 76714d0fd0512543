//! Protocol constants and tuning parameters.
//!
//! Values the rest of the crate agrees on: wire sizes, window widths,
//! timeouts. Defaults follow the BitTorrent v1 specification and common
//! client practice.

use std::time::Duration;

// ============================================================================
// Client identification
// ============================================================================

/// Client ID prefix for peer ID generation (Azureus-style).
pub const CLIENT_PREFIX: &str = "-MT0001-";

// ============================================================================
// Ports
// ============================================================================

/// Port reported to trackers. This client never accepts inbound
/// connections, but the announce query requires a value.
pub const DEFAULT_PORT: u16 = 6881;

// ============================================================================
// Blocks and requests
// ============================================================================

/// Standard block size (16KB); the transfer unit on the wire.
pub const MAX_BLOCK_SIZE: usize = 16384;

/// Maximum outstanding block requests per peer.
pub const MAX_PENDING_REQUESTS: usize = 4;

/// Consecutive block validation failures before a peer is dropped.
pub const ALLOWED_BLOCK_FAILURES: usize = 4;

// ============================================================================
// Connection limits
// ============================================================================

/// Default number of peer slots.
pub const DEFAULT_PEER_SLOTS: usize = 10;

// ============================================================================
// Buffer sizes
// ============================================================================

/// Receive buffer per peer: length prefix + id + piece header + one block.
pub const PEER_RECV_BUFFER_SIZE: usize = 4 + 1 + 8 + MAX_BLOCK_SIZE;

/// Receive buffer for a tracker HTTP response. A response that does not
/// fit is rejected.
pub const TRACKER_RECV_BUFFER_SIZE: usize = 8192;

// ============================================================================
// Timeouts
// ============================================================================

/// Enqueue a KeepAlive after this much outbound silence.
pub const KEEPALIVE_TIMEOUT: Duration = Duration::from_secs(115);

/// Re-announce backoff after a tracker failure.
pub const TRACKER_FAILURE_BACKOFF: Duration = Duration::from_secs(300);

/// Floor for tracker-supplied announce intervals.
pub const TRACKER_MIN_INTERVAL: Duration = Duration::from_secs(1);

/// Upper bound on a single readiness wait.
pub const POLL_TIMEOUT: Duration = Duration::from_secs(1);

// ============================================================================
// Protocol constants
// ============================================================================

/// BitTorrent protocol string.
pub const PROTOCOL_STRING: &[u8] = b"BitTorrent protocol";

/// Length of the handshake message in bytes.
pub const HANDSHAKE_LEN: usize = 68;

/// SHA-1 digest length.
pub const SHA1_LEN: usize = 20;

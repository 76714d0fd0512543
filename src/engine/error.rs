use thiserror::Error;

use crate::peer::PeerError;
use crate::storage::StorageError;

/// Failures that end the download loop.
///
/// Peer errors never appear here directly: the loop recovers from them by
/// tearing the slot down. The `Peer` variant exists so per-peer dispatch
/// can bubble both recoverable and fatal conditions through one type; the
/// loop unpacks it.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Readiness primitive or registration failure.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Disk failure while preallocating, scanning, or writing.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// A peer-fatal condition, recovered by dropping the peer.
    #[error("peer error: {0}")]
    Peer(#[from] PeerError),

    /// Every tracker failed and no peer is connected.
    #[error("download stalled: all trackers failed and no peers are connected")]
    Stalled,
}

use thiserror::Error;

/// Peer-fatal protocol and transport errors.
///
/// Anything here tears the peer slot down. Short reads and writes are not
/// errors; they surface as [`super::connection::Progress::Partial`].
#[derive(Debug, Error)]
pub enum PeerError {
    /// Network I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// The connection was closed by the peer.
    #[error("connection closed")]
    ConnectionClosed,

    /// The opening 68 bytes were not a valid handshake.
    #[error("invalid handshake")]
    InvalidHandshake,

    /// The handshake named a different torrent.
    #[error("info hash mismatch")]
    InfoHashMismatch,

    /// Unknown message ID.
    #[error("unknown message id: {0}")]
    UnknownMessageId(u8),

    /// Declared length disagrees with the message ID's wire format.
    #[error("bad length {length} for message id {id}")]
    BadMessageLength { id: u8, length: u32 },

    /// Declared length exceeds the receive buffer.
    #[error("message too large: {0} bytes")]
    MessageTooLarge(u32),

    /// Bitfield payload has the wrong size or set trailing bits.
    #[error("malformed bitfield")]
    MalformedBitfield,

    /// Too many consecutive blocks failed validation.
    #[error("too many invalid blocks")]
    TooManyBadBlocks,

    /// A fully assembled piece failed its hash check.
    #[error("piece {0} failed hash check")]
    HashMismatch(usize),
}

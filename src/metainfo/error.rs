use thiserror::Error;

/// Errors from parsing a `.torrent` file.
#[derive(Debug, Error)]
pub enum MetainfoError {
    /// The file is not valid bencode.
    #[error("bencode error: {0}")]
    Bencode(#[from] crate::bencode::BencodeError),

    /// A required key is absent.
    #[error("missing field: {0}")]
    MissingField(&'static str),

    /// A key is present but holds the wrong type or an invalid value.
    #[error("invalid field: {0}")]
    InvalidField(&'static str),

    /// The `pieces` string length disagrees with the file lengths.
    #[error("piece count mismatch: {hashes} hashes for {expected} pieces")]
    PieceCountMismatch { hashes: usize, expected: usize },
}

use thiserror::Error;

/// Disk-side failures. All of them are fatal to the download.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Filesystem I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// A piece index past the end of the torrent.
    #[error("piece {0} out of range")]
    PieceOutOfRange(usize),

    /// Piece data with a size that does not match the layout.
    #[error("piece {index}: got {got} bytes, layout says {expected}")]
    PieceSizeMismatch {
        index: usize,
        got: usize,
        expected: usize,
    },
}

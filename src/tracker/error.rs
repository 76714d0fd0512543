use thiserror::Error;

/// Tracker-side failures. All of them are recoverable at the engine level
/// by advancing the announce list.
#[derive(Debug, Error)]
pub enum TrackerError {
    /// Network I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// The announce URL does not parse.
    #[error("invalid announce url: {0}")]
    InvalidUrl(String),

    /// The announce URL uses a scheme this client cannot dial.
    #[error("unsupported scheme: {0}")]
    UnsupportedScheme(String),

    /// The URL names no resolvable host.
    #[error("unresolvable host: {0}")]
    UnresolvableHost(String),

    /// The HTTP response outgrew the receive buffer.
    #[error("response too large")]
    ResponseTooLarge,

    /// Non-success HTTP status.
    #[error("http status {0}")]
    HttpStatus(u16),

    /// The response text is not HTTP or its body is not valid bencode.
    #[error("malformed response: {0}")]
    MalformedResponse(&'static str),

    /// Body decoding failed.
    #[error("bencode error: {0}")]
    Bencode(#[from] crate::bencode::BencodeError),

    /// The tracker reported a failure reason.
    #[error("tracker failure: {0}")]
    Failure(String),
}

use thiserror::Error;

/// Errors from bencode decoding.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum BencodeError {
    /// Input ended before a complete value was parsed.
    #[error("unexpected end of input")]
    UnexpectedEof,

    /// Integer is empty, zero-padded, negative zero, or overflows i64.
    #[error("invalid integer")]
    InvalidInteger,

    /// Byte string length prefix is not a valid number.
    #[error("invalid string length")]
    InvalidLength,

    /// A byte that no bencode construct starts with.
    #[error("unexpected byte: 0x{0:02x}")]
    UnexpectedByte(u8),

    /// Extra data after the top-level value.
    #[error("trailing data after value")]
    TrailingData,

    /// Recursion limit exceeded.
    #[error("nesting too deep")]
    NestingTooDeep,
}

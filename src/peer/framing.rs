use super::error::PeerError;
use crate::constants::{HANDSHAKE_LEN, PEER_RECV_BUFFER_SIZE};

const LENGTH_PREFIX: usize = 4;

/// Where the reader is within the inbound byte stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameState {
    /// Waiting for the opening 68 bytes.
    Handshake,
    /// Waiting for a 4-byte length prefix.
    Length,
    /// Waiting for the payload the prefix declared.
    Message,
}

/// What a completed frame is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    Handshake,
    Message,
}

/// Incremental framer for the peer wire protocol.
///
/// The reader owns a fixed buffer sized for the largest legal message and
/// hands out the exact slice the current state still needs, so the caller
/// never reads past a frame boundary. Bytes arrive via [`spare`] +
/// [`advance`] in chunks of any size, including one byte at a time.
///
/// A KeepAlive completes as a message frame directly from the Length state.
/// A non-zero prefix falls through to Message so payload bytes already
/// buffered by the kernel are consumed without another readiness wait.
///
/// [`spare`]: FrameReader::spare
/// [`advance`]: FrameReader::advance
#[derive(Debug)]
pub struct FrameReader {
    state: FrameState,
    buf: Vec<u8>,
    filled: usize,
    message_length: usize,
    frame_len: usize,
}

impl FrameReader {
    pub fn new() -> Self {
        Self {
            state: FrameState::Handshake,
            buf: vec![0; PEER_RECV_BUFFER_SIZE],
            filled: 0,
            message_length: 0,
            frame_len: 0,
        }
    }

    pub fn state(&self) -> FrameState {
        self.state
    }

    /// The buffer slice the current state still needs filled.
    ///
    /// Read into this (partially or fully), then report the count via
    /// [`advance`](FrameReader::advance). Never empty.
    pub fn spare(&mut self) -> &mut [u8] {
        match self.state {
            FrameState::Handshake => &mut self.buf[self.filled..HANDSHAKE_LEN],
            FrameState::Length => &mut self.buf[self.filled..LENGTH_PREFIX],
            FrameState::Message => {
                let start = LENGTH_PREFIX + self.filled;
                &mut self.buf[start..LENGTH_PREFIX + self.message_length]
            }
        }
    }

    /// Accounts for `n` bytes read into [`spare`](FrameReader::spare).
    ///
    /// Returns the kind of the completed frame, or `None` when more bytes
    /// are needed. The frame itself is available through
    /// [`frame`](FrameReader::frame) until the next call.
    pub fn advance(&mut self, n: usize) -> Result<Option<FrameKind>, PeerError> {
        self.filled += n;
        match self.state {
            FrameState::Handshake => {
                debug_assert!(self.filled <= HANDSHAKE_LEN);
                if self.filled < HANDSHAKE_LEN {
                    return Ok(None);
                }
                self.filled = 0;
                self.state = FrameState::Length;
                self.frame_len = HANDSHAKE_LEN;
                Ok(Some(FrameKind::Handshake))
            }
            FrameState::Length => {
                debug_assert!(self.filled <= LENGTH_PREFIX);
                if self.filled < LENGTH_PREFIX {
                    return Ok(None);
                }
                self.filled = 0;
                let declared =
                    u32::from_be_bytes([self.buf[0], self.buf[1], self.buf[2], self.buf[3]]);
                if declared == 0 {
                    // KeepAlive: the prefix alone is the whole frame.
                    self.frame_len = LENGTH_PREFIX;
                    return Ok(Some(FrameKind::Message));
                }
                if declared as usize > self.buf.len() - LENGTH_PREFIX {
                    return Err(PeerError::MessageTooLarge(declared));
                }
                self.message_length = declared as usize;
                self.state = FrameState::Message;
                Ok(None)
            }
            FrameState::Message => {
                debug_assert!(self.filled <= self.message_length);
                if self.filled < self.message_length {
                    return Ok(None);
                }
                self.filled = 0;
                self.state = FrameState::Length;
                self.frame_len = LENGTH_PREFIX + self.message_length;
                Ok(Some(FrameKind::Message))
            }
        }
    }

    /// The most recently completed frame.
    ///
    /// For a handshake this is all 68 bytes; for a message it is the length
    /// prefix plus payload, ready for [`super::Message::decode`].
    pub fn frame(&self) -> &[u8] {
        &self.buf[..self.frame_len]
    }
}

impl Default for FrameReader {
    fn default() -> Self {
        Self::new()
    }
}

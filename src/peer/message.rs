use bytes::{BufMut, Bytes, BytesMut};

use super::error::PeerError;
use crate::constants::{HANDSHAKE_LEN, PROTOCOL_STRING};
use crate::metainfo::InfoHash;
use crate::peer::PeerId;

/// Message type identifiers of the peer wire protocol.
///
/// Every message except KeepAlive carries a one-byte ID after the length
/// prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageId {
    Choke = 0,
    Unchoke = 1,
    Interested = 2,
    NotInterested = 3,
    Have = 4,
    Bitfield = 5,
    Request = 6,
    Piece = 7,
    Cancel = 8,
    Port = 9,
}

impl TryFrom<u8> for MessageId {
    type Error = PeerError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(MessageId::Choke),
            1 => Ok(MessageId::Unchoke),
            2 => Ok(MessageId::Interested),
            3 => Ok(MessageId::NotInterested),
            4 => Ok(MessageId::Have),
            5 => Ok(MessageId::Bitfield),
            6 => Ok(MessageId::Request),
            7 => Ok(MessageId::Piece),
            8 => Ok(MessageId::Cancel),
            9 => Ok(MessageId::Port),
            other => Err(PeerError::UnknownMessageId(other)),
        }
    }
}

/// The fixed 68-byte opening exchange.
///
/// `pstrlen` (19), "BitTorrent protocol", 8 reserved bytes, the info hash,
/// and the sender's peer ID. This client advertises no extensions, so its
/// reserved bytes are all zero.
#[derive(Debug, Clone, Copy)]
pub struct Handshake {
    pub info_hash: InfoHash,
    pub peer_id: PeerId,
}

impl Handshake {
    pub fn new(info_hash: InfoHash, peer_id: PeerId) -> Self {
        Self { info_hash, peer_id }
    }

    /// Serializes the handshake for transmission.
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(HANDSHAKE_LEN);
        buf.put_u8(PROTOCOL_STRING.len() as u8);
        buf.put_slice(PROTOCOL_STRING);
        buf.put_slice(&[0u8; 8]);
        buf.put_slice(self.info_hash.as_bytes());
        buf.put_slice(self.peer_id.as_bytes());
        buf.freeze()
    }

    /// Parses a received handshake. The peer ID is taken as-is and never
    /// validated.
    pub fn decode(data: &[u8]) -> Result<Self, PeerError> {
        if data.len() != HANDSHAKE_LEN {
            return Err(PeerError::InvalidHandshake);
        }
        if data[0] as usize != PROTOCOL_STRING.len() || &data[1..20] != PROTOCOL_STRING {
            return Err(PeerError::InvalidHandshake);
        }

        let mut info_hash = [0u8; 20];
        info_hash.copy_from_slice(&data[28..48]);
        let mut peer_id = [0u8; 20];
        peer_id.copy_from_slice(&data[48..68]);

        Ok(Self {
            info_hash: InfoHash(info_hash),
            peer_id: PeerId(peer_id),
        })
    }
}

/// A peer wire protocol message.
///
/// Messages are length-prefixed: a 4-byte big-endian length, then a 1-byte
/// ID and payload. KeepAlive is the empty message (length 0).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    KeepAlive,
    Choke,
    Unchoke,
    Interested,
    NotInterested,
    /// Announce one newly-verified piece.
    Have { piece: u32 },
    /// Announce all held pieces; raw payload, validated against the piece
    /// count by [`super::Bitfield::try_from_message`].
    Bitfield(Bytes),
    /// Ask for a block.
    Request { index: u32, begin: u32, length: u32 },
    /// Deliver a block.
    Piece { index: u32, begin: u32, block: Bytes },
    /// Withdraw a pending request.
    Cancel { index: u32, begin: u32, length: u32 },
    /// DHT port announcement.
    Port(u16),
}

impl Message {
    /// Short name for log lines.
    pub fn name(&self) -> &'static str {
        match self {
            Message::KeepAlive => "KeepAlive",
            Message::Choke => "Choke",
            Message::Unchoke => "Unchoke",
            Message::Interested => "Interested",
            Message::NotInterested => "NotInterested",
            Message::Have { .. } => "Have",
            Message::Bitfield(_) => "Bitfield",
            Message::Request { .. } => "Request",
            Message::Piece { .. } => "Piece",
            Message::Cancel { .. } => "Cancel",
            Message::Port(_) => "Port",
        }
    }

    /// Serializes the message, length prefix included.
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::new();
        match self {
            Message::KeepAlive => buf.put_u32(0),
            Message::Choke => put_bare(&mut buf, MessageId::Choke),
            Message::Unchoke => put_bare(&mut buf, MessageId::Unchoke),
            Message::Interested => put_bare(&mut buf, MessageId::Interested),
            Message::NotInterested => put_bare(&mut buf, MessageId::NotInterested),
            Message::Have { piece } => {
                buf.put_u32(5);
                buf.put_u8(MessageId::Have as u8);
                buf.put_u32(*piece);
            }
            Message::Bitfield(bits) => {
                buf.put_u32(1 + bits.len() as u32);
                buf.put_u8(MessageId::Bitfield as u8);
                buf.put_slice(bits);
            }
            Message::Request {
                index,
                begin,
                length,
            } => put_block_header(&mut buf, MessageId::Request, *index, *begin, *length),
            Message::Piece {
                index,
                begin,
                block,
            } => {
                buf.put_u32(9 + block.len() as u32);
                buf.put_u8(MessageId::Piece as u8);
                buf.put_u32(*index);
                buf.put_u32(*begin);
                buf.put_slice(block);
            }
            Message::Cancel {
                index,
                begin,
                length,
            } => put_block_header(&mut buf, MessageId::Cancel, *index, *begin, *length),
            Message::Port(port) => {
                buf.put_u32(3);
                buf.put_u8(MessageId::Port as u8);
                buf.put_u16(*port);
            }
        }
        buf.freeze()
    }

    /// Parses one complete frame: the 4-byte length prefix plus exactly
    /// `length` payload bytes.
    ///
    /// The declared length must match the frame, and fixed-size message
    /// kinds must carry exactly their wire-format length.
    pub fn decode(frame: &[u8]) -> Result<Self, PeerError> {
        if frame.len() < 4 {
            return Err(PeerError::BadMessageLength {
                id: 0,
                length: frame.len() as u32,
            });
        }
        let declared = u32::from_be_bytes([frame[0], frame[1], frame[2], frame[3]]);
        let payload = &frame[4..];
        if declared as usize != payload.len() {
            return Err(PeerError::BadMessageLength {
                id: payload.first().copied().unwrap_or(0),
                length: declared,
            });
        }

        if declared == 0 {
            return Ok(Message::KeepAlive);
        }

        let id = MessageId::try_from(payload[0])?;
        let body = &payload[1..];
        let bad_length = || PeerError::BadMessageLength {
            id: id as u8,
            length: declared,
        };

        match id {
            MessageId::Choke | MessageId::Unchoke | MessageId::Interested
            | MessageId::NotInterested => {
                if !body.is_empty() {
                    return Err(bad_length());
                }
                Ok(match id {
                    MessageId::Choke => Message::Choke,
                    MessageId::Unchoke => Message::Unchoke,
                    MessageId::Interested => Message::Interested,
                    _ => Message::NotInterested,
                })
            }
            MessageId::Have => {
                if body.len() != 4 {
                    return Err(bad_length());
                }
                Ok(Message::Have {
                    piece: read_u32(body, 0),
                })
            }
            MessageId::Bitfield => {
                if body.is_empty() {
                    return Err(bad_length());
                }
                Ok(Message::Bitfield(Bytes::copy_from_slice(body)))
            }
            MessageId::Request | MessageId::Cancel => {
                if body.len() != 12 {
                    return Err(bad_length());
                }
                let (index, begin, length) =
                    (read_u32(body, 0), read_u32(body, 4), read_u32(body, 8));
                Ok(if id == MessageId::Request {
                    Message::Request {
                        index,
                        begin,
                        length,
                    }
                } else {
                    Message::Cancel {
                        index,
                        begin,
                        length,
                    }
                })
            }
            MessageId::Piece => {
                if body.len() < 8 {
                    return Err(bad_length());
                }
                Ok(Message::Piece {
                    index: read_u32(body, 0),
                    begin: read_u32(body, 4),
                    block: Bytes::copy_from_slice(&body[8..]),
                })
            }
            MessageId::Port => {
                if body.len() != 2 {
                    return Err(bad_length());
                }
                Ok(Message::Port(u16::from_be_bytes([body[0], body[1]])))
            }
        }
    }
}

fn put_bare(buf: &mut BytesMut, id: MessageId) {
    buf.put_u32(1);
    buf.put_u8(id as u8);
}

fn put_block_header(buf: &mut BytesMut, id: MessageId, index: u32, begin: u32, length: u32) {
    buf.put_u32(13);
    buf.put_u8(id as u8);
    buf.put_u32(index);
    buf.put_u32(begin);
    buf.put_u32(length);
}

fn read_u32(data: &[u8], at: usize) -> u32 {
    u32::from_be_bytes([data[at], data[at + 1], data[at + 2], data[at + 3]])
}

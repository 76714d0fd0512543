//! Peer wire protocol: message codec, framing, and per-peer state.

mod bitfield;
mod connection;
mod error;
mod framing;
mod message;
mod peer_id;
mod piece;
mod request_queue;


pub use bitfield::Bitfield;
pub use connection::{Incoming, PeerConnection};
pub use error::PeerError;
pub use framing::{FrameKind, FrameReader, FrameState};
pub use message::{Handshake, Message, MessageId};
pub use peer_id::PeerId;
pub use piece::PieceAssembler;
pub use request_queue::{BlockValidation, RequestQueue};

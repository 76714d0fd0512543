//! mytorrent - a single-threaded BitTorrent leeching client
//!
//! Given a metainfo (`.torrent`) file, this crate contacts HTTP trackers,
//! discovers peers, speaks the BitTorrent peer wire protocol over
//! nonblocking sockets, downloads and verifies pieces, and writes them
//! into a preallocated on-disk layout. One thread runs everything; a
//! readiness poll is the only suspension point.
//!
//! # Modules
//!
//! - [`bencode`] - BEP-3 bencode encoding/decoding
//! - [`metainfo`] - `.torrent` file parsing
//! - [`peer`] - peer wire protocol: codec, framing, per-peer state
//! - [`tracker`] - HTTP tracker announces and the BEP-12 tier cursor
//! - [`storage`] - piece/file mapping, preallocation, resume scan
//! - [`engine`] - the readiness loop tying everything together
//! - [`config`] - run paths and the optional `configs.conf`
//!
//! This is a download-only client: it never serves pieces, and UDP
//! trackers, DHT, magnet links, PEX, and protocol encryption are out of
//! scope.

pub mod bencode;
pub mod config;
pub mod constants;
pub mod engine;
pub mod metainfo;
pub mod peer;
pub mod storage;
pub mod tracker;

pub use bencode::{BencodeError, Value};
pub use config::{RunPaths, Settings};
pub use engine::{Download, EngineError};
pub use metainfo::{Info, InfoHash, Metainfo, MetainfoError};
pub use peer::{Bitfield, Handshake, Message, PeerConnection, PeerError, PeerId};
pub use storage::{FileLayout, StorageError};
pub use tracker::{AnnounceList, AnnounceResponse, TrackerError, TrackerPeer};

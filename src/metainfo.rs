//! Torrent metainfo (`.torrent`) parsing.

mod error;
mod info_hash;
mod torrent;


pub use error::MetainfoError;
pub use info_hash::InfoHash;
pub use torrent::{File, Info, Metainfo};

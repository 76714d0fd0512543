//! HTTP tracker announces: tier cursor, one-shot GET, response parsing.

mod announce_list;
mod connection;
mod error;
mod response;


pub use announce_list::{AnnounceList, TrackerEndpoint};
pub use connection::{build_request, percent_encode, AnnounceQuery, AnnounceTimer, TrackerConnection};
pub use error::TrackerError;
pub use response::{AnnounceResponse, HttpResponse, TrackerPeer};

use std::io::{self, Read, Write};
use std::net::ToSocketAddrs;
use std::time::{Duration, Instant};

use mio::net::TcpStream;
use tracing::debug;

use super::announce_list::TrackerEndpoint;
use super::error::TrackerError;
use crate::constants::TRACKER_RECV_BUFFER_SIZE;
use crate::metainfo::InfoHash;
use crate::peer::PeerId;

/// Query parameters for one announce.
///
/// Transfer counters (uploaded/downloaded/left) are deliberately absent:
/// this client does not account uploads and tells the tracker only what it
/// knows.
#[derive(Debug, Clone)]
pub struct AnnounceQuery {
    pub info_hash: InfoHash,
    pub peer_id: PeerId,
    /// Listen port reported to the tracker.
    pub port: u16,
    /// Ask for compact (6-byte) peer records.
    pub compact: bool,
    /// Externally routable address, when configured.
    pub ip: Option<String>,
    /// How many peers to ask for, when configured.
    pub numwant: Option<u32>,
    pub key: Option<String>,
    /// Echoed from a previous response's `tracker id`.
    pub trackerid: Option<String>,
}

impl AnnounceQuery {
    fn to_query_string(&self) -> String {
        let mut query = format!(
            "info_hash={}&peer_id={}&port={}",
            percent_encode(self.info_hash.as_bytes()),
            percent_encode(self.peer_id.as_bytes()),
            self.port,
        );
        if self.compact {
            query.push_str("&compact=1");
        }
        if let Some(ip) = &self.ip {
            query.push_str("&ip=");
            query.push_str(ip);
        }
        if let Some(numwant) = self.numwant {
            query.push_str(&format!("&numwant={numwant}"));
        }
        if let Some(key) = &self.key {
            query.push_str("&key=");
            query.push_str(key);
        }
        if let Some(trackerid) = &self.trackerid {
            query.push_str("&trackerid=");
            query.push_str(&percent_encode(trackerid.as_bytes()));
        }
        query
    }
}

/// Percent-encodes arbitrary bytes for a query string, keeping the
/// unreserved characters of RFC 3986 as-is.
pub fn percent_encode(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 3);
    for &b in bytes {
        if b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.' | b'~') {
            out.push(b as char);
        } else {
            out.push_str(&format!("%{b:02X}"));
        }
    }
    out
}

/// Builds the full HTTP/1.1 request text for one announce.
pub fn build_request(endpoint: &TrackerEndpoint, query: &AnnounceQuery) -> String {
    format!(
        "GET {}?{} HTTP/1.1\r\n\
         Host: {}\r\n\
         Connection: Close\r\n\
         Accept: text/plain\r\n\
         \r\n",
        endpoint.path,
        query.to_query_string(),
        endpoint.host,
    )
}

/// A one-shot announce exchange over a nonblocking socket.
///
/// Lifecycle: dial, flush the request on writable events, accumulate the
/// response on readable events until the tracker closes (it was asked to
/// with `Connection: Close`), then parse and drop the connection.
pub struct TrackerConnection {
    stream: TcpStream,
    send_buf: Vec<u8>,
    send_offset: usize,
    request_sent: bool,
    recv_buf: Vec<u8>,
    recv_len: usize,
}

impl TrackerConnection {
    /// Resolves the endpoint and starts a nonblocking dial with the
    /// request text ready to go.
    pub fn dial(endpoint: &TrackerEndpoint, query: &AnnounceQuery) -> Result<Self, TrackerError> {
        let addr = (endpoint.host.as_str(), endpoint.port)
            .to_socket_addrs()
            .map_err(|_| TrackerError::UnresolvableHost(endpoint.host.clone()))?
            .next()
            .ok_or_else(|| TrackerError::UnresolvableHost(endpoint.host.clone()))?;

        let stream = TcpStream::connect(addr)?;
        let request = build_request(endpoint, query);
        debug!(host = %endpoint.host, port = endpoint.port, "announcing");

        Ok(Self {
            stream,
            send_buf: request.into_bytes(),
            send_offset: 0,
            request_sent: false,
            recv_buf: vec![0; TRACKER_RECV_BUFFER_SIZE],
            recv_len: 0,
        })
    }

    pub fn socket_mut(&mut self) -> &mut TcpStream {
        &mut self.stream
    }

    /// Whether the readiness loop should watch for writability.
    pub fn wants_write(&self) -> bool {
        !self.request_sent
    }

    /// Writes the request until done or the socket would block.
    pub fn try_send(&mut self) -> Result<(), TrackerError> {
        while self.send_offset < self.send_buf.len() {
            match self.stream.write(&self.send_buf[self.send_offset..]) {
                Ok(n) => self.send_offset += n,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(()),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(TrackerError::Io(e)),
            }
        }
        self.request_sent = true;
        Ok(())
    }

    /// Accumulates response bytes.
    ///
    /// Returns the complete response once the tracker closes the
    /// connection; `None` while more data may come. A response that fills
    /// the buffer is rejected.
    pub fn try_recv(&mut self) -> Result<Option<&[u8]>, TrackerError> {
        loop {
            if self.recv_len == self.recv_buf.len() {
                return Err(TrackerError::ResponseTooLarge);
            }
            match self.stream.read(&mut self.recv_buf[self.recv_len..]) {
                Ok(0) => return Ok(Some(&self.recv_buf[..self.recv_len])),
                Ok(n) => self.recv_len += n,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(None),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(TrackerError::Io(e)),
            }
        }
    }
}

/// One-shot countdown between announces.
///
/// Measured on a monotonic clock from the moment it is armed; `expired`
/// reports true exactly once, then the timer disarms until re-armed.
#[derive(Debug, Default)]
pub struct AnnounceTimer {
    deadline: Option<Instant>,
}

impl AnnounceTimer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arm(&mut self, after: Duration) {
        self.deadline = Some(Instant::now() + after);
    }

    pub fn disarm(&mut self) {
        self.deadline = None;
    }

    pub fn is_armed(&self) -> bool {
        self.deadline.is_some()
    }

    pub fn expired(&mut self, now: Instant) -> bool {
        match self.deadline {
            Some(deadline) if now >= deadline => {
                self.deadline = None;
                true
            }
            _ => false,
        }
    }
}

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use crate::bencode::{decode, Value};
use crate::constants::TRACKER_MIN_INTERVAL;

use super::error::TrackerError;

/// A peer handed out by the tracker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackerPeer {
    pub addr: SocketAddr,
    /// Present only in non-compact responses.
    pub peer_id: Option<[u8; 20]>,
}

/// A parsed announce response body.
#[derive(Debug, Clone)]
pub struct AnnounceResponse {
    /// Seconds the tracker asks us to wait before the next announce.
    pub interval: u64,
    pub min_interval: Option<u64>,
    pub warning_message: Option<String>,
    /// Echo this back as `trackerid` on later announces.
    pub tracker_id: Option<String>,
    /// Seeder count, when reported.
    pub complete: Option<i64>,
    /// Leecher count, when reported.
    pub incomplete: Option<i64>,
    pub peers: Vec<TrackerPeer>,
}

impl AnnounceResponse {
    /// The announce interval with the protocol floor applied.
    pub fn interval_duration(&self) -> Duration {
        Duration::from_secs(self.interval).max(TRACKER_MIN_INTERVAL)
    }

    /// Parses a full HTTP response into an announce response.
    ///
    /// Accepts 200 and 203 (the latter shows up behind transparent
    /// proxies). A tracker-reported `failure reason` is an error: the
    /// caller falls back to the next URL.
    pub fn from_http(raw: &[u8]) -> Result<Self, TrackerError> {
        let http = HttpResponse::parse(raw)?;
        if http.status != 200 && http.status != 203 {
            return Err(TrackerError::HttpStatus(http.status));
        }
        if http.body.is_empty() {
            return Err(TrackerError::MalformedResponse("empty body"));
        }
        Self::from_body(http.body)
    }

    /// Parses the bencoded body alone.
    pub fn from_body(body: &[u8]) -> Result<Self, TrackerError> {
        let root = decode(body)?;
        if root.as_dict().is_none() {
            return Err(TrackerError::MalformedResponse("body is not a dict"));
        }

        if let Some(reason) = root.get_str(b"failure reason") {
            return Err(TrackerError::Failure(reason.to_string()));
        }

        let interval = root
            .get_integer(b"interval")
            .filter(|&i| i >= 0)
            .ok_or(TrackerError::MalformedResponse("missing interval"))?
            as u64;

        let peers = match root.get(b"peers") {
            Some(Value::Bytes(compact)) => parse_compact_peers(compact)?,
            Some(Value::List(list)) => parse_peer_dicts(list),
            Some(_) => return Err(TrackerError::MalformedResponse("bad peers type")),
            None => Vec::new(),
        };

        Ok(Self {
            interval,
            min_interval: root
                .get_integer(b"min interval")
                .and_then(|i| u64::try_from(i).ok()),
            warning_message: root.get_str(b"warning message").map(String::from),
            tracker_id: root.get_str(b"tracker id").map(String::from),
            complete: root.get_integer(b"complete"),
            incomplete: root.get_integer(b"incomplete"),
            peers,
        })
    }
}

/// Compact form: 6 bytes per peer, IPv4 then big-endian port.
fn parse_compact_peers(data: &[u8]) -> Result<Vec<TrackerPeer>, TrackerError> {
    if data.len() % 6 != 0 {
        return Err(TrackerError::MalformedResponse("compact peers length"));
    }
    Ok(data
        .chunks_exact(6)
        .map(|rec| {
            let ip = Ipv4Addr::new(rec[0], rec[1], rec[2], rec[3]);
            let port = u16::from_be_bytes([rec[4], rec[5]]);
            TrackerPeer {
                addr: SocketAddr::new(IpAddr::V4(ip), port),
                peer_id: None,
            }
        })
        .collect())
}

/// Non-compact form: a list of dicts with `peer id`, `ip`, `port`.
/// Records that do not parse are skipped.
fn parse_peer_dicts(list: &[Value]) -> Vec<TrackerPeer> {
    list.iter()
        .filter_map(|entry| {
            let ip: IpAddr = entry.get_str(b"ip")?.parse().ok()?;
            let port = u16::try_from(entry.get_integer(b"port")?).ok()?;
            let peer_id = entry.get_bytes(b"peer id").and_then(|b| {
                let mut id = [0u8; 20];
                (b.len() == 20).then(|| {
                    id.copy_from_slice(b);
                    id
                })
            });
            Some(TrackerPeer {
                addr: SocketAddr::new(ip, port),
                peer_id,
            })
        })
        .collect()
}

/// A minimally parsed HTTP/1.x response: status line, headers, body.
#[derive(Debug)]
pub struct HttpResponse<'a> {
    pub status: u16,
    pub reason: String,
    pub headers: HashMap<String, String>,
    pub body: &'a [u8],
}

impl<'a> HttpResponse<'a> {
    /// Splits raw response bytes at the header/body boundary and parses
    /// the text part. The body stays binary: bencoded peer strings are not
    /// UTF-8.
    pub fn parse(raw: &'a [u8]) -> Result<Self, TrackerError> {
        let boundary = find_header_end(raw)
            .ok_or(TrackerError::MalformedResponse("no header terminator"))?;
        let head = std::str::from_utf8(&raw[..boundary])
            .map_err(|_| TrackerError::MalformedResponse("non-utf8 headers"))?;
        let body = &raw[boundary + 4..];

        let mut lines = head.split("\r\n");
        let status_line = lines
            .next()
            .ok_or(TrackerError::MalformedResponse("empty response"))?;

        let mut parts = status_line.splitn(3, ' ');
        let version = parts
            .next()
            .ok_or(TrackerError::MalformedResponse("bad status line"))?;
        if !version.starts_with("HTTP/1.") {
            return Err(TrackerError::MalformedResponse("not http/1.x"));
        }
        let status = parts
            .next()
            .and_then(|s| s.parse().ok())
            .ok_or(TrackerError::MalformedResponse("bad status code"))?;
        let reason = parts.next().unwrap_or("").to_string();

        let mut headers = HashMap::new();
        for line in lines {
            if let Some((name, value)) = line.split_once(':') {
                headers.insert(name.trim().to_ascii_lowercase(), value.trim().to_string());
            }
        }

        Ok(Self {
            status,
            reason,
            headers,
            body,
        })
    }
}

fn find_header_end(raw: &[u8]) -> Option<usize> {
    raw.windows(4).position(|w| w == b"\r\n\r\n")
}

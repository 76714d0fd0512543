use url::Url;

use super::error::TrackerError;

/// Where to send an announce, resolved from one tracker URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackerEndpoint {
    pub host: String,
    pub port: u16,
    /// Request path, e.g. `/announce`.
    pub path: String,
}

/// Cursor over tracker tiers (BEP-12).
///
/// Tiers are tried in order, URLs within a tier in order. After a
/// successful announce the winning URL is swapped to the front of its tier
/// so later passes try it first.
#[derive(Debug, Clone)]
pub struct AnnounceList {
    tiers: Vec<Vec<String>>,
    tier: usize,
    url: usize,
}

impl AnnounceList {
    /// Builds the cursor from metainfo tiers. Empty tiers are dropped.
    pub fn new(tiers: Vec<Vec<String>>) -> Self {
        let tiers: Vec<Vec<String>> = tiers.into_iter().filter(|t| !t.is_empty()).collect();
        Self {
            tiers,
            tier: 0,
            url: 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.tiers.is_empty()
    }

    /// The URL under the cursor.
    pub fn current(&self) -> Option<&str> {
        self.tiers
            .get(self.tier)
            .and_then(|t| t.get(self.url))
            .map(String::as_str)
    }

    /// Resolves the current URL into a dialable endpoint.
    ///
    /// Only `http` URLs are dialable; anything else is reported as
    /// unsupported so the caller advances to the next URL.
    pub fn current_endpoint(&self) -> Result<TrackerEndpoint, TrackerError> {
        let raw = self
            .current()
            .ok_or_else(|| TrackerError::InvalidUrl("announce list exhausted".into()))?;
        let url = Url::parse(raw).map_err(|_| TrackerError::InvalidUrl(raw.to_string()))?;

        if url.scheme() != "http" {
            return Err(TrackerError::UnsupportedScheme(url.scheme().to_string()));
        }
        let host = url
            .host_str()
            .ok_or_else(|| TrackerError::UnresolvableHost(raw.to_string()))?
            .to_string();
        let port = url.port_or_known_default().unwrap_or(80);
        let path = if url.path().is_empty() {
            "/announce".to_string()
        } else {
            url.path().to_string()
        };

        Ok(TrackerEndpoint { host, port, path })
    }

    /// Moves to the next URL, crossing tier boundaries. `false` at the end.
    pub fn next(&mut self) -> bool {
        if self.tiers.is_empty() {
            return false;
        }
        if self.url + 1 < self.tiers[self.tier].len() {
            self.url += 1;
        } else if self.tier + 1 < self.tiers.len() {
            self.tier += 1;
            self.url = 0;
        } else {
            return false;
        }
        true
    }

    /// Moves to the previous URL, crossing tier boundaries. `false` at the
    /// start.
    pub fn prev(&mut self) -> bool {
        if self.url > 0 {
            self.url -= 1;
        } else if self.tier > 0 {
            self.tier -= 1;
            self.url = self.tiers[self.tier].len() - 1;
        } else {
            return false;
        }
        true
    }

    /// Swaps the current URL with the first slot of its tier.
    pub fn promote_current(&mut self) {
        if let Some(tier) = self.tiers.get_mut(self.tier) {
            tier.swap(self.url, 0);
        }
    }

    /// Returns the cursor to the first URL of the first tier.
    pub fn reset(&mut self) {
        self.tier = 0;
        self.url = 0;
    }
}

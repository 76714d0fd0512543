use std::fmt;

use rand::Rng as _;

use crate::constants::CLIENT_PREFIX;

const ALPHANUMERIC: &[u8] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz";

/// A 20-byte peer identity, Azureus-style: client prefix plus a random
/// alphanumeric tail. Generated once per run and sent in every handshake
/// and tracker announce.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct PeerId(pub [u8; 20]);

impl PeerId {
    pub fn generate() -> Self {
        let mut id = [0u8; 20];
        id[..CLIENT_PREFIX.len()].copy_from_slice(CLIENT_PREFIX.as_bytes());
        let mut rng = rand::rng();
        for byte in &mut id[CLIENT_PREFIX.len()..] {
            *byte = ALPHANUMERIC[rng.random_range(0..ALPHANUMERIC.len())];
        }
        Self(id)
    }

    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }
}

impl fmt::Debug for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PeerId(")?;
        for byte in &self.0 {
            if byte.is_ascii_graphic() {
                write!(f, "{}", *byte as char)?;
            } else {
                write!(f, "\\x{byte:02x}")?;
            }
        }
        write!(f, ")")
    }
}

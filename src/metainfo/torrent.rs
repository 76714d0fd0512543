use std::path::PathBuf;

use super::error::MetainfoError;
use super::info_hash::InfoHash;
use crate::bencode::{decode, raw_entry, Value};
use crate::constants::SHA1_LEN;

/// A parsed torrent file.
#[derive(Debug, Clone)]
pub struct Metainfo {
    /// The info dictionary with file and piece data.
    pub info: Info,
    /// SHA-1 of the raw bencoded info dictionary.
    pub info_hash: InfoHash,
    /// Primary tracker URL.
    pub announce: String,
    /// Multi-tier tracker list (BEP-12). Always non-empty: when the torrent
    /// carries no `announce-list`, `announce` forms a single one-URL tier.
    pub announce_list: Vec<Vec<String>>,
    /// Unix timestamp when the torrent was created.
    pub creation_date: Option<i64>,
    /// Free-form comment.
    pub comment: Option<String>,
    /// Name of the program that created the torrent.
    pub created_by: Option<String>,
}

/// The info dictionary: content identity and shape.
#[derive(Debug, Clone)]
pub struct Info {
    /// Suggested name for the file (single-file mode) or the content
    /// directory (multi-file mode).
    pub name: String,
    /// Bytes per piece; the last piece may be shorter.
    pub piece_length: u64,
    /// SHA-1 per piece, in piece order.
    pub pieces: Vec<[u8; 20]>,
    /// Files in torrent order. In single-file mode this holds one entry
    /// whose path is `name`; in multi-file mode paths are prefixed with
    /// `name`, so all paths are relative to the download root.
    pub files: Vec<File>,
    /// Sum of all file lengths.
    pub total_length: u64,
    /// BEP-27 private flag; accepted but unused by this client.
    pub private: bool,
}

/// One file within the torrent's byte stream.
#[derive(Debug, Clone)]
pub struct File {
    /// Path relative to the download root.
    pub path: PathBuf,
    /// File size in bytes.
    pub length: u64,
    /// Byte offset of the file within the concatenated content.
    pub offset: u64,
}

impl Metainfo {
    /// Parses a torrent file from its raw bytes.
    pub fn from_bytes(data: &[u8]) -> Result<Self, MetainfoError> {
        let root = decode(data)?;
        if root.as_dict().is_none() {
            return Err(MetainfoError::InvalidField("root"));
        }

        let raw_info = raw_entry(data, b"info")?.ok_or(MetainfoError::MissingField("info"))?;
        let info_hash = InfoHash::from_info_bytes(raw_info);

        let info_value = root.get(b"info").ok_or(MetainfoError::MissingField("info"))?;
        let info = parse_info(info_value)?;

        let announce = root
            .get_str(b"announce")
            .ok_or(MetainfoError::MissingField("announce"))?
            .to_string();

        let mut announce_list: Vec<Vec<String>> = root
            .get_list(b"announce-list")
            .map(|tiers| {
                tiers
                    .iter()
                    .filter_map(|tier| {
                        let urls: Vec<String> = tier
                            .as_list()?
                            .iter()
                            .filter_map(|u| u.as_str().map(String::from))
                            .collect();
                        (!urls.is_empty()).then_some(urls)
                    })
                    .collect()
            })
            .unwrap_or_default();
        if announce_list.is_empty() {
            announce_list.push(vec![announce.clone()]);
        }

        Ok(Self {
            info,
            info_hash,
            announce,
            announce_list,
            creation_date: root.get_integer(b"creation date"),
            comment: root.get_str(b"comment").map(String::from),
            created_by: root.get_str(b"created by").map(String::from),
        })
    }
}

impl Info {
    /// Number of pieces.
    pub fn piece_count(&self) -> usize {
        self.pieces.len()
    }

    /// Size of piece `index` in bytes. The last piece carries the
    /// remainder, or a full `piece_length` on an exact multiple.
    pub fn piece_size(&self, index: usize) -> u64 {
        if index + 1 == self.piece_count() {
            self.total_length - self.piece_length * (self.piece_count() as u64 - 1)
        } else {
            self.piece_length
        }
    }

    /// Expected SHA-1 of piece `index`.
    pub fn piece_hash(&self, index: usize) -> &[u8; 20] {
        &self.pieces[index]
    }
}

fn parse_info(value: &Value) -> Result<Info, MetainfoError> {
    if value.as_dict().is_none() {
        return Err(MetainfoError::InvalidField("info"));
    }

    let name = value
        .get_str(b"name")
        .ok_or(MetainfoError::MissingField("name"))?
        .to_string();
    if name.is_empty() {
        return Err(MetainfoError::InvalidField("name"));
    }

    let piece_length = value
        .get_integer(b"piece length")
        .filter(|&l| l > 0)
        .ok_or(MetainfoError::InvalidField("piece length"))? as u64;

    let pieces_bytes = value
        .get_bytes(b"pieces")
        .ok_or(MetainfoError::MissingField("pieces"))?;
    if pieces_bytes.len() % SHA1_LEN != 0 {
        return Err(MetainfoError::InvalidField("pieces"));
    }
    let pieces: Vec<[u8; 20]> = pieces_bytes
        .chunks_exact(SHA1_LEN)
        .map(|chunk| {
            let mut hash = [0u8; SHA1_LEN];
            hash.copy_from_slice(chunk);
            hash
        })
        .collect();

    let private = value.get_integer(b"private") == Some(1);

    let (files, total_length) = if let Some(length) = value.get_integer(b"length") {
        if length < 0 {
            return Err(MetainfoError::InvalidField("length"));
        }
        let file = File {
            path: PathBuf::from(&name),
            length: length as u64,
            offset: 0,
        };
        (vec![file], length as u64)
    } else if let Some(entries) = value.get_list(b"files") {
        let mut files = Vec::with_capacity(entries.len());
        let mut offset = 0u64;
        for entry in entries {
            let length = entry
                .get_integer(b"length")
                .filter(|&l| l >= 0)
                .ok_or(MetainfoError::InvalidField("files"))? as u64;
            let components = entry
                .get_list(b"path")
                .ok_or(MetainfoError::MissingField("path"))?;
            if components.is_empty() {
                return Err(MetainfoError::InvalidField("path"));
            }
            let mut path = PathBuf::from(&name);
            for component in components {
                let part = component
                    .as_str()
                    .ok_or(MetainfoError::InvalidField("path"))?;
                if part.is_empty() || part == "." || part == ".." || part.contains('/') {
                    return Err(MetainfoError::InvalidField("path"));
                }
                path.push(part);
            }
            files.push(File {
                path,
                length,
                offset,
            });
            offset += length;
        }
        if files.is_empty() {
            return Err(MetainfoError::InvalidField("files"));
        }
        (files, offset)
    } else {
        return Err(MetainfoError::MissingField("length or files"));
    };

    let expected = if total_length == 0 {
        0
    } else {
        total_length.div_ceil(piece_length) as usize
    };
    if pieces.len() != expected {
        return Err(MetainfoError::PieceCountMismatch {
            hashes: pieces.len(),
            expected,
        });
    }

    Ok(Info {
        name,
        piece_length,
        pieces,
        files,
        total_length,
        private,
    })
}

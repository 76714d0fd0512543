use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use sha1::{Digest, Sha1};
use tracing::{debug, info};

use super::error::StorageError;
use crate::metainfo::Info;

/// How one file sits on the piece grid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileSpan {
    /// First piece index the file touches.
    pub first_piece: usize,
    /// Last piece index the file touches.
    pub last_piece: usize,
    /// Bytes of the first touched piece that belong to earlier files.
    pub left_offset: u64,
    /// Bytes of the last touched piece that belong to later files.
    pub right_offset: u64,
}

#[derive(Debug)]
struct FileSlot {
    /// Absolute path under the download root.
    path: PathBuf,
    length: u64,
    /// Byte offset within the concatenated content.
    offset: u64,
    /// `None` for zero-length files, which sit between pieces.
    span: Option<FileSpan>,
}

/// Maps pieces to files and owns all disk access for the download.
///
/// File handles are opened per operation; nothing stays open between
/// calls.
#[derive(Debug)]
pub struct FileLayout {
    files: Vec<FileSlot>,
    piece_length: u64,
    piece_count: usize,
    total_length: u64,
}

impl FileLayout {
    /// Lays the torrent's files out under `root` (the downloads
    /// directory). Metainfo paths already carry the content-directory
    /// prefix.
    pub fn new(info: &Info, root: &Path) -> Self {
        let piece_length = info.piece_length;
        let files = info
            .files
            .iter()
            .map(|f| {
                let span = (f.length > 0).then(|| {
                    let file_end = f.offset + f.length;
                    let first_piece = (f.offset / piece_length) as usize;
                    let last_piece = ((file_end - 1) / piece_length) as usize;
                    // The last touched piece runs to its grid boundary,
                    // except the final (possibly short) piece of the
                    // torrent, which ends at the total length. The final
                    // file therefore never owes bytes to a later one.
                    let piece_end =
                        ((last_piece as u64 + 1) * piece_length).min(info.total_length);
                    FileSpan {
                        first_piece,
                        last_piece,
                        left_offset: f.offset - first_piece as u64 * piece_length,
                        right_offset: piece_end - file_end,
                    }
                });
                FileSlot {
                    path: root.join(&f.path),
                    length: f.length,
                    offset: f.offset,
                    span,
                }
            })
            .collect();

        Self {
            files,
            piece_length,
            piece_count: info.piece_count(),
            total_length: info.total_length,
        }
    }

    pub fn piece_count(&self) -> usize {
        self.piece_count
    }

    /// Size of piece `index` in bytes.
    pub fn piece_size(&self, index: usize) -> u64 {
        if index + 1 == self.piece_count {
            self.total_length - self.piece_length * (self.piece_count as u64 - 1)
        } else {
            self.piece_length
        }
    }

    /// Per-file spans, in file order. Zero-length files have no span.
    pub fn spans(&self) -> impl Iterator<Item = Option<&FileSpan>> {
        self.files.iter().map(|f| f.span.as_ref())
    }

    /// The byte ranges piece `index` occupies, as
    /// `(file_position_in_layout, offset_within_file, length)`.
    pub fn piece_ranges(&self, index: usize) -> Result<Vec<(usize, u64, u64)>, StorageError> {
        if index >= self.piece_count {
            return Err(StorageError::PieceOutOfRange(index));
        }
        let piece_start = index as u64 * self.piece_length;
        let piece_end = piece_start + self.piece_size(index);

        let mut ranges = Vec::new();
        for (i, file) in self.files.iter().enumerate() {
            let file_end = file.offset + file.length;
            let start = piece_start.max(file.offset);
            let end = piece_end.min(file_end);
            if start < end {
                ranges.push((i, start - file.offset, end - start));
            }
        }
        Ok(ranges)
    }

    /// Creates every file at its declared size.
    ///
    /// Parent directories are created as needed. Files already present are
    /// left alone so a resume scan can pick their contents up.
    pub fn preallocate(&self) -> Result<(), StorageError> {
        for file in &self.files {
            if file.path.exists() {
                continue;
            }
            if let Some(parent) = file.path.parent() {
                fs::create_dir_all(parent)?;
            }
            let f = File::create(&file.path)?;
            f.set_len(file.length)?;
            debug!(path = %file.path.display(), len = file.length, "preallocated");
        }
        Ok(())
    }

    /// Reads piece `index` from disk, concatenated across its files.
    pub fn read_piece(&self, index: usize) -> Result<Vec<u8>, StorageError> {
        let mut piece = vec![0u8; self.piece_size(index) as usize];
        let mut filled = 0usize;
        for (file_pos, file_offset, len) in self.piece_ranges(index)? {
            let mut f = File::open(&self.files[file_pos].path)?;
            f.seek(SeekFrom::Start(file_offset))?;
            f.read_exact(&mut piece[filled..filled + len as usize])?;
            filled += len as usize;
        }
        Ok(piece)
    }

    /// Writes a verified piece into every file it intersects, skipping the
    /// bytes that belong to neighboring files.
    pub fn write_piece(&self, index: usize, data: &[u8]) -> Result<(), StorageError> {
        let expected = self.piece_size(index) as usize;
        if data.len() != expected {
            return Err(StorageError::PieceSizeMismatch {
                index,
                got: data.len(),
                expected,
            });
        }

        let mut consumed = 0usize;
        for (file_pos, file_offset, len) in self.piece_ranges(index)? {
            let mut f = OpenOptions::new()
                .write(true)
                .open(&self.files[file_pos].path)?;
            f.seek(SeekFrom::Start(file_offset))?;
            f.write_all(&data[consumed..consumed + len as usize])?;
            consumed += len as usize;
        }
        Ok(())
    }

    /// Verifies what is already on disk against the piece hashes.
    ///
    /// Returns the indices of pieces whose on-disk bytes hash correctly;
    /// the caller marks them downloaded and never requests them.
    pub fn scan_existing(&self, hashes: &[[u8; 20]]) -> Result<Vec<usize>, StorageError> {
        let mut verified = Vec::new();
        for index in 0..self.piece_count {
            let piece = self.read_piece(index)?;
            let mut hasher = Sha1::new();
            hasher.update(&piece);
            let digest: [u8; 20] = hasher.finalize().into();
            if digest == hashes[index] {
                verified.push(index);
            }
        }
        if !verified.is_empty() {
            info!(
                pieces = verified.len(),
                total = self.piece_count,
                "resume scan found verified pieces"
            );
        }
        Ok(verified)
    }
}

//! Disk layout: piece/file mapping, preallocation, resume scan, write-out.

mod error;
mod layout;


pub use error::StorageError;
pub use layout::{FileLayout, FileSpan};

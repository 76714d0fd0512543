//! The download engine: readiness loop, dispatch, piece selection.

mod download;
mod error;
mod strategy;

pub use download::Download;
pub use error::EngineError;
pub use strategy::{PieceSelection, SequentialStrategy};

use bytes::Bytes;
use sha1::{Digest, Sha1};

/// Accumulates the blocks of one piece as they arrive.
///
/// Blocks are appended in wire order; the request queue has already
/// verified that order matches the piece layout, so no offset sorting
/// happens here.
#[derive(Debug, Default)]
pub struct PieceAssembler {
    index: Option<u32>,
    blocks: Vec<Bytes>,
}

impl PieceAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends the next block. The first block fixes the piece index.
    pub fn push_block(&mut self, index: u32, block: Bytes) {
        if self.index.is_none() {
            self.index = Some(index);
        }
        self.blocks.push(block);
    }

    /// The piece index, once at least one block has arrived.
    pub fn index(&self) -> Option<u32> {
        self.index
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Accumulated payload size in bytes.
    pub fn len(&self) -> usize {
        self.blocks.iter().map(Bytes::len).sum()
    }

    /// The blocks in arrival order.
    pub fn blocks(&self) -> &[Bytes] {
        &self.blocks
    }

    /// SHA-1 over the concatenation of all blocks, streamed.
    pub fn sha1(&self) -> [u8; 20] {
        let mut hasher = Sha1::new();
        for block in &self.blocks {
            hasher.update(block);
        }
        hasher.finalize().into()
    }

    /// Drops all blocks, readying the assembler for another piece.
    pub fn clear(&mut self) {
        self.index = None;
        self.blocks.clear();
    }

    /// Moves the assembled piece out, leaving an empty assembler behind.
    pub fn take(&mut self) -> PieceAssembler {
        std::mem::take(self)
    }
}

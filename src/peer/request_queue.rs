use std::collections::BTreeSet;

use super::message::Message;
use crate::constants::{MAX_BLOCK_SIZE, MAX_PENDING_REQUESTS};

/// Outcome of validating a received block against the queue head.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockValidation {
    /// Not the block we asked for next.
    Invalid,
    /// Accepted; more blocks of this piece are outstanding.
    Accepted,
    /// Accepted, and it was the final block of its piece. The piece's
    /// requests have been removed and the cursors rebased.
    PieceComplete,
}

/// Per-peer in-flight block window.
///
/// `requests` holds every block of the assigned piece(s) in send order.
/// `current` points at the oldest unvalidated request, `forward` at the
/// next one to put on the wire; `forward - current` never exceeds
/// [`MAX_PENDING_REQUESTS`]. Peers answer requests in order, so the block
/// expected next is always `requests[current]`.
#[derive(Debug, Default)]
pub struct RequestQueue {
    requests: Vec<Request>,
    current: usize,
    forward: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Request {
    index: u32,
    begin: u32,
    length: u32,
}

impl RequestQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drops all requests and rebases both cursors. Used when the peer
    /// chokes us or the slot is torn down.
    pub fn reset(&mut self) {
        self.requests.clear();
        self.current = 0;
        self.forward = 0;
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }

    /// Slices piece `index` of `size` bytes into block requests of at most
    /// [`MAX_BLOCK_SIZE`] and appends them to the queue.
    pub fn add_piece(&mut self, index: usize, size: usize) {
        let blocks = size.div_ceil(MAX_BLOCK_SIZE);
        for i in 0..blocks {
            let begin = i * MAX_BLOCK_SIZE;
            self.requests.push(Request {
                index: index as u32,
                begin: begin as u32,
                length: (size - begin).min(MAX_BLOCK_SIZE) as u32,
            });
        }
    }

    /// Advances `forward` up to the window limit, emitting the Request
    /// messages to put on the wire.
    ///
    /// The second return is `true` when every queued request has been
    /// emitted: the caller should ask the strategy for another piece
    /// before pumping again.
    pub fn fill(&mut self) -> (Vec<Message>, bool) {
        let mut out = Vec::new();
        while self.forward < self.current + MAX_PENDING_REQUESTS
            && self.forward < self.requests.len()
        {
            let rq = self.requests[self.forward];
            out.push(Message::Request {
                index: rq.index,
                begin: rq.begin,
                length: rq.length,
            });
            self.forward += 1;
        }
        (out, self.forward == self.requests.len())
    }

    /// Checks a received block against the next expected request.
    ///
    /// An exact `(index, begin, length)` match advances `current`. When the
    /// match finishes its piece (queue exhausted or the next request names
    /// a different piece), that piece's requests are removed and both
    /// cursors shift down by the removed count.
    pub fn validate_block(&mut self, index: u32, begin: u32, length: u32) -> BlockValidation {
        let Some(expected) = self.requests.get(self.current).copied() else {
            return BlockValidation::Invalid;
        };
        if (expected.index, expected.begin, expected.length) != (index, begin, length) {
            return BlockValidation::Invalid;
        }

        self.current += 1;
        let piece_done = match self.requests.get(self.current) {
            None => true,
            Some(next) => next.index != index,
        };
        if !piece_done {
            return BlockValidation::Accepted;
        }

        let before = self.requests.len();
        self.requests.retain(|rq| rq.index != index);
        let erased = before - self.requests.len();
        self.current -= erased;
        self.forward -= erased;
        debug_assert_eq!(self.current, 0);
        BlockValidation::PieceComplete
    }

    /// Indices of every piece with requests still in the queue.
    ///
    /// On slot teardown these go back to the strategy as discarded.
    pub fn assigned_pieces(&self) -> BTreeSet<usize> {
        self.requests.iter().map(|rq| rq.index as usize).collect()
    }

    #[cfg(test)]
    pub(crate) fn pending(&self) -> usize {
        self.forward - self.current
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.requests.len()
    }
}

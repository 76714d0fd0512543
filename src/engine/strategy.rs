use std::collections::BTreeSet;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::debug;

use crate::peer::Bitfield;

/// What the strategy has to offer a peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PieceSelection {
    /// Download this piece.
    Picked(usize),
    /// The peer has nothing we can use right now.
    NoPiece,
    /// Every piece has been downloaded.
    Completed,
}

/// Sequential piece selection with an endgame fallback.
///
/// Normal mode hands each missing piece to exactly one peer, scanning from
/// the front. Once every piece is assigned somewhere, the strategy flips
/// to endgame: the pieces still unconfirmed are offered to every peer,
/// picked at random, so the download does not stall behind one slow peer.
#[derive(Debug)]
pub struct SequentialStrategy {
    /// Pieces picked by some peer and not since discarded.
    assigned: Bitfield,
    endgame: bool,
    /// Pieces not yet confirmed downloaded. Drained by
    /// [`mark_as_downloaded`](SequentialStrategy::mark_as_downloaded).
    endgame_pieces: BTreeSet<usize>,
    rng: StdRng,
}

impl SequentialStrategy {
    pub fn new(piece_count: usize) -> Self {
        Self {
            assigned: Bitfield::new(piece_count),
            endgame: false,
            endgame_pieces: (0..piece_count).collect(),
            rng: StdRng::from_os_rng(),
        }
    }

    pub fn in_endgame(&self) -> bool {
        self.endgame
    }

    /// Whether the peer holds anything we still want. May flip the
    /// strategy into endgame when no unassigned piece remains.
    pub fn have_missing_pieces(&mut self, peer_bitfield: &Bitfield) -> bool {
        if !self.endgame {
            let mut found_spare = false;
            for i in 0..self.assigned.len() {
                if !self.assigned.has(i) {
                    found_spare = true;
                    if peer_bitfield.has(i) {
                        return true;
                    }
                }
            }
            if found_spare {
                return false;
            }
            self.enter_endgame();
        }
        self.endgame_pieces.iter().any(|&i| peer_bitfield.has(i))
    }

    /// Whether a single announced piece is still wanted.
    pub fn is_piece_missing(&self, index: usize) -> bool {
        if !self.endgame {
            !self.assigned.has(index)
        } else {
            self.endgame_pieces.contains(&index)
        }
    }

    /// Picks the next piece for a peer holding `peer_bitfield`.
    ///
    /// Normal-mode picks are exclusive: the piece is marked assigned and
    /// not offered again unless discarded. Endgame picks are shared.
    pub fn next_piece(&mut self, peer_bitfield: &Bitfield) -> PieceSelection {
        if !self.endgame {
            let mut found_spare = false;
            let count = self.assigned.len();
            for i in 0..count {
                if !self.assigned.has(i) {
                    found_spare = true;
                    if peer_bitfield.has(i) {
                        self.assigned.set(i, true);
                        return PieceSelection::Picked(i);
                    }
                }
            }
            if found_spare {
                return PieceSelection::NoPiece;
            }
            self.enter_endgame();
        }

        if self.endgame_pieces.is_empty() {
            return PieceSelection::Completed;
        }
        let candidates: Vec<usize> = self
            .endgame_pieces
            .iter()
            .copied()
            .filter(|&i| peer_bitfield.has(i))
            .collect();
        if candidates.is_empty() {
            return PieceSelection::NoPiece;
        }
        let pick = candidates[self.rng.random_range(0..candidates.len())];
        PieceSelection::Picked(pick)
    }

    /// Confirms a piece verified and written. Idempotent.
    pub fn mark_as_downloaded(&mut self, index: usize) {
        self.assigned.set(index, true);
        self.endgame_pieces.remove(&index);
    }

    /// Returns a piece to the pool after its peer failed. Idempotent.
    pub fn mark_as_discarded(&mut self, index: usize) {
        self.assigned.set(index, false);
    }

    /// All pieces confirmed downloaded.
    pub fn is_complete(&self) -> bool {
        self.endgame_pieces.is_empty()
    }

    fn enter_endgame(&mut self) {
        self.endgame = true;
        debug!(
            remaining = self.endgame_pieces.len(),
            "entering endgame mode"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn full_bitfield(count: usize) -> Bitfield {
        let mut bf = Bitfield::new(count);
        for i in 0..count {
            bf.set(i, true);
        }
        bf
    }

    #[test]
    fn picks_pieces_in_sequence() {
        let mut strategy = SequentialStrategy::new(4);
        let peer = full_bitfield(4);

        assert_eq!(strategy.next_piece(&peer), PieceSelection::Picked(0));
        assert_eq!(strategy.next_piece(&peer), PieceSelection::Picked(1));
        assert_eq!(strategy.next_piece(&peer), PieceSelection::Picked(2));
        assert_eq!(strategy.next_piece(&peer), PieceSelection::Picked(3));
    }

    #[test]
    fn never_repeats_a_pick_outside_endgame() {
        let mut strategy = SequentialStrategy::new(8);
        let peer = full_bitfield(8);
        let mut seen = std::collections::HashSet::new();

        for _ in 0..8 {
            let PieceSelection::Picked(i) = strategy.next_piece(&peer) else {
                panic!("expected a pick");
            };
            assert!(seen.insert(i), "piece {i} picked twice");
        }
        assert!(!strategy.in_endgame());
    }

    #[test]
    fn skips_pieces_the_peer_lacks() {
        let mut strategy = SequentialStrategy::new(3);
        let mut peer = Bitfield::new(3);
        peer.set(1, true);

        assert_eq!(strategy.next_piece(&peer), PieceSelection::Picked(1));
        assert_eq!(strategy.next_piece(&peer), PieceSelection::NoPiece);
    }

    #[test]
    fn discard_makes_a_piece_selectable_again() {
        let mut strategy = SequentialStrategy::new(2);
        let peer = full_bitfield(2);

        assert_eq!(strategy.next_piece(&peer), PieceSelection::Picked(0));
        assert_eq!(strategy.next_piece(&peer), PieceSelection::Picked(1));
        strategy.mark_as_discarded(0);
        assert!(strategy.is_piece_missing(0));
        assert_eq!(strategy.next_piece(&peer), PieceSelection::Picked(0));
    }

    #[test]
    fn endgame_offers_unconfirmed_pieces_to_every_peer() {
        let mut strategy = SequentialStrategy::new(2);
        let peer_a = full_bitfield(2);
        let mut peer_b = Bitfield::new(2);
        peer_b.set(1, true);

        // Both pieces assigned; piece 0 confirmed.
        assert!(matches!(strategy.next_piece(&peer_a), PieceSelection::Picked(_)));
        assert!(matches!(strategy.next_piece(&peer_a), PieceSelection::Picked(_)));
        strategy.mark_as_downloaded(0);

        // Piece 1 is now everyone's to fetch.
        assert_eq!(strategy.next_piece(&peer_a), PieceSelection::Picked(1));
        assert!(strategy.in_endgame());
        assert_eq!(strategy.next_piece(&peer_b), PieceSelection::Picked(1));

        strategy.mark_as_downloaded(1);
        assert_eq!(strategy.next_piece(&peer_a), PieceSelection::Completed);
        assert!(strategy.is_complete());
    }

    #[test]
    fn endgame_respects_peer_bitfield() {
        let mut strategy = SequentialStrategy::new(2);
        let peer_a = full_bitfield(2);
        let empty = Bitfield::new(2);

        assert!(matches!(strategy.next_piece(&peer_a), PieceSelection::Picked(_)));
        assert!(matches!(strategy.next_piece(&peer_a), PieceSelection::Picked(_)));

        assert_eq!(strategy.next_piece(&empty), PieceSelection::NoPiece);
        assert!(strategy.in_endgame());
    }

    #[test]
    fn have_missing_pieces_tracks_assignment_state() {
        let mut strategy = SequentialStrategy::new(2);
        let peer = full_bitfield(2);
        let empty = Bitfield::new(2);

        assert!(strategy.have_missing_pieces(&peer));
        assert!(!strategy.have_missing_pieces(&empty));

        assert!(matches!(strategy.next_piece(&peer), PieceSelection::Picked(_)));
        assert!(matches!(strategy.next_piece(&peer), PieceSelection::Picked(_)));

        // Everything assigned but unconfirmed: endgame keeps wanting it.
        assert!(strategy.have_missing_pieces(&peer));
        strategy.mark_as_downloaded(0);
        strategy.mark_as_downloaded(1);
        assert!(!strategy.have_missing_pieces(&peer));
    }

    #[test]
    fn resume_marked_pieces_are_never_picked() {
        let mut strategy = SequentialStrategy::new(3);
        strategy.mark_as_downloaded(0);
        strategy.mark_as_downloaded(2);
        let peer = full_bitfield(3);

        assert_eq!(strategy.next_piece(&peer), PieceSelection::Picked(1));
        strategy.mark_as_downloaded(1);
        assert_eq!(strategy.next_piece(&peer), PieceSelection::Completed);
    }
}

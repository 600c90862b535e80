use crate::chess::{Move, Position};
use crate::eval::PIECE_VALUE_MG;
use crate::search::{
    ButterflyHistory, CaptureHistory, ContinuationHistory, ContinuationKey, Depth, LowPlyHistory,
    DEPTH_QS_CHECKS, MAX_LPH,
};
use crate::util::Assume;
use arrayvec::ArrayVec;

const TT_RATING: i32 = i32::MAX;
const GOOD_CAPTURE: i32 = 1 << 28;
const KILLER: i32 = 1 << 26;

/// Yields legal moves in a quality-weighted order.
///
/// Moves are rated up front from the transposition move, the capture and
/// quiet histories, killers, and the counter move, then selected lazily one
/// at a time, never repeating a move.
#[derive(Debug)]
pub struct MovePicker {
    entries: ArrayVec<(Move, i32), 254>,
    index: usize,
}

/// Continuation history rows at offsets 1, 2, 4, and 6 behind the node.
pub type ContKeys = [Option<ContinuationKey>; 6];

impl MovePicker {
    /// A picker for the main search.
    #[allow(clippy::too_many_arguments)]
    pub fn new_main(
        pos: &Position,
        tt_move: Option<Move>,
        depth: Depth,
        history: &ButterflyHistory,
        low_ply: &LowPlyHistory,
        capture_history: &CaptureHistory,
        continuation: &ContinuationHistory,
        cont_keys: &ContKeys,
        counter: Option<Move>,
        killers: [Option<Move>; 2],
        ply: i32,
    ) -> Self {
        let us = pos.turn().index();
        let mut entries = ArrayVec::new();

        for m in pos.moves() {
            let rating = if Some(m) == tt_move {
                TT_RATING
            } else if !m.is_quiet() {
                let base = Self::capture_rating(pos, capture_history, m);
                if pos.see_ge(m, -55 * base / 1024) {
                    GOOD_CAPTURE + base
                } else {
                    -GOOD_CAPTURE + base
                }
            } else if Some(m) == killers[0] {
                KILLER + 2
            } else if Some(m) == killers[1] {
                KILLER + 1
            } else if Some(m) == counter {
                KILLER
            } else {
                let piece = pos.moved_piece(m).assume();
                let to = m.whither();

                let mut rating = history.get(us, m);
                for (idx, key) in cont_keys.iter().enumerate() {
                    if let Some(key) = key {
                        let weight = if idx < 4 { 2 } else { 1 };
                        rating += weight * continuation.get(key, piece, to);
                    }
                }

                if (ply as usize) < MAX_LPH {
                    rating += (4.min(depth / 3)) * low_ply.get(ply as usize, m);
                }

                rating.min(KILLER - 1)
            };

            entries.push((m, rating));
        }

        MovePicker { entries, index: 0 }
    }

    /// A picker for quiescence nodes.
    ///
    /// Restricted to captures and promotions, plus quiet checks when the
    /// depth admits them.
    #[allow(clippy::too_many_arguments)]
    pub fn new_quiescence(
        pos: &Position,
        tt_move: Option<Move>,
        depth: Depth,
        history: &ButterflyHistory,
        capture_history: &CaptureHistory,
        continuation: &ContinuationHistory,
        cont_keys: &ContKeys,
    ) -> Self {
        let us = pos.turn().index();
        let checks = depth >= DEPTH_QS_CHECKS;
        let mut entries = ArrayVec::new();

        for m in pos.moves() {
            if pos.is_check() {
                // Evasions are searched exhaustively.
            } else if m.is_quiet() && !(checks && pos.gives_check(m)) {
                continue;
            }

            let rating = if Some(m) == tt_move {
                TT_RATING
            } else if !m.is_quiet() {
                Self::capture_rating(pos, capture_history, m)
            } else {
                let piece = pos.moved_piece(m).assume();
                let to = m.whither();

                let mut rating = history.get(us, m);
                for key in cont_keys.iter().flatten() {
                    rating += continuation.get(key, piece, to);
                }

                rating
            };

            entries.push((m, rating));
        }

        MovePicker { entries, index: 0 }
    }

    /// A picker for ProbCut: captures whose static exchange clears the
    /// given threshold.
    pub fn new_probcut(
        pos: &Position,
        tt_move: Option<Move>,
        threshold: i32,
        capture_history: &CaptureHistory,
    ) -> Self {
        let mut entries = ArrayVec::new();

        for m in pos.moves() {
            if m.is_quiet() || !pos.see_ge(m, threshold) {
                continue;
            }

            let rating = if Some(m) == tt_move {
                TT_RATING
            } else {
                Self::capture_rating(pos, capture_history, m)
            };

            entries.push((m, rating));
        }

        MovePicker { entries, index: 0 }
    }

    #[inline(always)]
    fn capture_rating(pos: &Position, capture_history: &CaptureHistory, m: Move) -> i32 {
        let piece = pos.moved_piece(m).assume();
        let victim = pos.captured(m).map_or(0, |r| PIECE_VALUE_MG[r.index()]);
        6 * victim + capture_history.get(piece, m.whither(), pos.captured(m).map_or(0, |r| r.index()))
    }

    /// The number of moves this picker will yield at most.
    #[inline(always)]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The next best move, if any.
    ///
    /// When `skip_quiets` is set, quiet moves rated below the killer band
    /// are passed over.
    pub fn next(&mut self, skip_quiets: bool) -> Option<Move> {
        loop {
            if self.index >= self.entries.len() {
                return None;
            }

            // Selection sort: bring the best remaining entry forward.
            let mut best = self.index;
            for idx in self.index + 1..self.entries.len() {
                if self.entries[idx].1 > self.entries[best].1 {
                    best = idx;
                }
            }

            self.entries.swap(self.index, best);
            let (m, rating) = self.entries[self.index];
            self.index += 1;

            if skip_quiets && m.is_quiet() && rating < KILLER && rating != TT_RATING {
                continue;
            }

            return Some(m);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chess::Square;
    use std::collections::HashSet;
    use test_strategy::proptest;

    fn keys() -> ContKeys {
        [None; 6]
    }

    fn main_picker(pos: &Position, tt_move: Option<Move>) -> MovePicker {
        MovePicker::new_main(
            pos,
            tt_move,
            8,
            &ButterflyHistory::default(),
            &LowPlyHistory::default(),
            &CaptureHistory::default(),
            &ContinuationHistory::default(),
            &keys(),
            None,
            [None, None],
            2,
        )
    }

    #[proptest]
    fn picker_yields_every_legal_move_exactly_once(pos: Position) {
        let mut picker = main_picker(&pos, None);
        let mut seen = HashSet::new();
        while let Some(m) = picker.next(false) {
            assert!(seen.insert(m));
        }

        assert_eq!(seen.len(), pos.moves().len());
    }

    #[proptest]
    fn tt_move_comes_first(pos: Position) {
        if let Some(&tt) = pos.moves().first() {
            let mut picker = main_picker(&pos, Some(tt));
            assert_eq!(picker.next(false), Some(tt));
        }
    }

    #[proptest]
    fn skip_quiets_drops_exactly_the_unrated_quiet_moves(pos: Position) {
        // With empty histories and no killers, every quiet move sits below
        // the killer band and is skipped.
        let noisy = pos.moves().iter().filter(|m| !m.is_quiet()).count();

        let mut picker = main_picker(&pos, None);
        let mut yielded = 0;
        while let Some(m) = picker.next(true) {
            assert!(!m.is_quiet());
            yielded += 1;
        }

        assert_eq!(yielded, noisy);
    }

    #[test]
    fn winning_captures_outrank_quiets() {
        let pos: Position = "1k6/8/8/3p4/4P3/8/8/1K6 w - - 0 1".parse().unwrap();
        let mut picker = main_picker(&pos, None);
        let first = picker.next(false).unwrap();
        assert_eq!(first, Move::capture(Square::E4, Square::D5, None));
    }

    #[test]
    fn quiescence_picker_is_restricted_to_noisy_moves() {
        let pos: Position = "1k6/8/8/3p4/4P3/8/8/1K6 w - - 0 1".parse().unwrap();
        let mut picker = MovePicker::new_quiescence(
            &pos,
            None,
            -1,
            &ButterflyHistory::default(),
            &CaptureHistory::default(),
            &ContinuationHistory::default(),
            &keys(),
        );

        while let Some(m) = picker.next(false) {
            assert!(!m.is_quiet());
        }
    }

    #[test]
    fn probcut_picker_honors_the_threshold() {
        // Rook takes a defended pawn: fails any positive threshold.
        let pos: Position = "1k6/8/4p3/3p4/8/8/3R4/3K4 w - - 0 1".parse().unwrap();
        let mut picker =
            MovePicker::new_probcut(&pos, None, 1, &CaptureHistory::default());
        assert_eq!(picker.next(false), None);
    }
}

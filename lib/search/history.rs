use crate::chess::{Move, Piece, Square};
use crate::search::Depth;

/// Number of plies covered by the low-ply history.
pub const MAX_LPH: usize = 4;

/// Continuation history scores below this threshold prune counter moves.
pub const COUNTER_MOVE_PRUNE_THRESHOLD: i32 = 0;

/// History update bonus, derived from depth.
#[inline(always)]
pub fn stat_bonus(depth: Depth) -> i32 {
    if depth > 13 {
        29
    } else {
        17 * depth * depth + 134 * depth - 134
    }
}

/// The saturated update rule shared by all history tables.
///
/// Keeps `|entry| < LIMIT` by shrinking the step as the entry approaches
/// the rail.
#[inline(always)]
fn update(entry: &mut i16, bonus: i32, limit: i32) {
    let bonus = bonus.clamp(-limit, limit);
    *entry += (bonus - *entry as i32 * bonus.abs() / limit) as i16;
}

/// Butterfly boards indexed by color and the from-to squares of a move.
#[derive(Debug, Clone)]
pub struct ButterflyHistory(Box<[[i16; 4096]; 2]>);

impl Default for ButterflyHistory {
    fn default() -> Self {
        ButterflyHistory(Box::new([[0; 4096]; 2]))
    }
}

impl ButterflyHistory {
    const LIMIT: i32 = 13365;

    #[inline(always)]
    pub fn get(&self, color: usize, m: Move) -> i32 {
        self.0[color][m.from_to()] as i32
    }

    #[inline(always)]
    pub fn update(&mut self, color: usize, m: Move, bonus: i32) {
        update(&mut self.0[color][m.from_to()], bonus, Self::LIMIT);
    }

    pub fn clear(&mut self) {
        self.0.iter_mut().flatten().for_each(|v| *v = 0);
    }
}

/// History of moves indexed by ply, for shallow plies only.
#[derive(Debug, Clone)]
pub struct LowPlyHistory(Box<[[i16; 4096]; MAX_LPH]>);

impl Default for LowPlyHistory {
    fn default() -> Self {
        LowPlyHistory(Box::new([[0; 4096]; MAX_LPH]))
    }
}

impl LowPlyHistory {
    const LIMIT: i32 = 10692;

    #[inline(always)]
    pub fn get(&self, ply: usize, m: Move) -> i32 {
        self.0[ply][m.from_to()] as i32
    }

    #[inline(always)]
    pub fn update(&mut self, ply: usize, m: Move, bonus: i32) {
        update(&mut self.0[ply][m.from_to()], bonus, Self::LIMIT);
    }

    /// Shifts the table down two plies so it stays relevant after the
    /// previous root moves have been played, clearing the freed rows.
    pub fn shift(&mut self) {
        self.0.copy_within(2.., 0);
        for row in &mut self.0[MAX_LPH - 2..] {
            row.fill(0);
        }
    }

    pub fn clear(&mut self) {
        self.0.iter_mut().flatten().for_each(|v| *v = 0);
    }
}

/// Capture history indexed by the moving piece, target square, and the
/// captured role.
#[derive(Debug, Clone)]
pub struct CaptureHistory(Box<[[[i16; 6]; 64]; 12]>);

impl Default for CaptureHistory {
    fn default() -> Self {
        CaptureHistory(Box::new([[[0; 6]; 64]; 12]))
    }
}

impl CaptureHistory {
    const LIMIT: i32 = 10692;

    #[inline(always)]
    pub fn get(&self, piece: Piece, to: Square, captured: usize) -> i32 {
        self.0[piece.index()][to.index()][captured] as i32
    }

    #[inline(always)]
    pub fn update(&mut self, piece: Piece, to: Square, captured: usize, bonus: i32) {
        update(&mut self.0[piece.index()][to.index()][captured], bonus, Self::LIMIT);
    }

    pub fn clear(&mut self) {
        self.0
            .iter_mut()
            .flatten()
            .flatten()
            .for_each(|v| *v = 0);
    }
}

/// A single continuation history row: a full piece-to-square board.
pub type PieceToHistory = [[i16; 64]; 12];

const PIECE_TO_LIMIT: i32 = 29952;

/// The key of a continuation history row.
///
/// Frames reference their row by key rather than by pointer; a missing key
/// stands in for the sentinel row and reads as zero.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct ContinuationKey {
    pub in_check: bool,
    pub capture: bool,
    pub piece: Piece,
    pub to: Square,
}

/// Continuation histories indexed by whether the position was in check,
/// whether the move was a capture, and the piece-to square of the move.
#[derive(Debug, Clone)]
pub struct ContinuationHistory(Vec<PieceToHistory>);

impl Default for ContinuationHistory {
    fn default() -> Self {
        ContinuationHistory(vec![[[0; 64]; 12]; 2 * 2 * 12 * 64])
    }
}

impl ContinuationHistory {
    #[inline(always)]
    fn index(key: &ContinuationKey) -> usize {
        (((key.in_check as usize * 2 + key.capture as usize) * 12 + key.piece.index()) * 64)
            + key.to.index()
    }

    #[inline(always)]
    pub fn get(&self, key: &ContinuationKey, piece: Piece, to: Square) -> i32 {
        self.0[Self::index(key)][piece.index()][to.index()] as i32
    }

    #[inline(always)]
    pub fn update(&mut self, key: &ContinuationKey, piece: Piece, to: Square, bonus: i32) {
        update(
            &mut self.0[Self::index(key)][piece.index()][to.index()],
            bonus,
            PIECE_TO_LIMIT,
        );
    }

    pub fn clear(&mut self) {
        self.0
            .iter_mut()
            .flatten()
            .flatten()
            .for_each(|v| *v = 0);
    }
}

/// Refutation moves indexed by the piece-to square of the opponent's last
/// move.
#[derive(Debug, Clone)]
pub struct CounterMoveHistory(Box<[[Option<Move>; 64]; 12]>);

impl Default for CounterMoveHistory {
    fn default() -> Self {
        CounterMoveHistory(Box::new([[None; 64]; 12]))
    }
}

impl CounterMoveHistory {
    #[inline(always)]
    pub fn get(&self, piece: Piece, to: Square) -> Option<Move> {
        self.0[piece.index()][to.index()]
    }

    #[inline(always)]
    pub fn set(&mut self, piece: Piece, to: Square, m: Move) {
        self.0[piece.index()][to.index()] = Some(m);
    }

    pub fn clear(&mut self) {
        self.0.iter_mut().flatten().for_each(|v| *v = None);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chess::{Color, Role};
    use test_strategy::proptest;

    #[test]
    fn stat_bonus_is_flat_beyond_depth_13() {
        assert_eq!(stat_bonus(14), 29);
        assert_eq!(stat_bonus(100), 29);
        assert_eq!(stat_bonus(1), 17 + 134 - 134);
    }

    #[proptest]
    fn updates_saturate_below_the_limit(
        #[strategy(proptest::collection::vec(-13365i32..=13365, 0..64))] bonuses: Vec<i32>,
    ) {
        let mut entry = 0i16;
        for bonus in bonuses {
            update(&mut entry, bonus, 13365);
            assert!((entry as i32).abs() < 13365);
        }
    }

    #[proptest]
    fn butterfly_history_accumulates(m: Move, #[strategy(1i32..5000)] bonus: i32) {
        let mut history = ButterflyHistory::default();
        history.update(0, m, bonus);
        assert!(history.get(0, m) > 0);
        history.update(0, m, -2 * bonus);
        assert!(history.get(0, m) < bonus);
    }

    #[proptest]
    fn cleared_histories_read_zero(m: Move, piece: Piece, to: Square) {
        let mut butterfly = ButterflyHistory::default();
        butterfly.update(1, m, 1000);
        butterfly.clear();
        assert_eq!(butterfly.get(1, m), 0);

        let mut capture = CaptureHistory::default();
        capture.update(piece, to, Role::Pawn.index(), 1000);
        capture.clear();
        assert_eq!(capture.get(piece, to, Role::Pawn.index()), 0);

        let key = ContinuationKey {
            in_check: false,
            capture: false,
            piece,
            to,
        };

        let mut continuation = ContinuationHistory::default();
        continuation.update(&key, piece, to, 1000);
        continuation.clear();
        assert_eq!(continuation.get(&key, piece, to), 0);
    }

    #[proptest]
    fn low_ply_history_shifts_down(m: Move) {
        let mut history = LowPlyHistory::default();
        history.update(2, m, 1000);
        let shifted = history.get(2, m);
        history.shift();
        assert_eq!(history.get(0, m), shifted);
        assert_eq!(history.get(2, m), 0);
    }

    #[proptest]
    fn counter_move_remembers_the_last_refutation(piece: Piece, to: Square, m: Move, n: Move) {
        let mut counters = CounterMoveHistory::default();
        assert_eq!(counters.get(piece, to), None);
        counters.set(piece, to, m);
        counters.set(piece, to, n);
        assert_eq!(counters.get(piece, to), Some(n));
    }

    #[test]
    fn continuation_rows_are_distinct_per_key() {
        let a = ContinuationKey {
            in_check: false,
            capture: false,
            piece: Piece::new(Role::Knight, Color::White),
            to: Square::F3,
        };

        let b = ContinuationKey {
            in_check: true,
            ..a
        };

        let mut continuation = ContinuationHistory::default();
        continuation.update(&a, a.piece, Square::E5, 500);
        assert_eq!(continuation.get(&b, a.piece, Square::E5), 0);
        assert!(continuation.get(&a, a.piece, Square::E5) > 0);
    }
}

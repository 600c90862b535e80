use derive_more::with_trait::{Add, AddAssign, Neg, Sub, SubAssign};

/// The maximum number of plies a search may reach.
pub const MAX_PLY: i32 = 246;

/// The minimax score, in centipawn-ish units.
///
/// Mate scores are encoded as `MATE - ply` (winning) and `-MATE + ply`
/// (losing); the band just below is reserved for tablebase wins.
#[derive(
    Debug,
    Default,
    Copy,
    Clone,
    Eq,
    PartialEq,
    Ord,
    PartialOrd,
    Hash,
    Add,
    AddAssign,
    Sub,
    SubAssign,
    Neg,
)]
#[cfg_attr(test, derive(test_strategy::Arbitrary))]
pub struct Value(pub i32);

impl Value {
    pub const ZERO: Value = Value(0);
    pub const DRAW: Value = Value(0);
    pub const KNOWN_WIN: Value = Value(10000);
    pub const MATE: Value = Value(32000);
    pub const INFINITE: Value = Value(32001);
    pub const NONE: Value = Value(32002);

    pub const MATE_IN_MAX_PLY: Value = Value(Self::MATE.0 - MAX_PLY);
    pub const MATED_IN_MAX_PLY: Value = Value(-Self::MATE_IN_MAX_PLY.0);
    pub const TB_WIN_IN_MAX_PLY: Value = Value(Self::MATE.0 - 2 * MAX_PLY);
    pub const TB_LOSS_IN_MAX_PLY: Value = Value(-Self::TB_WIN_IN_MAX_PLY.0);

    #[inline(always)]
    pub const fn new(v: i32) -> Self {
        Value(v)
    }

    #[inline(always)]
    pub const fn get(self) -> i32 {
        self.0
    }

    /// The score for mating in `ply` plies.
    #[inline(always)]
    pub const fn mate_in(ply: i32) -> Self {
        Value(Self::MATE.0 - ply)
    }

    /// The score for being mated in `ply` plies.
    #[inline(always)]
    pub const fn mated_in(ply: i32) -> Self {
        Value(-Self::MATE.0 + ply)
    }

    /// Whether this score lies in the proven-mate bands.
    #[inline(always)]
    pub const fn is_mate(self) -> bool {
        self.0 >= Self::MATE_IN_MAX_PLY.0 || self.0 <= Self::MATED_IN_MAX_PLY.0
    }

    /// Adjusts a mate or tablebase score from "plies from the root" to
    /// "plies from the current position" before storing it in the
    /// transposition table. Standard scores are unchanged.
    #[inline(always)]
    pub fn to_tt(self, ply: i32) -> Self {
        debug_assert!(self != Self::NONE);

        if self >= Self::TB_WIN_IN_MAX_PLY {
            Value(self.0 + ply)
        } else if self <= Self::TB_LOSS_IN_MAX_PLY {
            Value(self.0 - ply)
        } else {
            self
        }
    }

    /// The inverse of [`Self::to_tt`].
    ///
    /// For mate scores close to the 50-move horizon, an optimal tablebase
    /// score is returned instead so that an unreachable mate is never
    /// reported.
    #[inline(always)]
    pub fn from_tt(self, ply: i32, rule50: u8) -> Self {
        if self == Self::NONE {
            return Self::NONE;
        }

        if self >= Self::TB_WIN_IN_MAX_PLY {
            if self >= Self::MATE_IN_MAX_PLY && Self::MATE.0 - self.0 > 99 - rule50 as i32 {
                return Value(Self::MATE_IN_MAX_PLY.0 - 1);
            }

            return Value(self.0 - ply);
        }

        if self <= Self::TB_LOSS_IN_MAX_PLY {
            if self <= Self::MATED_IN_MAX_PLY && Self::MATE.0 + self.0 > 99 - rule50 as i32 {
                return Value(Self::MATED_IN_MAX_PLY.0 + 1);
            }

            return Value(self.0 + ply);
        }

        self
    }
}

impl From<Value> for i32 {
    #[inline(always)]
    fn from(v: Value) -> Self {
        v.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_strategy::proptest;

    #[proptest]
    fn tt_encoding_round_trips_without_the_rule50_safeguard(
        #[strategy(-Value::MATE.0..=Value::MATE.0)] v: i32,
        #[strategy(0..MAX_PLY)] ply: i32,
    ) {
        let v = Value(v);
        assert_eq!(v.to_tt(ply).from_tt(ply, 0), v);
    }

    #[proptest]
    fn tt_encoding_preserves_ordinary_scores(
        #[strategy(Value::TB_LOSS_IN_MAX_PLY.0 + 1..Value::TB_WIN_IN_MAX_PLY.0)] v: i32,
        #[strategy(0..MAX_PLY)] ply: i32,
    ) {
        let v = Value(v);
        assert_eq!(v.to_tt(ply), v);
        assert_eq!(v.from_tt(ply, 0), v);
    }

    #[proptest]
    fn mate_scores_near_the_rule50_horizon_are_capped(#[strategy(0..40i32)] ply: i32) {
        let stored = Value::mate_in(2).to_tt(0);
        let decoded = stored.from_tt(ply, 98);
        assert_eq!(decoded, Value(Value::MATE_IN_MAX_PLY.0 - 1));
    }

    #[proptest]
    fn mate_in_fewer_plies_is_larger(#[strategy(0..MAX_PLY - 1)] ply: i32) {
        assert!(Value::mate_in(ply) > Value::mate_in(ply + 1));
        assert!(Value::mated_in(ply) < Value::mated_in(ply + 1));
    }

    #[test]
    fn score_bands_nest() {
        assert!(Value::MATE_IN_MAX_PLY > Value::TB_WIN_IN_MAX_PLY);
        assert!(Value::TB_WIN_IN_MAX_PLY > Value::KNOWN_WIN);
        assert!(Value::MATE > Value::MATE_IN_MAX_PLY);
        assert!(Value::INFINITE > Value::MATE);
    }
}

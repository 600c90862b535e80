use crate::chess::{Bitboard, Color, Flip, Magic, Perspective, Rank, Role, Square};
use derive_more::with_trait::{Display, Error};
use once_cell::sync::Lazy;
use std::str::FromStr;

/// A chess [piece][`Role`] of a certain [`Color`].
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[cfg_attr(test, derive(test_strategy::Arbitrary))]
#[repr(u8)]
pub enum Piece {
    WhitePawn,
    BlackPawn,
    WhiteKnight,
    BlackKnight,
    WhiteBishop,
    BlackBishop,
    WhiteRook,
    BlackRook,
    WhiteQueen,
    BlackQueen,
    WhiteKing,
    BlackKing,
}

static FORKS: Lazy<[[Bitboard; 64]; 2]> = Lazy::new(|| {
    let mut forks = [[Bitboard::empty(); 64]; 2];

    for color in Color::iter() {
        for wc in Square::iter() {
            let steps = [(-1, 1), (1, 1)];
            let moves = Bitboard::fill(wc.perspective(color), &steps, Bitboard::full());
            forks[color.index()][wc.index()] = moves.perspective(color).without(wc);
        }
    }

    forks
});

static JUMPS: Lazy<[Bitboard; 64]> = Lazy::new(|| {
    let mut jumps = [Bitboard::empty(); 64];

    for wc in Square::iter() {
        #[rustfmt::skip]
        let steps = [(-2, 1), (-1, 2), (1, 2), (2, 1), (2, -1), (1, -2), (-1, -2), (-2, -1)];
        jumps[wc.index()] = Bitboard::fill(wc, &steps, Bitboard::full()).without(wc);
    }

    jumps
});

static STEPS: Lazy<[Bitboard; 64]> = Lazy::new(|| {
    let mut slides = [Bitboard::empty(); 64];

    for wc in Square::iter() {
        #[rustfmt::skip]
        let steps = [(-1, 0), (-1, 1), (0, 1), (1, 1), (1, 0), (1, -1), (0, -1), (-1, -1)];
        slides[wc.index()] = Bitboard::fill(wc, &steps, Bitboard::full()).without(wc);
    }

    slides
});

static SLIDES: Lazy<Box<[Bitboard]>> = Lazy::new(|| {
    let mut bitboard = vec![Bitboard::empty(); 88772].into_boxed_slice();

    for wc in Square::iter() {
        let magic = Magic::bishop(wc);
        for bb in magic.mask().subsets() {
            let blockers = bb | !magic.mask();
            let steps = [(-1, 1), (1, 1), (1, -1), (-1, -1)];
            let moves = Bitboard::fill(wc, &steps, blockers).without(wc);
            let idx = (bb.0.wrapping_mul(magic.factor()) >> 55) as usize + magic.offset();
            debug_assert!(bitboard[idx] == moves || bitboard[idx] == Bitboard::empty());
            bitboard[idx] = moves;
        }

        let magic = Magic::rook(wc);
        for bb in magic.mask().subsets() {
            let blockers = bb | !magic.mask();
            let steps = [(-1, 0), (0, 1), (1, 0), (0, -1)];
            let moves = Bitboard::fill(wc, &steps, blockers).without(wc);
            let idx = (bb.0.wrapping_mul(magic.factor()) >> 52) as usize + magic.offset();
            debug_assert!(bitboard[idx] == moves || bitboard[idx] == Bitboard::empty());
            bitboard[idx] = moves;
        }
    }

    bitboard
});

impl Piece {
    /// Constructs [`Piece`] from a pair of [`Role`] and [`Color`].
    #[inline(always)]
    pub const fn new(r: Role, c: Color) -> Self {
        // The discriminant interleaves role and color.
        unsafe { std::mem::transmute::<u8, Piece>(c as u8 | ((r as u8) << 1)) }
    }

    /// An iterator over all pieces.
    #[inline(always)]
    pub fn iter() -> impl DoubleEndedIterator<Item = Piece> {
        Role::iter().flat_map(|r| Color::iter().map(move |c| Piece::new(r, c)))
    }

    #[inline(always)]
    pub const fn index(self) -> usize {
        self as usize
    }

    /// This piece's [`Role`].
    #[inline(always)]
    pub const fn role(self) -> Role {
        Role::from_index(self as u8 >> 1)
    }

    /// This piece's [`Color`].
    #[inline(always)]
    pub const fn color(self) -> Color {
        if self as u8 & 1 == 0 {
            Color::White
        } else {
            Color::Black
        }
    }

    /// This piece's possible attacks from a given square.
    #[inline(always)]
    pub fn attacks(self, wc: Square, occupied: Bitboard) -> Bitboard {
        match self.role() {
            Role::Pawn => FORKS[self.color().index()][wc.index()],
            Role::Knight => JUMPS[wc.index()],
            Role::King => STEPS[wc.index()],

            Role::Bishop => {
                let magic = Magic::bishop(wc);
                let blockers = occupied & magic.mask();
                let idx = (blockers.0.wrapping_mul(magic.factor()) >> 55) as usize + magic.offset();
                SLIDES[idx]
            }

            Role::Rook => {
                let magic = Magic::rook(wc);
                let blockers = occupied & magic.mask();
                let idx = (blockers.0.wrapping_mul(magic.factor()) >> 52) as usize + magic.offset();
                SLIDES[idx]
            }

            Role::Queen => {
                let magic = Magic::bishop(wc);
                let blockers = occupied & magic.mask();
                let idb = (blockers.0.wrapping_mul(magic.factor()) >> 55) as usize + magic.offset();
                let magic = Magic::rook(wc);
                let blockers = occupied & magic.mask();
                let idr = (blockers.0.wrapping_mul(magic.factor()) >> 52) as usize + magic.offset();
                SLIDES[idb] | SLIDES[idr]
            }
        }
    }

    /// This piece's possible moves from a given square.
    ///
    /// For pawns this returns pushes only; captures come from [`Self::attacks`].
    #[inline(always)]
    pub fn moves(self, wc: Square, ours: Bitboard, theirs: Bitboard) -> Bitboard {
        let occ = ours ^ theirs;
        if self.role() != Role::Pawn {
            self.attacks(wc, occ) & !ours
        } else {
            let empty = !occ;
            let color = self.color();
            let third = Rank::Third.bitboard();
            let push = (wc.bitboard().perspective(color) << 8).perspective(color) & empty;
            push | ((push.perspective(color) & third) << 8).perspective(color) & empty
        }
    }
}

impl Flip for Piece {
    /// Mirrors this piece's [`Color`].
    #[inline(always)]
    fn flip(self) -> Self {
        Piece::new(self.role(), !self.color())
    }
}

impl Display for Piece {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Piece::WhitePawn => "P",
            Piece::BlackPawn => "p",
            Piece::WhiteKnight => "N",
            Piece::BlackKnight => "n",
            Piece::WhiteBishop => "B",
            Piece::BlackBishop => "b",
            Piece::WhiteRook => "R",
            Piece::BlackRook => "r",
            Piece::WhiteQueen => "Q",
            Piece::BlackQueen => "q",
            Piece::WhiteKing => "K",
            Piece::BlackKing => "k",
        })
    }
}

/// The reason why parsing [`Piece`] failed.
#[derive(Debug, Display, Clone, Eq, PartialEq, Error)]
#[display("failed to parse piece")]
pub struct ParsePieceError;

impl FromStr for Piece {
    type Err = ParsePieceError;

    #[inline(always)]
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "P" => Ok(Piece::WhitePawn),
            "p" => Ok(Piece::BlackPawn),
            "N" => Ok(Piece::WhiteKnight),
            "n" => Ok(Piece::BlackKnight),
            "B" => Ok(Piece::WhiteBishop),
            "b" => Ok(Piece::BlackBishop),
            "R" => Ok(Piece::WhiteRook),
            "r" => Ok(Piece::BlackRook),
            "Q" => Ok(Piece::WhiteQueen),
            "q" => Ok(Piece::BlackQueen),
            "K" => Ok(Piece::WhiteKing),
            "k" => Ok(Piece::BlackKing),
            _ => Err(ParsePieceError),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_strategy::proptest;

    #[test]
    fn piece_guarantees_zero_value_optimization() {
        assert_eq!(size_of::<Option<Piece>>(), size_of::<Piece>());
    }

    #[proptest]
    fn piece_has_a_color(r: Role, c: Color) {
        assert_eq!(Piece::new(r, c).color(), c);
    }

    #[proptest]
    fn piece_has_a_role(r: Role, c: Color) {
        assert_eq!(Piece::new(r, c).role(), r);
    }

    #[proptest]
    fn piece_cannot_attack_onto_themselves(p: Piece, wc: Square, bb: Bitboard) {
        assert!(!p.attacks(wc, bb).contains(wc));
    }

    #[proptest]
    fn piece_cannot_move_onto_themselves(p: Piece, wc: Square, a: Bitboard, b: Bitboard) {
        assert!(!p.moves(wc, a, b).contains(wc));
    }

    #[proptest]
    fn flipping_piece_preserves_role_and_mirrors_color(p: Piece) {
        assert_eq!(p.flip().role(), p.role());
        assert_eq!(p.flip().color(), !p.color());
    }

    #[proptest]
    fn parsing_printed_piece_is_an_identity(p: Piece) {
        assert_eq!(p.to_string().parse(), Ok(p));
    }

    #[test]
    fn rook_attacks_respect_blockers() {
        let occ = Square::E4.bitboard().with(Square::E6).with(Square::B4);
        let attacks = Piece::WhiteRook.attacks(Square::E4, occ);
        assert!(attacks.contains(Square::E6));
        assert!(!attacks.contains(Square::E7));
        assert!(attacks.contains(Square::B4));
        assert!(!attacks.contains(Square::A4));
        assert!(attacks.contains(Square::E1));
    }

    #[test]
    fn bishop_attacks_respect_blockers() {
        let occ = Square::D4.bitboard().with(Square::F6);
        let attacks = Piece::BlackBishop.attacks(Square::D4, occ);
        assert!(attacks.contains(Square::F6));
        assert!(!attacks.contains(Square::G7));
        assert!(attacks.contains(Square::A1));
        assert!(attacks.contains(Square::A7));
    }
}

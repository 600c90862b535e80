use crate::chess::*;
use crate::util::Assume;
use derive_more::with_trait::{Display, Error, From};
use std::fmt::{self, Formatter};
use std::str::FromStr;

/// The chess board.
///
/// Holds piece placement and game state, without any notion of legality.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub struct Board {
    roles: [Bitboard; 6],
    colors: [Bitboard; 2],
    pieces: [Option<Piece>; 64],
    pub turn: Color,
    pub castles: Castles,
    pub en_passant: Option<Square>,
    pub halfmoves: u8,
    pub fullmoves: u32,
}

impl Default for Board {
    #[inline(always)]
    fn default() -> Self {
        use Piece::*;

        #[rustfmt::skip]
        let pieces = [
            Some(WhiteRook), Some(WhiteKnight), Some(WhiteBishop), Some(WhiteQueen), Some(WhiteKing), Some(WhiteBishop), Some(WhiteKnight), Some(WhiteRook),
            Some(WhitePawn), Some(WhitePawn),   Some(WhitePawn),   Some(WhitePawn),  Some(WhitePawn), Some(WhitePawn),   Some(WhitePawn),   Some(WhitePawn),
            None,            None,              None,              None,             None,            None,              None,              None,
            None,            None,              None,              None,             None,            None,              None,              None,
            None,            None,              None,              None,             None,            None,              None,              None,
            None,            None,              None,              None,             None,            None,              None,              None,
            Some(BlackPawn), Some(BlackPawn),   Some(BlackPawn),   Some(BlackPawn),  Some(BlackPawn), Some(BlackPawn),   Some(BlackPawn),   Some(BlackPawn),
            Some(BlackRook), Some(BlackKnight), Some(BlackBishop), Some(BlackQueen), Some(BlackKing), Some(BlackBishop), Some(BlackKnight), Some(BlackRook),
        ];

        Self {
            roles: [
                Bitboard::new(0x00FF00000000FF00),
                Bitboard::new(0x4200000000000042),
                Bitboard::new(0x2400000000000024),
                Bitboard::new(0x8100000000000081),
                Bitboard::new(0x0800000000000008),
                Bitboard::new(0x1000000000000010),
            ],
            colors: [
                Bitboard::new(0x000000000000FFFF),
                Bitboard::new(0xFFFF000000000000),
            ],
            pieces,
            turn: Color::White,
            castles: Castles::all(),
            en_passant: None,
            halfmoves: 0,
            fullmoves: 1,
        }
    }
}

impl Board {
    /// An empty board with no pieces.
    #[inline(always)]
    pub fn empty() -> Self {
        Self {
            roles: [Bitboard::empty(); 6],
            colors: [Bitboard::empty(); 2],
            pieces: [None; 64],
            turn: Color::White,
            castles: Castles::none(),
            en_passant: None,
            halfmoves: 0,
            fullmoves: 1,
        }
    }

    /// [`Square`]s occupied.
    #[inline(always)]
    pub fn occupied(&self) -> Bitboard {
        self.colors[0] ^ self.colors[1]
    }

    /// [`Square`]s occupied by [`Piece`]s of a [`Color`].
    #[inline(always)]
    pub fn by_color(&self, c: Color) -> Bitboard {
        self.colors[c.index()]
    }

    /// [`Square`]s occupied by [`Piece`]s of a [`Role`].
    #[inline(always)]
    pub fn by_role(&self, r: Role) -> Bitboard {
        self.roles[r.index()]
    }

    /// [`Square`]s occupied by a [`Piece`].
    #[inline(always)]
    pub fn by_piece(&self, p: Piece) -> Bitboard {
        self.by_color(p.color()) & self.by_role(p.role())
    }

    /// The [`Piece`] on the given [`Square`], if any.
    #[inline(always)]
    pub fn piece_on(&self, sq: Square) -> Option<Piece> {
        self.pieces[sq.index()]
    }

    /// The [`Role`] of the piece on the given [`Square`], if any.
    #[inline(always)]
    pub fn role_on(&self, sq: Square) -> Option<Role> {
        self.piece_on(sq).map(Piece::role)
    }

    /// [`Square`] occupied by the king of a [`Color`].
    #[inline(always)]
    pub fn king(&self, side: Color) -> Option<Square> {
        self.by_piece(Piece::new(Role::King, side)).first()
    }

    /// An iterator over all pieces on the board.
    #[inline(always)]
    pub fn iter(&self) -> impl Iterator<Item = (Piece, Square)> + '_ {
        Piece::iter().flat_map(move |p| self.by_piece(p).into_iter().map(move |sq| (p, sq)))
    }

    /// Toggles a [`Piece`] on a [`Square`].
    #[inline(always)]
    pub fn toggle(&mut self, p: Piece, sq: Square) {
        self.roles[p.role().index()] ^= sq.bitboard();
        self.colors[p.color().index()] ^= sq.bitboard();
        self.pieces[sq.index()] = match self.pieces[sq.index()] {
            None => Some(p),
            Some(q) => {
                debug_assert!(p == q);
                None
            }
        };
    }

    /// Computes this board's zobrist hash from scratch.
    pub fn zobrist(&self) -> Zobrist {
        let mut hash = ZobristNumbers::castling(self.castles);

        if self.turn == Color::Black {
            hash ^= ZobristNumbers::turn();
        }

        if let Some(ep) = self.en_passant {
            hash ^= ZobristNumbers::en_passant(ep.file());
        }

        for (p, sq) in self.iter() {
            hash ^= ZobristNumbers::psq(p, sq);
        }

        hash
    }
}

impl Display for Board {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        for rank in Rank::iter().rev() {
            let mut skip = 0;
            for file in File::iter() {
                match self.piece_on(Square::new(file, rank)) {
                    None => skip += 1,
                    Some(p) => {
                        if skip > 0 {
                            write!(f, "{skip}")?;
                            skip = 0;
                        }
                        Display::fmt(&p, f)?;
                    }
                }
            }

            if skip > 0 {
                write!(f, "{skip}")?;
            }

            if rank > Rank::First {
                f.write_str("/")?;
            }
        }

        write!(f, " {} ", if self.turn == Color::White { "w" } else { "b" })?;
        Display::fmt(&self.castles, f)?;

        match self.en_passant {
            None => f.write_str(" -")?,
            Some(ep) => write!(f, " {ep}")?,
        }

        write!(f, " {} {}", self.halfmoves, self.fullmoves)
    }
}

/// The reason why parsing a FEN string failed.
#[derive(Debug, Display, Clone, Eq, PartialEq, Error, From)]
#[display("failed to parse board")]
pub struct ParseFenError;

impl FromStr for Board {
    type Err = ParseFenError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut fields = s.split_whitespace();
        let placement = fields.next().ok_or(ParseFenError)?;

        let mut board = Board::empty();
        let ranks: Vec<&str> = placement.split('/').collect();
        if ranks.len() != 8 {
            return Err(ParseFenError);
        }

        for (idx, row) in ranks.iter().enumerate() {
            let rank = Rank::from_index(7 - idx as u8);
            let mut files = File::iter();

            for c in row.chars() {
                if let Some(skip) = c.to_digit(10) {
                    for _ in 0..skip {
                        files.next().ok_or(ParseFenError)?;
                    }
                } else {
                    let file = files.next().ok_or(ParseFenError)?;
                    let mut buffer = [0; 4];
                    let piece: Piece = c
                        .encode_utf8(&mut buffer)
                        .parse()
                        .map_err(|_| ParseFenError)?;
                    board.toggle(piece, Square::new(file, rank));
                }
            }

            if files.next().is_some() {
                return Err(ParseFenError);
            }
        }

        board.turn = match fields.next() {
            Some("w") => Color::White,
            Some("b") => Color::Black,
            _ => return Err(ParseFenError),
        };

        board.castles = fields
            .next()
            .ok_or(ParseFenError)?
            .parse()
            .map_err(|_| ParseFenError)?;

        board.en_passant = match fields.next() {
            Some("-") => None,
            Some(sq) => Some(sq.parse().map_err(|_| ParseFenError)?),
            None => return Err(ParseFenError),
        };

        board.halfmoves = match fields.next() {
            None => 0,
            Some(n) => n.parse().map_err(|_| ParseFenError)?,
        };

        board.fullmoves = match fields.next() {
            None => 1,
            Some(n) => n.parse().map_err(|_| ParseFenError)?,
        };

        if board.king(Color::White).is_none() || board.king(Color::Black).is_none() {
            return Err(ParseFenError);
        }

        board.king(board.turn).assume();
        Ok(board)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_board_is_the_starting_position() {
        let board = Board::default();
        assert_eq!(
            board.to_string(),
            "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1"
        );
    }

    #[test]
    fn parsing_printed_board_is_an_identity() {
        let fens = [
            "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1",
            "r3k2r/p1ppqpb1/bn2pnp1/3PN3/1p2P3/2N2Q1p/PPPBBPPP/R3K2R w KQkq - 0 1",
            "4k3/8/8/8/8/8/4P3/4K3 w - - 0 1",
            "8/2p5/3p4/KP5r/1R3p1k/8/4P1P1/8 w - - 0 1",
        ];

        for fen in fens {
            let board: Board = fen.parse().unwrap();
            assert_eq!(board.to_string(), fen);
        }
    }

    #[test]
    fn toggle_places_and_removes_pieces() {
        let mut board = Board::empty();
        board.toggle(Piece::WhiteQueen, Square::D4);
        assert_eq!(board.piece_on(Square::D4), Some(Piece::WhiteQueen));
        board.toggle(Piece::WhiteQueen, Square::D4);
        assert_eq!(board.piece_on(Square::D4), None);
    }

    #[test]
    fn zobrist_depends_on_the_turn() {
        let a: Board = "4k3/8/8/8/8/8/4P3/4K3 w - - 0 1".parse().unwrap();
        let b: Board = "4k3/8/8/8/8/8/4P3/4K3 b - - 0 1".parse().unwrap();
        assert_ne!(a.zobrist(), b.zobrist());
    }
}

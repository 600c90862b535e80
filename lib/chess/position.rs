use crate::chess::*;
use crate::util::Assume;
use arrayvec::ArrayVec;
use derive_more::with_trait::{Display, Error, From};
use std::fmt::{self, Formatter};
use std::hash::{Hash, Hasher};
use std::num::NonZeroU32;
use std::str::FromStr;

#[cfg(test)]
use proptest::{prelude::*, sample::*};

/// A container with sufficient capacity to hold all [`Move`]s in any [`Position`].
pub type MoveList = ArrayVec<Move, 254>;

/// Piece values used for static exchange evaluation.
const SEE_VALUE: [i32; 6] = [124, 781, 825, 1276, 2538, 0];

#[inline(always)]
fn push_moves(
    list: &mut MoveList,
    piece: Piece,
    wc: Square,
    targets: Bitboard,
    victims: Bitboard,
) {
    let promotions = if piece.role() == Role::Pawn {
        Rank::Eighth.perspective(piece.color()).bitboard()
    } else {
        Bitboard::empty()
    };

    for wt in targets {
        let capture = victims.contains(wt);

        if promotions.contains(wt) {
            use Role::*;
            for role in [Queen, Knight, Rook, Bishop] {
                list.push(if capture {
                    Move::capture(wc, wt, Some(role))
                } else {
                    Move::regular(wc, wt, Some(role))
                });
            }
        } else {
            list.push(if capture {
                Move::capture(wc, wt, None)
            } else {
                Move::regular(wc, wt, None)
            });
        }
    }
}

/// The current position on the board.
///
/// This type guarantees that it only holds reachable, legal positions.
#[derive(Debug, Clone, Eq)]
pub struct Position {
    board: Board,
    zobrist: Zobrist,
    checkers: Bitboard,
    pinned: Bitboard,
    captured: Option<Role>,
    history: [[Option<NonZeroU32>; 32]; 2],
}

impl Default for Position {
    #[inline(always)]
    fn default() -> Self {
        let board = Board::default();

        Self {
            zobrist: board.zobrist(),
            checkers: Bitboard::empty(),
            pinned: Bitboard::empty(),
            captured: None,
            history: Default::default(),
            board,
        }
    }
}

impl Hash for Position {
    #[inline(always)]
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.board.hash(state);
    }
}

impl PartialEq for Position {
    #[inline(always)]
    fn eq(&self, other: &Self) -> bool {
        self.board.eq(&other.board)
    }
}

#[cfg(test)]
impl Arbitrary for Position {
    type Parameters = ();
    type Strategy = BoxedStrategy<Self>;

    fn arbitrary_with(_: Self::Parameters) -> Self::Strategy {
        (0..64, any::<Selector>())
            .prop_map(|(moves, selector)| {
                let mut pos = Position::default();

                for _ in 0..moves {
                    if pos.is_draw() {
                        break;
                    }

                    match selector.try_select(pos.moves().into_iter()) {
                        Some(m) => {
                            pos.play(m);
                        }
                        None => break,
                    }
                }

                pos
            })
            .no_shrink()
            .boxed()
    }
}

impl Position {
    /// The side to move.
    #[inline(always)]
    pub fn turn(&self) -> Color {
        self.board.turn
    }

    /// The number of halfmoves since the last capture or pawn advance.
    #[inline(always)]
    pub fn halfmoves(&self) -> u8 {
        self.board.halfmoves
    }

    /// The current move number since the start of the game.
    #[inline(always)]
    pub fn fullmoves(&self) -> u32 {
        self.board.fullmoves
    }

    /// The number of plies played since the start of the game.
    #[inline(always)]
    pub fn game_ply(&self) -> u32 {
        2 * (self.fullmoves().max(1) - 1) + (self.turn() == Color::Black) as u32
    }

    /// The en passant square.
    #[inline(always)]
    pub fn en_passant(&self) -> Option<Square> {
        self.board.en_passant
    }

    /// The castle rights.
    #[inline(always)]
    pub fn castles(&self) -> Castles {
        self.board.castles
    }

    /// [`Square`]s occupied.
    #[inline(always)]
    pub fn occupied(&self) -> Bitboard {
        self.material(Color::White) ^ self.material(Color::Black)
    }

    /// [`Square`]s occupied by pieces of a [`Color`].
    #[inline(always)]
    pub fn material(&self, side: Color) -> Bitboard {
        self.board.by_color(side)
    }

    /// [`Square`]s occupied by pieces of a [`Role`].
    #[inline(always)]
    pub fn by_role(&self, role: Role) -> Bitboard {
        self.board.by_role(role)
    }

    /// [`Square`]s occupied by a [`Piece`].
    #[inline(always)]
    pub fn by_piece(&self, piece: Piece) -> Bitboard {
        self.board.by_piece(piece)
    }

    /// [`Square`]s occupied by pawns of a [`Color`].
    #[inline(always)]
    pub fn pawns(&self, side: Color) -> Bitboard {
        self.by_piece(Piece::new(Role::Pawn, side))
    }

    /// [`Square`]s occupied by pieces other than pawns of a [`Color`].
    #[inline(always)]
    pub fn pieces(&self, side: Color) -> Bitboard {
        self.material(side) ^ self.pawns(side)
    }

    /// [`Square`] occupied by the king of a [`Color`].
    #[inline(always)]
    pub fn king(&self, side: Color) -> Square {
        self.board.king(side).assume()
    }

    /// The [`Role`] of the piece on the given [`Square`], if any.
    #[inline(always)]
    pub fn role_on(&self, sq: Square) -> Option<Role> {
        self.board.role_on(sq)
    }

    /// The [`Piece`] on the given [`Square`], if any.
    #[inline(always)]
    pub fn piece_on(&self, sq: Square) -> Option<Piece> {
        self.board.piece_on(sq)
    }

    /// The [`Piece`] this move displaces.
    #[inline(always)]
    pub fn moved_piece(&self, m: Move) -> Option<Piece> {
        self.piece_on(m.whence())
    }

    /// This position's zobrist hash.
    #[inline(always)]
    pub fn zobrist(&self) -> Zobrist {
        self.zobrist
    }

    /// An approximation of the zobrist hash after this move is played.
    ///
    /// Exact for regular moves; used for speculative prefetching only.
    #[inline(always)]
    pub fn zobrist_after(&self, m: Move) -> Zobrist {
        let mut hash = self.zobrist ^ ZobristNumbers::turn();

        if let Some(p) = self.moved_piece(m) {
            hash ^= ZobristNumbers::psq(p, m.whence()) ^ ZobristNumbers::psq(p, m.whither());
        }

        if let Some(victim) = self.piece_on(m.whither()) {
            hash ^= ZobristNumbers::psq(victim, m.whither());
        }

        hash
    }

    /// [`Square`]s occupied by pieces giving check.
    #[inline(always)]
    pub fn checkers(&self) -> Bitboard {
        self.checkers
    }

    /// [`Square`]s occupied by pieces pinned to their own king.
    #[inline(always)]
    pub fn pinned(&self) -> Bitboard {
        self.pinned
    }

    /// The [`Role`] captured by the move that produced this position.
    #[inline(always)]
    pub fn captured_last(&self) -> Option<Role> {
        self.captured
    }

    /// The total number of pieces on the board.
    #[inline(always)]
    pub fn count(&self) -> usize {
        self.occupied().len()
    }

    /// The material value of pieces other than pawns of a [`Color`].
    #[inline(always)]
    pub fn non_pawn_material(&self, side: Color) -> i32 {
        use Role::*;
        [Knight, Bishop, Rook, Queen]
            .into_iter()
            .map(|r| SEE_VALUE[r.index()] * (self.material(side) & self.by_role(r)).len() as i32)
            .sum()
    }

    /// How many other times this position has occurred.
    #[inline(always)]
    pub fn repetitions(&self) -> usize {
        match NonZeroU32::new(self.zobrist as u32) {
            None => 0,
            hash => {
                let history = &self.history[self.turn().index()];
                history.iter().filter(|h| **h == hash).count()
            }
        }
    }

    /// Whether a [`Square`] is threatened by a piece of a [`Color`].
    #[inline(always)]
    pub fn is_threatened(&self, sq: Square, side: Color, occupied: Bitboard) -> bool {
        let theirs = self.material(side);
        for role in [Role::Pawn, Role::Knight, Role::King] {
            let candidates = occupied & theirs & self.by_role(role);
            if !(Piece::new(role, !side).attacks(sq, occupied) & candidates).is_empty() {
                return true;
            }
        }

        let queens = self.by_role(Role::Queen);
        for role in [Role::Bishop, Role::Rook] {
            let candidates = occupied & theirs & (queens | self.by_role(role));
            if !(Piece::new(role, !side).attacks(sq, occupied) & candidates).is_empty() {
                return true;
            }
        }

        false
    }

    /// [`Square`]s of pieces of either color attacking a [`Square`].
    #[inline(always)]
    fn attackers(&self, sq: Square, occupied: Bitboard) -> Bitboard {
        use Piece::*;

        let mut attackers = Bitboard::empty();
        for piece in [WhitePawn, BlackPawn] {
            attackers |= self.by_piece(piece) & piece.flip().attacks(sq, occupied);
        }

        for role in [Role::Knight, Role::King] {
            let candidates = self.by_role(role);
            attackers |= candidates & Piece::new(role, Color::White).attacks(sq, occupied);
        }

        let queens = self.by_role(Role::Queen);
        attackers |= (self.by_role(Role::Bishop) | queens) & WhiteBishop.attacks(sq, occupied);
        attackers |= (self.by_role(Role::Rook) | queens) & WhiteRook.attacks(sq, occupied);

        attackers & occupied
    }

    /// Whether this position is a check.
    #[inline(always)]
    pub fn is_check(&self) -> bool {
        !self.checkers().is_empty()
    }

    /// Whether this position is a checkmate.
    #[inline(always)]
    pub fn is_checkmate(&self) -> bool {
        self.is_check() && self.moves().is_empty()
    }

    /// Whether this position is a stalemate.
    #[inline(always)]
    pub fn is_stalemate(&self) -> bool {
        !self.is_check() && self.moves().is_empty()
    }

    /// Whether this position has insufficient mating material.
    #[inline(always)]
    pub fn is_material_insufficient(&self) -> bool {
        use Piece::*;
        match self.count() {
            2 => true,
            3 => !(self.by_role(Role::Bishop) | self.by_role(Role::Knight)).is_empty(),
            4 => {
                let wb = self.by_piece(WhiteBishop);
                let bb = self.by_piece(BlackBishop);

                let dark = Bitboard::dark();
                let light = Bitboard::light();

                !((light & wb).is_empty() || (light & bb).is_empty())
                    || !((dark & wb).is_empty() || (dark & bb).is_empty())
            }
            _ => false,
        }
    }

    /// Whether this position is drawn by repetition, the 50-move rule, or
    /// insufficient material.
    #[inline(always)]
    pub fn is_draw(&self) -> bool {
        self.repetitions() > 0 || self.halfmoves() >= 100 || self.is_material_insufficient()
    }

    /// Whether a repetition of this position is already in the game history.
    ///
    /// Over-the-board cycle detection; used to clamp scores toward the draw
    /// value when the side to move can steer into a repetition.
    #[inline(always)]
    pub fn has_repeated(&self) -> bool {
        self.halfmoves() >= 3 && self.repetitions() > 0
    }

    /// Whether this pawn move advances to the seventh or eighth rank.
    #[inline(always)]
    pub fn advanced_pawn_push(&self, m: Move) -> bool {
        self.role_on(m.whence()) == Some(Role::Pawn)
            && m.whither().rank().perspective(self.turn()) >= Rank::Seventh
    }

    /// Whether this move is castling.
    #[inline(always)]
    pub fn is_castling(&self, m: Move) -> bool {
        self.role_on(m.whence()) == Some(Role::King)
            && (m.whence().file() as i8 - m.whither().file() as i8).abs() == 2
    }

    /// Whether this move captures en passant.
    #[inline(always)]
    pub fn is_en_passant(&self, m: Move) -> bool {
        self.role_on(m.whence()) == Some(Role::Pawn)
            && m.is_capture()
            && self.piece_on(m.whither()).is_none()
    }

    /// The [`Role`] this move captures, if any.
    #[inline(always)]
    pub fn captured(&self, m: Move) -> Option<Role> {
        if !m.is_capture() {
            None
        } else {
            Some(self.role_on(m.whither()).unwrap_or(Role::Pawn))
        }
    }

    /// Our pieces that shield the opposing king from our sliders.
    #[inline(always)]
    fn discovery_candidates(&self) -> Bitboard {
        let us = self.turn();
        let king = self.king(!us);
        let ours = self.material(us);
        let occupied = self.occupied();
        let queens = self.by_role(Role::Queen);

        let mut candidates = Bitboard::empty();
        for role in [Role::Bishop, Role::Rook] {
            let slider = Piece::new(role, us);
            for wc in ours & slider.attacks(king, ours) & (queens | self.by_role(role)) {
                let blockers = occupied & Bitboard::segment(king, wc);
                if blockers.len() == 1 {
                    candidates |= blockers & ours;
                }
            }
        }

        candidates
    }

    /// Whether this move uncovers a slider check on the opposing king.
    #[inline(always)]
    pub fn is_discovery_check(&self, m: Move) -> bool {
        self.discovery_candidates().contains(m.whence())
            && !Bitboard::line(self.king(!self.turn()), m.whence()).contains(m.whither())
    }

    /// Whether this move gives check.
    pub fn gives_check(&self, m: Move) -> bool {
        if self.is_castling(m) || self.is_en_passant(m) {
            let mut next = self.clone();
            next.play(m);
            return next.is_check();
        }

        let us = self.turn();
        let king = self.king(!us);
        let role = self.role_on(m.whence()).assume();
        let after = m.promotion().unwrap_or(role);
        let occ = self.occupied().without(m.whence()).with(m.whither());

        if Piece::new(after, us)
            .attacks(m.whither(), occ)
            .contains(king)
        {
            return true;
        }

        let queens = self.by_role(Role::Queen);
        for r in [Role::Bishop, Role::Rook] {
            let slider = Piece::new(r, us);
            let candidates = (self.material(us) & (queens | self.by_role(r)))
                .without(m.whence())
                .without(m.whither());
            if !(slider.attacks(king, occ) & candidates).is_empty() {
                return true;
            }
        }

        false
    }

    /// Whether the static exchange on this move is at least `threshold`.
    ///
    /// The swap-off search ignores pins.
    pub fn see_ge(&self, m: Move, threshold: i32) -> bool {
        use Role::*;

        if self.is_castling(m) || self.is_en_passant(m) {
            return threshold <= 0;
        }

        let wt = m.whither();
        let victim = self.role_on(wt).map_or(0, |r| SEE_VALUE[r.index()]);
        let mut swap = victim - threshold;
        if swap < 0 {
            return false;
        }

        let role = self.role_on(m.whence()).assume();
        swap = SEE_VALUE[role.index()] - swap;
        if swap <= 0 {
            return true;
        }

        let mut occupied = self.occupied() ^ m.whence().bitboard() ^ wt.bitboard();
        let mut stm = self.piece_on(m.whence()).assume().color();
        let mut attackers = self.attackers(wt, occupied);
        let mut res = true;

        let queens = self.by_role(Queen);
        let diagonal = self.by_role(Bishop) | queens;
        let orthogonal = self.by_role(Rook) | queens;

        loop {
            stm = !stm;
            attackers &= occupied;

            let stm_attackers = attackers & self.material(stm);
            if stm_attackers.is_empty() {
                break;
            }

            res = !res;

            let mut captor = None;
            for role in [Pawn, Knight, Bishop, Rook, Queen, King] {
                let bb = stm_attackers & self.by_role(role);
                if let Some(sq) = bb.first() {
                    captor = Some((role, sq));
                    break;
                }
            }

            let (role, sq) = captor.assume();
            if role == King {
                // The king may only recapture if the opponent has run out.
                if !(attackers & self.material(!stm)).is_empty() {
                    res = !res;
                }
                break;
            }

            swap = SEE_VALUE[role.index()] - swap;
            if swap < res as i32 {
                break;
            }

            occupied = occupied.without(sq);
            if matches!(role, Pawn | Bishop | Queen) {
                attackers |=
                    diagonal & Piece::new(Bishop, Color::White).attacks(wt, occupied) & occupied;
            }
            if matches!(role, Rook | Queen) {
                attackers |=
                    orthogonal & Piece::new(Rook, Color::White).attacks(wt, occupied) & occupied;
            }
        }

        res
    }

    fn generate(&self, list: &mut MoveList) {
        let turn = self.turn();
        let ours = self.material(turn);
        let theirs = self.material(!turn);
        let occupied = ours | theirs;
        let king = self.king(turn);

        for wc in ours & self.by_role(Role::Pawn) {
            let piece = Piece::new(Role::Pawn, turn);
            let ep = self.en_passant().map_or(Bitboard::empty(), Square::bitboard);
            let mut moves = piece.moves(wc, ours, theirs);
            moves |= piece.attacks(wc, occupied) & (theirs | ep);
            if self.pinned().contains(wc) {
                moves &= Bitboard::line(king, wc);
            }

            for wt in moves & ep {
                let target = Square::new(wt.file(), wc.rank());
                let blockers = occupied.without(target).without(wc).with(wt);
                if self.is_threatened(king, !turn, blockers) {
                    moves ^= ep;
                }
            }

            push_moves(list, piece, wc, moves, theirs | ep);
        }

        {
            let piece = Piece::new(Role::Knight, turn);
            for wc in ours & self.by_role(Role::Knight) & !self.pinned() {
                let moves = piece.moves(wc, ours, theirs);
                push_moves(list, piece, wc, moves, theirs);
            }
        }

        for role in [Role::Bishop, Role::Rook, Role::Queen] {
            let piece = Piece::new(role, turn);
            for wc in ours & self.by_role(role) {
                let mut moves = piece.moves(wc, ours, theirs);
                if self.pinned().contains(wc) {
                    moves &= Bitboard::line(king, wc);
                }

                push_moves(list, piece, wc, moves, theirs);
            }
        }

        {
            let piece = Piece::new(Role::King, turn);
            let mut moves = piece.moves(king, ours, theirs);
            for wt in moves {
                if self.is_threatened(wt, !turn, occupied) {
                    moves ^= wt.bitboard();
                }
            }

            if self.castles().long(turn) {
                let rank = Rank::First.perspective(turn);
                let c = Square::new(File::C, rank);
                let b = Square::new(File::B, rank);
                let path = c.bitboard().with(Square::new(File::D, rank));
                if (occupied & path.with(b)).is_empty()
                    && !path
                        .iter()
                        .any(|sq| self.is_threatened(sq, !turn, occupied))
                {
                    moves |= c.bitboard();
                }
            }

            if self.castles().short(turn) {
                let rank = Rank::First.perspective(turn);
                let g = Square::new(File::G, rank);
                let path = g.bitboard().with(Square::new(File::F, rank));
                if (occupied & path).is_empty()
                    && !path
                        .iter()
                        .any(|sq| self.is_threatened(sq, !turn, occupied))
                {
                    moves |= g.bitboard();
                }
            }

            push_moves(list, piece, king, moves, theirs);
        }
    }

    fn generate_evasions(&self, list: &mut MoveList) {
        let turn = self.turn();
        let ours = self.material(turn);
        let theirs = self.material(!turn);
        let occupied = ours | theirs;
        let king = self.king(turn);

        let checks = self
            .checkers()
            .iter()
            .fold(Bitboard::empty(), |bb, sq| Bitboard::segment(king, sq) | bb);

        let candidates = match self.checkers().len() {
            1 => ours & !self.pinned(),
            _ => king.bitboard(),
        };

        for wc in candidates & self.by_role(Role::Pawn) {
            let piece = Piece::new(Role::Pawn, turn);
            let ep = self.en_passant().map_or(Bitboard::empty(), Square::bitboard);
            let mut moves = piece.moves(wc, ours, theirs) & checks;
            moves |= piece.attacks(wc, occupied) & (self.checkers() | ep);

            for wt in moves & ep {
                let target = Square::new(wt.file(), wc.rank());
                let blockers = occupied.without(target).without(wc).with(wt);
                if self.is_threatened(king, !turn, blockers) {
                    moves ^= ep;
                }
            }

            push_moves(list, piece, wc, moves, theirs | ep);
        }

        for role in [Role::Knight, Role::Bishop, Role::Rook, Role::Queen] {
            let piece = Piece::new(role, turn);
            for wc in candidates & self.by_role(role) {
                let moves = piece.moves(wc, ours, theirs) & (checks | self.checkers());
                push_moves(list, piece, wc, moves, theirs);
            }
        }

        {
            let piece = Piece::new(Role::King, turn);
            let mut moves = piece.moves(king, ours, theirs) & !checks;
            for wt in moves {
                if self.is_threatened(wt, !turn, occupied.without(king)) {
                    moves ^= wt.bitboard();
                }
            }

            push_moves(list, piece, king, moves, theirs);
        }
    }

    /// The legal moves that can be played in this position.
    #[inline(always)]
    pub fn moves(&self) -> MoveList {
        let mut moves = MoveList::new();

        if self.is_check() {
            self.generate_evasions(&mut moves);
        } else {
            self.generate(&mut moves);
        }

        moves
    }

    /// Play a [`Move`].
    pub fn play(&mut self, m: Move) -> (Role, Option<(Role, Square)>) {
        debug_assert!(self.moves().contains(&m), "{m} is illegal in {self}");

        use Role::*;

        let turn = self.turn();
        let promotion = m.promotion();
        let (wc, wt) = (m.whence(), m.whither());
        let role = self.role_on(wc).assume();
        let capture = match self.role_on(wt) {
            _ if !m.is_capture() => None,
            Some(r) => Some((r, wt)),
            None => Some((Pawn, Square::new(wt.file(), wc.rank()))),
        };

        if turn == Color::Black {
            self.board.fullmoves += 1;
        }

        if role == Pawn || capture.is_some() {
            self.board.halfmoves = 0;
            self.history = Default::default();
        } else {
            self.board.halfmoves = self.board.halfmoves.saturating_add(1);
            let entries = self.history[turn.index()].len();
            self.history[turn.index()].copy_within(..entries - 1, 1);
            self.history[turn.index()][0] = NonZeroU32::new(self.zobrist as u32);
        }

        self.board.turn = !self.board.turn;
        self.zobrist ^= ZobristNumbers::turn();

        if let Some(ep) = self.board.en_passant.take() {
            self.zobrist ^= ZobristNumbers::en_passant(ep.file());
        }

        if let Some((victim, target)) = capture {
            self.board.toggle(Piece::new(victim, !turn), target);
            self.zobrist ^= ZobristNumbers::psq(Piece::new(victim, !turn), target);
        }

        self.board.toggle(Piece::new(role, turn), wc);
        self.board.toggle(Piece::new(role, turn), wt);
        self.zobrist ^= ZobristNumbers::psq(Piece::new(role, turn), wc);
        self.zobrist ^= ZobristNumbers::psq(Piece::new(role, turn), wt);

        if let Some(promotion) = promotion {
            self.board.toggle(Piece::new(Pawn, turn), wt);
            self.board.toggle(Piece::new(promotion, turn), wt);
            self.zobrist ^= ZobristNumbers::psq(Piece::new(Pawn, turn), wt);
            self.zobrist ^= ZobristNumbers::psq(Piece::new(promotion, turn), wt);
        } else if role == Pawn && (wt as i8 - wc as i8).abs() == 16 {
            let ep = Square::new(wc.file(), Rank::Third.perspective(turn));
            self.board.en_passant = Some(ep);
            self.zobrist ^= ZobristNumbers::en_passant(wc.file());
        } else if role == King && (wt.file() as i8 - wc.file() as i8).abs() == 2 {
            let rank = Rank::First.perspective(turn);
            let (rc, rt) = if wt.file() > wc.file() {
                (Square::new(File::H, rank), Square::new(File::F, rank))
            } else {
                (Square::new(File::A, rank), Square::new(File::D, rank))
            };

            self.board.toggle(Piece::new(Rook, turn), rc);
            self.board.toggle(Piece::new(Rook, turn), rt);
            self.zobrist ^= ZobristNumbers::psq(Piece::new(Rook, turn), rc);
            self.zobrist ^= ZobristNumbers::psq(Piece::new(Rook, turn), rt);
        }

        let disrupted = Castles::disrupted(wc) | Castles::disrupted(wt);
        if self.castles() & disrupted != Castles::none() {
            self.zobrist ^= ZobristNumbers::castling(self.castles());
            self.board.castles &= !disrupted;
            self.zobrist ^= ZobristNumbers::castling(self.castles());
        }

        self.captured = capture.map(|(r, _)| r);
        self.update_checkers_and_pins(promotion.unwrap_or(role), wt);
        (role, capture)
    }

    /// Play a null move.
    pub fn pass(&mut self) {
        debug_assert!(!self.is_check());

        let turn = self.turn();
        if turn == Color::Black {
            self.board.fullmoves += 1;
        }

        self.board.halfmoves = self.board.halfmoves.saturating_add(1);
        let entries = self.history[turn.index()].len();
        self.history[turn.index()].copy_within(..entries - 1, 1);
        self.history[turn.index()][0] = NonZeroU32::new(self.zobrist as u32);

        self.board.turn = !self.board.turn;
        self.zobrist ^= ZobristNumbers::turn();
        self.captured = None;
        if let Some(ep) = self.board.en_passant.take() {
            self.zobrist ^= ZobristNumbers::en_passant(ep.file());
        }

        let king = self.king(!turn);
        let ours = self.material(turn);
        let occupied = self.occupied();

        self.checkers = Bitboard::empty();
        self.pinned = Bitboard::empty();
        let queens = self.by_role(Role::Queen);
        for role in [Role::Bishop, Role::Rook] {
            let slider = Piece::new(role, !turn);
            for wc in ours & slider.attacks(king, ours) & (queens | self.by_role(role)) {
                let blockers = occupied & Bitboard::segment(king, wc);
                if blockers.len() == 1 {
                    self.pinned |= blockers;
                }
            }
        }
    }

    fn update_checkers_and_pins(&mut self, moved: Role, wt: Square) {
        use Role::*;

        let turn = !self.turn();
        let king = self.king(!turn);
        let ours = self.material(turn);
        let occupied = self.occupied();

        self.pinned = Bitboard::empty();
        self.checkers = match moved {
            r @ (Pawn | Knight) if Piece::new(r, turn).attacks(wt, occupied).contains(king) => {
                wt.bitboard()
            }
            _ => Bitboard::empty(),
        };

        let queens = self.by_role(Queen);
        for role in [Bishop, Rook] {
            let slider = Piece::new(role, turn);
            for wc in ours & slider.attacks(king, ours) & (queens | self.by_role(role)) {
                let blockers = occupied & Bitboard::segment(king, wc);
                match blockers.len() {
                    0 => self.checkers |= wc.bitboard(),
                    1 => self.pinned |= blockers,
                    _ => {}
                }
            }
        }
    }

    /// Counts the total number of reachable positions to the given depth.
    pub fn perft(&self, depth: u8) -> u64 {
        match depth {
            0 => 1,
            1 => self.moves().len() as u64,
            _ => self
                .moves()
                .into_iter()
                .map(|m| {
                    let mut next = self.clone();
                    next.play(m);
                    next.perft(depth - 1)
                })
                .sum(),
        }
    }
}

impl Display for Position {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.board, f)
    }
}

/// The reason why parsing the FEN string failed.
#[derive(Debug, Display, Clone, Eq, PartialEq, Error, From)]
pub enum ParsePositionError {
    #[display("failed to parse position")]
    InvalidFen(ParseFenError),
    #[display("illegal position")]
    IllegalPosition,
}

impl FromStr for Position {
    type Err = ParsePositionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        use {ParsePositionError::*, Role::*};

        let board: Board = s.parse()?;
        let king = board.king(board.turn).ok_or(IllegalPosition)?;
        let ours = board.by_color(board.turn);
        let theirs = board.by_color(!board.turn);
        let occupied = ours | theirs;

        let mut checkers = Bitboard::empty();
        for role in [Pawn, Knight] {
            let stepper = Piece::new(role, board.turn);
            checkers |= theirs & board.by_role(role) & stepper.attacks(king, occupied);
        }

        let mut pinned = Bitboard::empty();
        let queens = board.by_role(Queen);
        for role in [Bishop, Rook] {
            let slider = Piece::new(role, !board.turn);
            for wc in theirs & slider.attacks(king, theirs) & (queens | board.by_role(role)) {
                let blockers = occupied & Bitboard::segment(king, wc);
                match blockers.len() {
                    0 => checkers |= wc.bitboard(),
                    1 => pinned |= blockers & ours,
                    _ => {}
                }
            }
        }

        Ok(Position {
            checkers,
            pinned,
            zobrist: board.zobrist(),
            captured: None,
            history: Default::default(),
            board,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_strategy::proptest;

    #[proptest]
    fn position_compares_by_board(a: Position, b: Position) {
        assert_eq!(a == b, a.to_string() == b.to_string());
    }

    #[proptest]
    fn parsing_printed_position_is_an_identity(pos: Position) {
        let parsed: Position = pos.to_string().parse().unwrap();
        assert_eq!(parsed, pos);
    }

    #[proptest]
    fn all_generated_moves_are_legal(pos: Position) {
        for m in pos.moves() {
            let mut next = pos.clone();
            next.play(m);

            let king = next.king(pos.turn());
            assert!(
                !next.is_threatened(king, next.turn(), next.occupied()),
                "{m} leaves the king en prise in {pos}"
            );
        }
    }

    #[proptest]
    fn playing_a_move_leaves_the_original_untouched(pos: Position) {
        let zobrist = pos.zobrist();
        let halfmoves = pos.halfmoves();
        let turn = pos.turn();

        if let Some(&m) = pos.moves().first() {
            let mut next = pos.clone();
            next.play(m);
        }

        assert_eq!(pos.zobrist(), zobrist);
        assert_eq!(pos.halfmoves(), halfmoves);
        assert_eq!(pos.turn(), turn);
    }

    #[proptest]
    fn incremental_zobrist_matches_scratch(pos: Position) {
        for m in pos.moves().iter().take(8) {
            let mut next = pos.clone();
            next.play(*m);
            let fresh: Position = next.to_string().parse().unwrap();
            assert_eq!(next.zobrist(), fresh.zobrist(), "after {m} in {pos}");
        }
    }

    #[proptest]
    fn gives_check_matches_played_position(pos: Position) {
        for m in pos.moves().iter().take(8) {
            let mut next = pos.clone();
            next.play(*m);
            assert_eq!(pos.gives_check(*m), next.is_check(), "move {m} in {pos}");
        }
    }

    #[test]
    fn see_accepts_winning_captures() {
        let pos: Position = "1k6/8/8/3p4/8/8/3R4/3K4 w - - 0 1".parse().unwrap();
        let m = Move::capture(Square::D2, Square::D5, None);
        assert!(pos.see_ge(m, 0));
        assert!(pos.see_ge(m, SEE_VALUE[Role::Pawn.index()]));
    }

    #[test]
    fn see_rejects_losing_captures() {
        // The pawn on d5 is defended by the pawn on e6.
        let pos: Position = "1k6/8/4p3/3p4/8/8/3R4/3K4 w - - 0 1".parse().unwrap();
        let m = Move::capture(Square::D2, Square::D5, None);
        assert!(!pos.see_ge(m, 0));
        assert!(pos.see_ge(m, SEE_VALUE[Role::Pawn.index()] - SEE_VALUE[Role::Rook.index()]));
    }

    #[test]
    fn see_accepts_equal_exchanges() {
        // Rook takes rook, defended by a rook.
        let pos: Position = "1k1r4/8/8/3r4/8/8/3R4/1K6 w - - 0 1".parse().unwrap();
        let m = Move::capture(Square::D2, Square::D5, None);
        assert!(pos.see_ge(m, 0));
        assert!(!pos.see_ge(m, 1));
    }

    #[test]
    fn perft_matches_published_counts_for_the_starting_position() {
        let pos = Position::default();
        assert_eq!(pos.perft(1), 20);
        assert_eq!(pos.perft(2), 400);
        assert_eq!(pos.perft(3), 8902);
        assert_eq!(pos.perft(4), 197281);
    }

    #[test]
    fn perft_matches_published_counts_for_kiwipete() {
        let pos: Position = "r3k2r/p1ppqpb1/bn2pnp1/3PN3/1p2P3/2N2Q1p/PPPBBPPP/R3K2R w KQkq - 0 1"
            .parse()
            .unwrap();

        assert_eq!(pos.perft(1), 48);
        assert_eq!(pos.perft(2), 2039);
        assert_eq!(pos.perft(3), 97862);
        assert_eq!(pos.perft(4), 4085603);
    }

    #[test]
    fn perft_matches_published_counts_for_the_endgame_position() {
        let pos: Position = "8/2p5/3p4/KP5r/1R3p1k/8/4P1P1/8 w - - 0 1".parse().unwrap();
        assert_eq!(pos.perft(1), 14);
        assert_eq!(pos.perft(2), 191);
        assert_eq!(pos.perft(3), 2812);
        assert_eq!(pos.perft(4), 43238);
        assert_eq!(pos.perft(5), 674624);
    }

    #[test]
    fn perft_matches_published_counts_for_the_promotion_position() {
        let pos: Position = "n1n5/PPPk4/8/8/8/8/4Kppp/5N1N b - - 0 1".parse().unwrap();
        assert_eq!(pos.perft(1), 24);
        assert_eq!(pos.perft(2), 496);
        assert_eq!(pos.perft(3), 9483);
        assert_eq!(pos.perft(4), 182838);
    }

    #[test]
    fn en_passant_discovered_pin_is_respected() {
        // The rook pins both pawns against the king through the fifth rank.
        let pos: Position = "8/2p5/3p4/KP5r/1R3p1k/8/4P1P1/8 b - - 0 1".parse().unwrap();
        let moves = pos.moves();
        assert!(!moves.is_empty());
    }

    #[test]
    fn checkmate_has_no_moves() {
        let pos: Position = "R3k3/6pp/8/8/8/8/5PPP/6K1 b - - 0 1".parse().unwrap();
        assert!(pos.is_check());
        assert!(pos.is_checkmate());
        assert!(pos.moves().is_empty());
    }

    #[test]
    fn stalemate_has_no_moves() {
        let pos: Position = "7k/5Q2/6K1/8/8/8/8/8 b - - 0 1".parse().unwrap();
        assert!(!pos.is_check());
        assert!(pos.is_stalemate());
    }
}

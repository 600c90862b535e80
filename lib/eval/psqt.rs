use super::{PIECE_VALUE_EG, PIECE_VALUE_MG};
use once_cell::sync::Lazy;

/// Game phase contribution per role, pawn first.
pub const GAME_PHASE: [i32; 6] = [0, 1, 1, 2, 4, 0];

/// Positional bonuses from the piece's own perspective, rank 1 first.
#[rustfmt::skip]
const MG_BONUS: [[i32; 64]; 6] = [
    [ // pawn
          0,   0,   0,   0,   0,   0,   0,   0,
          2,   4,   4, -12, -12,   4,   4,   2,
          2,  -2,  -4,   2,   2,  -4,  -2,   2,
          0,   0,   6,  18,  18,   6,   0,   0,
          4,   4,  10,  24,  24,  10,   4,   4,
         10,  12,  20,  28,  28,  20,  12,  10,
         46,  52,  54,  56,  56,  54,  52,  46,
          0,   0,   0,   0,   0,   0,   0,   0,
    ],
    [ // knight
        -48, -36, -24, -18, -18, -24, -36, -48,
        -30, -16,  -2,   6,   6,  -2, -16, -30,
        -16,   4,  14,  18,  18,  14,   4, -16,
        -10,   8,  20,  26,  26,  20,   8, -10,
        -10,  10,  22,  28,  28,  22,  10, -10,
        -16,   6,  16,  24,  24,  16,   6, -16,
        -30, -14,   0,   8,   8,   0, -14, -30,
        -54, -34, -22, -16, -16, -22, -34, -54,
    ],
    [ // bishop
        -22, -10, -12, -14, -14, -12, -10, -22,
         -6,  10,   6,   0,   0,   6,  10,  -6,
         -4,  10,  10,   8,   8,  10,  10,  -4,
         -2,   8,  12,  16,  16,  12,   8,  -2,
         -2,   8,  12,  16,  16,  12,   8,  -2,
         -4,   6,  10,   8,   8,  10,   6,  -4,
         -8,   4,   2,   0,   0,   2,   4,  -8,
        -20, -10, -12, -14, -14, -12, -10, -20,
    ],
    [ // rook
         -8,  -4,   2,   6,   6,   2,  -4,  -8,
        -10,  -4,   0,   4,   4,   0,  -4, -10,
        -10,  -4,   0,   4,   4,   0,  -4, -10,
        -10,  -4,   0,   4,   4,   0,  -4, -10,
         -8,  -2,   2,   6,   6,   2,  -2,  -8,
         -6,   0,   4,   8,   8,   4,   0,  -6,
          8,  14,  16,  18,  18,  16,  14,   8,
          0,   4,   6,   8,   8,   6,   4,   0,
    ],
    [ // queen
        -14,  -8,  -6,  -2,  -2,  -6,  -8, -14,
         -8,  -2,   2,   4,   4,   2,  -2,  -8,
         -6,   2,   6,   8,   8,   6,   2,  -6,
         -2,   4,   8,  10,  10,   8,   4,  -2,
         -2,   4,   8,  10,  10,   8,   4,  -2,
         -6,   2,   6,   8,   8,   6,   2,  -6,
         -8,  -2,   2,   4,   4,   2,  -2,  -8,
        -14,  -8,  -6,  -2,  -2,  -6,  -8, -14,
    ],
    [ // king
         30,  42,  18,  -8,  -8,  18,  42,  30,
         24,  28,   4, -18, -18,   4,  28,  24,
        -10, -16, -28, -40, -40, -28, -16, -10,
        -28, -34, -44, -56, -56, -44, -34, -28,
        -38, -44, -56, -68, -68, -56, -44, -38,
        -44, -52, -62, -74, -74, -62, -52, -44,
        -48, -56, -66, -78, -78, -66, -56, -48,
        -52, -60, -70, -82, -82, -70, -60, -52,
    ],
];

#[rustfmt::skip]
const EG_BONUS: [[i32; 64]; 6] = [
    [ // pawn
          0,   0,   0,   0,   0,   0,   0,   0,
          2,   2,   2,   2,   2,   2,   2,   2,
          4,   4,   4,   4,   4,   4,   4,   4,
         10,  10,  10,  10,  10,  10,  10,  10,
         22,  22,  22,  22,  22,  22,  22,  22,
         48,  48,  48,  48,  48,  48,  48,  48,
         94,  94,  94,  94,  94,  94,  94,  94,
          0,   0,   0,   0,   0,   0,   0,   0,
    ],
    [ // knight
        -40, -28, -18, -12, -12, -18, -28, -40,
        -26, -12,  -2,   4,   4,  -2, -12, -26,
        -16,   0,  10,  16,  16,  10,   0, -16,
        -10,   6,  16,  22,  22,  16,   6, -10,
        -10,   6,  16,  22,  22,  16,   6, -10,
        -16,   0,  10,  16,  16,  10,   0, -16,
        -26, -12,  -2,   4,   4,  -2, -12, -26,
        -40, -28, -18, -12, -12, -18, -28, -40,
    ],
    [ // bishop
        -18,  -8,  -6,  -4,  -4,  -6,  -8, -18,
         -8,   0,   4,   6,   6,   4,   0,  -8,
         -6,   4,   8,  10,  10,   8,   4,  -6,
         -4,   6,  10,  14,  14,  10,   6,  -4,
         -4,   6,  10,  14,  14,  10,   6,  -4,
         -6,   4,   8,  10,  10,   8,   4,  -6,
         -8,   0,   4,   6,   6,   4,   0,  -8,
        -18,  -8,  -6,  -4,  -4,  -6,  -8, -18,
    ],
    [ // rook
         -4,  -2,   0,   0,   0,   0,  -2,  -4,
         -4,  -2,   0,   0,   0,   0,  -2,  -4,
         -4,  -2,   0,   0,   0,   0,  -2,  -4,
         -2,   0,   2,   2,   2,   2,   0,  -2,
          0,   2,   4,   4,   4,   4,   2,   0,
          2,   4,   6,   6,   6,   6,   4,   2,
          8,  10,  12,  12,  12,  12,  10,   8,
          4,   6,   8,   8,   8,   8,   6,   4,
    ],
    [ // queen
        -20, -12,  -8,  -4,  -4,  -8, -12, -20,
        -12,  -4,   0,   4,   4,   0,  -4, -12,
         -8,   0,   8,  12,  12,   8,   0,  -8,
         -4,   4,  12,  18,  18,  12,   4,  -4,
         -4,   4,  12,  18,  18,  12,   4,  -4,
         -8,   0,   8,  12,  12,   8,   0,  -8,
        -12,  -4,   0,   4,   4,   0,  -4, -12,
        -20, -12,  -8,  -4,  -4,  -8, -12, -20,
    ],
    [ // king
        -60, -40, -30, -24, -24, -30, -40, -60,
        -36, -18,  -8,  -2,  -2,  -8, -18, -36,
        -24,  -6,  10,  16,  16,  10,  -6, -24,
        -18,   2,  18,  28,  28,  18,   2, -18,
        -14,   6,  22,  32,  32,  22,   6, -14,
        -14,   6,  20,  28,  28,  20,   6, -14,
        -22,  -8,   6,  12,  12,   6,  -8, -22,
        -48, -30, -20, -14, -14, -20, -30, -48,
    ],
];

/// Midgame piece-square values, piece value included.
pub static MG_TABLE: Lazy<[[i32; 64]; 6]> = Lazy::new(|| {
    let mut table = [[0; 64]; 6];
    for role in 0..6 {
        for sq in 0..64 {
            table[role][sq] = PIECE_VALUE_MG[role] + MG_BONUS[role][sq];
        }
    }
    table
});

/// Endgame piece-square values, piece value included.
pub static EG_TABLE: Lazy<[[i32; 64]; 6]> = Lazy::new(|| {
    let mut table = [[0; 64]; 6];
    for role in 0..6 {
        for sq in 0..64 {
            table[role][sq] = PIECE_VALUE_EG[role] + EG_BONUS[role][sq];
        }
    }
    table
});

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tables_are_symmetric_about_the_center_files() {
        for role in 0..6 {
            for sq in 0..64 {
                let mirrored = sq ^ 7;
                assert_eq!(MG_BONUS[role][sq], MG_BONUS[role][mirrored]);
                assert_eq!(EG_BONUS[role][sq], EG_BONUS[role][mirrored]);
            }
        }
    }

    #[test]
    fn pawn_bonuses_vanish_on_the_back_ranks() {
        for sq in 0..8 {
            assert_eq!(MG_BONUS[0][sq], 0);
            assert_eq!(MG_BONUS[0][sq + 56], 0);
        }
    }
}

use crate::chess::Position;
use crate::search::RootMove;
use std::path::{Path, PathBuf};

/// A win/draw/loss verdict from the tablebases, from the side to move's
/// point of view.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[repr(i8)]
pub enum Wdl {
    Loss = -2,
    BlessedLoss = -1,
    Draw = 0,
    CursedWin = 1,
    Win = 2,
}

/// The outcome of a tablebase probe.
///
/// A failed probe is not an error; the search silently ignores it and
/// proceeds on its own.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ProbeState {
    Fail,
    Ok,
}

/// The Syzygy tablebases.
///
/// Decoding the `.rtbw`/`.rtbz` files themselves is not supported; paths
/// are remembered and inspected, but every probe reports [`ProbeState::Fail`]
/// until a backing decoder is wired in, and the search degrades gracefully.
#[derive(Debug, Default)]
pub struct Tablebase {
    paths: Vec<PathBuf>,
    max_pieces: usize,
}

impl Tablebase {
    /// Initializes the tablebase from the files found under `path`.
    pub fn new(path: &Path) -> Self {
        let mut tablebase = Tablebase::default();
        tablebase.load(path);
        tablebase
    }

    /// Scans a directory for tablebase files.
    pub fn load(&mut self, path: &Path) {
        if let Ok(dir) = std::fs::read_dir(path) {
            for entry in dir.flatten() {
                let path = entry.path();
                if path.extension().is_some_and(|e| e == "rtbw") {
                    self.paths.push(path);
                }
            }
        }
    }

    /// The largest number of pieces covered by the loaded tables.
    #[inline(always)]
    pub fn max_pieces(&self) -> usize {
        self.max_pieces
    }

    /// Probes the win/draw/loss tables for this position.
    #[inline(always)]
    pub fn probe_wdl(&self, pos: &Position) -> Option<Wdl> {
        let _ = pos;
        match self.probe_state() {
            ProbeState::Fail => None,
            ProbeState::Ok => Some(Wdl::Draw),
        }
    }

    /// Ranks the root moves using the distance-to-zero tables.
    ///
    /// Returns whether the root position was found in the tables.
    pub fn rank_root_moves(&self, pos: &Position, moves: &mut [RootMove]) -> bool {
        let _ = (pos, moves);
        self.probe_state() == ProbeState::Ok
    }

    #[inline(always)]
    fn probe_state(&self) -> ProbeState {
        if self.max_pieces == 0 {
            ProbeState::Fail
        } else {
            ProbeState::Ok
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn probes_fail_without_tables() {
        let tb = Tablebase::default();
        assert_eq!(tb.max_pieces(), 0);
        assert_eq!(tb.probe_wdl(&Position::default()), None);
    }

    #[test]
    fn ranking_fails_without_tables() {
        let tb = Tablebase::default();
        let mut moves = Vec::new();
        assert!(!tb.rank_root_moves(&Position::default(), &mut moves));
    }

    #[test]
    fn missing_directory_loads_nothing() {
        let tb = Tablebase::new(Path::new("/nonexistent/syzygy"));
        assert_eq!(tb.max_pieces(), 0);
    }

    #[test]
    fn wdl_orders_from_loss_to_win() {
        assert!(Wdl::Loss < Wdl::BlessedLoss);
        assert!(Wdl::BlessedLoss < Wdl::Draw);
        assert!(Wdl::Draw < Wdl::CursedWin);
        assert!(Wdl::CursedWin < Wdl::Win);
    }
}

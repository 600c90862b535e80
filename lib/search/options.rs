use std::path::PathBuf;

/// How contempt behaves when analysing.
#[derive(Debug, Default, Copy, Clone, Eq, PartialEq)]
pub enum AnalysisContempt {
    Off,
    #[default]
    Both,
    White,
    Black,
}

/// Engine configuration, set through the UCI `setoption` command.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Options {
    /// Transposition table size, in MiB.
    pub hash: usize,
    /// Number of search threads.
    pub threads: usize,
    /// Number of principal variations to report.
    pub multi_pv: usize,
    /// Contempt, in centipawns.
    pub contempt: i32,
    pub analysis_contempt: AnalysisContempt,
    /// Strength handicap; 20 disables.
    pub skill_level: i32,
    pub limit_strength: bool,
    pub elo: i32,
    pub analyse_mode: bool,
    pub show_wdl: bool,
    pub ponder: bool,
    /// Time reserved per move for I/O latency, in milliseconds.
    pub move_overhead: u64,
    pub syzygy_path: Option<PathBuf>,
    pub syzygy_probe_depth: i32,
    pub syzygy_probe_limit: usize,
    pub syzygy_50_move_rule: bool,
}

impl Default for Options {
    fn default() -> Self {
        Options {
            hash: 16,
            threads: 1,
            multi_pv: 1,
            contempt: 24,
            analysis_contempt: AnalysisContempt::Both,
            skill_level: 20,
            limit_strength: false,
            elo: 1350,
            analyse_mode: false,
            show_wdl: false,
            ponder: false,
            move_overhead: 10,
            syzygy_path: None,
            syzygy_probe_depth: 1,
            syzygy_probe_limit: 7,
            syzygy_50_move_rule: true,
        }
    }
}

impl Options {
    /// Clamps values to their supported ranges.
    pub fn sanitize(mut self) -> Self {
        self.hash = self.hash.clamp(1, 1 << 20);
        self.threads = self.threads.clamp(1, 512);
        self.multi_pv = self.multi_pv.clamp(1, 254);
        self.contempt = self.contempt.clamp(-100, 100);
        self.skill_level = self.skill_level.clamp(0, 20);
        self.elo = self.elo.clamp(1350, 2850);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let options = Options::default().sanitize();
        assert_eq!(options, Options::default());
    }

    #[test]
    fn sanitize_clamps_out_of_range_values() {
        let options = Options {
            hash: 0,
            threads: 0,
            multi_pv: 1000,
            ..Options::default()
        };

        let options = options.sanitize();
        assert_eq!(options.hash, 1);
        assert_eq!(options.threads, 1);
        assert_eq!(options.multi_pv, 254);
    }
}

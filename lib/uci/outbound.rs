use crate::chess::Move;
use crate::eval::{Value, PIECE_VALUE_EG};
use crate::search::{Bound, Info, Options};
use std::fmt::{self, Display, Formatter};

/// A message sent to the GUI.
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    UciOk,
    ReadyOk,
    Info(Info),
    BestMove {
        best: Option<Move>,
        ponder: Option<Move>,
    },
}

impl From<Info> for Outbound {
    fn from(info: Info) -> Self {
        Outbound::Info(info)
    }
}

fn score(f: &mut Formatter<'_>, v: Value) -> fmt::Result {
    if v.get().abs() < Value::MATE_IN_MAX_PLY.get() {
        let cp = v.get() * 100 / PIECE_VALUE_EG[0];
        write!(f, "score cp {cp}")
    } else if v > Value::ZERO {
        write!(f, "score mate {}", (Value::MATE.get() - v.get() + 1) / 2)
    } else {
        write!(f, "score mate {}", (-Value::MATE.get() - v.get()) / 2)
    }
}

impl Display for Outbound {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Outbound::ReadyOk => f.write_str("readyok"),

            Outbound::BestMove { best: None, .. } => f.write_str("bestmove 0000"),

            Outbound::BestMove {
                best: Some(best),
                ponder,
            } => {
                write!(f, "bestmove {best}")?;
                if let Some(ponder) = ponder {
                    write!(f, " ponder {ponder}")?;
                }

                Ok(())
            }

            Outbound::Info(info) => {
                write!(
                    f,
                    "info depth {} seldepth {} multipv {} ",
                    info.depth, info.sel_depth, info.multipv
                )?;

                score(f, info.score)?;

                if let Some((w, d, l)) = info.wdl {
                    write!(f, " wdl {w} {d} {l}")?;
                }

                match info.bound {
                    Some(Bound::Lower) => f.write_str(" lowerbound")?,
                    Some(Bound::Upper) => f.write_str(" upperbound")?,
                    _ => {}
                }

                write!(
                    f,
                    " nodes {} nps {}",
                    info.nodes, info.nps
                )?;

                if let Some(hashfull) = info.hashfull {
                    write!(f, " hashfull {hashfull}")?;
                }

                write!(
                    f,
                    " tbhits {} time {}",
                    info.tb_hits,
                    info.time.as_millis()
                )?;

                if !info.pv.is_empty() {
                    f.write_str(" pv")?;
                    for m in &info.pv {
                        write!(f, " {m}")?;
                    }
                }

                Ok(())
            }

            Outbound::UciOk => {
                let defaults = Options::default();

                writeln!(f, "id name Ember {}", env!("CARGO_PKG_VERSION"))?;
                writeln!(f, "id author the Ember developers")?;
                writeln!(
                    f,
                    "option name Hash type spin default {} min 1 max 1048576",
                    defaults.hash
                )?;
                writeln!(
                    f,
                    "option name Threads type spin default {} min 1 max 512",
                    defaults.threads
                )?;
                writeln!(
                    f,
                    "option name MultiPV type spin default {} min 1 max 254",
                    defaults.multi_pv
                )?;
                writeln!(
                    f,
                    "option name Contempt type spin default {} min -100 max 100",
                    defaults.contempt
                )?;
                writeln!(
                    f,
                    "option name Analysis Contempt type combo default Both var Off var White var Black var Both"
                )?;
                writeln!(
                    f,
                    "option name Skill Level type spin default {} min 0 max 20",
                    defaults.skill_level
                )?;
                writeln!(f, "option name UCI_LimitStrength type check default false")?;
                writeln!(
                    f,
                    "option name UCI_Elo type spin default {} min 1350 max 2850",
                    defaults.elo
                )?;
                writeln!(f, "option name UCI_AnalyseMode type check default false")?;
                writeln!(f, "option name UCI_ShowWDL type check default false")?;
                writeln!(f, "option name Ponder type check default false")?;
                writeln!(
                    f,
                    "option name Move Overhead type spin default {} min 0 max 5000",
                    defaults.move_overhead
                )?;
                writeln!(f, "option name SyzygyPath type string default <empty>")?;
                writeln!(
                    f,
                    "option name SyzygyProbeDepth type spin default {} min 1 max 100",
                    defaults.syzygy_probe_depth
                )?;
                writeln!(
                    f,
                    "option name SyzygyProbeLimit type spin default {} min 0 max 7",
                    defaults.syzygy_probe_limit
                )?;
                writeln!(f, "option name Syzygy50MoveRule type check default true")?;

                f.write_str("uciok")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chess::Square;
    use std::time::Duration;

    fn info(v: i32) -> Info {
        Info {
            depth: 8,
            sel_depth: 12,
            multipv: 1,
            score: Value::new(v),
            bound: None,
            wdl: None,
            nodes: 5000,
            nps: 100_000,
            hashfull: None,
            tb_hits: 0,
            time: Duration::from_millis(50),
            pv: vec![Move::regular(Square::E2, Square::E4, None)],
        }
    }

    #[test]
    fn info_lines_carry_the_standard_fields() {
        let line = Outbound::Info(info(206)).to_string();
        assert!(line.starts_with("info depth 8 seldepth 12 multipv 1 score cp 100"));
        assert!(line.contains("nodes 5000"));
        assert!(line.contains("nps 100000"));
        assert!(line.contains("tbhits 0"));
        assert!(line.contains("time 50"));
        assert!(line.ends_with("pv e2e4"));
    }

    #[test]
    fn mate_scores_are_reported_in_moves() {
        let line = Outbound::Info(info(Value::mate_in(1).get())).to_string();
        assert!(line.contains("score mate 1"), "{line}");

        let line = Outbound::Info(info(Value::mated_in(2).get())).to_string();
        assert!(line.contains("score mate -1"), "{line}");
    }

    #[test]
    fn bounds_are_annotated() {
        let mut i = info(10);
        i.bound = Some(Bound::Lower);
        assert!(Outbound::Info(i).to_string().contains(" lowerbound"));
    }

    #[test]
    fn bestmove_prints_ponder_when_available() {
        let best = Move::regular(Square::E2, Square::E4, None);
        let ponder = Move::regular(Square::E7, Square::E5, None);

        let line = Outbound::BestMove {
            best: Some(best),
            ponder: Some(ponder),
        }
        .to_string();

        assert_eq!(line, "bestmove e2e4 ponder e7e5");

        let line = Outbound::BestMove {
            best: None,
            ponder: None,
        }
        .to_string();

        assert_eq!(line, "bestmove 0000");
    }

    #[test]
    fn uciok_lists_the_options() {
        let banner = Outbound::UciOk.to_string();
        assert!(banner.contains("option name MultiPV"));
        assert!(banner.contains("option name Skill Level"));
        assert!(banner.contains("option name SyzygyPath"));
        assert!(banner.ends_with("uciok"));
    }
}

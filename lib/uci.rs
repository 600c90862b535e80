mod inbound;
mod outbound;
mod parser;

pub use inbound::*;
pub use outbound::*;

use crate::chess::{Color, Position};
use crate::search::{AnalysisContempt, Engine, Info, Limits};
use futures::{prelude::*, select_biased as select, stream::FusedStream};
use std::time::Instant;

/// A basic UCI server.
#[derive(Debug)]
pub struct Uci<I, O> {
    input: I,
    output: O,
    engine: Engine,
    pos: Position,
}

impl<I, O> Uci<I, O> {
    /// Constructs a new UCI server instance.
    pub fn new(input: I, output: O) -> Self {
        Self {
            input,
            output,
            engine: Engine::new(),
            pos: Position::default(),
        }
    }

    fn apply_option(&mut self, name: &str, value: Option<&str>) {
        if name.eq_ignore_ascii_case("clear hash") {
            self.engine.clear();
            return;
        }

        let mut options = self.engine.options.clone();
        let value = value.unwrap_or_default();

        let parsed = match name {
            "Hash" => value.parse().map(|v| options.hash = v).is_ok(),
            "Threads" => value.parse().map(|v| options.threads = v).is_ok(),
            "MultiPV" => value.parse().map(|v| options.multi_pv = v).is_ok(),
            "Contempt" => value.parse().map(|v| options.contempt = v).is_ok(),
            "Analysis Contempt" => {
                options.analysis_contempt = match value {
                    "Off" => AnalysisContempt::Off,
                    "White" => AnalysisContempt::White,
                    "Black" => AnalysisContempt::Black,
                    _ => AnalysisContempt::Both,
                };
                true
            }
            "Skill Level" => value.parse().map(|v| options.skill_level = v).is_ok(),
            "UCI_LimitStrength" => {
                options.limit_strength = value == "true";
                true
            }
            "UCI_Elo" => value.parse().map(|v| options.elo = v).is_ok(),
            "UCI_AnalyseMode" => {
                options.analyse_mode = value == "true";
                true
            }
            "UCI_ShowWDL" => {
                options.show_wdl = value == "true";
                true
            }
            "Ponder" => {
                options.ponder = value == "true";
                true
            }
            "Move Overhead" => value.parse().map(|v| options.move_overhead = v).is_ok(),
            "SyzygyPath" => {
                options.syzygy_path = (!value.is_empty() && value != "<empty>")
                    .then(|| value.into());
                true
            }
            "SyzygyProbeDepth" => value
                .parse()
                .map(|v| options.syzygy_probe_depth = v)
                .is_ok(),
            "SyzygyProbeLimit" => value
                .parse()
                .map(|v| options.syzygy_probe_limit = v)
                .is_ok(),
            "Syzygy50MoveRule" => {
                options.syzygy_50_move_rule = value == "true";
                true
            }
            _ => false,
        };

        if parsed {
            self.engine.set_options(options);
        }
    }

    fn limits(&self, go: &Go) -> Limits {
        let clock = match self.pos.turn() {
            Color::White => Option::zip(go.wtime, go.winc.or(Some(Default::default()))),
            Color::Black => Option::zip(go.btime, go.binc.or(Some(Default::default()))),
        };

        Limits {
            depth: go.depth,
            nodes: go.nodes,
            movetime: go.movetime,
            mate: go.mate,
            clock,
            movestogo: go.movestogo,
            infinite: go.infinite,
            ponder: go.ponder,
            searchmoves: go.searchmoves.clone(),
        }
    }
}

impl<I, O> Uci<I, O>
where
    I: FusedStream<Item = Inbound> + Unpin,
    O: Sink<Outbound> + Unpin,
{
    /// Runs the UCI server.
    pub async fn run(&mut self) -> Result<(), O::Error> {
        'quit: while let Some(inbound) = self.input.next().await {
            match inbound {
                Inbound::Position(pos) => self.pos = *pos,

                Inbound::UciNewGame => {
                    self.pos = Position::default();
                    self.engine.clear();
                }

                Inbound::Go(go) => {
                    let limits = self.limits(&go);
                    let mut search = self.engine.search(&self.pos, limits);
                    let mut stopped = false;

                    loop {
                        select! {
                            info = search.next() => match info {
                                Some(info) => self.output.send(info.into()).await?,
                                None => break,
                            },

                            inbound = self.input.next() => match inbound {
                                None => continue,
                                Some(Inbound::Quit) => break 'quit,
                                Some(Inbound::Stop) => {
                                    search.stop();
                                    stopped = true;
                                }
                                Some(Inbound::PonderHit) => search.ponderhit(),
                                _ => {}
                            }
                        }
                    }

                    // In infinite or ponder mode the best move must wait
                    // for an explicit signal from the GUI.
                    while search.waits_for_stop() && !stopped {
                        match self.input.next().await {
                            None | Some(Inbound::Stop) => stopped = true,
                            Some(Inbound::Quit) => break 'quit,
                            Some(Inbound::PonderHit) => search.ponderhit(),
                            _ => {}
                        }
                    }

                    let conclusion = search.conclude();
                    if let Some(info) = conclusion.info {
                        self.output.send(info.into()).await?;
                    }

                    self.output
                        .send(Outbound::BestMove {
                            best: conclusion.best,
                            ponder: conclusion.ponder,
                        })
                        .await?;
                }

                Inbound::Perft(plies) => {
                    let timer = Instant::now();
                    let nodes = self.pos.perft(plies);
                    let time = timer.elapsed();

                    let info = Info {
                        depth: plies as i32,
                        sel_depth: plies as i32,
                        multipv: 1,
                        score: Default::default(),
                        bound: None,
                        wdl: None,
                        nodes,
                        nps: (nodes as f64 / time.as_secs_f64().max(1e-6)) as u64,
                        hashfull: None,
                        tb_hits: 0,
                        time,
                        pv: Vec::new(),
                    };

                    self.output.send(info.into()).await?;
                }

                Inbound::SetOption { name, value } => {
                    self.apply_option(&name, value.as_deref());
                }

                Inbound::IsReady => self.output.send(Outbound::ReadyOk).await?,
                Inbound::Uci => self.output.send(Outbound::UciOk).await?,
                Inbound::Quit => break 'quit,
                Inbound::Stop | Inbound::PonderHit => continue,
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::executor::block_on;
    use std::collections::VecDeque;
    use std::pin::Pin;
    use std::task::{Context, Poll};

    #[derive(Debug, Default, Clone)]
    struct MockStream(VecDeque<Inbound>);

    impl MockStream {
        fn new<T: IntoIterator<Item = Inbound>>(items: T) -> Self {
            Self(VecDeque::from_iter(items))
        }
    }

    impl Stream for MockStream {
        type Item = Inbound;

        fn poll_next(mut self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<Option<Self::Item>> {
            Poll::Ready(self.0.pop_front())
        }
    }

    impl FusedStream for MockStream {
        fn is_terminated(&self) -> bool {
            self.0.is_empty()
        }
    }

    type MockUci = Uci<MockStream, Vec<Outbound>>;

    fn uci<T: IntoIterator<Item = Inbound>>(items: T) -> MockUci {
        Uci::new(MockStream::new(items), Vec::new())
    }

    #[test]
    fn handles_uci() {
        let mut uci = uci([Inbound::Uci]);
        block_on(uci.run()).unwrap();
        assert_eq!(uci.output, vec![Outbound::UciOk]);
    }

    #[test]
    fn handles_ready() {
        let mut uci = uci([Inbound::IsReady]);
        block_on(uci.run()).unwrap();
        assert_eq!(uci.output, vec![Outbound::ReadyOk]);
    }

    #[test]
    fn handles_position() {
        let pos: Position = "4k3/8/8/8/8/8/4P3/4K3 w - - 0 1".parse().unwrap();
        let mut uci = uci([Inbound::Position(Box::new(pos.clone()))]);
        block_on(uci.run()).unwrap();
        assert_eq!(uci.pos, pos);
        assert!(uci.output.is_empty());
    }

    #[test]
    fn handles_go_depth() {
        let mut uci = uci([Inbound::Go(Box::new(Go {
            depth: Some(2),
            ..Go::default()
        }))]);

        block_on(uci.run()).unwrap();
        assert!(matches!(
            uci.output.last(),
            Some(Outbound::BestMove { best: Some(_), .. })
        ));
    }

    #[test]
    fn handles_go_nodes() {
        let mut uci = uci([Inbound::Go(Box::new(Go {
            nodes: Some(500),
            ..Go::default()
        }))]);

        block_on(uci.run()).unwrap();
        assert!(matches!(
            uci.output.last(),
            Some(Outbound::BestMove { best: Some(_), .. })
        ));
    }

    #[test]
    fn handles_stop_during_infinite_search() {
        let mut uci = uci([Inbound::go_infinite(), Inbound::Stop]);
        block_on(uci.run()).unwrap();
        assert!(matches!(
            uci.output.last(),
            Some(Outbound::BestMove { best: Some(_), .. })
        ));
    }

    #[test]
    fn handles_quit_during_search() {
        let mut uci = uci([Inbound::go_infinite(), Inbound::Quit]);
        block_on(uci.run()).unwrap();
    }

    #[test]
    fn handles_perft() {
        let mut uci = uci([Inbound::Perft(3)]);
        block_on(uci.run()).unwrap();

        let Some(Outbound::Info(info)) = uci.output.last() else {
            panic!("expected an info record");
        };

        assert_eq!(info.nodes, 8902);
    }

    #[test]
    fn handles_new_game() {
        let mut uci = uci([Inbound::UciNewGame]);
        block_on(uci.run()).unwrap();
        assert_eq!(uci.pos, Position::default());
        assert!(uci.output.is_empty());
    }

    #[test]
    fn handles_options() {
        let mut uci = uci([
            Inbound::SetOption {
                name: "MultiPV".to_string(),
                value: Some("4".to_string()),
            },
            Inbound::SetOption {
                name: "Skill Level".to_string(),
                value: Some("10".to_string()),
            },
        ]);

        block_on(uci.run()).unwrap();
        assert_eq!(uci.engine.options.multi_pv, 4);
        assert_eq!(uci.engine.options.skill_level, 10);
    }

    #[test]
    fn go_mate_reports_the_mate() {
        let pos: Position = "6k1/5ppp/8/8/8/8/5PPP/R5K1 w - - 0 1".parse().unwrap();

        let mut uci = uci([
            Inbound::Position(Box::new(pos)),
            Inbound::Go(Box::new(Go {
                mate: Some(1),
                depth: Some(4),
                ..Go::default()
            })),
        ]);

        block_on(uci.run()).unwrap();

        let infos: Vec<_> = uci
            .output
            .iter()
            .filter_map(|o| match o {
                Outbound::Info(i) => Some(i.to_owned()),
                _ => None,
            })
            .collect();

        assert!(infos
            .last()
            .is_some_and(|i| i.score == crate::eval::Value::mate_in(1)));

        assert!(matches!(
            uci.output.last(),
            Some(Outbound::BestMove { best: Some(_), .. })
        ));
    }
}

use crate::chess::{Move, Position};
use crate::search::Depth;
use crate::uci::parser::*;
use derive_more::with_trait::{Display, Error};
use nom::branch::alt;
use nom::bytes::complete::tag;
use nom::character::complete::multispace1;
use nom::combinator::{eof, opt, rest};
use nom::multi::many0;
use nom::sequence::preceded;
use nom::Parser;
use std::time::Duration;

/// The `go` command parameters.
#[derive(Debug, Default, Clone, Eq, PartialEq)]
pub struct Go {
    pub depth: Option<Depth>,
    pub nodes: Option<u64>,
    pub movetime: Option<Duration>,
    pub mate: Option<u32>,
    pub wtime: Option<Duration>,
    pub btime: Option<Duration>,
    pub winc: Option<Duration>,
    pub binc: Option<Duration>,
    pub movestogo: Option<u32>,
    pub infinite: bool,
    pub ponder: bool,
    pub searchmoves: Vec<Move>,
}

/// A command received from the GUI.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum Inbound {
    Uci,
    IsReady,
    UciNewGame,
    Position(Box<Position>),
    Go(Box<Go>),
    Stop,
    PonderHit,
    Perft(u8),
    SetOption { name: String, value: Option<String> },
    Quit,
}

impl Inbound {
    /// An unbounded `go`.
    pub fn go_infinite() -> Self {
        Inbound::Go(Box::new(Go {
            infinite: true,
            ..Go::default()
        }))
    }
}

/// The reason why parsing a UCI command failed.
#[derive(Debug, Display, Clone, Eq, PartialEq, Error)]
#[display("failed to parse uci command `{_0}`")]
pub struct ParseUciError(#[error(not(source))] pub String);

/// Parses commands received from the GUI.
///
/// Move tokens are resolved against the legal moves of the position they
/// apply to, so only reachable positions ever leave this parser.
#[derive(Debug, Default, Clone)]
pub struct UciParser {
    position: Position,
}

impl UciParser {
    pub fn parse(&mut self, input: &str) -> Result<Inbound, ParseUciError> {
        let err = || ParseUciError(input.to_string());
        let input = input.trim();

        let simple = [
            ("ucinewgame", Inbound::UciNewGame),
            ("uci", Inbound::Uci),
            ("isready", Inbound::IsReady),
            ("ponderhit", Inbound::PonderHit),
            ("stop", Inbound::Stop),
            ("quit", Inbound::Quit),
        ];

        for (token, inbound) in simple {
            if input == token {
                return Ok(inbound);
            }
        }

        if let Ok(("", position)) = self.position(input) {
            self.position = position.clone();
            return Ok(Inbound::Position(Box::new(position)));
        }

        if let Ok(("", go)) = self.go(input) {
            return Ok(Inbound::Go(Box::new(go)));
        }

        if let Ok(("", plies)) = field("perft", t(int)).parse(input) {
            return Ok(Inbound::Perft(plies.clamp(0, 10) as u8));
        }

        if let Some(rest) = input.strip_prefix("setoption") {
            return Self::set_option(rest).ok_or_else(err);
        }

        Err(err())
    }

    fn set_option(input: &str) -> Option<Inbound> {
        let rest = input.trim().strip_prefix("name")?.trim();

        let (name, value) = match rest.split_once(" value ") {
            None => (rest, None),
            Some((name, value)) => (name, Some(value.trim().to_string())),
        };

        Some(Inbound::SetOption {
            name: name.trim().to_string(),
            value,
        })
    }

    fn position<'s>(&self, input: &'s str) -> nom::IResult<&'s str, Position> {
        let (rest, _) = t(tag("position")).parse(input)?;

        let (rest, mut position) = alt((
            t(tag("startpos")).map(|_| Position::default()),
            field(
                "fen",
                nom::combinator::map_res(
                    nom::bytes::complete::take_till(|c| c == 'm').map(str::trim),
                    |fen: &str| fen.parse::<Position>(),
                ),
            ),
        ))
        .parse(rest)?;

        let (rest, moves) = opt(preceded(
            t(tag("moves")),
            many0(preceded(opt(multispace1), word)),
        ))
        .parse(rest)?;

        for token in moves.unwrap_or_default() {
            match position.moves().into_iter().find(|m| m.to_string() == token) {
                None => {
                    return Err(nom::Err::Failure(nom::error::Error::new(
                        rest,
                        nom::error::ErrorKind::Verify,
                    )))
                }
                Some(m) => {
                    position.play(m);
                }
            }
        }

        let (rest, _) = eof.parse(rest.trim_start())?;
        Ok((rest, position))
    }

    fn go<'s>(&self, input: &'s str) -> nom::IResult<&'s str, Go> {
        let (mut rest, _) = t(tag("go")).parse(input)?;

        let mut go = Go::default();

        loop {
            if rest.trim().is_empty() {
                return Ok(("", go));
            }

            if let Ok((r, d)) = field("depth", t(int)).parse(rest) {
                go.depth = Some(d.clamp(1, i64::from(crate::search::MAX_PLY - 1)) as Depth);
                rest = r;
            } else if let Ok((r, n)) = field("nodes", t(int)).parse(rest) {
                go.nodes = Some(n.max(0) as u64);
                rest = r;
            } else if let Ok((r, d)) = field("movetime", t(millis)).parse(rest) {
                go.movetime = Some(d);
                rest = r;
            } else if let Ok((r, m)) = field("mate", t(int)).parse(rest) {
                go.mate = Some(m.max(0) as u32);
                rest = r;
            } else if let Ok((r, d)) = field("wtime", t(millis)).parse(rest) {
                go.wtime = Some(d);
                rest = r;
            } else if let Ok((r, d)) = field("btime", t(millis)).parse(rest) {
                go.btime = Some(d);
                rest = r;
            } else if let Ok((r, d)) = field("winc", t(millis)).parse(rest) {
                go.winc = Some(d);
                rest = r;
            } else if let Ok((r, d)) = field("binc", t(millis)).parse(rest) {
                go.binc = Some(d);
                rest = r;
            } else if let Ok((r, m)) = field("movestogo", t(int)).parse(rest) {
                go.movestogo = Some(m.max(1) as u32);
                rest = r;
            } else if let Ok((r, _)) = {
                let infinite: nom::IResult<&str, &str> = t(tag("infinite")).parse(rest);
                infinite
            } {
                go.infinite = true;
                rest = r;
            } else if let Ok((r, _)) = {
                let ponder: nom::IResult<&str, &str> = t(tag("ponder")).parse(rest);
                ponder
            } {
                go.ponder = true;
                rest = r;
            } else if let Ok((r, _)) = {
                let searchmoves: nom::IResult<&str, &str> = t(tag("searchmoves")).parse(rest);
                searchmoves
            } {
                let (r, tokens) = many0(preceded(opt(multispace1), word)).parse(r)?;
                for token in tokens {
                    match self
                        .position
                        .moves()
                        .into_iter()
                        .find(|m| m.to_string() == token)
                    {
                        None => break,
                        Some(m) => go.searchmoves.push(m),
                    }
                }

                rest = r;
            } else {
                // Ignore unknown tokens, per protocol custom.
                let (r, _) = preceded(opt(multispace1), rest_or_word).parse(rest)?;
                rest = r;
            }
        }
    }
}

fn rest_or_word(input: &str) -> nom::IResult<&str, &str> {
    alt((word, rest)).parse(input)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chess::Square;

    #[test]
    fn parses_simple_commands() {
        let mut parser = UciParser::default();
        assert_eq!(parser.parse("uci"), Ok(Inbound::Uci));
        assert_eq!(parser.parse("isready"), Ok(Inbound::IsReady));
        assert_eq!(parser.parse("ucinewgame"), Ok(Inbound::UciNewGame));
        assert_eq!(parser.parse("stop"), Ok(Inbound::Stop));
        assert_eq!(parser.parse("ponderhit"), Ok(Inbound::PonderHit));
        assert_eq!(parser.parse("quit"), Ok(Inbound::Quit));
    }

    #[test]
    fn parses_startpos_with_moves() {
        let mut parser = UciParser::default();
        let inbound = parser.parse("position startpos moves e2e4 e7e5").unwrap();

        let Inbound::Position(pos) = inbound else {
            panic!("expected a position");
        };

        assert_eq!(pos.role_on(Square::E4), Some(crate::chess::Role::Pawn));
        assert_eq!(pos.role_on(Square::E5), Some(crate::chess::Role::Pawn));
    }

    #[test]
    fn parses_fen_positions() {
        let mut parser = UciParser::default();
        let inbound = parser
            .parse("position fen 4k3/8/8/8/8/8/4P3/4K3 w - - 0 1")
            .unwrap();

        let Inbound::Position(pos) = inbound else {
            panic!("expected a position");
        };

        assert_eq!(pos.to_string(), "4k3/8/8/8/8/8/4P3/4K3 w - - 0 1");
    }

    #[test]
    fn rejects_illegal_moves() {
        let mut parser = UciParser::default();
        assert!(parser.parse("position startpos moves e2e5").is_err());
    }

    #[test]
    fn parses_go_parameters() {
        let mut parser = UciParser::default();
        let inbound = parser
            .parse("go depth 8 nodes 1000 movetime 250 mate 3")
            .unwrap();

        let Inbound::Go(go) = inbound else {
            panic!("expected go");
        };

        assert_eq!(go.depth, Some(8));
        assert_eq!(go.nodes, Some(1000));
        assert_eq!(go.movetime, Some(Duration::from_millis(250)));
        assert_eq!(go.mate, Some(3));
    }

    #[test]
    fn parses_clock_parameters() {
        let mut parser = UciParser::default();
        let inbound = parser
            .parse("go wtime 60000 btime 60000 winc 1000 binc 1000 movestogo 40")
            .unwrap();

        let Inbound::Go(go) = inbound else {
            panic!("expected go");
        };

        assert_eq!(go.wtime, Some(Duration::from_secs(60)));
        assert_eq!(go.movestogo, Some(40));
        assert!(!go.infinite);
    }

    #[test]
    fn parses_searchmoves_against_the_current_position() {
        let mut parser = UciParser::default();
        parser.parse("position startpos").unwrap();
        let inbound = parser.parse("go infinite searchmoves e2e4 d2d4").unwrap();

        let Inbound::Go(go) = inbound else {
            panic!("expected go");
        };

        assert!(go.infinite);
        assert_eq!(go.searchmoves.len(), 2);
    }

    #[test]
    fn parses_setoption() {
        let mut parser = UciParser::default();
        assert_eq!(
            parser.parse("setoption name MultiPV value 4"),
            Ok(Inbound::SetOption {
                name: "MultiPV".to_string(),
                value: Some("4".to_string()),
            })
        );

        assert_eq!(
            parser.parse("setoption name Clear Hash"),
            Ok(Inbound::SetOption {
                name: "Clear Hash".to_string(),
                value: None,
            })
        );
    }

    #[test]
    fn rejects_garbage() {
        let mut parser = UciParser::default();
        assert!(parser.parse("gibberish").is_err());
    }
}

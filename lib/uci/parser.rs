use nom::branch::alt;
use nom::bytes::complete::{tag, take_till1};
use nom::character::complete::{digit1, multispace0};
use nom::combinator::{map_res, opt, recognize};
use nom::error::Error;
use nom::sequence::{delimited, preceded};
use nom::{IResult, Parser};
use std::time::Duration;

pub fn int(input: &str) -> IResult<&str, i64> {
    map_res(
        recognize((opt(alt((tag("-"), tag("+")))), digit1)),
        |s: &str| s.parse(),
    )
    .parse(input)
}

pub fn millis(input: &str) -> IResult<&str, Duration> {
    int.map(|i| Duration::from_millis(i.max(0) as u64))
        .parse(input)
}

pub fn word(input: &str) -> IResult<&str, &str> {
    take_till1(char::is_whitespace).parse(input)
}

/// Trims surrounding whitespace.
pub fn t<'s, O, F>(inner: F) -> impl Parser<&'s str, Output = O, Error = Error<&'s str>>
where
    F: Parser<&'s str, Output = O, Error = Error<&'s str>>,
{
    delimited(multispace0, inner, multispace0)
}

/// A `key value` field.
pub fn field<'s, O, V>(
    key: &'static str,
    value: V,
) -> impl Parser<&'s str, Output = O, Error = Error<&'s str>>
where
    V: Parser<&'s str, Output = O, Error = Error<&'s str>>,
{
    preceded(t(tag(key)), value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_signed_integers() {
        assert_eq!(int("42"), Ok(("", 42)));
        assert_eq!(int("-17 rest"), Ok((" rest", -17)));
        assert!(int("x").is_err());
    }

    #[test]
    fn parses_millisecond_durations() {
        assert_eq!(millis("1500"), Ok(("", Duration::from_millis(1500))));
        assert_eq!(millis("-5"), Ok(("", Duration::ZERO)));
    }

    #[test]
    fn words_stop_at_whitespace() {
        assert_eq!(word("e2e4 e7e5"), Ok((" e7e5", "e2e4")));
    }

    #[test]
    fn fields_pair_keys_with_values() {
        let mut depth = field("depth", t(int));
        assert_eq!(depth.parse("depth 8"), Ok(("", 8)));
    }
}

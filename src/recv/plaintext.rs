//! Graphite plaintext protocol: `<path> <value> <timestamp>`.

use std::str::{self, FromStr};

use nom::bytes::complete::take_till1;
use nom::character::complete::{char, digit0, digit1, space0, space1};
use nom::combinator::{all_consuming, map_res, opt, verify};
use nom::number::complete::double;
use nom::sequence::{pair, preceded, terminated, tuple};
use nom::IResult;
use string_cache::DefaultAtom as Atom;

use super::super::metric::Point;

#[derive(Debug, PartialEq)]
pub struct ParseError {
    description: String,
}

impl ParseError {
    pub fn description(&self) -> &str {
        &self.description
    }
}

/// Parse a single line, without its trailing newline.
pub fn parse_line(i: &[u8]) -> Result<Point, ParseError> {
    match all_consuming(line)(i) {
        Ok((_, point)) => Ok(point),
        Err(err) => Err(ParseError {
            description: format!("{:?}", err.map_input(String::from_utf8_lossy)),
        }),
    }
}

/// Iterate over the non-empty lines of a payload.
pub fn lines(payload: &[u8]) -> impl Iterator<Item = &[u8]> {
    payload
        .split(|&c| c == b'\n')
        .filter(|line| !line.iter().all(u8::is_ascii_whitespace))
}

fn line(i: &[u8]) -> IResult<&[u8], Point> {
    let (i, (name, value, timestamp)) = terminated(
        tuple((
            metric_name,
            preceded(space1, value),
            preceded(space1, timestamp),
        )),
        pair(space0, opt(char('\r'))),
    )(i)?;

    Ok((i, Point { name: Atom::from(name), value, timestamp }))
}

fn metric_name(i: &[u8]) -> IResult<&[u8], &str> {
    map_res(
        take_till1(|c: u8| c.is_ascii_whitespace()),
        str::from_utf8,
    )(i)
}

fn value(i: &[u8]) -> IResult<&[u8], f64> {
    verify(double, |v: &f64| v.is_finite())(i)
}

// Fractional seconds are accepted and truncated.
fn timestamp(i: &[u8]) -> IResult<&[u8], u32> {
    terminated(
        map_res(map_res(digit1, str::from_utf8), u32::from_str),
        opt(pair(char('.'), digit0)),
    )(i)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point(name: &str, value: f64, timestamp: u32) -> Point {
        Point::new(name, value, timestamp)
    }

    #[test]
    fn it_parses_metric_names() {
        assert_eq!(metric_name(&b"foo"[..]), Ok((&b""[..], "foo")));
        assert_eq!(metric_name(&b"foo.bar 1"[..]), Ok((&b" 1"[..], "foo.bar")));
        assert_eq!(
            metric_name(&b"foo;env=prod 1"[..]),
            Ok((&b" 1"[..], "foo;env=prod"))
        );
        assert!(metric_name(&b" foo"[..]).is_err());
    }

    #[test]
    fn it_parses_values() {
        assert_eq!(value(&b"23"[..]), Ok((&b""[..], 23.0)));
        assert_eq!(value(&b"2.5"[..]), Ok((&b""[..], 2.5)));
        assert_eq!(value(&b"-2"[..]), Ok((&b""[..], -2.0)));
        assert_eq!(value(&b"1e3"[..]), Ok((&b""[..], 1000.0)));
        assert!(value(&b"abc"[..]).is_err());
    }

    #[test]
    fn it_rejects_non_finite_values() {
        assert!(parse_line(b"foo nan 1").is_err());
        assert!(parse_line(b"foo inf 1").is_err());
    }

    #[test]
    fn it_parses_timestamps() {
        assert_eq!(timestamp(&b"1500000000"[..]), Ok((&b""[..], 1_500_000_000)));
        assert_eq!(timestamp(&b"1500000000.75"[..]), Ok((&b""[..], 1_500_000_000)));
        assert!(timestamp(&b"-1"[..]).is_err());
        assert!(timestamp(&b"99999999999"[..]).is_err());
    }

    #[test]
    fn it_parses_lines() {
        assert_eq!(
            parse_line(b"foo.bar_baz 12 1500000000"),
            Ok(point("foo.bar_baz", 12.0, 1_500_000_000))
        );
        assert_eq!(
            parse_line(b"foo\t-0.5  1500000000 \r"),
            Ok(point("foo", -0.5, 1_500_000_000))
        );
    }

    #[test]
    fn it_rejects_malformed_lines() {
        assert!(parse_line(b"").is_err());
        assert!(parse_line(b"foo").is_err());
        assert!(parse_line(b"foo 1").is_err());
        assert!(parse_line(b"foo 1 2 3").is_err());
        assert!(parse_line(b"foo bar 2").is_err());
        assert!(parse_line(b"\xff\xfe 1 2").is_err());
    }

    #[test]
    fn it_splits_payloads_into_lines() {
        let lines: Vec<&[u8]> = lines(b"a 1 2\n\nb 3 4\r\n  \n").collect();
        assert_eq!(lines, vec![&b"a 1 2"[..], &b"b 3 4\r"[..]]);
    }
}

use std::{fmt::Debug, str::FromStr};

use winnow::{
    ascii::space0,
    bytes::take_till1,
    multi::many0,
    sequence::preceded,
    stream::{AsChar, Stream, StreamIsPartial},
    IResult, Parser,
};

/// Takes any amount of winnow parsers and returns a parser that parses them in sequence,
/// separated by any amount of whitespace.
#[macro_export]
macro_rules! ws_separated {
    ($($t:expr),+) => {
        {
            winnow::sequence::terminated(
                (
                    $(
                        winnow::sequence::preceded(
                            winnow::ascii::space0,
                            $t
                        )
                    ),+
                ),
                winnow::ascii::space0)
                .context(concat!("ws_separated!(", stringify!($($t),+), ")"))
        }
    };
}

pub fn non_ws<I>(i: I) -> IResult<I, I::Slice>
where
    I: StreamIsPartial + Stream,
    <I as Stream>::Token: AsChar,
{
    take_till1(|x: <I as Stream>::Token| "\r\n\t ".contains(x.as_char()))
        .context("non_ws")
        .parse_next(i)
}

pub fn word<I>(i: I) -> IResult<I, I::Slice>
where
    I: StreamIsPartial + Stream,
    <I as Stream>::Token: AsChar + Copy,
{
    preceded(space0, non_ws).parse_next(i)
}

pub fn from_str<I, T: FromStr>(i: I, context: impl Debug + Clone) -> IResult<I, T>
where
    I: StreamIsPartial + Stream,
    <I as Stream>::Token: AsChar + Copy,
    <I as Stream>::Slice: AsRef<str>,
{
    non_ws
        .try_map(|x: I::Slice| x.as_ref().parse::<T>())
        .context(context)
        .parse_next(i)
}

macro_rules! from_str_impl {
    ($($t:ident),+) => {
        $(pub fn $t<I>(i: I) -> IResult<I, $t>
        where
            I: StreamIsPartial + Stream,
            <I as Stream>::Token: AsChar + Copy,
            <I as Stream>::Slice: AsRef<str>,
        {
            from_str(i, stringify!($t))
        })+
    };
}

from_str_impl!(f64, i64, u64, usize);

/// Splits a line into its whitespace separated tokens.
pub fn words(line: &str) -> Vec<&str> {
    many0(word)
        .parse_next(line)
        .map(|(_, words)| words)
        .unwrap_or_default()
}

/// Runs `parser` on a complete line, failing if anything but whitespace is left over.
pub fn parse_line<'a, O>(
    line: &'a str,
    mut parser: impl Parser<&'a str, O, winnow::error::Error<&'a str>>,
) -> Result<O, String> {
    match parser.parse_next(line) {
        Ok((rest, o)) if rest.trim().is_empty() => Ok(o),
        Ok((rest, _)) => Err(format!("unexpected trailing input '{}'", rest.trim())),
        Err(err) => Err(format!("could not parse '{}': {:?}", line.trim(), err)),
    }
}

//! Whitespace rules of RFC 3261 §25.1

use nom::{
    branch::alt,
    bytes::complete::tag,
    combinator::{opt, recognize},
    multi::{many0, many1},
    sequence::pair,
};

use super::ParseResult;

/// SP or HTAB
pub fn wsp(input: &[u8]) -> ParseResult<&[u8]> {
    recognize(alt((tag(" "), tag("\t"))))(input)
}

/// Zero or more SP/HTAB
pub fn owsp(input: &[u8]) -> ParseResult<&[u8]> {
    recognize(many0(wsp))(input)
}

/// CRLF, or a bare LF as sent by sloppy peers
pub fn crlf(input: &[u8]) -> ParseResult<&[u8]> {
    alt((tag("\r\n"), tag("\n")))(input)
}

/// LWS = [*WSP CRLF] 1*WSP
pub fn lws(input: &[u8]) -> ParseResult<&[u8]> {
    alt((
        recognize(pair(pair(owsp, crlf), many1(wsp))),
        recognize(many1(wsp)),
    ))(input)
}

/// SWS = [LWS]
pub fn sws(input: &[u8]) -> ParseResult<&[u8]> {
    opt(lws)(input).map(|(rest, ws)| (rest, ws.unwrap_or(&[])))
}

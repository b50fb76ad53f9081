//! Separators with their surrounding optional whitespace (RFC 3261 §25.1)

use nom::{
    bytes::complete::{tag, take_while},
    combinator::recognize,
    sequence::{pair, tuple},
};

use super::ParseResult;
use super::whitespace::sws;

/// HCOLON = *( SP / HTAB ) ":" SWS
pub fn hcolon(input: &[u8]) -> ParseResult<&[u8]> {
    recognize(tuple((
        take_while(|c: u8| c == b' ' || c == b'\t'),
        tag(":"),
        sws,
    )))(input)
}

pub fn semi(input: &[u8]) -> ParseResult<&[u8]> {
    recognize(tuple((sws, tag(";"), sws)))(input)
}

pub fn comma(input: &[u8]) -> ParseResult<&[u8]> {
    recognize(tuple((sws, tag(","), sws)))(input)
}

pub fn equal(input: &[u8]) -> ParseResult<&[u8]> {
    recognize(tuple((sws, tag("="), sws)))(input)
}

pub fn slash(input: &[u8]) -> ParseResult<&[u8]> {
    recognize(tuple((sws, tag("/"), sws)))(input)
}

/// LAQUOT = SWS "<"
pub fn laquot(input: &[u8]) -> ParseResult<&[u8]> {
    recognize(pair(sws, tag("<")))(input)
}

/// RAQUOT = ">" SWS
pub fn raquot(input: &[u8]) -> ParseResult<&[u8]> {
    recognize(pair(tag(">"), sws))(input)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hcolon_allows_space_before_colon() {
        let (rest, _) = hcolon(b" \t:  value").unwrap();
        assert_eq!(rest, b"value");
    }

    #[test]
    fn test_comma_and_semi() {
        assert_eq!(comma(b" , next").unwrap().0, b"next");
        assert_eq!(semi(b";lr").unwrap().0, b"lr");
        assert!(semi(b"lr").is_err());
    }
}

//! Header parameters (`generic-param`, RFC 3261 §25.1)

use nom::{
    branch::alt,
    bytes::complete::take_while,
    combinator::{map, opt},
    multi::many0,
    sequence::{pair, preceded},
};

use super::ParseResult;
use super::separators::{equal, semi};
use super::token::{is_token_char, quoted_string, token};
use crate::types::param::Param;

/// Value characters: token, plus the host characters `received` and
/// `maddr` carry (IPv6 references included)
fn is_value_char(c: u8) -> bool {
    is_token_char(c) || c == b'[' || c == b']' || c == b':'
}

/// generic-param = token [ EQUAL gen-value ]
pub fn generic_param(input: &[u8]) -> ParseResult<Param> {
    let gen_value = alt((
        quoted_string,
        map(take_while(is_value_char), |raw: &[u8]| {
            String::from_utf8_lossy(raw).into_owned()
        }),
    ));
    map(pair(token, opt(preceded(equal, gen_value))), |(name, value)| Param {
        name: String::from_utf8_lossy(name).into_owned(),
        value,
    })(input)
}

/// *( SEMI generic-param )
pub fn semicolon_params0(input: &[u8]) -> ParseResult<Vec<Param>> {
    many0(preceded(semi, generic_param))(input)
}

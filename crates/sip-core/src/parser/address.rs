//! name-addr / addr-spec values of From, To, Contact, Route and Record-Route
//!
//! ```text
//! name-addr    = [ display-name ] LAQUOT addr-spec RAQUOT
//! display-name = *(token LWS) / quoted-string
//! ```

use nom::{
    branch::alt,
    bytes::complete::take_till,
    combinator::map,
    sequence::{delimited, pair},
};

use super::params::semicolon_params0;
use super::separators::{laquot, raquot};
use super::token::quoted_string;
use super::uri::{uri, uri_base};
use super::{ParseResult, complete};
use crate::error::{Error, Result};
use crate::types::address::Address;
use crate::types::param::Param;

fn display_name(input: &[u8]) -> ParseResult<Option<String>> {
    alt((
        map(quoted_string, Some),
        map(take_till(|c: u8| c == b'<' || c == b'"'), |raw: &[u8]| {
            let name = String::from_utf8_lossy(raw).trim().to_string();
            (!name.is_empty()).then_some(name)
        }),
    ))(input)
}

pub fn name_addr(input: &[u8]) -> ParseResult<Address> {
    map(
        pair(display_name, delimited(laquot, uri, raquot)),
        |(display_name, uri)| Address {
            display_name,
            uri,
            params: Vec::new(),
        },
    )(input)
}

/// name-addr or addr-spec, followed by header parameters
pub fn address(input: &[u8]) -> ParseResult<Address> {
    map(
        pair(alt((name_addr, map(uri_base, Address::new))), semicolon_params0),
        |(mut address, params): (Address, Vec<Param>)| {
            address.params = params;
            address
        },
    )(input)
}

pub fn parse_address(s: &str) -> Result<Address> {
    complete(s.as_bytes(), address)
        .map_err(|near| Error::Parse(format!("invalid name-addr '{}': {}", s.trim(), near)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_display_name() {
        let (rest, addr) = address(b"Bob Smith <sip:bob@biloxi.example.com>;tag=a6, <sip:x@y>").unwrap();
        assert_eq!(addr.display_name.as_deref(), Some("Bob Smith"));
        assert_eq!(addr.tag(), Some("a6"));
        assert_eq!(rest, b", <sip:x@y>");
    }

    #[test]
    fn test_quoted_display_name_with_brackets() {
        let addr = parse_address("\"<Alice>\" <sip:alice@atlanta.example.com>").unwrap();
        assert_eq!(addr.display_name.as_deref(), Some("<Alice>"));
        assert_eq!(addr.uri.host, "atlanta.example.com");
    }

    #[test]
    fn test_unterminated_name_addr() {
        assert!(parse_address("<sip:alice@atlanta.example.com").is_err());
        assert!(parse_address("Alice").is_err());
    }
}

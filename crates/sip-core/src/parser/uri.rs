//! SIP, SIPS and TEL URIs (RFC 3261 §19.1, RFC 3966)
//!
//! ```text
//! SIP-URI   = "sip:" [ userinfo ] hostport uri-parameters [ headers ]
//! hostport  = host [ ":" port ]
//! host      = hostname / IPv4address / IPv6reference
//! ```

use std::str;

use nom::{
    branch::alt,
    bytes::complete::{tag, tag_no_case, take_while, take_while1},
    character::complete::digit1,
    combinator::{map, map_res, opt, recognize, value},
    multi::many0,
    sequence::{delimited, pair, preceded, terminated},
};

use super::{ParseResult, complete};
use crate::error::{Error, Result};
use crate::types::param::Param;
use crate::types::uri::{Scheme, Uri};

fn is_unreserved(c: u8) -> bool {
    c.is_ascii_alphanumeric() || b"-_.!~*'()".contains(&c)
}

/// unreserved, escaped, user-unreserved and the password colon.
/// The comma is left out so addr-spec lists split cleanly.
fn is_userinfo_char(c: u8) -> bool {
    is_unreserved(c) || b"%&=+$;?/:".contains(&c)
}

fn is_hostname_char(c: u8) -> bool {
    c.is_ascii_alphanumeric() || c == b'-' || c == b'.' || c == b'_'
}

/// paramchar = param-unreserved / unreserved / escaped
fn is_param_char(c: u8) -> bool {
    is_unreserved(c) || b"%[]/:&+$".contains(&c)
}

fn is_tel_char(c: u8) -> bool {
    is_unreserved(c) || b"+#%".contains(&c)
}

fn to_string(raw: &[u8]) -> std::result::Result<String, str::Utf8Error> {
    str::from_utf8(raw).map(str::to_string)
}

fn scheme(input: &[u8]) -> ParseResult<Scheme> {
    alt((
        value(Scheme::Sips, tag_no_case("sips:")),
        value(Scheme::Sip, tag_no_case("sip:")),
        value(Scheme::Tel, tag_no_case("tel:")),
    ))(input)
}

/// userinfo = ( user / telephone-subscriber ) [ ":" password ] "@"
fn userinfo(input: &[u8]) -> ParseResult<String> {
    map_res(terminated(take_while1(is_userinfo_char), tag("@")), to_string)(input)
}

/// IPv6reference = "[" IPv6address "]", brackets kept
fn ipv6_reference(input: &[u8]) -> ParseResult<&[u8]> {
    recognize(delimited(
        tag("["),
        take_while1(|c: u8| c.is_ascii_hexdigit() || c == b':' || c == b'.'),
        tag("]"),
    ))(input)
}

pub fn host(input: &[u8]) -> ParseResult<String> {
    map_res(alt((ipv6_reference, take_while1(is_hostname_char))), to_string)(input)
}

pub fn port(input: &[u8]) -> ParseResult<u16> {
    map_res(map_res(digit1, str::from_utf8), str::parse::<u16>)(input)
}

pub fn hostport(input: &[u8]) -> ParseResult<(String, Option<u16>)> {
    pair(host, opt(preceded(tag(":"), port)))(input)
}

fn uri_param(input: &[u8]) -> ParseResult<Param> {
    map(
        pair(
            take_while1(is_param_char),
            opt(preceded(tag("="), take_while(is_param_char))),
        ),
        |(name, value): (&[u8], Option<&[u8]>)| Param {
            name: String::from_utf8_lossy(name).into_owned(),
            value: value.map(|v| String::from_utf8_lossy(v).into_owned()),
        },
    )(input)
}

fn uri_headers(input: &[u8]) -> ParseResult<Option<String>> {
    opt(preceded(
        tag("?"),
        map_res(
            take_while1(|c: u8| !c.is_ascii_whitespace() && c != b'>' && c != b','),
            to_string,
        ),
    ))(input)
}

/// Scheme, user and hostport without parameters. Outside angle brackets
/// the `;params` that follow belong to the header, not the URI.
pub fn uri_base(input: &[u8]) -> ParseResult<Uri> {
    let (input, scheme) = scheme(input)?;
    if scheme == Scheme::Tel {
        let (input, number) = map_res(take_while1(is_tel_char), to_string)(input)?;
        let mut uri = Uri::sip(number);
        uri.scheme = Scheme::Tel;
        return Ok((input, uri));
    }
    let (input, user) = opt(userinfo)(input)?;
    let (input, (host, port)) = hostport(input)?;
    let mut uri = Uri::sip(host);
    uri.scheme = scheme;
    uri.user = user;
    uri.port = port;
    Ok((input, uri))
}

/// A complete URI with its parameters and headers
pub fn uri(input: &[u8]) -> ParseResult<Uri> {
    let (input, mut uri) = uri_base(input)?;
    let (input, params) = many0(preceded(tag(";"), uri_param))(input)?;
    let (input, headers) = uri_headers(input)?;
    uri.params = params;
    uri.headers = headers;
    Ok((input, uri))
}

pub fn parse_uri(s: &str) -> Result<Uri> {
    complete(s.as_bytes(), uri).map_err(|_| Error::InvalidUri(s.trim().to_string()))
}

/// `host[:port]` as used for Via sent-by
pub fn parse_host_port(s: &str) -> Result<(String, Option<u16>)> {
    complete(s.as_bytes(), hostport).map_err(|_| Error::InvalidUri(s.trim().to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uri_stops_at_closing_bracket() {
        let (rest, uri) = uri(b"sip:bob@192.0.2.4:5070;transport=tcp?subject=x>;tag=1").unwrap();
        assert_eq!(rest, b">;tag=1");
        assert_eq!(uri.user.as_deref(), Some("bob"));
        assert_eq!(uri.port, Some(5070));
        assert_eq!(uri.headers.as_deref(), Some("subject=x"));
    }

    #[test]
    fn test_userinfo_is_optional() {
        let (rest, uri) = uri(b"sip:p1.example.com;lr, <sip:p2>").unwrap();
        assert_eq!(rest, b", <sip:p2>");
        assert_eq!(uri.user, None);
        assert!(uri.is_loose_route());
    }

    #[test]
    fn test_tel_uri() {
        let uri = parse_uri("tel:+1-201-555-0123;phone-context=example.com").unwrap();
        assert_eq!(uri.scheme, Scheme::Tel);
        assert_eq!(uri.host, "+1-201-555-0123");
        assert!(uri.param("phone-context").is_some());
    }

    #[test]
    fn test_host_port() {
        assert_eq!(
            parse_host_port("[2001:db8::1]:5062").unwrap(),
            ("[2001:db8::1]".to_string(), Some(5062))
        );
        assert_eq!(parse_host_port("pc33.example.com").unwrap().1, None);
        assert!(parse_host_port("pc33.example.com:abc").is_err());
        assert!(parse_host_port("host:70000").is_err());
    }
}

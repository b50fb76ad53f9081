//! Typed header values
//!
//! One header line may carry several comma-separated elements for the list
//! headers (Via, Contact, Route, Record-Route); each becomes its own
//! [`TypedHeader`]. Headers the engine does not inspect are kept as text.

use std::str::{self, FromStr};

use nom::{
    branch::alt,
    bytes::complete::{tag, take_while1},
    character::complete::digit1,
    combinator::{map, map_res, rest, value},
    multi::{separated_list0, separated_list1},
    sequence::{separated_pair, terminated, tuple},
};

use super::address::address;
use super::separators::comma;
use super::token::token_str;
use super::via::via_parm;
use super::whitespace::lws;
use super::{ParseResult, complete};
use crate::error::{Error, Result};
use crate::types::address::Address;
use crate::types::cseq::{CSeq, RAck};
use crate::types::header::{HeaderName, TypedHeader};
use crate::types::method::Method;

fn number<T: FromStr>(input: &[u8]) -> ParseResult<T> {
    map_res(map_res(digit1, str::from_utf8), T::from_str)(input)
}

fn method(input: &[u8]) -> ParseResult<Method> {
    map_res(token_str, Method::from_str)(input)
}

/// CSeq = 1*DIGIT LWS Method
fn cseq(input: &[u8]) -> ParseResult<CSeq> {
    map(separated_pair(number::<u32>, lws, method), |(seq, method)| {
        CSeq::new(seq, method)
    })(input)
}

/// RAck = response-num LWS CSeq-num LWS Method
fn rack(input: &[u8]) -> ParseResult<RAck> {
    map(
        tuple((number::<u32>, lws, number::<u32>, lws, method)),
        |(rseq, _, cseq, _, method)| RAck::new(rseq, cseq, method),
    )(input)
}

/// Delta seconds, with any comment or parameters after them ignored
fn delta_seconds(input: &[u8]) -> ParseResult<u32> {
    terminated(number::<u32>, rest)(input)
}

fn token_list(input: &[u8]) -> ParseResult<Vec<String>> {
    separated_list0(comma, map(token_str, str::to_string))(input)
}

fn call_id(input: &[u8]) -> ParseResult<String> {
    map_res(take_while1(|c: u8| !c.is_ascii_whitespace()), |raw: &[u8]| {
        str::from_utf8(raw).map(str::to_string)
    })(input)
}

fn contact(input: &[u8]) -> ParseResult<Vec<TypedHeader>> {
    alt((
        value(
            vec![TypedHeader::Other(HeaderName::Contact, "*".to_string())],
            tag("*"),
        ),
        map(separated_list1(comma, address), |list: Vec<Address>| {
            list.into_iter().map(TypedHeader::Contact).collect()
        }),
    ))(input)
}

fn raw_text(value: &[u8]) -> String {
    String::from_utf8_lossy(value).trim().to_string()
}

/// Parses the (unfolded) value of one header line
pub fn parse_header_value(name: &HeaderName, value: &[u8]) -> Result<Vec<TypedHeader>> {
    let invalid = |near: String| Error::invalid_header(name.as_str(), near);
    let one = |header: TypedHeader| vec![header];

    let headers = match name {
        HeaderName::Via => complete(value, separated_list1(comma, via_parm))
            .map(|vias| vias.into_iter().map(TypedHeader::Via).collect::<Vec<_>>()),
        HeaderName::From => complete(value, address).map(TypedHeader::From).map(one),
        HeaderName::To => complete(value, address).map(TypedHeader::To).map(one),
        HeaderName::CallId => complete(value, call_id).map(TypedHeader::CallId).map(one),
        HeaderName::CSeq => complete(value, cseq).map(TypedHeader::CSeq).map(one),
        HeaderName::Contact => complete(value, contact),
        HeaderName::Route => complete(value, separated_list1(comma, address))
            .map(|list| list.into_iter().map(TypedHeader::Route).collect::<Vec<_>>()),
        HeaderName::RecordRoute => complete(value, separated_list1(comma, address))
            .map(|list| list.into_iter().map(TypedHeader::RecordRoute).collect::<Vec<_>>()),
        HeaderName::MaxForwards => complete(value, number::<u8>)
            .map(TypedHeader::MaxForwards)
            .map(one),
        HeaderName::ContentLength => complete(value, number::<u32>)
            .map(TypedHeader::ContentLength)
            .map(one),
        HeaderName::RSeq => complete(value, number::<u32>).map(TypedHeader::RSeq).map(one),
        HeaderName::RAck => complete(value, rack).map(TypedHeader::RAck).map(one),
        HeaderName::RetryAfter => complete(value, delta_seconds)
            .map(TypedHeader::RetryAfter)
            .map(one),
        HeaderName::Require => complete(value, token_list).map(TypedHeader::Require).map(one),
        HeaderName::Supported => complete(value, token_list)
            .map(TypedHeader::Supported)
            .map(one),
        HeaderName::ContentType => Ok(one(TypedHeader::ContentType(raw_text(value)))),
        HeaderName::Event => Ok(one(TypedHeader::Event(raw_text(value)))),
        other => Ok(one(TypedHeader::Other(other.clone(), raw_text(value)))),
    };
    headers.map_err(invalid)
}

pub fn parse_cseq(s: &str) -> Result<CSeq> {
    complete(s.as_bytes(), cseq).map_err(|near| Error::invalid_header("CSeq", near))
}

pub fn parse_rack(s: &str) -> Result<RAck> {
    complete(s.as_bytes(), rack).map_err(|near| Error::invalid_header("RAck", near))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_list_headers_split_into_entries() {
        let headers = parse_header_value(
            &HeaderName::Contact,
            b"\"Alice, A.\" <sip:alice@pc33>;expires=60 , <sip:alice@192.0.2.1>",
        )
        .unwrap();
        assert_eq!(headers.len(), 2);
        match &headers[0] {
            TypedHeader::Contact(addr) => {
                assert_eq!(addr.display_name.as_deref(), Some("Alice, A."));
                assert_eq!(addr.param("expires").and_then(|p| p.value.as_deref()), Some("60"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_numeric_headers() {
        let h = parse_header_value(&HeaderName::RetryAfter, b"120 (in a meeting);duration=60").unwrap();
        assert_eq!(h, vec![TypedHeader::RetryAfter(120)]);
        assert!(parse_header_value(&HeaderName::MaxForwards, b"256").is_err());
        assert!(parse_header_value(&HeaderName::ContentLength, b"-1").is_err());
    }

    #[test]
    fn test_cseq_and_rack() {
        assert_eq!(parse_cseq(" 4711   INVITE ").unwrap(), CSeq::new(4711, Method::Invite));
        assert!(parse_cseq("4711").is_err());
        assert_eq!(parse_rack("776656 1 INVITE").unwrap().rseq, 776656);
        assert!(parse_rack("1 INVITE").is_err());
    }

    #[test]
    fn test_unknown_header_kept_verbatim() {
        let name = HeaderName::Other("Subject".to_string());
        let h = parse_header_value(&name, b"  Lunch, tomorrow ").unwrap();
        assert_eq!(h, vec![TypedHeader::Other(name, "Lunch, tomorrow".to_string())]);
    }
}

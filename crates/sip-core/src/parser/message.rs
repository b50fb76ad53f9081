//! Start lines, header section and body framing (RFC 3261 §7)
//!
//! ```text
//! Request-Line = Method SP Request-URI SP SIP-Version CRLF
//! Status-Line  = SIP-Version SP Status-Code SP Reason-Phrase CRLF
//! ```

use std::str::{self, FromStr};

use bytes::Bytes;
use nom::{
    branch::alt,
    bytes::complete::{tag_no_case, take_till, take_while1, take_while_m_n},
    character::complete::space1,
    combinator::{map, map_res, opt, recognize},
    multi::many0,
    sequence::{pair, preceded, separated_pair, terminated, tuple},
};

use super::headers::parse_header_value;
use super::separators::hcolon;
use super::token::token_str;
use super::uri::uri;
use super::utils::unfold_lws;
use super::whitespace::{crlf, wsp};
use super::{ParseResult, describe};
use crate::error::{Error, Result};
use crate::types::header::{HeaderName, TypedHeader};
use crate::types::header_access::HeaderAccess;
use crate::types::method::Method;
use crate::types::sip_message::Message;
use crate::types::sip_request::Request;
use crate::types::sip_response::Response;
use crate::types::status::StatusCode;
use crate::types::uri::Uri;

enum StartLine {
    Request(Method, Uri),
    Status(StatusCode, String),
}

fn sip_version(input: &[u8]) -> ParseResult<&[u8]> {
    tag_no_case("SIP/2.0")(input)
}

fn request_line(input: &[u8]) -> ParseResult<StartLine> {
    map(
        tuple((
            map_res(token_str, Method::from_str),
            space1,
            uri,
            space1,
            sip_version,
            crlf,
        )),
        |(method, _, uri, _, _, _)| StartLine::Request(method, uri),
    )(input)
}

fn status_code(input: &[u8]) -> ParseResult<StatusCode> {
    map_res(
        map_res(
            map_res(take_while_m_n(3, 3, |c: u8| c.is_ascii_digit()), str::from_utf8),
            str::parse::<u16>,
        ),
        StatusCode::from_u16,
    )(input)
}

/// The reason phrase may be empty, and so may the space before it
fn status_line(input: &[u8]) -> ParseResult<StartLine> {
    map(
        tuple((
            sip_version,
            space1,
            status_code,
            opt(space1),
            take_till(|c: u8| c == b'\r' || c == b'\n'),
            crlf,
        )),
        |(_, _, status, _, reason, _)| {
            StartLine::Status(status, String::from_utf8_lossy(reason).trim().to_string())
        },
    )(input)
}

fn header_name(input: &[u8]) -> ParseResult<HeaderName> {
    map_res(token_str, HeaderName::from_str)(input)
}

/// Raw value up to the end of the logical line, folds included
fn header_value(input: &[u8]) -> ParseResult<&[u8]> {
    recognize(many0(alt((
        take_while1(|c: u8| c != b'\r' && c != b'\n'),
        recognize(pair(crlf, wsp)),
    ))))(input)
}

fn header_line(input: &[u8]) -> ParseResult<(HeaderName, &[u8])> {
    terminated(separated_pair(header_name, hcolon, header_value), crlf)(input)
}

/// Leading CRLFs (keep-alives) are skipped; the header section ends at the
/// first empty line.
fn message_head(input: &[u8]) -> ParseResult<(StartLine, Vec<(HeaderName, &[u8])>)> {
    preceded(
        many0(crlf),
        terminated(
            pair(alt((status_line, request_line)), many0(header_line)),
            crlf,
        ),
    )(input)
}

fn slice_body(rest: &[u8], headers: &[TypedHeader]) -> Result<Bytes> {
    let declared = headers.iter().find_map(|h| match h {
        TypedHeader::ContentLength(n) => Some(*n as usize),
        _ => None,
    });
    match declared {
        Some(len) if len > rest.len() => Err(Error::Parse(format!(
            "Content-Length {} exceeds available {} bytes",
            len,
            rest.len()
        ))),
        Some(len) => Ok(Bytes::copy_from_slice(&rest[..len])),
        None => Ok(Bytes::copy_from_slice(rest)),
    }
}

/// Parses a complete SIP message
pub fn parse_message(data: &[u8]) -> Result<Message> {
    let (body, (start_line, raw_headers)) =
        message_head(data).map_err(|e| Error::Parse(format!("malformed message: {}", describe(e))))?;

    let mut headers = Vec::with_capacity(raw_headers.len());
    for (name, value) in raw_headers {
        headers.extend(parse_header_value(&name, &unfold_lws(value))?);
    }
    let body = slice_body(body, &headers)?;

    match start_line {
        StartLine::Request(method, uri) => {
            let mut request = Request::new(method, uri);
            request.headers = headers;
            request.body = body;
            Ok(Message::Request(request))
        }
        StartLine::Status(status, reason) => {
            let mut response = Response::new(status);
            if !reason.is_empty() && reason != status.reason_phrase() {
                response.reason = Some(reason);
            }
            response.headers = headers;
            response.body = body;
            Ok(Message::Response(response))
        }
    }
}

/// Parses and additionally checks that Via, From, To, Call-ID and CSeq are present
pub fn parse_message_strict(data: &[u8]) -> Result<Message> {
    let message = parse_message(data)?;
    message.check_mandatory_headers()?;
    if let Message::Request(request) = &message {
        let cseq = message.require_cseq()?;
        if cseq.method != request.method {
            return Err(Error::invalid_header("CSeq", "method does not match request line"));
        }
    }
    Ok(message)
}

#[cfg(test)]
mod tests {
    use super::*;

    const INVITE: &str = "INVITE sip:bob@biloxi.example.com SIP/2.0\r\n\
Via: SIP/2.0/UDP pc33.atlanta.example.com;branch=z9hG4bKnashds8, SIP/2.0/UDP p1.example.com;branch=z9hG4bK77\r\n\
Max-Forwards: 70\r\n\
To: Bob <sip:bob@biloxi.example.com>\r\n\
From: \"Alice, A.\" <sip:alice@atlanta.example.com>;tag=1928301774\r\n\
Call-ID: a84b4c76e66710\r\n\
CSeq: 314159 INVITE\r\n\
Record-Route: <sip:p2.example.com;lr>,\r\n <sip:p1.example.com;lr>\r\n\
Contact: <sip:alice@pc33.atlanta.example.com>\r\n\
Content-Type: application/sdp\r\n\
Content-Length: 4\r\n\
\r\n\
v=0\nEXTRA";

    #[test]
    fn test_parse_invite() {
        let message = parse_message(INVITE.as_bytes()).unwrap();
        let request = message.as_request().unwrap();
        assert_eq!(request.method, Method::Invite);
        assert_eq!(request.vias().len(), 2);
        assert_eq!(request.branch(), Some("z9hG4bKnashds8"));
        assert_eq!(request.from().unwrap().display_name.as_deref(), Some("Alice, A."));
        assert_eq!(request.to().unwrap().display_name.as_deref(), Some("Bob"));
        assert_eq!(request.record_routes().len(), 2);
        assert_eq!(request.max_forwards(), Some(70));
        assert_eq!(&request.body[..], b"v=0\n");
    }

    #[test]
    fn test_encode_then_parse_keeps_identity() {
        let message = parse_message(INVITE.as_bytes()).unwrap();
        let reparsed = parse_message(&message.to_bytes()).unwrap();
        assert_eq!(reparsed.branch(), message.branch());
        assert_eq!(reparsed.record_routes(), message.record_routes());
        assert_eq!(reparsed.as_request().unwrap().body, message.as_request().unwrap().body);
    }

    #[test]
    fn test_status_line_variants() {
        let custom = parse_message(b"SIP/2.0 486 Gone Fishing\r\nContent-Length: 0\r\n\r\n").unwrap();
        let custom = custom.as_response().unwrap();
        assert_eq!(custom.status, StatusCode::BusyHere);
        assert_eq!(custom.reason.as_deref(), Some("Gone Fishing"));

        let bare = parse_message(b"SIP/2.0 200\r\n\r\n").unwrap();
        assert_eq!(bare.as_response().unwrap().reason, None);

        assert!(parse_message(b"SIP/2.0 20 OK\r\n\r\n").is_err());
        assert!(parse_message(b"SIP/2.0 700 Nope\r\n\r\n").is_err());
    }

    #[test]
    fn test_malformed_framing_is_rejected() {
        // Truncated body
        let raw = "OPTIONS sip:a@b SIP/2.0\r\nContent-Length: 10\r\n\r\nabc";
        assert!(parse_message(raw.as_bytes()).is_err());
        // No blank line
        assert!(parse_message(b"OPTIONS sip:a@b SIP/2.0\r\nCall-ID: x\r\n").is_err());
        // Header line without a colon
        assert!(parse_message(b"OPTIONS sip:a@b SIP/2.0\r\nCall-ID x\r\n\r\n").is_err());
        assert!(parse_message(b"OPTIONS sip:a@b SIP/3.0\r\n\r\n").is_err());
    }

    #[test]
    fn test_strict_requires_mandatory_headers() {
        let raw = "OPTIONS sip:a@b SIP/2.0\r\nCall-ID: x\r\n\r\n";
        assert!(parse_message(raw.as_bytes()).is_ok());
        assert!(parse_message_strict(raw.as_bytes()).is_err());
    }
}

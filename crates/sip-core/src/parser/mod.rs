//! # SIP message parser
//!
//! [nom](https://docs.rs/nom) combinators for the RFC 3261 grammar, from the
//! whitespace and separator rules up to complete messages. The parser
//! accepts compact header names, bare LF line endings, folded lines and
//! comma-joined list headers, and honours Content-Length when slicing the
//! body.
//!
//! ```rust
//! use sipflow_sip_core::parse_message;
//!
//! let raw = b"SIP/2.0 180 Ringing\r\n\
//! v: SIP/2.0/UDP pc33.atlanta.example.com;branch=z9hG4bK776\r\n\
//! f: <sip:alice@atlanta.example.com>;tag=1928301774\r\n\
//! t: <sip:bob@biloxi.example.com>;tag=a6c85cf\r\n\
//! i: a84b4c76e66710\r\n\
//! CSeq: 314159 INVITE\r\n\
//! l: 0\r\n\r\n";
//!
//! let message = parse_message(raw).unwrap();
//! assert!(message.is_response());
//! ```

pub mod address;
pub mod headers;
pub mod message;
pub mod params;
pub mod separators;
pub mod token;
pub mod uri;
pub mod utils;
pub mod via;
pub mod whitespace;

use nom::{IResult, combinator::all_consuming, sequence::delimited};

pub use message::{parse_message, parse_message_strict};

use whitespace::owsp;

/// Result of every parser in this module
pub type ParseResult<'a, O> = IResult<&'a [u8], O>;

/// Short description of where a parser gave up
pub(crate) fn describe(err: nom::Err<nom::error::Error<&[u8]>>) -> String {
    match err {
        nom::Err::Incomplete(_) => "unexpected end of input".to_string(),
        nom::Err::Error(e) | nom::Err::Failure(e) if e.input.is_empty() => {
            "unexpected end of input".to_string()
        }
        nom::Err::Error(e) | nom::Err::Failure(e) => {
            let near = &e.input[..e.input.len().min(32)];
            format!("unexpected '{}'", String::from_utf8_lossy(near))
        }
    }
}

/// Runs `parser` over all of `input`, allowing surrounding whitespace
pub(crate) fn complete<'a, O, F>(input: &'a [u8], parser: F) -> Result<O, String>
where
    F: FnMut(&'a [u8]) -> ParseResult<'a, O>,
{
    all_consuming(delimited(owsp, parser, owsp))(input)
        .map(|(_, value)| value)
        .map_err(describe)
}

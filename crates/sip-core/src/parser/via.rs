//! Via header values (RFC 3261 §20.42)
//!
//! ```text
//! via-parm      = sent-protocol LWS sent-by *( SEMI via-params )
//! sent-protocol = protocol-name SLASH protocol-version SLASH transport
//! ```

use nom::{combinator::map, sequence::tuple};

use super::params::semicolon_params0;
use super::separators::slash;
use super::token::token;
use super::uri::hostport;
use super::whitespace::lws;
use super::{ParseResult, complete};
use crate::error::{Error, Result};
use crate::types::via::Via;

fn upper(raw: &[u8]) -> String {
    String::from_utf8_lossy(raw).to_ascii_uppercase()
}

fn sent_protocol(input: &[u8]) -> ParseResult<(String, String)> {
    map(
        tuple((token, slash, token, slash, token)),
        |(name, _, version, _, transport)| {
            (format!("{}/{}", upper(name), upper(version)), upper(transport))
        },
    )(input)
}

pub fn via_parm(input: &[u8]) -> ParseResult<Via> {
    map(
        tuple((sent_protocol, lws, hostport, semicolon_params0)),
        |((protocol, transport), _, (host, port), params)| Via {
            protocol,
            transport,
            host,
            port,
            params,
        },
    )(input)
}

pub fn parse_via(s: &str) -> Result<Via> {
    complete(s.as_bytes(), via_parm).map_err(|near| Error::invalid_header("Via", near))
}

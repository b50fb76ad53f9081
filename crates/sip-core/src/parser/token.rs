//! Tokens and quoted strings

use std::str;

use nom::{
    branch::alt,
    bytes::complete::{tag, take, take_while1},
    combinator::{map, map_res},
    multi::many0,
    sequence::{delimited, preceded},
};

use super::ParseResult;
use super::whitespace::sws;

/// token characters: alphanum / "-" / "." / "!" / "%" / "*" / "_" / "+" / "`" / "'" / "~"
pub fn is_token_char(c: u8) -> bool {
    c.is_ascii_alphanumeric() || b"-.!%*_+`'~".contains(&c)
}

pub fn token(input: &[u8]) -> ParseResult<&[u8]> {
    take_while1(is_token_char)(input)
}

pub fn token_str(input: &[u8]) -> ParseResult<&str> {
    map_res(token, str::from_utf8)(input)
}

/// quoted-string = SWS DQUOTE *(qdtext / quoted-pair) DQUOTE
///
/// Returns the content with quoted-pairs resolved.
pub fn quoted_string(input: &[u8]) -> ParseResult<String> {
    let chunk = alt((
        preceded(tag("\\"), take(1usize)),
        take_while1(|c: u8| c != b'"' && c != b'\\'),
    ));
    preceded(
        sws,
        map(delimited(tag("\""), many0(chunk), tag("\"")), |chunks: Vec<&[u8]>| {
            String::from_utf8_lossy(&chunks.concat()).into_owned()
        }),
    )(input)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_stops_at_separator() {
        let (rest, value) = token(b"z9hG4bK.1;rport").unwrap();
        assert_eq!(value, b"z9hG4bK.1");
        assert_eq!(rest, b";rport");
    }

    #[test]
    fn test_quoted_string_unescapes() {
        let (rest, value) = quoted_string(br#" "Alice \"A\", B" <sip"#).unwrap();
        assert_eq!(value, "Alice \"A\", B");
        assert_eq!(rest, b" <sip");

        let (_, empty) = quoted_string(b"\"\"").unwrap();
        assert!(empty.is_empty());
        assert!(quoted_string(b"\"open").is_err());
    }
}

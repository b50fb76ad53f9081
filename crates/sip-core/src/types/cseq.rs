//! CSeq and the RFC 3262 RAck header

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::parser::headers::{parse_cseq, parse_rack};
use crate::types::method::Method;

/// `CSeq: 4711 INVITE`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CSeq {
    pub seq: u32,
    pub method: Method,
}

impl CSeq {
    pub fn new(seq: u32, method: Method) -> Self {
        CSeq { seq, method }
    }
}

impl fmt::Display for CSeq {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.seq, self.method)
    }
}

impl FromStr for CSeq {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        parse_cseq(s)
    }
}

/// `RAck: <rseq> <cseq> <method>`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RAck {
    pub rseq: u32,
    pub cseq: u32,
    pub method: Method,
}

impl RAck {
    pub fn new(rseq: u32, cseq: u32, method: Method) -> Self {
        RAck { rseq, cseq, method }
    }
}

impl fmt::Display for RAck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.rseq, self.cseq, self.method)
    }
}

impl FromStr for RAck {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        parse_rack(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cseq() {
        let cseq: CSeq = "314159 INVITE".parse().unwrap();
        assert_eq!(cseq, CSeq::new(314159, Method::Invite));
        assert!("INVITE".parse::<CSeq>().is_err());
    }

    #[test]
    fn test_rack() {
        let rack: RAck = "776656 1 INVITE".parse().unwrap();
        assert_eq!(rack.rseq, 776656);
        assert_eq!(rack.to_string(), "776656 1 INVITE");
        assert!("1 INVITE".parse::<RAck>().is_err());
    }
}

//! Shared header accessors for requests and responses

use crate::error::{Error, Result};
use crate::types::address::Address;
use crate::types::cseq::{CSeq, RAck};
use crate::types::header::{HeaderName, TypedHeader};
use crate::types::via::Via;

/// Read and write access to the header list of a SIP message.
///
/// Implementors supply [`headers`](HeaderAccess::headers) and
/// [`headers_mut`](HeaderAccess::headers_mut); every accessor is derived from
/// those two.
pub trait HeaderAccess {
    fn headers(&self) -> &[TypedHeader];
    fn headers_mut(&mut self) -> &mut Vec<TypedHeader>;

    /// First header with the given name
    fn header(&self, name: &HeaderName) -> Option<&TypedHeader> {
        self.headers().iter().find(|h| &h.name() == name)
    }

    /// Every header with the given name, in message order
    fn all_headers(&self, name: &HeaderName) -> Vec<&TypedHeader> {
        self.headers().iter().filter(|h| &h.name() == name).collect()
    }

    fn has_header(&self, name: &HeaderName) -> bool {
        self.header(name).is_some()
    }

    /// Replaces every header with the same name by `header`, keeping the position
    /// of the first one
    fn set_header(&mut self, header: TypedHeader) {
        let name = header.name();
        let headers = self.headers_mut();
        match headers.iter().position(|h| h.name() == name) {
            Some(index) => {
                headers[index] = header;
                let mut i = index + 1;
                while i < headers.len() {
                    if headers[i].name() == name {
                        headers.remove(i);
                    } else {
                        i += 1;
                    }
                }
            }
            None => headers.push(header),
        }
    }

    fn push_header(&mut self, header: TypedHeader) {
        self.headers_mut().push(header);
    }

    /// Removes every header with the given name, returning how many were removed
    fn remove_header(&mut self, name: &HeaderName) -> usize {
        let headers = self.headers_mut();
        let before = headers.len();
        headers.retain(|h| &h.name() != name);
        before - headers.len()
    }

    /// Topmost Via
    fn via(&self) -> Option<&Via> {
        self.headers().iter().find_map(|h| match h {
            TypedHeader::Via(v) => Some(v),
            _ => None,
        })
    }

    fn vias(&self) -> Vec<&Via> {
        self.headers()
            .iter()
            .filter_map(|h| match h {
                TypedHeader::Via(v) => Some(v),
                _ => None,
            })
            .collect()
    }

    fn from(&self) -> Option<&Address> {
        self.headers().iter().find_map(|h| match h {
            TypedHeader::From(a) => Some(a),
            _ => None,
        })
    }

    fn to(&self) -> Option<&Address> {
        self.headers().iter().find_map(|h| match h {
            TypedHeader::To(a) => Some(a),
            _ => None,
        })
    }

    fn to_mut(&mut self) -> Option<&mut Address> {
        self.headers_mut().iter_mut().find_map(|h| match h {
            TypedHeader::To(a) => Some(a),
            _ => None,
        })
    }

    fn call_id(&self) -> Option<&str> {
        self.headers().iter().find_map(|h| match h {
            TypedHeader::CallId(c) => Some(c.as_str()),
            _ => None,
        })
    }

    fn cseq(&self) -> Option<&CSeq> {
        self.headers().iter().find_map(|h| match h {
            TypedHeader::CSeq(c) => Some(c),
            _ => None,
        })
    }

    fn contacts(&self) -> Vec<&Address> {
        self.headers()
            .iter()
            .filter_map(|h| match h {
                TypedHeader::Contact(a) => Some(a),
                _ => None,
            })
            .collect()
    }

    fn routes(&self) -> Vec<&Address> {
        self.headers()
            .iter()
            .filter_map(|h| match h {
                TypedHeader::Route(a) => Some(a),
                _ => None,
            })
            .collect()
    }

    fn record_routes(&self) -> Vec<&Address> {
        self.headers()
            .iter()
            .filter_map(|h| match h {
                TypedHeader::RecordRoute(a) => Some(a),
                _ => None,
            })
            .collect()
    }

    fn event(&self) -> Option<&str> {
        self.headers().iter().find_map(|h| match h {
            TypedHeader::Event(e) => Some(e.as_str()),
            _ => None,
        })
    }

    fn rseq(&self) -> Option<u32> {
        self.headers().iter().find_map(|h| match h {
            TypedHeader::RSeq(n) => Some(*n),
            _ => None,
        })
    }

    fn rack(&self) -> Option<&RAck> {
        self.headers().iter().find_map(|h| match h {
            TypedHeader::RAck(r) => Some(r),
            _ => None,
        })
    }

    fn retry_after(&self) -> Option<u32> {
        self.headers().iter().find_map(|h| match h {
            TypedHeader::RetryAfter(n) => Some(*n),
            _ => None,
        })
    }

    /// True when `option` appears in a Require header
    fn requires(&self, option: &str) -> bool {
        self.headers().iter().any(|h| match h {
            TypedHeader::Require(tokens) => tokens.iter().any(|t| t.eq_ignore_ascii_case(option)),
            _ => false,
        })
    }

    fn from_tag(&self) -> Option<&str> {
        self.from().and_then(Address::tag)
    }

    fn to_tag(&self) -> Option<&str> {
        self.to().and_then(Address::tag)
    }

    /// Branch of the topmost Via
    fn branch(&self) -> Option<&str> {
        self.via().and_then(Via::branch)
    }

    /// Call-ID, failing with [`Error::MissingHeader`] when absent
    fn require_call_id(&self) -> Result<&str> {
        self.call_id()
            .ok_or_else(|| Error::MissingHeader("Call-ID".to_string()))
    }

    /// CSeq, failing with [`Error::MissingHeader`] when absent
    fn require_cseq(&self) -> Result<&CSeq> {
        self.cseq()
            .ok_or_else(|| Error::MissingHeader("CSeq".to_string()))
    }

    /// Topmost Via, failing with [`Error::MissingHeader`] when absent
    fn require_via(&self) -> Result<&Via> {
        self.via()
            .ok_or_else(|| Error::MissingHeader("Via".to_string()))
    }

    /// Checks the headers every request and response must carry
    /// (RFC 3261 §8.1.1): Via, From, To, Call-ID and CSeq
    fn check_mandatory_headers(&self) -> Result<()> {
        self.require_via()?;
        self.from()
            .ok_or_else(|| Error::MissingHeader("From".to_string()))?;
        self.to().ok_or_else(|| Error::MissingHeader("To".to_string()))?;
        self.require_call_id()?;
        self.require_cseq()?;
        Ok(())
    }

    /// `call-id:local-tag:remote-tag`, lower-cased.
    ///
    /// For a message seen by the UAS (`is_server`), the local tag is the To-tag;
    /// for the UAC it is the From-tag. `None` until both tags are known.
    fn dialog_id(&self, is_server: bool) -> Option<String> {
        let call_id = self.call_id()?;
        let from_tag = self.from_tag()?;
        let to_tag = self.to_tag()?;
        let (local, remote) = if is_server {
            (to_tag, from_tag)
        } else {
            (from_tag, to_tag)
        };
        Some(crate::utils::dialog_key(call_id, local, remote))
    }
}

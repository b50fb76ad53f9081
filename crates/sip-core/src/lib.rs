//! # sipflow-sip-core
//!
//! The SIP message model used by the sipflow transaction and dialog layers:
//! typed requests and responses, the handful of structured headers the
//! state machines need, a text codec and fluent builders.
//!
//! ```rust
//! use sipflow_sip_core::prelude::*;
//!
//! let bye = SimpleRequestBuilder::new(Method::Bye, "sip:bob@192.0.2.4")
//!     .from("", "sip:alice@atlanta.example.com", Some("1928301774"))
//!     .to("", "sip:bob@biloxi.example.com", Some("a6c85cf"))
//!     .call_id("a84b4c76e66710")
//!     .cseq(231)
//!     .via("pc33.atlanta.example.com", "UDP", Some(&generate_branch()))
//!     .build()
//!     .unwrap();
//!
//! let wire = bye.to_bytes();
//! let parsed = parse_message(&wire).unwrap();
//! assert_eq!(parsed.dialog_id(false).as_deref(), Some("a84b4c76e66710:1928301774:a6c85cf"));
//! ```

pub mod builder;
pub mod error;
pub mod parser;
pub mod types;
pub mod utils;

pub use builder::{SimpleRequestBuilder, SimpleResponseBuilder};
pub use error::{Error, Result};
pub use parser::{parse_message, parse_message_strict};
pub use types::*;
pub use utils::{dialog_key, generate_branch, generate_call_id, generate_tag};

/// Everything needed to build and inspect messages
pub mod prelude {
    pub use crate::builder::{SimpleRequestBuilder, SimpleResponseBuilder};
    pub use crate::error::{Error, Result};
    pub use crate::parser::parse_message;
    pub use crate::types::{
        Address, CSeq, HeaderAccess, HeaderName, Message, Method, Param, RAck, Request,
        Response, Scheme, StatusCode, TypedHeader, Uri, Via,
    };
    pub use crate::utils::{generate_branch, generate_call_id, generate_tag};
}

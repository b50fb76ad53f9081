//! Request preprocessing done before the admission rules run

use sipflow_sip_core::prelude::*;
use tracing::debug;

use super::rules::Rejection;

fn same_host(a: &str, b: &str) -> bool {
    let bare = |h: &str| h.trim_matches(|c| c == '[' || c == ']').to_string();
    bare(a).eq_ignore_ascii_case(&bare(b))
}

/// Removes the topmost Route header when it names this listening point
/// (RFC 3261 §16.4), given as the host and port the stack advertises.
/// Returns true if a header was removed.
pub fn strip_own_route(request: &mut Request, host: &str, port: u16) -> bool {
    let Some(index) = request
        .headers
        .iter()
        .position(|h| matches!(h, TypedHeader::Route(_)))
    else {
        return false;
    };
    let names_us = match &request.headers[index] {
        TypedHeader::Route(route) => same_host(&route.uri.host, host) && route.uri.port_or_default() == port,
        _ => false,
    };
    if names_us {
        debug!(%host, port, "Stripping Route header naming this stack");
        request.headers.remove(index);
    }
    names_us
}

/// Builds the response the stack sends on its own for `rejection`
pub fn rejection_response(request: &Request, rejection: &Rejection) -> Result<Response> {
    let mut builder = SimpleResponseBuilder::response_from_request(request, rejection.status);
    if rejection.status.as_u16() > 100 {
        builder = builder.to_tag(&generate_tag());
    }
    if let Some(reason) = rejection.reason {
        builder = builder.reason(reason);
    }
    if let Some(secs) = rejection.retry_after {
        builder = builder.header(TypedHeader::RetryAfter(secs));
    }
    builder.build()
}

/// Adds a branch to the topmost Via if it has none
pub fn ensure_branch(request: &mut Request) {
    for header in request.headers.iter_mut() {
        if let TypedHeader::Via(via) = header {
            if via.branch().is_none() {
                *via = via.clone().with_branch(generate_branch());
            }
            return;
        }
    }
}

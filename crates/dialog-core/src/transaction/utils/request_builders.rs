//! Requests and responses a transaction derives from its original request
//!
//! These follow RFC 3261 §17.1.1.3 (ACK for non-2xx), §9.1 (CANCEL) and
//! §13.2.2.4 (ACK for 2xx).

use sipflow_sip_core::prelude::*;

use crate::transaction::error::{Error, Result};

fn missing(name: &str, what: &str) -> Error {
    Error::Protocol(format!("Missing {} header in {}", name, what))
}

/// Start of a request sharing Call-ID, From and CSeq number with `original`
fn derived(original: &Request, method: Method, uri: Uri) -> Result<Request> {
    let call_id = original.call_id().ok_or_else(|| missing("Call-ID", "original request"))?;
    let from = original.from().ok_or_else(|| missing("From", "original request"))?;
    let cseq = original.cseq().ok_or_else(|| missing("CSeq", "original request"))?;

    Ok(Request::new(method.clone(), uri)
        .with_header(TypedHeader::From(from.clone()))
        .with_header(TypedHeader::CallId(call_id.to_string()))
        .with_header(TypedHeader::CSeq(CSeq::new(cseq.seq, method)))
        .with_header(TypedHeader::MaxForwards(70)))
}

/// ACK for a 3xx-6xx response to an INVITE. It reuses the top Via (and so the
/// branch) and the Route set of the INVITE, and takes To from the response.
pub fn create_error_ack(original: &Request, response: &Response) -> Result<Request> {
    if original.method != Method::Invite {
        return Err(Error::Protocol(format!(
            "Cannot ACK a {} transaction",
            original.method
        )));
    }
    if response.status().as_u16() < 300 {
        return Err(Error::Protocol(format!(
            "Error ACK requested for a {} response",
            response.status_code()
        )));
    }
    let via = original.via().ok_or_else(|| missing("Via", "original request"))?;
    let to = response.to().ok_or_else(|| missing("To", "response"))?;

    let mut ack = derived(original, Method::Ack, original.uri.clone())?;
    ack.headers.insert(0, TypedHeader::Via(via.clone()));
    ack.push_header(TypedHeader::To(to.clone()));
    for route in original.routes() {
        ack.push_header(TypedHeader::Route(route.clone()));
    }
    Ok(ack)
}

/// CANCEL for a pending INVITE: same Request-URI, top Via, To and Route set
pub fn create_cancel(original: &Request) -> Result<Request> {
    if original.method != Method::Invite {
        return Err(Error::Protocol(format!(
            "Cannot CANCEL a {} transaction",
            original.method
        )));
    }
    let via = original.via().ok_or_else(|| missing("Via", "original request"))?;
    let to = original.to().ok_or_else(|| missing("To", "original request"))?;

    let mut cancel = derived(original, Method::Cancel, original.uri.clone())?;
    cancel.headers.insert(0, TypedHeader::Via(via.clone()));
    cancel.push_header(TypedHeader::To(to.clone()));
    for route in original.routes() {
        cancel.push_header(TypedHeader::Route(route.clone()));
    }
    Ok(cancel)
}

/// ACK for a 2xx response. This is a new transaction: it gets a fresh branch,
/// targets the remote Contact and follows the reversed Record-Route set of the
/// response, falling back to the INVITE's own Route headers.
pub fn create_ack_for_2xx(original: &Request, response: &Response) -> Result<Request> {
    if !response.status().is_success() {
        return Err(Error::Protocol(format!(
            "2xx ACK requested for a {} response",
            response.status_code()
        )));
    }
    let via = original.via().ok_or_else(|| missing("Via", "original request"))?;
    let to = response.to().ok_or_else(|| missing("To", "response"))?;
    let target = response
        .contacts()
        .first()
        .map(|c| c.uri.clone())
        .unwrap_or_else(|| original.uri.clone());

    let mut ack = derived(original, Method::Ack, target)?;
    let fresh_via = Via::new(via.transport.clone(), via.host.clone(), via.port)
        .with_branch(generate_branch());
    ack.headers.insert(0, TypedHeader::Via(fresh_via));
    ack.push_header(TypedHeader::To(to.clone()));

    let record_routes = response.record_routes();
    if record_routes.is_empty() {
        for route in original.routes() {
            ack.push_header(TypedHeader::Route(route.clone()));
        }
    } else {
        for route in record_routes.into_iter().rev() {
            ack.push_header(TypedHeader::Route(route.clone()));
        }
    }
    Ok(ack)
}

/// 100 Trying for a request; no To-tag is added
pub fn create_trying(request: &Request) -> Response {
    Response::from_request(request, StatusCode::Trying)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn invite() -> Request {
        SimpleRequestBuilder::new(Method::Invite, "sip:bob@biloxi.example.com")
            .from("Alice", "sip:alice@atlanta.example.com", Some("1928301774"))
            .to("Bob", "sip:bob@biloxi.example.com", None)
            .call_id("a84b4c76e66710")
            .cseq(314159)
            .via("pc33.atlanta.example.com", "UDP", Some("z9hG4bK776asdhds"))
            .route("sip:p1.example.com;lr")
            .build()
            .unwrap()
    }

    #[test]
    fn test_error_ack_reuses_branch_and_takes_to_tag() {
        let invite = invite();
        let busy = SimpleResponseBuilder::response_from_request(&invite, StatusCode::BusyHere)
            .to_tag("a6c85cf")
            .build()
            .unwrap();
        let ack = create_error_ack(&invite, &busy).unwrap();
        assert_eq!(ack.method, Method::Ack);
        assert_eq!(ack.branch(), Some("z9hG4bK776asdhds"));
        assert_eq!(ack.to_tag(), Some("a6c85cf"));
        assert_eq!(ack.cseq().unwrap(), &CSeq::new(314159, Method::Ack));
        assert_eq!(ack.routes().len(), 1);
    }

    #[test]
    fn test_error_ack_rejects_success() {
        let invite = invite();
        let ok = Response::from_request(&invite, StatusCode::Ok);
        assert!(create_error_ack(&invite, &ok).is_err());
    }

    #[test]
    fn test_cancel_only_for_invite() {
        let invite = invite();
        let cancel = create_cancel(&invite).unwrap();
        assert_eq!(cancel.cseq().unwrap().method, Method::Cancel);
        assert_eq!(cancel.uri, invite.uri);

        let mut options = invite.clone();
        options.method = Method::Options;
        assert!(create_cancel(&options).is_err());
    }

    #[test]
    fn test_2xx_ack_uses_contact_and_reversed_record_route() {
        let invite = invite();
        let ok = SimpleResponseBuilder::response_from_request(&invite, StatusCode::Ok)
            .to_tag("a6c85cf")
            .contact("sip:bob@192.0.2.4")
            .header(TypedHeader::RecordRoute("<sip:p2.example.com;lr>".parse().unwrap()))
            .header(TypedHeader::RecordRoute("<sip:p1.example.com;lr>".parse().unwrap()))
            .build()
            .unwrap();
        let ack = create_ack_for_2xx(&invite, &ok).unwrap();
        assert_eq!(ack.uri.to_string(), "sip:bob@192.0.2.4");
        assert_ne!(ack.branch(), Some("z9hG4bK776asdhds"));
        let routes: Vec<String> = ack.routes().iter().map(|r| r.uri.host.clone()).collect();
        assert_eq!(routes, vec!["p1.example.com", "p2.example.com"]);
    }
}

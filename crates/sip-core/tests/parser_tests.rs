//! Wire-format tests for the message model

use sipflow_sip_core::prelude::*;

const RELIABLE_183: &str = "SIP/2.0 183 Session Progress\r\n\
v: SIP/2.0/UDP pc33.atlanta.example.com:5060;branch=z9hG4bK74bf9;received=192.0.2.101\r\n\
f: \"Alice\" <sip:alice@atlanta.example.com>;tag=9fxced76sl\r\n\
t: <sip:bob@biloxi.example.com>;tag=314159\r\n\
i: 3848276298220188511@atlanta.example.com\r\n\
CSeq: 1 INVITE\r\n\
m: <sip:bob@192.0.2.4>\r\n\
Require: 100rel\r\n\
RSeq: 988789\r\n\
Record-Route: <sip:p2.biloxi.example.com;lr>, <sip:p1.atlanta.example.com;lr>\r\n\
l: 0\r\n\
\r\n";

#[test]
fn test_reliable_provisional_fields() {
    let message = parse_message(RELIABLE_183.as_bytes()).unwrap();
    let response = message.as_response().unwrap();

    assert_eq!(response.status, StatusCode::SessionProgress);
    assert!(response.requires("100rel"));
    assert_eq!(response.rseq(), Some(988789));
    assert_eq!(response.via().unwrap().received(), Some("192.0.2.101"));
    assert_eq!(response.contacts()[0].uri.host, "192.0.2.4");
    assert_eq!(
        response.dialog_id(false).as_deref(),
        Some("3848276298220188511@atlanta.example.com:9fxced76sl:314159")
    );

    let hosts: Vec<_> = response
        .record_routes()
        .iter()
        .map(|a| a.uri.host.clone())
        .collect();
    assert_eq!(hosts, vec!["p2.biloxi.example.com", "p1.atlanta.example.com"]);
}

#[test]
fn test_prack_built_from_builder_survives_the_wire() {
    let prack = SimpleRequestBuilder::new(Method::Prack, "sip:bob@192.0.2.4")
        .from("Alice", "sip:alice@atlanta.example.com", Some("9fxced76sl"))
        .to("", "sip:bob@biloxi.example.com", Some("314159"))
        .call_id("3848276298220188511@atlanta.example.com")
        .cseq(2)
        .via("pc33.atlanta.example.com", "UDP", Some("z9hG4bKprack"))
        .header(TypedHeader::RAck(RAck::new(988789, 1, Method::Invite)))
        .build()
        .unwrap();

    let parsed = parse_message(&prack.to_bytes()).unwrap();
    let request = parsed.as_request().unwrap();
    assert_eq!(request.method, Method::Prack);
    assert_eq!(request.rack(), Some(&RAck::new(988789, 1, Method::Invite)));
    assert_eq!(request.cseq(), Some(&CSeq::new(2, Method::Prack)));
}

#[test]
fn test_keepalive_prefix_and_unknown_headers() {
    let raw = "\r\n\r\nNOTIFY sip:alice@pc33 SIP/2.0\r\n\
Via: SIP/2.0/TCP watcher.example.com;branch=z9hG4bKn1\r\n\
From: <sip:bob@biloxi.example.com>;tag=ffd2\r\n\
To: <sip:alice@atlanta.example.com>;tag=xfg9\r\n\
Call-ID: 2010@watcherhost\r\n\
CSeq: 7 NOTIFY\r\n\
Event: presence;id=42\r\n\
Subscription-State: active;expires=599\r\n\
Content-Length: 0\r\n\r\n";
    let message = parse_message(raw.as_bytes()).unwrap();
    assert_eq!(message.event(), Some("presence;id=42"));
    let state = message
        .header(&HeaderName::Other("subscription-state".to_string()))
        .unwrap();
    assert_eq!(state.to_string(), "Subscription-State: active;expires=599");
}

#[test]
fn test_request_serializes_as_json() {
    let request = SimpleRequestBuilder::new(Method::Options, "sip:carol@chicago.example.com")
        .call_id("opt-1")
        .cseq(1)
        .build()
        .unwrap();
    let json = serde_json::to_string(&request).unwrap();
    let back: Request = serde_json::from_str(&json).unwrap();
    assert_eq!(back, request);
}

//! Call responder: answers INVITE, INFO and BYE the way the doorbell does.
//!
//! Each request is handled on its own; the only "transaction" state is the
//! set of correlation headers copied from request to response.

use std::net::SocketAddr;

use super::message::{SipMethod, SipRequest, SipResponse};
use crate::config::Config;
use crate::media::sdp;

/// Headers copied verbatim from a request into its response.
const CORRELATION_HEADERS: &[&str] = &["via", "to", "from", "call-id", "cseq"];

/// Contact user part the device answers with.
const CONTACT_USER: &str = "3003";

type Handler = fn(&SignalResponder, &SipRequest, SocketAddr) -> Option<SipResponse>;

/// Pick the handler for a method. Methods without one fall through to the
/// default handler, which only logs.
fn handler_for(method: &SipMethod) -> Handler {
    match method {
        SipMethod::Invite => SignalResponder::handle_invite,
        SipMethod::Info => SignalResponder::handle_info,
        SipMethod::Bye => SignalResponder::handle_bye,
        _ => SignalResponder::handle_default,
    }
}

/// Builds responses that point the client back at this fixture.
#[derive(Debug, Clone)]
pub struct SignalResponder {
    ip: String,
    signaling_port: u16,
    audio_port: u16,
    video_port: u16,
}

impl SignalResponder {
    pub fn new(ip: impl Into<String>, signaling_port: u16, audio_port: u16, video_port: u16) -> Self {
        Self {
            ip: ip.into(),
            signaling_port,
            audio_port,
            video_port,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.ip.clone(),
            config.signaling_port,
            config.audio.port,
            config.video.port,
        )
    }

    /// Our own signaling port, the last-resort response destination port.
    pub fn signaling_port(&self) -> u16 {
        self.signaling_port
    }

    /// Handle a request. `None` means nothing is sent back.
    pub fn handle(&self, request: &SipRequest, peer: SocketAddr) -> Option<SipResponse> {
        tracing::info!("{} from {}", request.method, peer);
        handler_for(&request.method)(self, request, peer)
    }

    fn handle_invite(&self, request: &SipRequest, _peer: SocketAddr) -> Option<SipResponse> {
        let mut response = response_from_request(200, request);
        response.headers.add(
            "Contact",
            format!(
                "<sip:{}@{}:{};transport=tcp>",
                CONTACT_USER, self.ip, self.signaling_port
            ),
        );
        response.headers.add("Content-Type", "application/sdp");
        response.headers.add("Content-Disposition", "session");
        response.body = sdp::session_description(&self.ip, self.audio_port, self.video_port)
            .into_bytes();
        response
            .headers
            .add("Content-Length", response.body.len().to_string());
        Some(response)
    }

    fn handle_info(&self, request: &SipRequest, _peer: SocketAddr) -> Option<SipResponse> {
        Some(empty_ok(request))
    }

    fn handle_bye(&self, request: &SipRequest, _peer: SocketAddr) -> Option<SipResponse> {
        Some(empty_ok(request))
    }

    fn handle_default(&self, request: &SipRequest, peer: SocketAddr) -> Option<SipResponse> {
        tracing::info!("No handler for {} from {}, dropping", request.method, peer);
        tracing::info!("Unhandled request:\n{}", request);
        None
    }
}

fn empty_ok(request: &SipRequest) -> SipResponse {
    let mut response = response_from_request(200, request);
    response.headers.add("Content-Length", "0");
    response
}

/// Start a response carrying owned copies of the request's correlation headers.
pub fn response_from_request(status: u16, request: &SipRequest) -> SipResponse {
    let mut response = SipResponse::new(status);
    for name in CORRELATION_HEADERS {
        let values = request.headers.get(name);
        if !values.is_empty() {
            response.headers.set(name, values.to_vec());
        }
    }
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sip::message::SipMessage;

    fn peer() -> SocketAddr {
        "10.0.0.5:5060".parse().unwrap()
    }

    fn responder() -> SignalResponder {
        SignalResponder::new("127.0.0.1", 8081, 30510, 30304)
    }

    fn request(method: &str) -> SipRequest {
        let raw = format!(
            "{method} sip:1-2@127.0.0.1:8081;transport=tcp SIP/2.0\r\n\
             Via: SIP/2.0/TCP 10.0.0.5:5060;branch=z9hG4bKabc;rport\r\n\
             Via: SIP/2.0/TCP 10.0.0.1:5060;branch=z9hG4bKdef\r\n\
             From: <sip:client@10.0.0.5>;tag=77\r\n\
             To: <sip:1-2@127.0.0.1:8081;transport=tcp>\r\n\
             Call-ID: 3848276298220188511@10.0.0.5\r\n\
             CSeq: 20 {method}\r\n\
             Max-Forwards: 70\r\n\
             Content-Length: 0\r\n\
             \r\n"
        );
        match SipMessage::parse(raw.as_bytes()).unwrap() {
            SipMessage::Request(req) => req,
            other => panic!("expected request, got {:?}", other),
        }
    }

    fn assert_correlated(req: &SipRequest, resp: &SipResponse) {
        for name in CORRELATION_HEADERS {
            assert_eq!(req.headers.get(name), resp.headers.get(name), "header {}", name);
        }
    }

    #[test]
    fn test_invite_answer() {
        let req = request("INVITE");
        let resp = responder().handle(&req, peer()).unwrap();

        assert_eq!(resp.status, 200);
        assert_eq!(resp.reason, "OK");
        assert_correlated(&req, &resp);
        assert_eq!(resp.headers.get("via").len(), 2);
        assert_eq!(
            resp.headers.first("contact"),
            Some("<sip:3003@127.0.0.1:8081;transport=tcp>")
        );
        assert_eq!(resp.headers.first("content-type"), Some("application/sdp"));
        assert_eq!(resp.headers.first("content-disposition"), Some("session"));
        assert!(resp.headers.first("max-forwards").is_none());

        let declared: usize = resp.headers.first("content-length").unwrap().parse().unwrap();
        assert_eq!(declared, resp.body.len());
        let body = String::from_utf8(resp.body.clone()).unwrap();
        assert!(body.starts_with("v=0\r\n"));
        assert!(body.contains("m=audio 30510 RTP/AVP 0 101\r\n"));
        assert!(body.contains("m=video 30304 RTP/AVP 97\r\n"));
    }

    #[test]
    fn test_invite_answer_reparses_with_exact_body() {
        let resp = responder().handle(&request("INVITE"), peer()).unwrap();
        let wire = resp.to_bytes();
        let SipMessage::Response(parsed) = SipMessage::parse(&wire).unwrap() else {
            panic!("expected response");
        };
        assert_eq!(parsed.body, resp.body);
        assert_eq!(parsed.headers.first("Call-ID"), Some("3848276298220188511@10.0.0.5"));
    }

    #[test]
    fn test_info_and_bye_are_empty() {
        for method in ["INFO", "BYE"] {
            let req = request(method);
            let resp = responder().handle(&req, peer()).unwrap();
            assert_eq!(resp.status, 200);
            assert!(resp.body.is_empty());
            assert_eq!(resp.headers.get("content-length"), &["0".to_string()]);
            assert_correlated(&req, &resp);
        }
    }

    #[test]
    fn test_unhandled_methods_get_no_response() {
        for method in ["ACK", "OPTIONS", "CANCEL", "REGISTER", "SUBSCRIBE"] {
            assert!(
                responder().handle(&request(method), peer()).is_none(),
                "{} should be dropped",
                method
            );
        }
    }

    #[test]
    fn test_copies_are_independent_of_request() {
        let mut req = request("BYE");
        let resp = responder().handle(&req, peer()).unwrap();
        req.headers.set("call-id", vec!["changed".into()]);
        req.headers.add("via", "SIP/2.0/UDP late.example");
        assert_eq!(
            resp.headers.first("call-id"),
            Some("3848276298220188511@10.0.0.5")
        );
        assert_eq!(resp.headers.get("via").len(), 2);
    }
}

//! Response addressing from the topmost Via (RFC 3261 section 18.2.2).

use std::fmt;

use super::message::SipResponse;
use super::via::Via;
use super::SipError;

/// Where a response should physically be delivered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutingAddress {
    pub host: String,
    pub port: u16,
    /// Transport token from the Via, e.g. `TCP` or `UDP`.
    pub transport: String,
}

impl fmt::Display for RoutingAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{};transport={}", self.host, self.port, self.transport)
        } else {
            write!(f, "{}:{};transport={}", self.host, self.port, self.transport)
        }
    }
}

/// Computes response destinations. `default_port` is our own signaling
/// port, used when the Via names neither `rport` nor an explicit port.
#[derive(Debug, Clone, Copy)]
pub struct ResponseRouter {
    default_port: u16,
}

impl ResponseRouter {
    pub fn new(default_port: u16) -> Self {
        Self { default_port }
    }

    /// Route a response by its topmost Via.
    pub fn route(&self, response: &SipResponse) -> Result<RoutingAddress, SipError> {
        let top = response
            .headers
            .first("via")
            .ok_or_else(|| SipError::InvalidVia(String::new()))?;
        Ok(self.route_via(&Via::parse(top)?))
    }

    pub fn route_via(&self, via: &Via) -> RoutingAddress {
        let host = via.received().unwrap_or(&via.host).to_string();
        let port = via.rport().or(via.port).unwrap_or(self.default_port);
        RoutingAddress {
            host,
            port,
            transport: via.transport.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response_with_via(via: &str) -> SipResponse {
        let mut resp = SipResponse::new(200);
        resp.headers.add("Via", via);
        resp
    }

    #[test]
    fn test_received_and_rport_override_sent_by() {
        let router = ResponseRouter::new(8081);
        let resp = response_with_via(
            "SIP/2.0/TCP 10.0.0.5:5060;branch=z9hG4bK1;received=198.51.100.7;rport=61000",
        );
        let dest = router.route(&resp).unwrap();
        assert_eq!(dest.host, "198.51.100.7");
        assert_eq!(dest.port, 61000);
        assert_eq!(dest.transport, "TCP");
    }

    #[test]
    fn test_declared_host_and_port() {
        let router = ResponseRouter::new(8081);
        let resp = response_with_via("SIP/2.0/UDP 10.0.0.5:5070;branch=z9hG4bK1;rport");
        let dest = router.route(&resp).unwrap();
        assert_eq!(dest.host, "10.0.0.5");
        assert_eq!(dest.port, 5070);
    }

    #[test]
    fn test_falls_back_to_own_port() {
        let router = ResponseRouter::new(8081);
        let resp = response_with_via("SIP/2.0/TCP client.invalid");
        let dest = router.route(&resp).unwrap();
        assert_eq!(dest.host, "client.invalid");
        assert_eq!(dest.port, 8081);
        assert_eq!(dest.to_string(), "client.invalid:8081;transport=TCP");
    }

    #[test]
    fn test_uses_topmost_via_only() {
        let router = ResponseRouter::new(8081);
        let mut resp = response_with_via("SIP/2.0/UDP first.example:5001");
        resp.headers.add("Via", "SIP/2.0/UDP second.example:5002");
        let dest = router.route(&resp).unwrap();
        assert_eq!(dest.host, "first.example");
        assert_eq!(dest.port, 5001);
    }

    #[test]
    fn test_missing_via_is_an_error() {
        let router = ResponseRouter::new(8081);
        assert!(router.route(&SipResponse::new(200)).is_err());
    }
}

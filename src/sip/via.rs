//! Via header parsing (RFC 3261 section 20.42, RFC 3581 for `rport`).

use super::SipError;

/// A single parsed Via value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Via {
    /// Transport token from the sent-protocol, e.g. `TCP`.
    pub transport: String,
    pub host: String,
    pub port: Option<u16>,
    /// Parameters in order; flag parameters like a bare `rport` have no value.
    pub params: Vec<(String, Option<String>)>,
}

impl Via {
    /// Parse e.g. `SIP/2.0/UDP 192.0.2.1:5060;branch=z9hG4bK123;rport`.
    pub fn parse(value: &str) -> Result<Self, SipError> {
        let invalid = || SipError::InvalidVia(value.to_string());

        let value = value.trim();
        let (protocol, rest) = value.split_once(char::is_whitespace).ok_or_else(invalid)?;
        let transport = protocol
            .rsplit('/')
            .next()
            .filter(|t| !t.is_empty() && protocol.contains('/'))
            .ok_or_else(invalid)?
            .to_ascii_uppercase();

        let mut segments = rest.trim().split(';');
        let sent_by = segments.next().map(str::trim).unwrap_or_default();
        let (host, port) = split_host_port(sent_by).ok_or_else(invalid)?;

        let params = segments
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(|p| match p.split_once('=') {
                Some((k, v)) => (k.trim().to_ascii_lowercase(), Some(v.trim().to_string())),
                None => (p.to_ascii_lowercase(), None),
            })
            .collect();

        Ok(Via {
            transport,
            host,
            port,
            params,
        })
    }

    pub fn param(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(k, _)| k == name)
            .and_then(|(_, v)| v.as_deref())
    }

    /// The `received` parameter, set by a relay that saw a different source address.
    pub fn received(&self) -> Option<&str> {
        self.param("received").filter(|v| !v.is_empty())
    }

    /// The `rport` parameter, when it carries a port number.
    pub fn rport(&self) -> Option<u16> {
        self.param("rport").and_then(|v| v.parse().ok())
    }
}

/// Split `host[:port]`, accepting bracketed IPv6 literals.
fn split_host_port(sent_by: &str) -> Option<(String, Option<u16>)> {
    if sent_by.is_empty() {
        return None;
    }
    if let Some(rest) = sent_by.strip_prefix('[') {
        let (host, after) = rest.split_once(']')?;
        let port = match after.strip_prefix(':') {
            Some(p) => Some(p.parse().ok()?),
            None if after.is_empty() => None,
            None => return None,
        };
        return Some((host.to_string(), port));
    }
    match sent_by.rsplit_once(':') {
        Some((host, port)) => Some((host.to_string(), Some(port.parse().ok()?))),
        None => Some((sent_by.to_string(), None)),
    }
}

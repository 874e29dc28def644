//! SIP message model and text codec (RFC 3261 section 7).
//!
//! Header names are normalized to their lowercase long form on insertion, so
//! `i:` and `Call-ID:` land in the same slot. Every header keeps its values in
//! arrival order; the first value is the topmost one.

use std::fmt;

use super::SipError;

pub const SIP_VERSION: &str = "SIP/2.0";

/// Largest message accepted from the wire, head and body together.
pub const MAX_MESSAGE_SIZE: usize = 64 * 1024;

/// Request methods with a dedicated handler, plus a catch-all.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SipMethod {
    Invite,
    Ack,
    Bye,
    Cancel,
    Info,
    Options,
    Register,
    Other(String),
}

impl SipMethod {
    /// Methods are case-sensitive tokens on the wire.
    pub fn parse(token: &str) -> Self {
        match token {
            "INVITE" => SipMethod::Invite,
            "ACK" => SipMethod::Ack,
            "BYE" => SipMethod::Bye,
            "CANCEL" => SipMethod::Cancel,
            "INFO" => SipMethod::Info,
            "OPTIONS" => SipMethod::Options,
            "REGISTER" => SipMethod::Register,
            other => SipMethod::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            SipMethod::Invite => "INVITE",
            SipMethod::Ack => "ACK",
            SipMethod::Bye => "BYE",
            SipMethod::Cancel => "CANCEL",
            SipMethod::Info => "INFO",
            SipMethod::Options => "OPTIONS",
            SipMethod::Register => "REGISTER",
            SipMethod::Other(token) => token.as_str(),
        }
    }
}

impl fmt::Display for SipMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Compact header forms (RFC 3261 section 7.3.3) and their long names.
const COMPACT_FORMS: &[(&str, &str)] = &[
    ("v", "via"),
    ("f", "from"),
    ("t", "to"),
    ("i", "call-id"),
    ("m", "contact"),
    ("l", "content-length"),
    ("c", "content-type"),
    ("k", "supported"),
    ("s", "subject"),
    ("e", "content-encoding"),
];

/// Normalize a header name to its lowercase long form.
pub fn normalize_name(name: &str) -> String {
    let lower = name.trim().to_ascii_lowercase();
    COMPACT_FORMS
        .iter()
        .find(|(short, _)| *short == lower)
        .map(|(_, long)| long.to_string())
        .unwrap_or(lower)
}

/// Render a normalized header name the way it is conventionally written.
pub fn canonical_name(name: &str) -> String {
    match name {
        "call-id" => "Call-ID".to_string(),
        "cseq" => "CSeq".to_string(),
        _ => name
            .split('-')
            .map(|part| {
                let mut chars = part.chars();
                match chars.next() {
                    Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
                    None => String::new(),
                }
            })
            .collect::<Vec<_>>()
            .join("-"),
    }
}

/// Ordered multimap of header name to values.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    entries: Vec<(String, Vec<String>)>,
}

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a value, keeping any values already present for `name`.
    pub fn add(&mut self, name: &str, value: impl Into<String>) {
        let key = normalize_name(name);
        let value = value.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some((_, values)) => values.push(value),
            None => self.entries.push((key, vec![value])),
        }
    }

    /// Replace all values for `name`. An existing header keeps its position.
    pub fn set(&mut self, name: &str, values: Vec<String>) {
        let key = normalize_name(name);
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some((_, existing)) => *existing = values,
            None => self.entries.push((key, values)),
        }
    }

    /// All values for `name`, topmost first. Empty if absent.
    pub fn get(&self, name: &str) -> &[String] {
        let key = normalize_name(name);
        self.entries
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, values)| values.as_slice())
            .unwrap_or(&[])
    }

    pub fn first(&self, name: &str) -> Option<&str> {
        self.get(name).first().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.entries
            .iter()
            .map(|(name, values)| (name.as_str(), values.as_slice()))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SipRequest {
    pub method: SipMethod,
    pub uri: String,
    pub version: String,
    pub headers: Headers,
    pub body: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SipResponse {
    pub status: u16,
    pub reason: String,
    pub version: String,
    pub headers: Headers,
    pub body: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SipMessage {
    Request(SipRequest),
    Response(SipResponse),
}

fn reason_phrase(status: u16) -> &'static str {
    match status {
        200 => "OK",
        _ => "Unknown",
    }
}

impl SipResponse {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            reason: reason_phrase(status).to_string(),
            version: SIP_VERSION.to_string(),
            headers: Headers::new(),
            body: Vec::new(),
        }
    }

    /// Exact wire form: start line, headers, blank line, body.
    pub fn to_bytes(&self) -> Vec<u8> {
        let start = format!("{} {} {}", self.version, self.status, self.reason);
        let mut buf = render_head(&start, &self.headers).into_bytes();
        buf.extend_from_slice(&self.body);
        buf
    }
}

fn render_head(start: &str, headers: &Headers) -> String {
    let mut head = format!("{}\r\n", start);
    for (name, values) in headers.iter() {
        let name = canonical_name(name);
        for value in values {
            head.push_str(&format!("{}: {}\r\n", name, value));
        }
    }
    head.push_str("\r\n");
    head
}

/// Full message text for logs; a non-UTF-8 body is rendered lossily.
impl fmt::Display for SipResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&String::from_utf8_lossy(&self.to_bytes()))
    }
}

impl fmt::Display for SipRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let start = format!("{} {} {}", self.method, self.uri, self.version);
        f.write_str(&render_head(&start, &self.headers))?;
        f.write_str(&String::from_utf8_lossy(&self.body))
    }
}

impl SipMessage {
    /// Parse one complete message (head plus body).
    ///
    /// If a Content-Length is present the body is cut to that length, and a
    /// message shorter than it claims is rejected. Otherwise everything after
    /// the blank line is the body.
    pub fn parse(data: &[u8]) -> Result<Self, SipError> {
        let (head, body) = split_head(data);
        let head = std::str::from_utf8(head)
            .map_err(|_| SipError::InvalidStartLine(String::from_utf8_lossy(head).into_owned()))?;

        let mut lines = unfold_lines(head).into_iter();
        let start = lines.next().ok_or(SipError::Empty)?;

        let mut headers = Headers::new();
        for line in lines {
            let (name, value) = line
                .split_once(':')
                .ok_or_else(|| SipError::InvalidHeader(line.clone()))?;
            let name = name.trim();
            if name.is_empty() || name.contains(' ') {
                return Err(SipError::InvalidHeader(line.clone()));
            }
            let value = value.trim();
            if normalize_name(name) == "via" {
                for part in value.split(',').map(str::trim).filter(|p| !p.is_empty()) {
                    headers.add(name, part);
                }
            } else {
                headers.add(name, value);
            }
        }

        let body = match headers.first("content-length") {
            Some(raw) => {
                let len: usize = raw
                    .trim()
                    .parse()
                    .map_err(|_| SipError::InvalidContentLength(raw.to_string()))?;
                body.get(..len)
                    .ok_or_else(|| SipError::InvalidContentLength(raw.to_string()))?
            }
            None => body,
        };

        if start.starts_with("SIP/") {
            let mut parts = start.splitn(3, ' ');
            let version = parts.next().unwrap_or_default();
            let status = parts
                .next()
                .and_then(|code| code.parse::<u16>().ok())
                .ok_or_else(|| SipError::InvalidStartLine(start.clone()))?;
            let reason = parts.next().unwrap_or_default().trim();
            Ok(SipMessage::Response(SipResponse {
                status,
                reason: reason.to_string(),
                version: version.to_string(),
                headers,
                body: body.to_vec(),
            }))
        } else {
            let parts: Vec<&str> = start.split_whitespace().collect();
            match parts.as_slice() {
                [method, uri, version] if version.starts_with("SIP/") => {
                    Ok(SipMessage::Request(SipRequest {
                        method: SipMethod::parse(method),
                        uri: uri.to_string(),
                        version: version.to_string(),
                        headers,
                        body: body.to_vec(),
                    }))
                }
                _ => Err(SipError::InvalidStartLine(start.clone())),
            }
        }
    }
}

/// Split at the first blank line. Tolerates bare LF line endings.
fn split_head(data: &[u8]) -> (&[u8], &[u8]) {
    if let Some(pos) = find(data, b"\r\n\r\n") {
        return (&data[..pos], &data[pos + 4..]);
    }
    if let Some(pos) = find(data, b"\n\n") {
        return (&data[..pos], &data[pos + 2..]);
    }
    (data, &[])
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

/// Split the head into logical lines, joining folded continuation lines and
/// skipping blank lines before the start line.
fn unfold_lines(head: &str) -> Vec<String> {
    let mut lines: Vec<String> = Vec::new();
    for raw in head.split('\n') {
        let line = raw.trim_end_matches('\r');
        if line.is_empty() {
            continue;
        }
        if line.starts_with(' ') || line.starts_with('\t') {
            if let Some(last) = lines.last_mut() {
                last.push(' ');
                last.push_str(line.trim_start());
            }
            continue;
        }
        lines.push(line.to_string());
    }
    lines
}

/// Pull one complete message off the front of a stream buffer.
///
/// Leading CRLF keep-alives are discarded. Returns `Ok(None)` until the
/// head and the full Content-Length worth of body have arrived. A stream
/// message without Content-Length is treated as having an empty body. A
/// Content-Length above [`MAX_MESSAGE_SIZE`] is rejected.
pub fn take_frame(buf: &mut Vec<u8>) -> Result<Option<Vec<u8>>, SipError> {
    let skip = buf
        .iter()
        .take_while(|&&b| b == b'\r' || b == b'\n')
        .count();
    buf.drain(..skip);

    let (head_len, sep_len) = match find(buf, b"\r\n\r\n") {
        Some(pos) => (pos, 4),
        None => match find(buf, b"\n\n") {
            Some(pos) => (pos, 2),
            None => return Ok(None),
        },
    };

    let head = String::from_utf8_lossy(&buf[..head_len]);
    let mut body_len = 0usize;
    for line in unfold_lines(&head).iter().skip(1) {
        if let Some((name, value)) = line.split_once(':') {
            if normalize_name(name) == "content-length" {
                body_len = value
                    .trim()
                    .parse()
                    .map_err(|_| SipError::InvalidContentLength(value.trim().to_string()))?;
                break;
            }
        }
    }

    if body_len > MAX_MESSAGE_SIZE {
        return Err(SipError::InvalidContentLength(body_len.to_string()));
    }
    let total = head_len + sep_len + body_len;
    if buf.len() < total {
        return Ok(None);
    }
    Ok(Some(buf.drain(..total).collect()))
}

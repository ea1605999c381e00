use core::fmt::{self, Write};

use crate::{auth::AuthKind, DecodeError};

pub const SIP_VERSION: &str = "SIP/2.0";
pub const MAX_FORWARDS: u8 = 70;

/// Headers every response must carry (RFC 3261 section 8.2.6.2).
const MANDATORY_HEADERS: [&str; 5] = ["Via", "From", "To", "Call-ID", "CSeq"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Register,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Register => "REGISTER",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub name: String,
    pub value: String,
}

impl Header {
    pub fn new(name: &str, value: &str) -> Self {
        Self {
            name: name.to_string(),
            value: value.to_string(),
        }
    }
}

/// Ordered header list with case-insensitive lookup.
///
/// A header name may appear several times; [`Headers::get_all`] yields the
/// values in the order they were received.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers(Vec<Header>);

impl Headers {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn push(&mut self, name: &str, value: &str) {
        self.0.push(Header::new(name, value));
    }

    /// First value for `name`.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|h| h.name.eq_ignore_ascii_case(name))
            .map(|h| h.value.as_str())
    }

    pub fn get_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.0
            .iter()
            .filter(move |h| h.name.eq_ignore_ascii_case(name))
            .map(|h| h.value.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Header> {
        self.0.iter()
    }

    fn last_mut(&mut self) -> Option<&mut Header> {
        self.0.last_mut()
    }
}

/// `Authorization` or `Proxy-Authorization` carried by a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizationHeader {
    pub kind: AuthKind,
    pub value: String,
}

impl AuthorizationHeader {
    pub fn name(&self) -> &'static str {
        self.kind.authorization_header()
    }
}

/// An outgoing REGISTER. A new attempt (new CSeq, new branch, new
/// credentials) is a new value; nothing is patched in place.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SipRequest {
    pub method: Method,
    pub uri: String,
    pub via: String,
    pub from: String,
    pub to: String,
    pub call_id: String,
    pub cseq: u32,
    pub authorization: Option<AuthorizationHeader>,
    pub contact: String,
    pub expires: u32,
    pub user_agent: Option<String>,
}

impl SipRequest {
    pub fn render(&self) -> String {
        let mut out = String::with_capacity(512);
        // Writing into a String cannot fail.
        let _ = write!(out, "{} {} {}\r\n", self.method, self.uri, SIP_VERSION);
        let _ = write!(out, "Via: {}\r\n", self.via);
        let _ = write!(out, "From: {}\r\n", self.from);
        let _ = write!(out, "To: {}\r\n", self.to);
        let _ = write!(out, "Call-ID: {}\r\n", self.call_id);
        let _ = write!(out, "CSeq: {} {}\r\n", self.cseq, self.method);
        if let Some(auth) = &self.authorization {
            let _ = write!(out, "{}: {}\r\n", auth.name(), auth.value);
        }
        let _ = write!(out, "Max-Forwards: {}\r\n", MAX_FORWARDS);
        let _ = write!(out, "Contact: {}\r\n", self.contact);
        let _ = write!(out, "Expires: {}\r\n", self.expires);
        if let Some(agent) = &self.user_agent {
            let _ = write!(out, "User-Agent: {}\r\n", agent);
        }
        out.push_str("Content-Length: 0\r\n\r\n");
        out
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SipResponse {
    pub status_code: u16,
    pub reason: String,
    pub headers: Headers,
    pub body: Vec<u8>,
}

impl SipResponse {
    pub fn new(status_code: u16, reason: &str) -> Self {
        Self {
            status_code,
            reason: reason.to_string(),
            headers: Headers::new(),
            body: Vec::new(),
        }
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push(name, value);
        self
    }

    pub fn with_body(mut self, body: &[u8]) -> Self {
        self.body = body.to_vec();
        self
    }

    pub fn is_provisional(&self) -> bool {
        (100..200).contains(&self.status_code)
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status_code)
    }

    pub fn call_id(&self) -> Option<&str> {
        self.headers.get("Call-ID")
    }

    /// Sequence number and method of the CSeq header.
    pub fn cseq(&self) -> Option<(u32, &str)> {
        self.headers.get("CSeq").and_then(parse_cseq)
    }

    /// Wire form. Content-Length is written from the body unless the
    /// headers already carry one.
    pub fn encode(&self) -> Vec<u8> {
        let mut head = String::with_capacity(256);
        let _ = write!(
            head,
            "{} {} {}\r\n",
            SIP_VERSION, self.status_code, self.reason
        );
        for header in self.headers.iter() {
            let _ = write!(head, "{}: {}\r\n", header.name, header.value);
        }
        if !self.headers.contains("Content-Length") {
            let _ = write!(head, "Content-Length: {}\r\n", self.body.len());
        }
        head.push_str("\r\n");

        let mut out = head.into_bytes();
        out.extend_from_slice(&self.body);
        out
    }
}

pub fn encode(request: &SipRequest) -> Vec<u8> {
    request.render().into_bytes()
}

/// Parse one received datagram into a response.
pub fn decode(input: &[u8]) -> Result<SipResponse, DecodeError> {
    let (head, body) = split_head(input)
        .ok_or_else(|| DecodeError::Malformed("header section not terminated".into()))?;
    let head = core::str::from_utf8(head)
        .map_err(|_| DecodeError::Malformed("header section is not UTF-8".into()))?;

    let mut lines = head.lines();
    let start = lines
        .next()
        .filter(|line| !line.trim().is_empty())
        .ok_or_else(|| DecodeError::Malformed("missing start line".into()))?;
    let (status_code, reason) = parse_status_line(start)?;

    let mut headers = Headers::new();
    for line in lines {
        if line.starts_with(' ') || line.starts_with('\t') {
            // folded continuation of the previous header
            let last = headers
                .last_mut()
                .ok_or_else(|| DecodeError::Malformed("continuation before first header".into()))?;
            last.value.push(' ');
            last.value.push_str(line.trim());
            continue;
        }
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| DecodeError::Malformed(format!("header line without colon: {line:?}")))?;
        let name = name.trim();
        if name.is_empty() || name.contains(char::is_whitespace) {
            return Err(DecodeError::Malformed(format!("invalid header name: {name:?}")));
        }
        headers.push(expand_compact(name), value.trim());
    }

    for name in MANDATORY_HEADERS {
        if !headers.contains(name) {
            return Err(DecodeError::Malformed(format!("missing {name} header")));
        }
    }
    if headers.get("CSeq").and_then(parse_cseq).is_none() {
        return Err(DecodeError::Malformed("invalid CSeq header".into()));
    }

    let body = match headers.get("Content-Length") {
        Some(raw) => {
            let declared: usize = raw
                .parse()
                .map_err(|_| DecodeError::Malformed(format!("invalid Content-Length: {raw:?}")))?;
            if declared > body.len() {
                return Err(DecodeError::Truncated {
                    declared,
                    available: body.len(),
                });
            }
            &body[..declared]
        }
        // Without Content-Length the datagram boundary ends the body.
        None => body,
    };

    Ok(SipResponse {
        status_code,
        reason: reason.to_string(),
        headers,
        body: body.to_vec(),
    })
}

/// Split at the first empty line. Bare LF line endings are tolerated.
fn split_head(input: &[u8]) -> Option<(&[u8], &[u8])> {
    if let Some(pos) = find(input, b"\r\n\r\n") {
        return Some((&input[..pos], &input[pos + 4..]));
    }
    find(input, b"\n\n").map(|pos| (&input[..pos], &input[pos + 2..]))
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

/// True when the first line of `input` is a request line,
/// `<METHOD> <uri> SIP/2.0`.
pub fn is_request(input: &[u8]) -> bool {
    let line_end = input
        .iter()
        .position(|&b| b == b'\r' || b == b'\n')
        .unwrap_or(input.len());
    let Ok(line) = core::str::from_utf8(&input[..line_end]) else {
        return false;
    };
    let mut parts = line.split(' ');
    match (parts.next(), parts.next(), parts.next(), parts.next()) {
        (Some(method), Some(uri), Some(version), None) => {
            !method.is_empty()
                && method.bytes().all(|b| b.is_ascii_alphabetic())
                && !uri.is_empty()
                && version.eq_ignore_ascii_case(SIP_VERSION)
        }
        _ => false,
    }
}

fn parse_status_line(line: &str) -> Result<(u16, &str), DecodeError> {
    let mut parts = line.splitn(3, ' ');
    let version = parts.next().unwrap_or_default();
    if !version.eq_ignore_ascii_case(SIP_VERSION) {
        return Err(DecodeError::Malformed(format!("not a SIP/2.0 status line: {line:?}")));
    }
    let code = parts
        .next()
        .filter(|code| code.len() == 3)
        .and_then(|code| code.parse::<u16>().ok())
        .filter(|code| (100..=699).contains(code))
        .ok_or_else(|| DecodeError::Malformed(format!("invalid status code in {line:?}")))?;
    let reason = parts.next().unwrap_or_default().trim();
    Ok((code, reason))
}

pub fn parse_cseq(value: &str) -> Option<(u32, &str)> {
    let mut parts = value.split_whitespace();
    let seq = parts.next()?.parse().ok()?;
    let method = parts.next()?;
    match parts.next() {
        Some(_) => None,
        None => Some((seq, method)),
    }
}

fn expand_compact(name: &str) -> &str {
    if name.len() != 1 {
        return name;
    }
    match name.as_bytes()[0].to_ascii_lowercase() {
        b'v' => "Via",
        b'f' => "From",
        b't' => "To",
        b'i' => "Call-ID",
        b'l' => "Content-Length",
        b'm' => "Contact",
        b'c' => "Content-Type",
        b'e' => "Content-Encoding",
        b'k' => "Supported",
        b's' => "Subject",
        _ => name,
    }
}

use core::fmt::Write;

use md5::{Digest, Md5};
use thiserror::Error;

use crate::message::{AuthorizationHeader, SipResponse};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("response carries no {0} header")]
    MissingChallenge(&'static str),
    #[error("challenge is missing the {0} parameter")]
    MissingParameter(&'static str),
    #[error("unsupported authentication scheme: {0}")]
    UnsupportedScheme(String),
    #[error("unsupported digest algorithm: {0}")]
    UnsupportedAlgorithm(String),
    #[error("unsupported qop options: {0}")]
    UnsupportedQop(String),
    #[error("status {0} is not an authentication challenge")]
    NotAChallenge(u16),
}

/// Which side asked for credentials: the registrar (401) or a proxy (407).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthKind {
    Www,
    Proxy,
}

impl AuthKind {
    pub fn from_status(status: u16) -> Option<Self> {
        match status {
            401 => Some(AuthKind::Www),
            407 => Some(AuthKind::Proxy),
            _ => None,
        }
    }

    pub fn challenge_header(self) -> &'static str {
        match self {
            AuthKind::Www => "WWW-Authenticate",
            AuthKind::Proxy => "Proxy-Authenticate",
        }
    }

    pub fn authorization_header(self) -> &'static str {
        match self {
            AuthKind::Www => "Authorization",
            AuthKind::Proxy => "Proxy-Authorization",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Algorithm {
    Md5,
    Md5Sess,
}

impl Algorithm {
    pub fn parse(input: &str) -> Option<Self> {
        if input.eq_ignore_ascii_case("MD5") {
            Some(Algorithm::Md5)
        } else if input.eq_ignore_ascii_case("MD5-sess") {
            Some(Algorithm::Md5Sess)
        } else {
            None
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Algorithm::Md5 => "MD5",
            Algorithm::Md5Sess => "MD5-sess",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Qop {
    Auth,
    AuthInt,
}

impl Qop {
    pub fn as_str(&self) -> &'static str {
        match self {
            Qop::Auth => "auth",
            Qop::AuthInt => "auth-int",
        }
    }
}

/// Digest challenge taken from a 401/407 response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Challenge {
    pub kind: AuthKind,
    pub realm: String,
    pub nonce: String,
    pub algorithm: String,
    pub opaque: Option<String>,
    pub qop: Vec<String>,
    pub stale: bool,
}

impl Challenge {
    /// Pick the first usable digest challenge out of a 401/407.
    ///
    /// Servers may offer several (e.g. SHA-256 and MD5); the first one with
    /// a supported algorithm wins. If none qualifies the error for the first
    /// offer is returned.
    pub fn from_response(resp: &SipResponse) -> Result<Self, AuthError> {
        let kind = AuthKind::from_status(resp.status_code)
            .ok_or(AuthError::NotAChallenge(resp.status_code))?;
        let header = kind.challenge_header();

        let mut first_err = None;
        for value in resp.headers.get_all(header) {
            match parse_challenge(kind, value) {
                Ok(challenge) => match Algorithm::parse(&challenge.algorithm) {
                    Some(_) => return Ok(challenge),
                    None => {
                        first_err.get_or_insert(AuthError::UnsupportedAlgorithm(
                            challenge.algorithm.clone(),
                        ));
                    }
                },
                Err(err) => {
                    first_err.get_or_insert(err);
                }
            }
        }
        Err(first_err.unwrap_or(AuthError::MissingChallenge(header)))
    }

    fn select_qop(&self) -> Result<Option<Qop>, AuthError> {
        if self.qop.is_empty() {
            return Ok(None);
        }
        let offered = |wanted: &str| self.qop.iter().any(|q| q.eq_ignore_ascii_case(wanted));
        if offered("auth") {
            Ok(Some(Qop::Auth))
        } else if offered("auth-int") {
            Ok(Some(Qop::AuthInt))
        } else {
            Err(AuthError::UnsupportedQop(self.qop.join(",")))
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DigestCredentials<'a> {
    pub username: &'a str,
    pub password: &'a str,
}

/// Client-chosen values for qop digests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientNonce<'a> {
    pub cnonce: &'a str,
    pub nonce_count: u32,
}

pub fn parse_challenge(kind: AuthKind, input: &str) -> Result<Challenge, AuthError> {
    let input = input.trim();
    let (scheme, params) = input.split_once(char::is_whitespace).unwrap_or((input, ""));
    if !scheme.eq_ignore_ascii_case("digest") {
        return Err(AuthError::UnsupportedScheme(scheme.to_string()));
    }

    let mut realm = None;
    let mut nonce = None;
    let mut algorithm = Algorithm::Md5.as_str().to_string();
    let mut opaque = None;
    let mut qop = Vec::new();
    let mut stale = false;

    for param in split_params(params) {
        let Some((key, raw_val)) = param.split_once('=') else {
            continue;
        };
        let val = raw_val.trim().trim_matches('"');
        match key.trim().to_ascii_lowercase().as_str() {
            "realm" => realm = Some(val.to_string()),
            "nonce" => nonce = Some(val.to_string()),
            "algorithm" => algorithm = val.to_string(),
            "opaque" => opaque = Some(val.to_string()),
            "qop" => {
                qop = val
                    .split(',')
                    .map(str::trim)
                    .filter(|q| !q.is_empty())
                    .map(str::to_string)
                    .collect()
            }
            "stale" => stale = val.eq_ignore_ascii_case("true"),
            _ => {}
        }
    }

    Ok(Challenge {
        kind,
        realm: realm.ok_or(AuthError::MissingParameter("realm"))?,
        nonce: nonce.ok_or(AuthError::MissingParameter("nonce"))?,
        algorithm,
        opaque,
        qop,
        stale,
    })
}

/// Split on commas that are not inside a quoted string.
fn split_params(s: &str) -> Vec<&str> {
    let mut result = Vec::new();
    let mut start = 0;
    let mut in_quotes = false;

    for (i, c) in s.char_indices() {
        match c {
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => {
                result.push(&s[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    if start < s.len() {
        result.push(&s[start..]);
    }
    result
}

pub fn authorization_header(
    challenge: &Challenge,
    creds: &DigestCredentials<'_>,
    method: &str,
    uri: &str,
    client: &ClientNonce<'_>,
) -> Result<AuthorizationHeader, AuthError> {
    let algorithm = Algorithm::parse(&challenge.algorithm)
        .ok_or_else(|| AuthError::UnsupportedAlgorithm(challenge.algorithm.clone()))?;
    let qop = challenge.select_qop()?;
    let response = compute_digest_response(challenge, creds, method, uri, client)?;

    let mut value = String::new();
    let _ = write!(
        value,
        "Digest username=\"{}\", realm=\"{}\", nonce=\"{}\", uri=\"{}\", response=\"{}\", algorithm={}",
        creds.username,
        challenge.realm,
        challenge.nonce,
        uri,
        response,
        algorithm.as_str()
    );
    if let Some(qop) = qop {
        let _ = write!(
            value,
            ", cnonce=\"{}\", qop={}, nc={:08x}",
            client.cnonce,
            qop.as_str(),
            client.nonce_count
        );
    }
    if let Some(opaque) = &challenge.opaque {
        let _ = write!(value, ", opaque=\"{}\"", opaque);
    }

    Ok(AuthorizationHeader {
        kind: challenge.kind,
        value,
    })
}

/// RFC 2617 / RFC 7616 request-digest. The request body is always empty for
/// REGISTER, which is what `auth-int` hashes.
pub fn compute_digest_response(
    challenge: &Challenge,
    creds: &DigestCredentials<'_>,
    method: &str,
    uri: &str,
    client: &ClientNonce<'_>,
) -> Result<String, AuthError> {
    let algorithm = Algorithm::parse(&challenge.algorithm)
        .ok_or_else(|| AuthError::UnsupportedAlgorithm(challenge.algorithm.clone()))?;
    let qop = challenge.select_qop()?;

    let mut ha1 = md5_hex(
        format!("{}:{}:{}", creds.username, challenge.realm, creds.password).as_bytes(),
    );
    if algorithm == Algorithm::Md5Sess {
        ha1 = md5_hex(format!("{}:{}:{}", ha1, challenge.nonce, client.cnonce).as_bytes());
    }

    let ha2 = match qop {
        Some(Qop::AuthInt) => md5_hex(format!("{}:{}:{}", method, uri, md5_hex(b"")).as_bytes()),
        _ => md5_hex(format!("{}:{}", method, uri).as_bytes()),
    };

    let combo = match qop {
        Some(qop) => format!(
            "{}:{}:{:08x}:{}:{}:{}",
            ha1,
            challenge.nonce,
            client.nonce_count,
            client.cnonce,
            qop.as_str(),
            ha2
        ),
        None => format!("{}:{}:{}", ha1, challenge.nonce, ha2),
    };

    Ok(md5_hex(combo.as_bytes()))
}

fn md5_hex(data: &[u8]) -> String {
    let digest = Md5::digest(data);
    let mut out = String::with_capacity(32);
    for b in digest.iter() {
        let _ = write!(out, "{:02x}", b);
    }
    out
}

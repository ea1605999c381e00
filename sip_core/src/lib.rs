//! Minimal SIP user-agent core for registration health checks.
//!
//! One REGISTER transaction over UDP: build and encode the request, decode
//! responses, answer a single digest challenge and report the final status.
//! Nothing here prints; diagnostics go through the `log` facade.

use std::time::Duration;

use thiserror::Error;

pub mod auth;
pub mod message;
pub mod registration;
pub mod transport;

pub use auth::{
    authorization_header, compute_digest_response, parse_challenge, AuthError, AuthKind,
    Challenge, ClientNonce, DigestCredentials,
};
pub use message::{
    decode, encode, is_request, AuthorizationHeader, Header, Headers, Method, SipRequest,
    SipResponse,
};
pub use registration::{deadline_after, Account, Failure, RegistrationClient, TransactionState};
pub use transport::{Datagram, Transport, UdpTransport};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("malformed message: {0}")]
    Malformed(String),
    #[error("truncated message: Content-Length {declared} but {available} bytes present")]
    Truncated { declared: usize, available: usize },
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("local UDP port {0} is already in use")]
    AddressInUse(u16),
    #[error("receive timed out")]
    Timeout,
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("no final response within {}s", .0.as_secs_f32())]
    Timeout(Duration),
    #[error("registration rejected with status {0}")]
    Rejected(u16),
    #[error("authentication failed with status {0}")]
    AuthFailed(u16),
    #[error("protocol error: {0}")]
    Protocol(#[from] DecodeError),
    #[error("unusable authentication challenge: {0}")]
    Auth(#[from] AuthError),
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
    #[error("invalid state: {0}")]
    InvalidState(&'static str),
}

impl ProbeError {
    /// SIP status that ended the transaction, if one did.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            ProbeError::Rejected(code) | ProbeError::AuthFailed(code) => Some(*code),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, ProbeError>;

use std::time::Duration;

use sip_core::{ProbeError, TransportError};
use thiserror::Error;

pub mod cli;
pub mod probe;
pub mod settings;

pub use probe::{check, run, ProbeConfig, ProbeStatus, Report};

#[derive(Debug, Error)]
pub enum SetupError {
    #[error("invalid server address {0:?}")]
    InvalidAddress(String),
    #[error("cannot resolve {addr}: {source}")]
    Resolve {
        addr: String,
        #[source]
        source: std::io::Error,
    },
    #[error("resolving {addr} took longer than {}s", .timeout.as_secs_f32())]
    ResolveTimeout { addr: String, timeout: Duration },
    #[error("{0} has no IPv4 address")]
    NoIpv4(String),
    #[error(transparent)]
    Bind(TransportError),
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Setup(#[from] SetupError),
    #[error(transparent)]
    Probe(#[from] ProbeError),
}

impl AppError {
    /// SIP status behind the failure, reported as a return code.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            AppError::Probe(err) => err.status_code(),
            AppError::Setup(_) => None,
        }
    }
}

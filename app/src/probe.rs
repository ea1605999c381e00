use std::fmt;
use std::io::Write;
use std::net::{IpAddr, SocketAddr, ToSocketAddrs};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, info, warn};
use sip_core::{deadline_after, Account, RegistrationClient, UdpTransport};

use crate::{AppError, SetupError};

pub const SERVICE_NAME: &str = "SIP REGISTRATION CHECKER";
pub const DEFAULT_SIP_PORT: u16 = 5060;

/// Upper bound for the courtesy un-REGISTER after a successful check.
const UNREGISTER_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, PartialEq)]
pub struct ProbeConfig {
    pub addr: String,
    pub account_id: String,
    pub account_password: String,
    pub domain: Option<String>,
    pub local_port: u16,
    pub timeout: Duration,
    pub expires: u32,
    pub user_agent: Option<String>,
    pub unregister: bool,
}

impl ProbeConfig {
    /// Registrar domain; the server address unless set explicitly.
    pub fn domain(&self) -> &str {
        match &self.domain {
            Some(domain) => domain,
            None => strip_scheme(&self.addr),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeStatus {
    Ok,
    Critical,
}

impl ProbeStatus {
    pub fn exit_code(self) -> u8 {
        match self {
            ProbeStatus::Ok => 0,
            ProbeStatus::Critical => 2,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            ProbeStatus::Ok => "OK",
            ProbeStatus::Critical => "CRITICAL",
        }
    }
}

/// The single line a check prints.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Report {
    pub status: ProbeStatus,
    pub message: String,
}

impl Report {
    pub fn success() -> Self {
        Self {
            status: ProbeStatus::Ok,
            message: "Registration was success".into(),
        }
    }

    pub fn exception(details: impl fmt::Display) -> Self {
        Self {
            status: ProbeStatus::Critical,
            message: format!("Failed (exception: {details})"),
        }
    }

    pub fn from_error(err: &AppError) -> Self {
        match err.status_code() {
            Some(code) => Self {
                status: ProbeStatus::Critical,
                message: format!("Failed (return code: {code})"),
            },
            None => Self::exception(err),
        }
    }
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} - {}", SERVICE_NAME, self.status.label(), self.message)
    }
}

/// Run one check and write its status line to `out`.
pub fn run(config: &ProbeConfig, out: &mut dyn Write) -> ProbeStatus {
    let report = match check(config) {
        Ok(_) => Report::success(),
        Err(err) => {
            info!("check failed: {err}");
            Report::from_error(&err)
        }
    };
    emit(&report, out)
}

pub fn emit(report: &Report, out: &mut dyn Write) -> ProbeStatus {
    if let Err(err) = writeln!(out, "{report}").and_then(|_| out.flush()) {
        warn!("failed to write status line: {err}");
    }
    report.status
}

/// Register once against the configured server. The socket lives only for
/// the duration of this call.
pub fn check(config: &ProbeConfig) -> Result<u16, AppError> {
    let deadline = deadline_after(config.timeout);
    let server = resolve_within(&config.addr, deadline.saturating_duration_since(Instant::now()))?;
    let transport = UdpTransport::bind(config.local_port).map_err(SetupError::Bind)?;

    let mut account = Account::new(&config.account_id, &config.account_password, config.domain());
    account.expires = config.expires;
    account.user_agent = config.user_agent.clone();
    debug!("checking {} via {}", account.aor(), server);

    let mut client = RegistrationClient::new(transport, account, server)?;
    let code = client.register(deadline.saturating_duration_since(Instant::now()))?;

    if config.unregister {
        let budget = deadline
            .saturating_duration_since(Instant::now())
            .min(UNREGISTER_TIMEOUT);
        if budget.is_zero() {
            warn!("no time left to unregister");
        } else if let Err(err) = client.unregister(budget) {
            warn!("unregister failed: {err}");
        }
    }

    Ok(code)
}

/// Where `--addr` points before any name lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Target {
    Literal(SocketAddr),
    Host(String, u16),
}

fn parse_target(addr: &str) -> Result<Target, SetupError> {
    let target = strip_scheme(addr.trim());
    if target.is_empty() {
        return Err(SetupError::InvalidAddress(addr.to_string()));
    }
    if let Ok(socket) = target.parse::<SocketAddr>() {
        return Ok(Target::Literal(socket));
    }
    if let Ok(ip) = target.parse::<IpAddr>() {
        return Ok(Target::Literal(SocketAddr::new(ip, DEFAULT_SIP_PORT)));
    }

    match target.rsplit_once(':') {
        Some((host, port)) => {
            let port = port
                .parse::<u16>()
                .map_err(|_| SetupError::InvalidAddress(addr.to_string()))?;
            Ok(Target::Host(host.to_string(), port))
        }
        None => Ok(Target::Host(target.to_string(), DEFAULT_SIP_PORT)),
    }
}

/// Resolve `host`, `host:port` or `sip:host[:port]` to an IPv4 socket address.
pub fn resolve(addr: &str) -> Result<SocketAddr, SetupError> {
    match parse_target(addr)? {
        Target::Literal(socket) => require_ipv4(addr, std::iter::once(socket)),
        Target::Host(host, port) => lookup(addr, &host, port),
    }
}

/// Like [`resolve`], but gives up on a name lookup after `timeout`.
///
/// The system resolver cannot be cancelled, so the lookup runs on its own
/// thread and is abandoned when the time runs out.
pub fn resolve_within(addr: &str, timeout: Duration) -> Result<SocketAddr, SetupError> {
    let (host, port) = match parse_target(addr)? {
        Target::Literal(socket) => return require_ipv4(addr, std::iter::once(socket)),
        Target::Host(host, port) => (host, port),
    };
    let timed_out = || SetupError::ResolveTimeout {
        addr: addr.to_string(),
        timeout,
    };
    if timeout.is_zero() {
        return Err(timed_out());
    }

    let (tx, rx) = mpsc::channel();
    let owned = addr.to_string();
    thread::Builder::new()
        .name("resolver".into())
        .spawn(move || {
            let _ = tx.send(lookup(&owned, &host, port));
        })
        .map_err(|source| SetupError::Resolve {
            addr: addr.to_string(),
            source,
        })?;

    match rx.recv_timeout(timeout) {
        Ok(result) => result,
        Err(RecvTimeoutError::Timeout) => Err(timed_out()),
        Err(RecvTimeoutError::Disconnected) => Err(SetupError::Resolve {
            addr: addr.to_string(),
            source: std::io::Error::other("resolver thread exited"),
        }),
    }
}

fn lookup(addr: &str, host: &str, port: u16) -> Result<SocketAddr, SetupError> {
    debug!("resolving {}:{}", host, port);
    let candidates = (host, port)
        .to_socket_addrs()
        .map_err(|source| SetupError::Resolve {
            addr: addr.to_string(),
            source,
        })?;
    require_ipv4(addr, candidates)
}

fn require_ipv4(
    addr: &str,
    mut candidates: impl Iterator<Item = SocketAddr>,
) -> Result<SocketAddr, SetupError> {
    candidates
        .find(SocketAddr::is_ipv4)
        .ok_or_else(|| SetupError::NoIpv4(addr.to_string()))
}

fn strip_scheme(addr: &str) -> &str {
    addr.strip_prefix("sip:").unwrap_or(addr)
}

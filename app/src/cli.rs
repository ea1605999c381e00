use std::time::Duration;

use clap::{error::ErrorKind, ArgAction, Parser};

use crate::{probe::ProbeConfig, settings::SETTINGS, Report, SetupError};

/// Nagios-style check that a SIP account can register.
///
/// Prints one status line and exits 0 (OK) or 2 (CRITICAL).
#[derive(Parser, Debug, PartialEq)]
#[command(name = "check_sip_registration", version)]
pub struct Cli {
    /// SIP server address, `host` or `host:port`
    #[arg(short = 'a', long = "addr")]
    pub addr: String,
    /// Account ID (username)
    #[arg(short = 'i', long = "account_id")]
    pub account_id: String,
    /// Account password
    #[arg(short = 'p', long = "account_password")]
    pub account_password: String,
    /// Registrar domain used in the request URI and identity [default: --addr]
    #[arg(short = 'd', long = "domain")]
    pub domain: Option<String>,
    /// Local UDP port, 0 for an ephemeral port
    #[arg(short = 'l', long = "local_port", default_value_t = SETTINGS.local_port)]
    pub local_port: u16,
    /// Seconds to wait for the final registration response
    #[arg(short = 't', long = "timeout", default_value_t = SETTINGS.timeout_secs, value_parser = parse_timeout)]
    pub timeout: f64,
    /// Expires requested for the binding, in seconds
    #[arg(short = 'e', long = "expires", default_value_t = SETTINGS.expires)]
    pub expires: u32,
    /// User-Agent header value, empty to omit
    #[arg(long = "user_agent", default_value = SETTINGS.user_agent)]
    pub user_agent: String,
    /// Leave the binding in place instead of unregistering afterwards
    #[arg(long = "keep_registration")]
    pub keep_registration: bool,
    /// Log to stderr; repeat for more detail
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count)]
    pub verbose: u8,
}

impl Cli {
    pub fn into_config(self) -> Result<ProbeConfig, SetupError> {
        if self.addr.trim().is_empty() {
            return Err(SetupError::InvalidConfig("server address is empty".into()));
        }
        if self.account_id.trim().is_empty() {
            return Err(SetupError::InvalidConfig("account id is empty".into()));
        }

        Ok(ProbeConfig {
            addr: self.addr,
            account_id: self.account_id,
            account_password: self.account_password,
            domain: self.domain.filter(|d| !d.trim().is_empty()),
            local_port: self.local_port,
            timeout: Duration::from_secs_f64(self.timeout),
            expires: self.expires,
            user_agent: Some(self.user_agent).filter(|ua| !ua.is_empty()),
            unregister: !self.keep_registration,
        })
    }

    /// `log` filter for the `-v` count.
    pub fn log_level(&self) -> &'static str {
        match self.verbose {
            0 => "off",
            1 => "info",
            2 => "debug",
            _ => "trace",
        }
    }
}

/// Status line for a command line that did not lead to a check.
///
/// Help and version requests count too: no registration was attempted, so
/// they never read as OK.
pub fn argument_report(err: &clap::Error) -> Report {
    match err.kind() {
        ErrorKind::DisplayHelp | ErrorKind::DisplayHelpOnMissingArgumentOrSubcommand => {
            Report::exception("usage requested, no check was run")
        }
        ErrorKind::DisplayVersion => Report::exception("version requested, no check was run"),
        _ => {
            let rendered = err.to_string();
            let summary = rendered
                .lines()
                .next()
                .unwrap_or("invalid arguments")
                .trim_start_matches("error: ");
            Report::exception(format_args!("invalid arguments: {summary}"))
        }
    }
}

fn parse_timeout(input: &str) -> Result<f64, String> {
    let secs: f64 = input
        .parse()
        .map_err(|_| format!("{input:?} is not a number of seconds"))?;
    // Duration::from_secs_f64 panics on values it cannot represent.
    if !secs.is_finite() || secs <= 0.0 || secs > 86_400.0 {
        return Err("timeout must be greater than 0 and at most 86400 seconds".into());
    }
    Ok(secs)
}

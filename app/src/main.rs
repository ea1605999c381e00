use std::io;
use std::process::ExitCode;

use clap::Parser;

use sip_reg_checker::{
    cli::{self, Cli},
    probe, AppError, Report,
};

fn main() -> ExitCode {
    let args = match Cli::try_parse() {
        Ok(args) => args,
        Err(err) => {
            // Usage, help and version text go to stderr; stdout keeps its
            // single status line.
            eprint!("{err}");
            let report = cli::argument_report(&err);
            return exit(probe::emit(&report, &mut io::stdout().lock()));
        }
    };

    // Diagnostics only ever go to stderr, and are off unless asked for.
    let env = env_logger::Env::default()
        .filter_or("SIP_CHECK_LOG", args.log_level())
        .write_style_or("SIP_CHECK_LOG_STYLE", "auto");
    env_logger::Builder::from_env(env)
        .target(env_logger::Target::Stderr)
        .init();

    let mut stdout = io::stdout().lock();
    let status = match args.into_config() {
        Ok(config) => probe::run(&config, &mut stdout),
        Err(err) => probe::emit(&Report::from_error(&AppError::Setup(err)), &mut stdout),
    };
    exit(status)
}

fn exit(status: sip_reg_checker::ProbeStatus) -> ExitCode {
    ExitCode::from(status.exit_code())
}

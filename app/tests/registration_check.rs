mod common;

use std::net::{Ipv4Addr, SocketAddr, UdpSocket};
use std::time::{Duration, Instant};

use common::{free_port, header, MockRegistrar, Reply};
use sip_reg_checker::{check, run, AppError, ProbeConfig, ProbeStatus, SetupError};
use sip_core::ProbeError;

fn config(server: SocketAddr) -> ProbeConfig {
    ProbeConfig {
        addr: server.to_string(),
        account_id: "alice".into(),
        account_password: "secret".into(),
        domain: None,
        local_port: 0,
        timeout: Duration::from_secs(2),
        expires: 60,
        user_agent: Some("registration-check-tests".into()),
        unregister: false,
    }
}

/// Run the probe and return its status plus the single line it printed.
fn run_probe(config: &ProbeConfig) -> (ProbeStatus, String) {
    let mut out = Vec::new();
    let status = run(config, &mut out);
    let text = String::from_utf8(out).unwrap();
    assert_eq!(text.matches('\n').count(), 1, "expected one line, got {text:?}");
    assert!(text.ends_with('\n'));
    (status, text.trim_end().to_string())
}

#[test]
fn immediate_success_is_ok() {
    let registrar = MockRegistrar::start(vec![vec![Reply::Status(200)]]);
    let (status, line) = run_probe(&config(registrar.addr()));

    assert_eq!(status, ProbeStatus::Ok);
    assert_eq!(status.exit_code(), 0);
    assert_eq!(line, "SIP REGISTRATION CHECKER OK - Registration was success");

    let requests = registrar.requests();
    assert_eq!(requests.len(), 1);
    let register = &requests[0];
    assert!(register.starts_with(&format!("REGISTER sip:{} SIP/2.0\r\n", registrar.addr())));
    assert_eq!(header(register, "Expires"), Some("60"));
    assert_eq!(header(register, "User-Agent"), Some("registration-check-tests"));
    assert_eq!(header(register, "Authorization"), None);
}

#[test]
fn answered_challenge_is_ok() {
    let registrar = MockRegistrar::start(vec![
        vec![Reply::Challenge],
        vec![Reply::Verify { password: "secret" }],
    ]);
    let (status, line) = run_probe(&config(registrar.addr()));

    assert_eq!(status, ProbeStatus::Ok, "{line}");
    let requests = registrar.requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(header(&requests[1], "CSeq"), Some("2 REGISTER"));
    assert_eq!(
        header(&requests[0], "Call-ID"),
        header(&requests[1], "Call-ID")
    );
    assert!(header(&requests[1], "Authorization")
        .unwrap()
        .contains("qop=auth"));
}

#[test]
fn proxy_challenge_is_ok() {
    let registrar = MockRegistrar::start(vec![
        vec![Reply::ProxyChallenge],
        vec![Reply::Verify { password: "secret" }],
    ]);
    let (status, _) = run_probe(&config(registrar.addr()));

    assert_eq!(status, ProbeStatus::Ok);
    assert!(header(&registrar.requests()[1], "Proxy-Authorization").is_some());
}

#[test]
fn wrong_password_reports_return_code() {
    let registrar = MockRegistrar::start(vec![
        vec![Reply::Challenge],
        vec![Reply::Verify { password: "other" }],
    ]);
    let (status, line) = run_probe(&config(registrar.addr()));

    assert_eq!(status, ProbeStatus::Critical);
    assert_eq!(status.exit_code(), 2);
    assert_eq!(line, "SIP REGISTRATION CHECKER CRITICAL - Failed (return code: 403)");
}

#[test]
fn second_challenge_fails_without_looping() {
    let registrar = MockRegistrar::start(vec![
        vec![Reply::Challenge],
        vec![Reply::Challenge],
        vec![Reply::Challenge],
    ]);
    let cfg = config(registrar.addr());
    assert!(matches!(
        check(&cfg),
        Err(AppError::Probe(ProbeError::AuthFailed(401)))
    ));
    assert_eq!(registrar.requests().len(), 2);

    let registrar = MockRegistrar::start(vec![vec![Reply::Challenge], vec![Reply::Challenge]]);
    let (status, line) = run_probe(&config(registrar.addr()));
    assert_eq!(status, ProbeStatus::Critical);
    assert_eq!(line, "SIP REGISTRATION CHECKER CRITICAL - Failed (return code: 401)");
}

#[test]
fn silent_server_times_out_and_releases_socket() {
    let registrar = MockRegistrar::start(vec![]);
    let local_port = free_port();
    let mut cfg = config(registrar.addr());
    cfg.local_port = local_port;
    cfg.timeout = Duration::from_millis(400);

    let started = Instant::now();
    let (status, line) = run_probe(&cfg);
    let elapsed = started.elapsed();

    assert_eq!(status, ProbeStatus::Critical);
    assert!(
        line.starts_with("SIP REGISTRATION CHECKER CRITICAL - Failed (exception: no final response"),
        "{line}"
    );
    assert!(elapsed >= Duration::from_millis(350), "returned after {elapsed:?}");
    assert!(elapsed < Duration::from_secs(2), "returned after {elapsed:?}");
    assert_eq!(registrar.requests().len(), 1);

    // The probe's socket is gone once run() returns.
    UdpSocket::bind((Ipv4Addr::UNSPECIFIED, local_port)).unwrap();
}

#[test]
fn provisional_response_keeps_waiting() {
    let registrar = MockRegistrar::start(vec![vec![Reply::Status(100), Reply::Status(200)]]);
    let (status, _) = run_probe(&config(registrar.addr()));
    assert_eq!(status, ProbeStatus::Ok);
}

#[test]
fn rejection_reports_return_code() {
    let registrar = MockRegistrar::start(vec![vec![Reply::Status(100), Reply::Status(404)]]);
    let (status, line) = run_probe(&config(registrar.addr()));
    assert_eq!(status, ProbeStatus::Critical);
    assert_eq!(line, "SIP REGISTRATION CHECKER CRITICAL - Failed (return code: 404)");
}

#[test]
fn malformed_response_is_critical() {
    let registrar = MockRegistrar::start(vec![vec![Reply::Raw(
        b"SIP/2.0 200 OK\r\nVia: SIP/2.0/UDP 127.0.0.1\r\n",
    )]]);
    let (status, line) = run_probe(&config(registrar.addr()));
    assert_eq!(status, ProbeStatus::Critical);
    assert!(line.contains("Failed (exception: protocol error"), "{line}");
}

#[test]
fn unregisters_after_success() {
    let registrar = MockRegistrar::start(vec![
        vec![Reply::Challenge],
        vec![Reply::Verify { password: "secret" }],
        vec![Reply::Verify { password: "secret" }],
    ]);
    let mut cfg = config(registrar.addr());
    cfg.unregister = true;
    let (status, _) = run_probe(&cfg);

    assert_eq!(status, ProbeStatus::Ok);
    let requests = registrar.requests();
    assert_eq!(requests.len(), 3);
    assert_eq!(header(&requests[2], "Expires"), Some("0"));
    assert_eq!(header(&requests[2], "CSeq"), Some("3 REGISTER"));
    assert!(header(&requests[2], "Authorization")
        .unwrap()
        .contains("nc=00000002"));
}

#[test]
fn failed_unregister_does_not_change_status() {
    let registrar = MockRegistrar::start(vec![vec![Reply::Status(200)], vec![Reply::Status(500)]]);
    let mut cfg = config(registrar.addr());
    cfg.unregister = true;
    let (status, line) = run_probe(&cfg);

    assert_eq!(status, ProbeStatus::Ok);
    assert_eq!(line, "SIP REGISTRATION CHECKER OK - Registration was success");
    assert_eq!(registrar.requests().len(), 2);
}

#[test]
fn busy_local_port_is_a_setup_failure() {
    let registrar = MockRegistrar::start(vec![vec![Reply::Status(200)]]);
    let holder = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).unwrap();
    let mut cfg = config(registrar.addr());
    cfg.local_port = holder.local_addr().unwrap().port();

    assert!(matches!(
        check(&cfg),
        Err(AppError::Setup(SetupError::Bind(_)))
    ));
    let (status, line) = run_probe(&cfg);
    assert_eq!(status, ProbeStatus::Critical);
    assert_eq!(
        line,
        format!(
            "SIP REGISTRATION CHECKER CRITICAL - Failed (exception: local UDP port {} is already in use)",
            cfg.local_port
        )
    );
    assert!(registrar.requests().is_empty());
}

#[test]
fn garbage_reply_fails_fast() {
    let registrar = MockRegistrar::start(vec![vec![Reply::Raw(b"XYZZY garbage\r\n\r\n")]]);
    let mut cfg = config(registrar.addr());
    cfg.timeout = Duration::from_secs(5);

    let started = Instant::now();
    let (status, line) = run_probe(&cfg);
    assert_eq!(status, ProbeStatus::Critical);
    assert!(line.contains("Failed (exception: protocol error"), "{line}");
    assert!(started.elapsed() < Duration::from_secs(4));
}

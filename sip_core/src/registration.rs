use core::fmt::Write;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use heapless::String as HString;
use log::{debug, info};

use crate::{
    auth::{authorization_header, Challenge, ClientNonce, DigestCredentials},
    message::{decode, encode, is_request, AuthorizationHeader, Method, SipRequest, SipResponse},
    transport::Transport,
    ProbeError, Result, TransportError,
};

pub const DEFAULT_EXPIRES: u32 = 300;
pub const MAX_TOKEN_LEN: usize = 32;

/// RFC 3261 magic cookie every branch must start with.
const BRANCH_COOKIE: &str = "z9hG4bK";

/// Deadline used when `now + budget` does not fit in an `Instant`.
const FAR_FUTURE: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

pub type Token = HString<MAX_TOKEN_LEN>;

/// The account being checked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Account {
    pub username: String,
    pub password: String,
    /// Registrar domain, `host` or `host:port`.
    pub domain: String,
    pub expires: u32,
    pub user_agent: Option<String>,
}

impl Account {
    pub fn new(username: &str, password: &str, domain: &str) -> Self {
        Self {
            username: username.to_string(),
            password: password.to_string(),
            domain: domain.to_string(),
            expires: DEFAULT_EXPIRES,
            user_agent: None,
        }
    }

    /// Address of record, `sip:user@domain`.
    pub fn aor(&self) -> String {
        format!("sip:{}@{}", self.username, self.domain)
    }

    pub fn registrar_uri(&self) -> String {
        format!("sip:{}", self.domain)
    }

    pub fn credentials(&self) -> DigestCredentials<'_> {
        DigestCredentials {
            username: &self.username,
            password: &self.password,
        }
    }
}

/// Why a transaction ended in [`TransactionState::Failed`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Failure {
    Rejected(u16),
    AuthFailed(u16),
    Protocol,
    Transport,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransactionState {
    #[default]
    Idle,
    RequestSent,
    ChallengeReceived,
    Completed(u16),
    Failed(Failure),
    TimedOut,
}

impl TransactionState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TransactionState::Completed(_) | TransactionState::Failed(_) | TransactionState::TimedOut
        )
    }
}

/// Drives one REGISTER transaction (and optionally its un-REGISTER) to a
/// final state over a [`Transport`].
#[derive(Debug)]
pub struct RegistrationClient<T: Transport> {
    transport: T,
    account: Account,
    server: SocketAddr,
    local: SocketAddr,
    state: TransactionState,
    call_id: Token,
    from_tag: Token,
    branch: Token,
    cseq: u32,
    challenge: Option<Challenge>,
    nonce_count: u32,
}

impl<T: Transport> RegistrationClient<T> {
    pub fn new(transport: T, account: Account, server: SocketAddr) -> Result<Self> {
        let local = transport.local_addr_towards(server)?;
        Ok(Self {
            transport,
            account,
            server,
            local,
            state: TransactionState::Idle,
            call_id: random_token(""),
            from_tag: random_token(""),
            branch: Token::new(),
            cseq: 0,
            challenge: None,
            nonce_count: 0,
        })
    }

    /// Register the account, answering at most one digest challenge.
    ///
    /// Returns the final 2xx status. Only callable once per client.
    pub fn register(&mut self, timeout: Duration) -> Result<u16> {
        if self.state != TransactionState::Idle {
            return Err(ProbeError::InvalidState("registration already attempted"));
        }
        let expires = self.account.expires;
        let result = self.transact(expires, timeout);
        self.finish(&result);
        if let Ok(code) = result {
            info!("registered {} with status {}", self.account.aor(), code);
        }
        result
    }

    /// Remove the binding created by [`register`](Self::register) with an
    /// `Expires: 0` REGISTER in the same call.
    ///
    /// The last challenge is reused so most servers accept the request
    /// without another round trip; one fresh challenge is still answered.
    pub fn unregister(&mut self, timeout: Duration) -> Result<u16> {
        if !matches!(self.state, TransactionState::Completed(_)) {
            return Err(ProbeError::InvalidState("not registered"));
        }
        let result = self.transact(0, timeout);
        self.finish(&result);
        if let Ok(code) = result {
            info!("unregistered {} with status {}", self.account.aor(), code);
        }
        result
    }

    pub fn state(&self) -> TransactionState {
        self.state
    }

    pub fn call_id(&self) -> &str {
        &self.call_id
    }

    pub fn cseq(&self) -> u32 {
        self.cseq
    }

    pub fn into_transport(self) -> T {
        self.transport
    }

    fn transact(&mut self, expires: u32, budget: Duration) -> Result<u16> {
        let deadline = deadline_after(budget);
        let mut challenged = false;

        let authorization = self.next_authorization()?;
        self.send_register(expires, authorization)?;

        loop {
            let resp = self.await_response(deadline, budget)?;
            if resp.is_provisional() {
                debug!("provisional {} {}", resp.status_code, resp.reason);
                continue;
            }
            if resp.is_success() {
                self.set_state(TransactionState::Completed(resp.status_code));
                return Ok(resp.status_code);
            }
            match resp.status_code {
                code @ (401 | 407) if !challenged => {
                    challenged = true;
                    let challenge = Challenge::from_response(&resp)?;
                    debug!(
                        "challenged by {} (realm {:?}, algorithm {}, stale {})",
                        code, challenge.realm, challenge.algorithm, challenge.stale
                    );
                    self.challenge = Some(challenge);
                    self.nonce_count = 0;
                    self.set_state(TransactionState::ChallengeReceived);

                    let authorization = self.next_authorization()?;
                    self.send_register(expires, authorization)?;
                }
                code @ (401 | 407) => return Err(ProbeError::AuthFailed(code)),
                code => return Err(ProbeError::Rejected(code)),
            }
        }
    }

    fn build_register(&self, expires: u32, authorization: Option<AuthorizationHeader>) -> SipRequest {
        let aor = self.account.aor();
        SipRequest {
            method: Method::Register,
            uri: self.account.registrar_uri(),
            via: format!("SIP/2.0/UDP {};branch={};rport", self.local, self.branch),
            from: format!("<{}>;tag={}", aor, self.from_tag),
            to: format!("<{}>", aor),
            call_id: self.call_id.to_string(),
            cseq: self.cseq,
            authorization,
            contact: format!("<sip:{}@{}>", self.account.username, self.local),
            expires,
            user_agent: self.account.user_agent.clone(),
        }
    }

    fn send_register(&mut self, expires: u32, authorization: Option<AuthorizationHeader>) -> Result<()> {
        self.cseq = self.cseq.wrapping_add(1);
        self.branch = random_token(BRANCH_COOKIE);

        let req = self.build_register(expires, authorization);
        debug!(
            "sending REGISTER cseq {} expires {} to {}{}",
            req.cseq,
            expires,
            self.server,
            if req.authorization.is_some() { " with credentials" } else { "" }
        );
        self.transport.send_to(&encode(&req), self.server)?;
        self.set_state(TransactionState::RequestSent);
        Ok(())
    }

    /// Credentials for the next request, if a challenge has been seen.
    fn next_authorization(&mut self) -> Result<Option<AuthorizationHeader>> {
        if self.challenge.is_none() {
            return Ok(None);
        }
        self.nonce_count = self.nonce_count.wrapping_add(1);
        let cnonce = random_token("");
        let client = ClientNonce {
            cnonce: &cnonce,
            nonce_count: self.nonce_count,
        };
        let uri = self.account.registrar_uri();

        match &self.challenge {
            Some(challenge) => Ok(Some(authorization_header(
                challenge,
                &self.account.credentials(),
                Method::Register.as_str(),
                &uri,
                &client,
            )?)),
            None => Ok(None),
        }
    }

    /// Wait for a response that belongs to the outstanding request.
    fn await_response(&mut self, deadline: Instant, budget: Duration) -> Result<SipResponse> {
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(ProbeError::Timeout(budget));
            }

            let datagram = match self.transport.receive(remaining) {
                Ok(datagram) => datagram,
                Err(TransportError::Timeout) => return Err(ProbeError::Timeout(budget)),
                Err(err) => return Err(err.into()),
            };

            if datagram.source.ip() != self.server.ip() {
                debug!("ignoring datagram from {}", datagram.source);
                continue;
            }
            let payload = datagram.payload.as_slice();
            if payload.iter().all(u8::is_ascii_whitespace) {
                // RFC 5626 CRLF keep-alive
                continue;
            }
            if is_request(payload) {
                debug!("ignoring request from server");
                continue;
            }

            let resp = decode(payload)?;
            if !self.matches(&resp) {
                debug!(
                    "ignoring stray {} (call-id {:?}, cseq {:?})",
                    resp.status_code,
                    resp.call_id(),
                    resp.cseq()
                );
                continue;
            }
            return Ok(resp);
        }
    }

    fn matches(&self, resp: &SipResponse) -> bool {
        resp.call_id() == Some(self.call_id.as_str())
            && resp.cseq() == Some((self.cseq, Method::Register.as_str()))
    }

    fn finish(&mut self, result: &Result<u16>) {
        let state = match result {
            Ok(code) => TransactionState::Completed(*code),
            Err(ProbeError::Timeout(_)) => TransactionState::TimedOut,
            Err(ProbeError::Rejected(code)) => TransactionState::Failed(Failure::Rejected(*code)),
            Err(ProbeError::AuthFailed(code)) => {
                TransactionState::Failed(Failure::AuthFailed(*code))
            }
            Err(ProbeError::Protocol(_)) | Err(ProbeError::Auth(_)) => {
                TransactionState::Failed(Failure::Protocol)
            }
            Err(ProbeError::Transport(_)) => TransactionState::Failed(Failure::Transport),
            Err(ProbeError::InvalidState(_)) => return,
        };
        self.set_state(state);
    }

    fn set_state(&mut self, state: TransactionState) {
        if state != self.state {
            debug!("registration state -> {:?}", state);
            self.state = state;
        }
    }
}

/// `now + budget`, saturating instead of overflowing for huge budgets.
pub fn deadline_after(budget: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(budget)
        .or_else(|| now.checked_add(FAR_FUTURE))
        .unwrap_or(now)
}

fn random_token(prefix: &str) -> Token {
    let mut token = Token::new();
    let _ = write!(token, "{}{:016x}", prefix, rand::random::<u64>());
    token
}

//! Mock UDP registrar for end-to-end checks.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::net::{Ipv4Addr, SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use md5::{Digest, Md5};

pub const REALM: &str = "mock.example";
pub const NONCE: &str = "6c8e1b0a9f";

/// How the registrar answers one received request.
#[derive(Debug, Clone)]
pub enum Reply {
    Status(u16),
    /// 401 with a qop=auth digest challenge.
    Challenge,
    /// 407 with a plain (no qop) digest challenge.
    ProxyChallenge,
    /// 200 if the request carries a correct digest for `password`, else 403.
    Verify { password: &'static str },
    Raw(&'static [u8]),
}

pub struct MockRegistrar {
    addr: SocketAddr,
    running: Arc<AtomicBool>,
    requests: Arc<Mutex<Vec<String>>>,
    handle: Option<JoinHandle<()>>,
}

impl MockRegistrar {
    /// Each received request consumes the next batch of replies. Once the
    /// script runs out the registrar stays silent.
    pub fn start(script: Vec<Vec<Reply>>) -> Self {
        let socket = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
        socket
            .set_read_timeout(Some(Duration::from_millis(20)))
            .unwrap();
        let addr = socket.local_addr().unwrap();

        let running = Arc::new(AtomicBool::new(true));
        let requests = Arc::new(Mutex::new(Vec::new()));

        let handle = {
            let running = running.clone();
            let requests = requests.clone();
            let mut script: VecDeque<Vec<Reply>> = script.into();
            thread::spawn(move || {
                let mut buf = [0u8; 8192];
                while running.load(Ordering::SeqCst) {
                    let Ok((len, peer)) = socket.recv_from(&mut buf) else {
                        continue;
                    };
                    let request = String::from_utf8_lossy(&buf[..len]).into_owned();
                    requests.lock().unwrap().push(request.clone());
                    for reply in script.pop_front().unwrap_or_default() {
                        let payload = respond(&request, &reply);
                        let _ = socket.send_to(&payload, peer);
                    }
                }
            })
        };

        Self {
            addr,
            running,
            requests,
            handle: Some(handle),
        }
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }
}

impl Drop for MockRegistrar {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

pub fn header<'a>(message: &'a str, name: &str) -> Option<&'a str> {
    message.lines().find_map(|line| {
        let (n, v) = line.split_once(':')?;
        n.trim().eq_ignore_ascii_case(name).then(|| v.trim())
    })
}

fn respond(request: &str, reply: &Reply) -> Vec<u8> {
    let (code, extra) = match reply {
        Reply::Raw(bytes) => return bytes.to_vec(),
        Reply::Status(code) => (*code, None),
        Reply::Challenge => (
            401,
            Some(format!(
                "WWW-Authenticate: Digest realm=\"{REALM}\", nonce=\"{NONCE}\", qop=\"auth\", algorithm=MD5"
            )),
        ),
        Reply::ProxyChallenge => (
            407,
            Some(format!(
                "Proxy-Authenticate: Digest realm=\"{REALM}\", nonce=\"{NONCE}\""
            )),
        ),
        Reply::Verify { password } => {
            if digest_is_valid(request, password) {
                (200, None)
            } else {
                (403, None)
            }
        }
    };

    let mut out = format!("SIP/2.0 {code} {}\r\n", reason(code));
    for name in ["Via", "From", "Call-ID", "CSeq"] {
        out.push_str(&format!("{name}: {}\r\n", header(request, name).unwrap_or_default()));
    }
    out.push_str(&format!("To: {};tag=mock\r\n", header(request, "To").unwrap_or_default()));
    if code < 300 {
        if let Some(contact) = header(request, "Contact") {
            out.push_str(&format!("Contact: {contact}\r\n"));
        }
    }
    if let Some(extra) = extra {
        out.push_str(&extra);
        out.push_str("\r\n");
    }
    out.push_str("Content-Length: 0\r\n\r\n");
    out.into_bytes()
}

fn reason(code: u16) -> &'static str {
    match code {
        100 => "Trying",
        200 => "OK",
        401 => "Unauthorized",
        403 => "Forbidden",
        407 => "Proxy Authentication Required",
        _ => "Scripted",
    }
}

fn md5_hex(input: &str) -> String {
    Md5::digest(input.as_bytes())
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}

/// Server-side digest check, computed independently of the client code.
fn digest_is_valid(request: &str, password: &str) -> bool {
    let Some(auth) = header(request, "Authorization").or_else(|| header(request, "Proxy-Authorization")) else {
        return false;
    };
    let param = |key: &str| -> Option<String> {
        auth.trim_start_matches("Digest")
            .split(',')
            .filter_map(|p| p.trim().split_once('='))
            .find(|(k, _)| k.trim() == key)
            .map(|(_, v)| v.trim().trim_matches('"').to_string())
    };
    let (Some(username), Some(uri), Some(response)) = (param("username"), param("uri"), param("response")) else {
        return false;
    };
    if param("realm").as_deref() != Some(REALM) || param("nonce").as_deref() != Some(NONCE) {
        return false;
    }

    let ha1 = md5_hex(&format!("{username}:{REALM}:{password}"));
    let ha2 = md5_hex(&format!("REGISTER:{uri}"));
    let expected = match (param("qop"), param("nc"), param("cnonce")) {
        (Some(qop), Some(nc), Some(cnonce)) => {
            md5_hex(&format!("{ha1}:{NONCE}:{nc}:{cnonce}:{qop}:{ha2}"))
        }
        _ => md5_hex(&format!("{ha1}:{NONCE}:{ha2}")),
    };
    expected == response
}

/// A UDP port that was free a moment ago.
pub fn free_port() -> u16 {
    UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

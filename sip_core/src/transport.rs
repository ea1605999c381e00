use std::io::ErrorKind;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, SocketAddrV4, UdpSocket};
use std::time::Duration;

use log::debug;

use crate::TransportError;

/// Largest datagram we are willing to read.
pub const MAX_DATAGRAM: usize = 65_535;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Datagram {
    pub payload: Vec<u8>,
    pub source: SocketAddr,
}

/// Datagram transport driven by the registration client.
///
/// `receive` takes `&mut self`, so a transport never has more than one
/// receive outstanding.
pub trait Transport {
    fn send_to(&mut self, payload: &[u8], remote: SocketAddr) -> Result<(), TransportError>;

    /// Block until one datagram arrives or `timeout` elapses.
    fn receive(&mut self, timeout: Duration) -> Result<Datagram, TransportError>;

    /// Address the peer at `remote` should see us as (Via sent-by, Contact).
    fn local_addr_towards(&self, remote: SocketAddr) -> Result<SocketAddr, TransportError>;
}

/// One UDP socket, closed when the value is dropped.
#[derive(Debug)]
pub struct UdpTransport {
    socket: UdpSocket,
    rx_buf: Box<[u8]>,
}

impl UdpTransport {
    /// Bind `0.0.0.0:<local_port>`. Port 0 picks an ephemeral port.
    pub fn bind(local_port: u16) -> Result<Self, TransportError> {
        let addr = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, local_port);
        let socket = UdpSocket::bind(addr).map_err(|err| match err.kind() {
            ErrorKind::AddrInUse => TransportError::AddressInUse(local_port),
            _ => TransportError::Io(err),
        })?;
        debug!("bound SIP socket on {:?}", socket.local_addr());

        Ok(Self {
            socket,
            rx_buf: vec![0u8; MAX_DATAGRAM].into_boxed_slice(),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, TransportError> {
        Ok(self.socket.local_addr()?)
    }
}

impl Transport for UdpTransport {
    fn send_to(&mut self, payload: &[u8], remote: SocketAddr) -> Result<(), TransportError> {
        let sent = self.socket.send_to(payload, remote)?;
        debug!("sent {} of {} bytes to {}", sent, payload.len(), remote);
        Ok(())
    }

    fn receive(&mut self, timeout: Duration) -> Result<Datagram, TransportError> {
        // A zero read timeout is rejected by the OS; treat it as already elapsed.
        if timeout.is_zero() {
            return Err(TransportError::Timeout);
        }
        self.socket.set_read_timeout(Some(timeout))?;

        match self.socket.recv_from(&mut self.rx_buf) {
            Ok((len, source)) => Ok(Datagram {
                payload: self.rx_buf[..len].to_vec(),
                source,
            }),
            Err(err) if matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                Err(TransportError::Timeout)
            }
            Err(err) => Err(TransportError::Io(err)),
        }
    }

    fn local_addr_towards(&self, remote: SocketAddr) -> Result<SocketAddr, TransportError> {
        let local = self.socket.local_addr()?;
        if !local.ip().is_unspecified() {
            return Ok(local);
        }
        Ok(SocketAddr::new(outbound_ip(remote)?, local.port()))
    }
}

/// Local interface address the OS routes `remote` through.
///
/// Connecting a throwaway UDP socket sends nothing; it only resolves the route.
pub fn outbound_ip(remote: SocketAddr) -> Result<IpAddr, TransportError> {
    let probe = UdpSocket::bind(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0))?;
    probe.connect(remote)?;
    Ok(probe.local_addr()?.ip())
}

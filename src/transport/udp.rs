use std::io;
use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};
use std::time::Duration;

use crate::error::{Error, Result};
use crate::transport::Transport;

/// Maximum UDP payload we accept.
///
/// IPMI packets are small; 1 KiB covers the largest bridged SDR reply.
const DEFAULT_MAX_PACKET_SIZE: usize = 1024;

/// Default RMCP port.
pub const RMCP_PORT: u16 = 623;

/// Blocking UDP transport for RMCP/IPMI.
#[derive(Debug)]
pub struct UdpTransport {
    socket: UdpSocket,
    target: SocketAddr,
    max_packet_size: usize,
}

impl UdpTransport {
    /// Connect a UDP socket to an RMCP target.
    pub fn connect(target: SocketAddr) -> Result<Self> {
        let bind_addr = match target {
            SocketAddr::V4(_) => "0.0.0.0:0",
            SocketAddr::V6(_) => "[::]:0",
        };

        let socket = UdpSocket::bind(bind_addr)?;
        socket.connect(target)?;

        Ok(Self {
            socket,
            target,
            max_packet_size: DEFAULT_MAX_PACKET_SIZE,
        })
    }

    /// Resolve `host` (with or without a port) and connect to the first address.
    pub fn connect_host(host: &str) -> Result<Self> {
        let with_port;
        let host = if host.contains(':') {
            host
        } else {
            with_port = format!("{host}:{RMCP_PORT}");
            &with_port
        };
        let target = host
            .to_socket_addrs()?
            .next()
            .ok_or(Error::InvalidArgument("host did not resolve"))?;
        Self::connect(target)
    }

    /// Address of the controller.
    pub fn target(&self) -> SocketAddr {
        self.target
    }

    fn recv(&self, timeout: Duration) -> Result<Vec<u8>> {
        // A zero timeout would make the socket block forever.
        let timeout = timeout.max(Duration::from_millis(1));
        self.socket.set_read_timeout(Some(timeout))?;

        let mut buf = vec![0u8; self.max_packet_size];
        match self.socket.recv(&mut buf) {
            Ok(n) => {
                buf.truncate(n);
                Ok(buf)
            }
            Err(e) if is_timeout(&e) => Ok(Vec::new()),
            Err(e) => Err(Error::Io(e)),
        }
    }
}

impl Transport for UdpTransport {
    fn write_read(&self, request: &[u8], timeout: Duration) -> Result<Vec<u8>> {
        self.socket.send(request)?;
        self.recv(timeout)
    }

    fn read(&self, timeout: Duration) -> Result<Vec<u8>> {
        self.recv(timeout)
    }
}

fn is_timeout(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn silent_peer_reads_as_empty_reply() {
        let peer = UdpSocket::bind("127.0.0.1:0").expect("bind");
        let transport = UdpTransport::connect(peer.local_addr().expect("addr")).expect("connect");
        let reply = transport
            .write_read(&[0x06, 0x00, 0xFF, 0x06], Duration::from_millis(20))
            .expect("write_read");
        assert!(reply.is_empty());
    }

    #[test]
    fn reply_datagram_is_returned() {
        let peer = UdpSocket::bind("127.0.0.1:0").expect("bind");
        let transport = UdpTransport::connect(peer.local_addr().expect("addr")).expect("connect");

        let handle = std::thread::spawn(move || {
            let mut buf = [0u8; 64];
            let (n, from) = peer.recv_from(&mut buf).expect("recv");
            peer.send_to(&buf[..n], from).expect("send");
        });

        let reply = transport
            .write_read(&[1, 2, 3], Duration::from_secs(2))
            .expect("write_read");
        handle.join().expect("join");
        assert_eq!(reply, vec![1, 2, 3]);
    }
}

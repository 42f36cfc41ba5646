//! Datagram exchange with a controller.
//!
//! The session layer never sees socket errors caused by a silent peer: a
//! transport reports a timeout as an empty reply, and the caller decides
//! whether that counts against the session.

use std::time::Duration;

use crate::error::Result;

/// A synchronous transport for exchanging RMCP/IPMI datagrams.
pub trait Transport {
    /// Send a request datagram and wait up to `timeout` for one reply datagram.
    ///
    /// Returns an empty buffer when nothing arrived in time.
    fn write_read(&self, request: &[u8], timeout: Duration) -> Result<Vec<u8>>;

    /// Wait up to `timeout` for one more datagram without sending anything.
    ///
    /// Used for controllers that acknowledge a bridged request before
    /// delivering the reply in a second frame.
    fn read(&self, timeout: Duration) -> Result<Vec<u8>>;
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn write_read(&self, request: &[u8], timeout: Duration) -> Result<Vec<u8>> {
        (**self).write_read(request, timeout)
    }

    fn read(&self, timeout: Duration) -> Result<Vec<u8>> {
        (**self).read(timeout)
    }
}

pub(crate) mod udp;

pub use udp::UdpTransport;

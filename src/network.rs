//! TCP endpoint for the network side of the bridge.
//!
//! Thin wrapper over a non-blocking `TcpStream`: connect with a deadline,
//! move bytes without blocking the worker, and tear down cleanly. Reconnect
//! policy (backoff, retry counting) belongs to the supervisor; this type
//! only knows how to dial once.

use std::io::{Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;

use tracing::{debug, info};

use crate::errors::{BridgeError, BridgeResult};

/// A connected TCP endpoint.
pub struct NetworkEndpoint {
    stream: TcpStream,
    peer: SocketAddr,
}

impl NetworkEndpoint {
    /// Resolve `host:port` and connect, giving the whole attempt at most
    /// `timeout`. The socket comes back non-blocking with Nagle disabled -
    /// a bridge hauling keystrokes cannot afford coalescing delays.
    pub fn connect(host: &str, port: u16, timeout: Duration) -> BridgeResult<Self> {
        let addrs: Vec<SocketAddr> = (host, port)
            .to_socket_addrs()
            .map_err(|e| BridgeError::Io(e))?
            .collect();
        if addrs.is_empty() {
            return Err(BridgeError::InvalidArgument(format!(
                "no addresses for {}:{}",
                host, port
            )));
        }

        let mut last_err: Option<std::io::Error> = None;
        let per_addr = timeout / addrs.len() as u32;
        for addr in &addrs {
            debug!(%addr, "dialing");
            match TcpStream::connect_timeout(addr, per_addr) {
                Ok(stream) => {
                    stream.set_nodelay(true)?;
                    stream.set_nonblocking(true)?;
                    info!(peer = %addr, "connected");
                    return Ok(Self {
                        stream,
                        peer: *addr,
                    });
                }
                Err(e) => last_err = Some(e),
            }
        }

        match last_err {
            Some(e) if e.kind() == std::io::ErrorKind::TimedOut => Err(BridgeError::Timeout(
                format!("connect to {}:{}", host, port),
            )),
            Some(e) => Err(BridgeError::Io(e)),
            None => Err(BridgeError::Timeout(format!(
                "connect to {}:{}",
                host, port
            ))),
        }
    }

    /// Wrap an already-connected stream (tests, answered calls).
    pub fn from_stream(stream: TcpStream) -> BridgeResult<Self> {
        let peer = stream.peer_addr()?;
        stream.set_nodelay(true)?;
        stream.set_nonblocking(true)?;
        Ok(Self { stream, peer })
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    /// Non-blocking read. 0 means nothing pending; a closed peer surfaces
    /// as `BridgeError::Closed` so the supervisor can start FLUSHING.
    pub fn read(&mut self, buf: &mut [u8]) -> BridgeResult<usize> {
        match self.stream.read(buf) {
            Ok(0) => Err(BridgeError::Closed),
            Ok(n) => Ok(n),
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => Ok(0),
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => Ok(0),
            Err(e) => Err(BridgeError::Io(e)),
        }
    }

    /// Non-blocking write. Returns how many bytes the socket accepted,
    /// possibly 0 when the send buffer is full.
    pub fn write(&mut self, buf: &[u8]) -> BridgeResult<usize> {
        match self.stream.write(buf) {
            Ok(n) => Ok(n),
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => Ok(0),
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => Ok(0),
            Err(e) => Err(BridgeError::Io(e)),
        }
    }

    /// Write the whole buffer, spinning briefly on a full send buffer.
    /// Used for small protocol replies that must go out complete.
    pub fn write_all(&mut self, buf: &[u8]) -> BridgeResult<()> {
        let mut written = 0;
        while written < buf.len() {
            let n = self.write(&buf[written..])?;
            if n == 0 {
                std::thread::sleep(Duration::from_millis(1));
            }
            written += n;
        }
        Ok(())
    }

    /// Orderly teardown of both directions. Errors are ignored - the peer
    /// may already be gone, which is exactly why we are hanging up.
    pub fn close(&mut self) {
        let _ = self.stream.shutdown(Shutdown::Both);
        debug!(peer = %self.peer, "endpoint closed");
    }
}

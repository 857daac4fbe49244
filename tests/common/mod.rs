//! Shared fixtures for the integration suites: an in-memory serial
//! transport standing in for the DTE's port, and a scripted TCP peer
//! standing in for the telnet host.

use std::collections::VecDeque;
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, mpsc};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use modembridge::config::BridgeConfig;
use modembridge::errors::BridgeResult;
use modembridge::serial::SerialIo;

/// In-memory serial transport. The test side plays the DTE through
/// [`MockDte`]; the bridge side sees a [`SerialIo`].
pub struct MockSerial {
    dte_to_bridge: Arc<Mutex<VecDeque<u8>>>,
    bridge_to_dte: Arc<Mutex<Vec<u8>>>,
    dcd: Arc<AtomicBool>,
    dsr: Arc<AtomicBool>,
}

/// The test's half of the mock serial link.
pub struct MockDte {
    dte_to_bridge: Arc<Mutex<VecDeque<u8>>>,
    bridge_to_dte: Arc<Mutex<Vec<u8>>>,
    /// Everything ever read from the bridge, for subsequence searches
    history: Vec<u8>,
    pub dcd: Arc<AtomicBool>,
    pub dsr: Arc<AtomicBool>,
}

pub fn mock_serial() -> (MockSerial, MockDte) {
    let dte_to_bridge = Arc::new(Mutex::new(VecDeque::new()));
    let bridge_to_dte = Arc::new(Mutex::new(Vec::new()));
    let dcd = Arc::new(AtomicBool::new(true));
    let dsr = Arc::new(AtomicBool::new(true));
    (
        MockSerial {
            dte_to_bridge: Arc::clone(&dte_to_bridge),
            bridge_to_dte: Arc::clone(&bridge_to_dte),
            dcd: Arc::clone(&dcd),
            dsr: Arc::clone(&dsr),
        },
        MockDte {
            dte_to_bridge,
            bridge_to_dte,
            history: Vec::new(),
            dcd,
            dsr,
        },
    )
}

impl SerialIo for MockSerial {
    fn read(&mut self, buf: &mut [u8]) -> BridgeResult<usize> {
        let mut queue = self.dte_to_bridge.lock().unwrap();
        let n = queue.len().min(buf.len());
        for slot in buf.iter_mut().take(n) {
            *slot = queue.pop_front().unwrap_or(0);
        }
        Ok(n)
    }

    fn write(&mut self, buf: &[u8]) -> BridgeResult<usize> {
        self.bridge_to_dte.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn write_all(&mut self, buf: &[u8]) -> BridgeResult<()> {
        self.write(buf).map(|_| ())
    }

    fn get_dcd(&mut self) -> BridgeResult<bool> {
        Ok(self.dcd.load(Ordering::Relaxed))
    }

    fn get_dsr(&mut self) -> BridgeResult<bool> {
        Ok(self.dsr.load(Ordering::Relaxed))
    }

    fn set_dtr(&mut self, _level: bool) -> BridgeResult<()> {
        Ok(())
    }

    fn hangup(&mut self) -> BridgeResult<()> {
        Ok(())
    }
}

impl MockDte {
    /// Type bytes at the emulated modem.
    pub fn send(&self, bytes: &[u8]) {
        self.dte_to_bridge.lock().unwrap().extend(bytes);
    }

    /// Pull whatever the modem produced since the last call.
    pub fn drain_output(&mut self) -> Vec<u8> {
        let mut out = self.bridge_to_dte.lock().unwrap();
        let taken: Vec<u8> = out.drain(..).collect();
        self.history.extend_from_slice(&taken);
        taken
    }

    /// Wait until `needle` has appeared in the modem's output.
    pub fn wait_for(&mut self, needle: &[u8], timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut seen = self.history.len();
        loop {
            self.drain_output();
            // Rescan a window that could straddle the new bytes
            let from = seen.saturating_sub(needle.len());
            if contains(&self.history[from..], needle) {
                return true;
            }
            seen = self.history.len();
            if Instant::now() >= deadline {
                return false;
            }
            thread::sleep(Duration::from_millis(10));
        }
    }

    /// Full output history so far.
    pub fn history(&mut self) -> Vec<u8> {
        self.drain_output();
        self.history.clone()
    }
}

pub fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    !needle.is_empty() && haystack.windows(needle.len()).any(|w| w == needle)
}

/// The canonical answers that settle the bridge's four proactive option
/// requests (accepting SGA both ways, declining ECHO and TERMINAL-TYPE).
pub const SETTLE_NEGOTIATION: &[u8] = &[
    255, 253, 3, // DO SGA
    255, 251, 3, // WILL SGA
    255, 252, 1, // WONT ECHO
    255, 254, 24, // DONT TERMINAL-TYPE
];

/// A scripted telnet peer on a loopback socket.
pub struct TestServer {
    pub addr: SocketAddr,
    received: Arc<Mutex<Vec<u8>>>,
    to_client: mpsc::Sender<Vec<u8>>,
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl TestServer {
    /// Start a server that accepts one connection. When `auto_negotiate`
    /// is set it immediately answers the bridge's proactive options.
    pub fn start(auto_negotiate: bool) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let received = Arc::new(Mutex::new(Vec::new()));
        let stop = Arc::new(AtomicBool::new(false));
        let (to_client, from_test) = mpsc::channel::<Vec<u8>>();

        let thread_received = Arc::clone(&received);
        let thread_stop = Arc::clone(&stop);
        let handle = thread::spawn(move || {
            let Ok((stream, _)) = listener.accept() else {
                return;
            };
            run_connection(stream, &thread_received, &from_test, &thread_stop, auto_negotiate);
        });

        Self {
            addr,
            received,
            to_client,
            stop,
            handle: Some(handle),
        }
    }

    /// Queue bytes for delivery to the connected bridge.
    pub fn send(&self, bytes: &[u8]) {
        let _ = self.to_client.send(bytes.to_vec());
    }

    /// Bytes received from the bridge so far.
    pub fn received(&self) -> Vec<u8> {
        self.received.lock().unwrap().clone()
    }

    /// Wait until `needle` shows up in the received stream.
    pub fn wait_for(&self, needle: &[u8], timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if contains(&self.received(), needle) {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            thread::sleep(Duration::from_millis(10));
        }
    }

    /// Drop the connection (simulates the remote hanging up).
    pub fn close(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.close();
    }
}

fn run_connection(
    mut stream: TcpStream,
    received: &Mutex<Vec<u8>>,
    from_test: &mpsc::Receiver<Vec<u8>>,
    stop: &AtomicBool,
    auto_negotiate: bool,
) {
    stream.set_nonblocking(true).unwrap();
    if auto_negotiate {
        let _ = stream.write_all(SETTLE_NEGOTIATION);
    }

    let mut buf = [0u8; 1024];
    while !stop.load(Ordering::Relaxed) {
        match stream.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => received.lock().unwrap().extend_from_slice(&buf[..n]),
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {}
            Err(_) => break,
        }
        while let Ok(bytes) = from_test.try_recv() {
            if stream.write_all(&bytes).is_err() {
                return;
            }
        }
        thread::sleep(Duration::from_millis(2));
    }
}

/// A bridge configuration pointed at the given test server.
pub fn test_config(addr: SocketAddr) -> BridgeConfig {
    let mut config = BridgeConfig::default();
    config.network.host = addr.ip().to_string();
    config.network.port = addr.port();
    config.network.connect_timeout = Duration::from_secs(5);
    config
}

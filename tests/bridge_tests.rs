//! End-to-end bridge tests: a mock DTE on one side, a scripted telnet
//! peer on the other, the real supervisor and workers in between.

use std::thread::{self, JoinHandle};
use std::time::Duration;

use modembridge::errors::BridgeResult;
use modembridge::pipeline::state::SupervisorState;
use modembridge::pipeline::supervisor::{Bridge, ShutdownHandle};

mod common;
use common::{MockDte, TestServer, contains, mock_serial, test_config};

const WAIT: Duration = Duration::from_secs(5);

/// Spin up a bridge against the given server address.
fn start_bridge(
    addr: std::net::SocketAddr,
) -> (
    MockDte,
    ShutdownHandle,
    JoinHandle<BridgeResult<SupervisorState>>,
) {
    let (serial, dte) = mock_serial();
    let mut bridge = Bridge::new(test_config(addr), serial).unwrap();
    let handle = bridge.shutdown_handle();
    let join = thread::spawn(move || bridge.run());
    (dte, handle, join)
}

fn stop_bridge(handle: ShutdownHandle, join: JoinHandle<BridgeResult<SupervisorState>>) {
    handle.shutdown();
    let state = join.join().unwrap().unwrap();
    assert_eq!(state, SupervisorState::Terminated);
}

#[test]
fn test_at_chain_with_echo() {
    let server = TestServer::start(true);
    let (mut dte, handle, join) = start_bridge(server.addr);

    dte.send(b"ATE1V1Q0X4\r");
    assert!(dte.wait_for(b"OK", WAIT));

    // Echo of the full line, then the framed verbose result
    let history = dte.history();
    assert!(contains(&history, b"ATE1V1Q0X4\r"));
    assert!(contains(&history, b"\r\nOK\r\n"));

    stop_bridge(handle, join);
}

#[test]
fn test_dial_connect_and_data_flow() {
    let server = TestServer::start(true);
    let (mut dte, handle, join) = start_bridge(server.addr);

    dte.send(b"ATD5551234\r");
    assert!(dte.wait_for(b"CONNECT", WAIT));

    // Serial to network
    dte.send(b"hello from the dte\r\n");
    assert!(server.wait_for(b"hello from the dte", WAIT));

    // Network to serial
    server.send(b"welcome to the host");
    assert!(dte.wait_for(b"welcome to the host", WAIT));

    stop_bridge(handle, join);
}

#[test]
fn test_iac_byte_round_trip() {
    let server = TestServer::start(true);
    let (mut dte, handle, join) = start_bridge(server.addr);

    dte.send(b"ATD\r");
    assert!(dte.wait_for(b"CONNECT", WAIT));
    dte.drain_output();

    // A 0xFF from the DTE must hit the wire doubled
    dte.send(&[0xFF]);
    assert!(server.wait_for(&[0xFF, 0xFF], WAIT));

    // A doubled 0xFF from the network must reach the DTE single
    server.send(&[0xFF, 0xFF]);
    assert!(dte.wait_for(&[0xFF], WAIT));
    let after_connect = dte.history();
    let count = after_connect.iter().filter(|&&b| b == 0xFF).count();
    assert_eq!(count, 1, "expected exactly one unescaped 0xFF at the DTE");

    stop_bridge(handle, join);
}

#[test]
fn test_ansi_cursor_controls_stripped_toward_network() {
    let server = TestServer::start(true);
    let (mut dte, handle, join) = start_bridge(server.addr);

    dte.send(b"ATD\r");
    assert!(dte.wait_for(b"CONNECT", WAIT));

    // Clear-screen dropped, color kept
    dte.send(b"\x1b[2Jplain \x1b[31mred\x1b[0m text");
    assert!(server.wait_for(b"red", WAIT));

    let received = server.received();
    assert!(!contains(&received, b"\x1b[2J"));
    assert!(contains(&received, b"\x1b[31m"));

    stop_bridge(handle, join);
}

#[test]
fn test_guarded_escape_is_consumed_spoofed_is_not() {
    let server = TestServer::start(true);
    let (mut dte, handle, join) = start_bridge(server.addr);

    // Shorten the guard to 200 ms so the test stays fast
    dte.send(b"ATS12=10\r");
    assert!(dte.wait_for(b"OK", WAIT));

    dte.send(b"ATD\r");
    assert!(dte.wait_for(b"CONNECT", WAIT));

    // In-band plusses surrounded by traffic are data
    dte.send(b"foo+++bar");
    assert!(server.wait_for(b"foo+++bar", WAIT));

    // A properly guarded +++ switches to command mode
    thread::sleep(Duration::from_millis(300));
    dte.drain_output();
    dte.send(b"+++");
    assert!(dte.wait_for(b"\r\nOK\r\n", WAIT));

    // The guarded plusses never reached the network
    let received = server.received();
    assert!(!contains(&received, b"bar+++"));

    // ATO drops back into the call
    dte.send(b"ATO\r");
    assert!(dte.wait_for(b"CONNECT", WAIT));
    dte.send(b"still here");
    assert!(server.wait_for(b"still here", WAIT));

    stop_bridge(handle, join);
}

#[test]
fn test_escape_then_hangup() {
    let server = TestServer::start(true);
    let (mut dte, handle, join) = start_bridge(server.addr);

    dte.send(b"ATS12=10\r");
    assert!(dte.wait_for(b"OK", WAIT));
    dte.send(b"ATD\r");
    assert!(dte.wait_for(b"CONNECT", WAIT));

    thread::sleep(Duration::from_millis(300));
    dte.drain_output();
    dte.send(b"+++");
    assert!(dte.wait_for(b"\r\nOK\r\n", WAIT));

    dte.drain_output();
    dte.send(b"ATH\r");
    assert!(dte.wait_for(b"OK", WAIT));

    stop_bridge(handle, join);
}

#[test]
fn test_peer_close_reports_no_carrier() {
    let mut server = TestServer::start(true);
    let (mut dte, handle, join) = start_bridge(server.addr);

    dte.send(b"ATD\r");
    assert!(dte.wait_for(b"CONNECT", WAIT));

    server.close();
    assert!(dte.wait_for(b"NO CARRIER", WAIT));

    stop_bridge(handle, join);
}

#[test]
fn test_dial_refused_reports_busy() {
    // Bind then drop, so the port is (almost certainly) unbound
    let addr = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap()
    };
    let (mut dte, handle, join) = start_bridge(addr);

    dte.send(b"ATD\r");
    // X4 default reports BUSY for a refused connection
    assert!(dte.wait_for(b"BUSY", WAIT));

    stop_bridge(handle, join);
}

#[test]
fn test_command_mode_lines_never_reach_network() {
    let server = TestServer::start(true);
    let (mut dte, handle, join) = start_bridge(server.addr);

    dte.send(b"ATD\r");
    assert!(dte.wait_for(b"CONNECT", WAIT));
    dte.send(b"marker-online\r");
    assert!(server.wait_for(b"marker-online", WAIT));

    // Drop to command mode (shortened guard configured after escape)
    // and issue commands; they must stay local
    thread::sleep(Duration::from_millis(1100));
    dte.send(b"+++");
    assert!(dte.wait_for(b"\r\nOK\r\n", Duration::from_secs(8)));
    dte.send(b"ATI3\r");
    assert!(dte.wait_for(b"modembridge", WAIT));

    let received = server.received();
    assert!(!contains(&received, b"ATI3"));

    stop_bridge(handle, join);
}

#[test]
fn test_hardware_modem_connect_bridges_the_call() {
    let server = TestServer::start(true);
    let (serial, mut dte) = mock_serial();
    let mut config = test_config(server.addr);
    config.modem.auto_answer = modembridge::config::AutoAnswerMode::Hardware;
    let mut bridge = Bridge::new(config, serial).unwrap();
    let handle = bridge.shutdown_handle();
    let join = thread::spawn(move || bridge.run());

    // The fronted modem announces an incoming call and answers it itself;
    // its CONNECT report makes the bridge dial the telnet host
    dte.send(b"\r\nRING\r\n\r\nRING\r\n\r\nCONNECT 2400\r\n");
    assert!(dte.wait_for(b"CONNECT", WAIT));

    // The RING/CONNECT lines were consumed out-of-band, and the call is
    // now a byte pipe
    let received = server.received();
    assert!(!contains(&received, b"RING"));
    dte.send(b"caller says hi");
    assert!(server.wait_for(b"caller says hi", WAIT));

    stop_bridge(handle, join);
}

#[test]
fn test_shutdown_terminates_cleanly() {
    let server = TestServer::start(true);
    let (_dte, handle, join) = start_bridge(server.addr);

    // No call, just up and down
    thread::sleep(Duration::from_millis(100));
    stop_bridge(handle, join);
}

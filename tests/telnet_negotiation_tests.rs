//! Wire-level negotiation behavior of the assembled bridge: proactive
//! options on connect, loop-free replies, and subnegotiation answers.

use std::thread;
use std::time::Duration;

use modembridge::pipeline::supervisor::Bridge;

mod common;
use common::{TestServer, contains, mock_serial, test_config};

const WAIT: Duration = Duration::from_secs(5);

/// Count non-overlapping occurrences of `needle`.
fn count_occurrences(haystack: &[u8], needle: &[u8]) -> usize {
    let mut count = 0;
    let mut i = 0;
    while i + needle.len() <= haystack.len() {
        if &haystack[i..i + needle.len()] == needle {
            count += 1;
            i += needle.len();
        } else {
            i += 1;
        }
    }
    count
}

#[test]
fn test_proactive_options_on_connect() {
    let server = TestServer::start(true);
    let (serial, mut dte) = mock_serial();
    let mut bridge = Bridge::new(test_config(server.addr), serial).unwrap();
    let handle = bridge.shutdown_handle();
    let join = thread::spawn(move || bridge.run());

    dte.send(b"ATD\r");
    assert!(dte.wait_for(b"CONNECT", WAIT));

    // WILL SGA, DO SGA, DO ECHO, WILL TERMINAL-TYPE all went out
    assert!(server.wait_for(&[255, 251, 3], WAIT));
    assert!(server.wait_for(&[255, 253, 3], WAIT));
    assert!(server.wait_for(&[255, 253, 1], WAIT));
    assert!(server.wait_for(&[255, 251, 24], WAIT));

    handle.shutdown();
    join.join().unwrap().unwrap();
}

#[test]
fn test_duplicate_will_draws_no_second_reply() {
    let server = TestServer::start(true);
    let (serial, mut dte) = mock_serial();
    let mut bridge = Bridge::new(test_config(server.addr), serial).unwrap();
    let handle = bridge.shutdown_handle();
    let join = thread::spawn(move || bridge.run());

    dte.send(b"ATD\r");
    assert!(dte.wait_for(b"CONNECT", WAIT));

    // The auto-negotiation already answered our DO SGA with WILL SGA; a
    // duplicate WILL SGA (and a gratuitous repeat) must draw nothing new
    server.send(&[255, 251, 3, 255, 251, 3]);
    thread::sleep(Duration::from_millis(500));

    // Exactly one DO SGA ever: the proactive one
    let received = server.received();
    assert_eq!(count_occurrences(&received, &[255, 253, 3]), 1);

    handle.shutdown();
    join.join().unwrap().unwrap();
}

#[test]
fn test_terminal_type_query_answered() {
    let server = TestServer::start(true);
    let (serial, mut dte) = mock_serial();
    let mut bridge = Bridge::new(test_config(server.addr), serial).unwrap();
    let handle = bridge.shutdown_handle();
    let join = thread::spawn(move || bridge.run());

    dte.send(b"ATD\r");
    assert!(dte.wait_for(b"CONNECT", WAIT));

    // IAC SB TTYPE SEND IAC SE
    server.send(&[255, 250, 24, 1, 255, 240]);

    // IAC SB TTYPE IS "ANSI" IAC SE
    assert!(server.wait_for(&[255, 250, 24, 0, b'A', b'N', b'S', b'I', 255, 240], WAIT));

    handle.shutdown();
    join.join().unwrap().unwrap();
}

#[test]
fn test_unknown_option_refused() {
    let server = TestServer::start(true);
    let (serial, mut dte) = mock_serial();
    let mut bridge = Bridge::new(test_config(server.addr), serial).unwrap();
    let handle = bridge.shutdown_handle();
    let join = thread::spawn(move || bridge.run());

    dte.send(b"ATD\r");
    assert!(dte.wait_for(b"CONNECT", WAIT));

    // WILL <unassigned 49> -> DONT 49; DO 49 -> WONT 49
    server.send(&[255, 251, 49, 255, 253, 49]);
    assert!(server.wait_for(&[255, 254, 49], WAIT));
    assert!(server.wait_for(&[255, 252, 49], WAIT));

    handle.shutdown();
    join.join().unwrap().unwrap();
}

#[test]
fn test_telnet_commands_do_not_corrupt_data() {
    let server = TestServer::start(true);
    let (serial, mut dte) = mock_serial();
    let mut bridge = Bridge::new(test_config(server.addr), serial).unwrap();
    let handle = bridge.shutdown_handle();
    let join = thread::spawn(move || bridge.run());

    dte.send(b"ATD\r");
    assert!(dte.wait_for(b"CONNECT", WAIT));
    dte.drain_output();

    // Data interleaved with NOP and a negotiation; only the data and the
    // AYT answer are visible side effects
    server.send(&[b'a', 255, 241, b'b', 255, 251, 3, b'c']);
    assert!(dte.wait_for(b"abc", WAIT));

    let history = dte.history();
    assert!(!contains(&history, &[255]));

    handle.shutdown();
    join.join().unwrap().unwrap();
}

#[test]
fn test_ayt_gets_visible_answer() {
    let server = TestServer::start(true);
    let (serial, mut dte) = mock_serial();
    let mut bridge = Bridge::new(test_config(server.addr), serial).unwrap();
    let handle = bridge.shutdown_handle();
    let join = thread::spawn(move || bridge.run());

    dte.send(b"ATD\r");
    assert!(dte.wait_for(b"CONNECT", WAIT));

    server.send(&[255, 246]); // IAC AYT
    assert!(server.wait_for(b"[Yes]\r\n", WAIT));

    handle.shutdown();
    join.join().unwrap().unwrap();
}

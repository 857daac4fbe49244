//! The dual-pipeline data plane.
//!
//! Two pipelines run in opposition: **S2N** carries serial ingress to the
//! network, **N2S** carries network ingress back to the serial line. Each
//! couples a filter chain to an enhanced double buffer; a shared quantum
//! scheduler (see [`scheduler`]) decides which direction drains, and the
//! supervising state machine (see [`state`] and [`supervisor`]) owns the
//! connection lifecycle around both.
//!
//! The serial-ingress chain is where the Hayes command filter lives: in
//! command mode every byte is siphoned into the modem engine and nothing
//! reaches the network; in online mode bytes run the escape detector, the
//! ANSI strip filter, and IAC escaping, in that order.

pub mod buffer;
pub mod scheduler;
pub mod state;
pub mod supervisor;

use std::sync::{Arc, Mutex};
use std::time::Instant;

use crate::ansi::{AnsiFilter, FilterMode};
use crate::modem::ModemEngine;
use buffer::DoubleBuffer;
use scheduler::{Direction, Grant};

/// Per-pipeline run state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    /// No data pending
    Idle,
    /// Moving data
    Active,
    /// Backpressured by the HIGH watermark
    Blocked,
    /// Unrecoverable pipeline fault
    Error,
}

/// One directional pipeline: identity, buffer, and quantum bookkeeping.
#[derive(Debug)]
pub struct Pipeline {
    direction: Direction,
    pub buffer: DoubleBuffer,
    state: PipelineState,
    quantum_start: Option<Instant>,
    bytes_in_quantum: usize,
}

impl Pipeline {
    pub fn new(direction: Direction, buffer: DoubleBuffer) -> Self {
        Self {
            direction,
            buffer,
            state: PipelineState::Idle,
            quantum_start: None,
            bytes_in_quantum: 0,
        }
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    /// Refresh Idle/Active/Blocked from the buffer's condition.
    pub fn update_state(&mut self) {
        if self.state == PipelineState::Error {
            return;
        }
        self.state = if self.buffer.is_blocked() {
            PipelineState::Blocked
        } else if self.buffer.is_empty() {
            PipelineState::Idle
        } else {
            PipelineState::Active
        };
    }

    pub fn set_error(&mut self) {
        self.state = PipelineState::Error;
    }

    /// Begin a granted quantum.
    pub fn begin_quantum(&mut self, now: Instant) {
        self.quantum_start = Some(now);
        self.bytes_in_quantum = 0;
    }

    /// Account bytes drained within the current quantum.
    pub fn note_bytes(&mut self, n: usize) {
        self.bytes_in_quantum += n;
    }

    /// Whether the quantum's time or byte budget is spent.
    pub fn quantum_exhausted(&self, grant: &Grant, now: Instant) -> bool {
        let time_up = self
            .quantum_start
            .is_some_and(|start| now.duration_since(start) >= grant.quantum);
        time_up || self.bytes_in_quantum >= grant.byte_budget
    }

    /// Close out the quantum; returns (elapsed, bytes) for the scheduler's
    /// adaptive step.
    pub fn end_quantum(&mut self, now: Instant) -> (std::time::Duration, usize) {
        let elapsed = self
            .quantum_start
            .take()
            .map(|start| now.duration_since(start))
            .unwrap_or_default();
        let bytes = std::mem::take(&mut self.bytes_in_quantum);
        self.buffer.end_quantum();
        self.update_state();
        (elapsed, bytes)
    }
}

/// Output of one pass through the serial-ingress chain.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChainOutput {
    /// Echo and modem responses for the serial line
    pub to_serial: Vec<u8>,
    /// Filtered, IAC-escaped bytes for the S2N buffer
    pub to_net: Vec<u8>,
}

/// The S2N filter chain: Hayes command filter, then ANSI strip, then IAC
/// escaping. AT lines never come out the network end.
pub struct SerialIngressChain {
    modem: Arc<Mutex<ModemEngine>>,
    ansi: AnsiFilter,
}

impl SerialIngressChain {
    pub fn new(modem: Arc<Mutex<ModemEngine>>) -> Self {
        Self {
            modem,
            ansi: AnsiFilter::new(FilterMode::Strip),
        }
    }

    /// Push DTE bytes through the chain.
    pub fn process(&mut self, bytes: &[u8], now: Instant) -> ChainOutput {
        let fed = {
            let mut modem = self.modem.lock().unwrap_or_else(|e| e.into_inner());
            modem.feed_serial(bytes, now)
        };
        self.finish(fed)
    }

    /// Clock-driven pass for the escape detector's guard windows.
    pub fn poll(&mut self, now: Instant) -> ChainOutput {
        let fed = {
            let mut modem = self.modem.lock().unwrap_or_else(|e| e.into_inner());
            modem.poll(now)
        };
        self.finish(fed)
    }

    /// Flush the ANSI filter's partial sequence (call teardown).
    pub fn flush(&mut self) -> ChainOutput {
        let held = self.ansi.flush();
        ChainOutput {
            to_serial: Vec::new(),
            to_net: telnet_protocol::escape::escape(&held),
        }
    }

    pub fn ansi_dropped(&self) -> u64 {
        self.ansi.dropped_sequences()
    }

    fn finish(&mut self, fed: crate::modem::FeedOutput) -> ChainOutput {
        let stripped = self.ansi.filter(&fed.to_network);
        ChainOutput {
            to_serial: fed.to_serial,
            to_net: telnet_protocol::escape::escape(&stripped),
        }
    }
}

/// The N2S data filter: the telnet engine has already parsed IAC sequences
/// out upstream, and the ANSI filter is configured as identity in this
/// direction.
pub struct NetworkIngressChain {
    ansi: AnsiFilter,
}

impl Default for NetworkIngressChain {
    fn default() -> Self {
        Self::new()
    }
}

impl NetworkIngressChain {
    pub fn new() -> Self {
        Self {
            ansi: AnsiFilter::new(FilterMode::Passthrough),
        }
    }

    pub fn process(&mut self, bytes: &[u8]) -> Vec<u8> {
        self.ansi.filter(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AutoAnswerMode;
    use crate::events::event_channel;
    use std::time::Duration;

    fn chain() -> (SerialIngressChain, Arc<Mutex<ModemEngine>>) {
        let (tx, _rx) = event_channel(32);
        // Receiver dropped: events vanish silently, which these tests accept
        let mut engine = ModemEngine::new(tx, AutoAnswerMode::Software);
        engine.initialize();
        let modem = Arc::new(Mutex::new(engine));
        (SerialIngressChain::new(Arc::clone(&modem)), modem)
    }

    fn go_online(modem: &Arc<Mutex<ModemEngine>>) {
        let mut m = modem.lock().unwrap();
        m.feed_serial(b"ATD\r", Instant::now());
        m.on_connect_established(None);
    }

    #[test]
    fn test_at_lines_never_reach_network() {
        let (mut chain, _modem) = chain();

        let out = chain.process(b"ATE1V1\r", Instant::now());

        assert!(out.to_net.is_empty());
        // Echo plus OK came back to the serial side
        assert!(out.to_serial.ends_with(b"\r\nOK\r\n"));
    }

    #[test]
    fn test_online_data_is_stripped_and_escaped() {
        let (mut chain, modem) = chain();
        go_online(&modem);

        // Cursor-up sequence dropped, 0xFF doubled
        let now = Instant::now();
        let out = chain.process(b"a\x1b[2A\xffb", now);

        assert_eq!(out.to_net, vec![b'a', 0xFF, 0xFF, b'b']);
        assert!(out.to_serial.is_empty());
    }

    #[test]
    fn test_sgr_survives_the_chain() {
        let (mut chain, modem) = chain();
        go_online(&modem);

        let out = chain.process(b"\x1b[31mred", Instant::now());
        assert_eq!(out.to_net, b"\x1b[31mred");
    }

    #[test]
    fn test_escape_sequence_consumed_by_chain() {
        let (mut chain, modem) = chain();
        go_online(&modem);

        let t0 = Instant::now();
        assert!(chain.process(b"+", t0 + Duration::from_millis(1500)).to_net.is_empty());
        assert!(chain.process(b"+", t0 + Duration::from_millis(1700)).to_net.is_empty());
        assert!(chain.process(b"+", t0 + Duration::from_millis(1900)).to_net.is_empty());

        let out = chain.poll(t0 + Duration::from_millis(3200));
        assert!(out.to_net.is_empty());
        assert_eq!(out.to_serial, b"\r\nOK\r\n");
    }

    #[test]
    fn test_pipeline_quantum_accounting() {
        let mut pipeline = Pipeline::new(
            Direction::SerialToNet,
            DoubleBuffer::new(1024, 4096, 512),
        );
        let grant = Grant {
            direction: Direction::SerialToNet,
            quantum: Duration::from_millis(50),
            byte_budget: 100,
            starvation_override: false,
        };

        let t0 = Instant::now();
        pipeline.begin_quantum(t0);
        pipeline.note_bytes(60);
        assert!(!pipeline.quantum_exhausted(&grant, t0 + Duration::from_millis(10)));

        pipeline.note_bytes(40);
        // Byte budget spent
        assert!(pipeline.quantum_exhausted(&grant, t0 + Duration::from_millis(10)));

        let (elapsed, bytes) = pipeline.end_quantum(t0 + Duration::from_millis(12));
        assert_eq!(bytes, 100);
        assert!(elapsed >= Duration::from_millis(12));
    }

    #[test]
    fn test_pipeline_time_budget() {
        let mut pipeline = Pipeline::new(
            Direction::NetToSerial,
            DoubleBuffer::new(1024, 4096, 512),
        );
        let grant = Grant {
            direction: Direction::NetToSerial,
            quantum: Duration::from_millis(50),
            byte_budget: 1 << 20,
            starvation_override: false,
        };

        let t0 = Instant::now();
        pipeline.begin_quantum(t0);
        assert!(!pipeline.quantum_exhausted(&grant, t0 + Duration::from_millis(49)));
        assert!(pipeline.quantum_exhausted(&grant, t0 + Duration::from_millis(50)));
    }

    #[test]
    fn test_pipeline_state_tracking() {
        let mut pipeline = Pipeline::new(
            Direction::SerialToNet,
            DoubleBuffer::new(100, 400, 50),
        );
        assert_eq!(pipeline.state(), PipelineState::Idle);

        pipeline.buffer.write(b"data");
        pipeline.update_state();
        assert_eq!(pipeline.state(), PipelineState::Active);

        let mut sink = [0u8; 16];
        pipeline.buffer.read(&mut sink);
        pipeline.update_state();
        assert_eq!(pipeline.state(), PipelineState::Idle);
    }

    #[test]
    fn test_network_ingress_chain_is_identity() {
        let mut chain = NetworkIngressChain::new();
        let bytes = b"\x1b[2Jscreen control stays\xff intact";
        assert_eq!(chain.process(bytes), bytes);
    }
}

//! The Hayes modem engine.
//!
//! Front and center of the bridge: everything the serial DTE sees behaves
//! like a Hayes modem. In **command mode** the engine assembles AT lines,
//! echoes, edits, executes chains and answers with result codes. In
//! **online mode** bytes flow toward the network, with only the guarded
//! `+++` escape watched for. Transitions between the two are driven by
//! ATA/ATO/ATH/ATD, by the escape sequence, and by carrier and DTR edges.
//!
//! The engine talks to the rest of the bridge exclusively through return
//! values (bytes for the serial side, bytes for the network side) and
//! through the bounded event channel; it never calls into the supervisor.

pub mod command;
pub mod escape;
pub mod registers;
pub mod response;
pub mod status;

use std::time::Instant;

use tracing::{debug, info};

use crate::config::AutoAnswerMode;
use crate::events::{EventSender, ModemEvent};
use command::{CommandOutcome, ModemAction, execute_chain};
use escape::{EscapeDetector, EscapePoll};
use registers::{ModemSettings, ProfileSlots, sreg};
use response::ResultCode;
use status::HardwareMessage;

/// Command-line accumulation limit.
const CMD_BUFFER_SIZE: usize = 1024;

/// Modem mode state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModemState {
    /// Accepting AT commands
    Command,
    /// Call up, passing data
    Online,
    /// Incoming call ringing
    Ringing,
    /// Dial or answer in progress
    Connecting,
    /// No call, not yet initialized
    Disconnected,
}

/// Counters the stats snapshot picks up.
#[derive(Debug, Clone, Copy, Default, serde::Serialize)]
pub struct ModemCounters {
    pub connects: u64,
    pub disconnects: u64,
    pub rings: u64,
    pub command_errors: u64,
    pub escapes: u64,
}

/// Byte output of one engine call, split by destination.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeedOutput {
    /// Echo, info text and result codes for the DTE
    pub to_serial: Vec<u8>,
    /// Data released toward the network (online mode only)
    pub to_network: Vec<u8>,
}

impl FeedOutput {
    fn merge(&mut self, other: FeedOutput) {
        self.to_serial.extend(other.to_serial);
        self.to_network.extend(other.to_network);
    }
}

/// The Hayes modem emulation engine.
pub struct ModemEngine {
    settings: ModemSettings,
    profiles: ProfileSlots,
    state: ModemState,
    /// Line being accumulated in command mode
    cmd_buffer: Vec<u8>,
    cmd_overflow: bool,
    /// Swallow the LF half of a CRLF terminator pair
    swallow_lf: bool,
    escape: EscapeDetector,
    events: EventSender,
    auto_answer: AutoAnswerMode,
    /// A network call exists (held during escape-to-command)
    call_up: bool,
    /// Speed of the current/last call for CONNECT and ATO
    last_speed: Option<u32>,
    counters: ModemCounters,
}

impl ModemEngine {
    pub fn new(events: EventSender, auto_answer: AutoAnswerMode) -> Self {
        let settings = ModemSettings::factory();
        let escape = EscapeDetector::new(settings.escape_char(), settings.guard_time());
        Self {
            settings,
            profiles: ProfileSlots::default(),
            state: ModemState::Disconnected,
            cmd_buffer: Vec::with_capacity(CMD_BUFFER_SIZE),
            cmd_overflow: false,
            swallow_lf: false,
            escape,
            events,
            auto_answer,
            call_up: false,
            last_speed: None,
            counters: ModemCounters::default(),
        }
    }

    /// Mark initialization complete; the engine starts accepting commands.
    pub fn initialize(&mut self) {
        self.state = ModemState::Command;
        info!("modem engine ready");
    }

    pub fn state(&self) -> ModemState {
        self.state
    }

    pub fn settings(&self) -> &ModemSettings {
        &self.settings
    }

    pub fn counters(&self) -> ModemCounters {
        self.counters
    }

    /// Whether DCD should read as high, per the &C coupling mode.
    pub fn carrier_present(&self, network_up: bool) -> bool {
        match self.settings.dcd_mode {
            0 => true,
            _ => network_up,
        }
    }

    /// Feed bytes arriving from the DTE.
    pub fn feed_serial(&mut self, bytes: &[u8], now: Instant) -> FeedOutput {
        let mut out = FeedOutput::default();
        for &byte in bytes {
            match self.state {
                ModemState::Online => {
                    out.to_network.extend(self.escape.feed(byte, now));
                }
                _ => {
                    let o = self.feed_command_byte(byte);
                    out.merge(o);
                }
            }
        }
        out
    }

    /// Clock-driven work: escape guard expiry. Call regularly while online.
    pub fn poll(&mut self, now: Instant) -> FeedOutput {
        let mut out = FeedOutput::default();
        if self.state == ModemState::Online {
            match self.escape.poll(now) {
                EscapePoll::Idle => {}
                EscapePoll::Release(bytes) => out.to_network.extend(bytes),
                EscapePoll::Escaped => {
                    info!("escape sequence detected, entering command mode");
                    self.counters.escapes += 1;
                    self.state = ModemState::Command;
                    self.events.send(ModemEvent::EscapedToCommand);
                    out.to_serial.extend(self.respond(ResultCode::Ok));
                }
            }
        }
        out
    }

    /// One byte of command-mode input: echo, edit, accumulate, execute.
    fn feed_command_byte(&mut self, byte: u8) -> FeedOutput {
        let mut out = FeedOutput::default();
        let cr = self.settings.s_registers[sreg::CR_CHAR];
        let bs = self.settings.s_registers[sreg::BACKSPACE];

        // The LF half of a CRLF pair is not a second empty line
        if self.swallow_lf {
            self.swallow_lf = false;
            if byte == b'\n' {
                return out;
            }
        }

        if byte == cr || byte == b'\n' {
            if self.settings.echo {
                out.to_serial.push(byte);
            }
            self.swallow_lf = byte == cr;
            let o = self.execute_line();
            out.merge(o);
            return out;
        }

        if byte == bs {
            if self.cmd_buffer.pop().is_some() && self.settings.echo {
                out.to_serial.extend_from_slice(b"\x08 \x08");
            }
            return out;
        }

        if self.settings.echo {
            out.to_serial.push(byte);
        }
        if self.cmd_buffer.len() < CMD_BUFFER_SIZE {
            self.cmd_buffer.push(byte);
        } else {
            self.cmd_overflow = true;
        }
        out
    }

    /// Terminator seen: run whatever accumulated.
    fn execute_line(&mut self) -> FeedOutput {
        let line = std::mem::take(&mut self.cmd_buffer);
        let overflow = std::mem::take(&mut self.cmd_overflow);
        let mut out = FeedOutput::default();

        if overflow {
            out.to_serial.extend(self.respond(ResultCode::Error));
            return out;
        }
        if line.is_empty() {
            out.to_serial.extend(self.respond(ResultCode::Ok));
            return out;
        }

        // Only lines with the AT attention prefix mean anything
        if line.len() < 2 || !line[..2].eq_ignore_ascii_case(b"at") {
            debug!("discarding non-AT line");
            return out;
        }

        let outcome = execute_chain(&line[2..], &mut self.settings, &mut self.profiles);
        self.apply_outcome(outcome, &mut out);
        out
    }

    fn apply_outcome(&mut self, outcome: CommandOutcome, out: &mut FeedOutput) {
        out.to_serial.extend(outcome.output);

        let mut deferred_result = outcome.result;
        for action in outcome.actions {
            match action {
                ModemAction::Dial(dial) => {
                    info!(dial = %dial, "dialing");
                    self.state = ModemState::Connecting;
                    self.events.send(ModemEvent::DialRequested(dial));
                }
                ModemAction::Answer => {
                    info!("answering");
                    self.state = ModemState::Connecting;
                    self.events.send(ModemEvent::AnswerRequested);
                }
                ModemAction::Hangup => {
                    self.events.send(ModemEvent::HangupRequested);
                }
                ModemAction::GoOnline => {
                    if self.call_up {
                        self.events.send(ModemEvent::ReturnOnlineRequested);
                    } else {
                        // Nothing to return to
                        deferred_result = Some(ResultCode::NoCarrier);
                    }
                }
                ModemAction::Reset(n) => {
                    self.events.send(ModemEvent::ResetRequested(n));
                }
            }
        }

        if let Some(code) = deferred_result {
            out.to_serial.extend(self.respond(code));
        }
    }

    /// The supervisor reports the network call established.
    pub fn on_connect_established(&mut self, speed: Option<u32>) -> Vec<u8> {
        self.state = ModemState::Online;
        self.call_up = true;
        self.last_speed = speed;
        self.counters.connects += 1;
        self.settings.s_registers[sreg::RING_COUNT] = 0;
        self.escape
            .reset(self.settings.escape_char(), self.settings.guard_time());
        self.respond(ResultCode::Connect(speed))
    }

    /// The supervisor reports a dial or answer attempt failed.
    pub fn on_connect_failed(&mut self, code: ResultCode) -> Vec<u8> {
        self.state = ModemState::Command;
        self.call_up = false;
        self.respond(code)
    }

    /// Carrier dropped out from under an active call.
    pub fn on_carrier_lost(&mut self) -> Vec<u8> {
        info!("carrier lost");
        self.state = ModemState::Disconnected;
        self.call_up = false;
        self.counters.disconnects += 1;
        self.settings.s_registers[sreg::RING_COUNT] = 0;
        self.respond(ResultCode::NoCarrier)
    }

    /// An ATH-initiated teardown finished; OK already went out with the
    /// command, so nothing more is said.
    pub fn on_hangup_complete(&mut self) {
        if self.call_up {
            self.counters.disconnects += 1;
        }
        self.call_up = false;
        self.settings.s_registers[sreg::RING_COUNT] = 0;
        if self.state != ModemState::Disconnected {
            self.state = ModemState::Command;
        }
    }

    /// ATO approved: drop back into the held call.
    pub fn resume_online(&mut self) -> Vec<u8> {
        self.state = ModemState::Online;
        self.escape
            .reset(self.settings.escape_char(), self.settings.guard_time());
        self.respond(ResultCode::Connect(self.last_speed))
    }

    /// An incoming ring (emulated from a pending TCP connection, or real).
    /// Returns the RING announcement; answering happens via events.
    pub fn on_ring(&mut self) -> Vec<u8> {
        if matches!(self.state, ModemState::Command | ModemState::Disconnected) {
            self.state = ModemState::Ringing;
        }
        self.counters.rings += 1;
        let count = self.settings.s_registers[sreg::RING_COUNT].saturating_add(1);
        self.settings.s_registers[sreg::RING_COUNT] = count;
        self.events.send(ModemEvent::RingObserved { count });

        // Hardware-style auto-answer: S0 rings and the engine answers itself
        if self.auto_answer == AutoAnswerMode::Hardware {
            let s0 = self.settings.s_registers[sreg::AUTO_ANSWER];
            if s0 > 0 && count >= s0 {
                info!(rings = count, "auto-answering");
                self.state = ModemState::Connecting;
                self.events.send(ModemEvent::AnswerRequested);
            }
        }

        self.respond(ResultCode::Ring)
    }

    /// DTR edge from the DTE. Falling edges act per the &D mode.
    pub fn on_dtr_change(&mut self, level: bool) -> Vec<u8> {
        if level {
            return Vec::new();
        }
        match self.settings.dtr_mode {
            0 => Vec::new(),
            1 => {
                if self.state == ModemState::Online {
                    info!("DTR drop: entering command mode");
                    self.state = ModemState::Command;
                    self.respond(ResultCode::Ok)
                } else {
                    Vec::new()
                }
            }
            2 => {
                info!("DTR drop: hanging up");
                if self.state != ModemState::Disconnected {
                    self.state = ModemState::Command;
                }
                self.events.send(ModemEvent::HangupRequested);
                Vec::new()
            }
            _ => {
                info!("DTR drop: full reset");
                self.settings = self.profiles.load(0).unwrap_or_else(|_| ModemSettings::factory());
                self.state = ModemState::Command;
                self.events.send(ModemEvent::ResetRequested(0));
                Vec::new()
            }
        }
    }

    /// A CR/LF-bounded line from fronted modem hardware. Recognized
    /// messages become events; anything else is the hardware's data.
    pub fn feed_modem_line(&mut self, line: &[u8]) -> Option<HardwareMessage> {
        let message = status::match_line(line)?;
        match message {
            HardwareMessage::Ring => {
                self.events.send(ModemEvent::RingObserved {
                    count: self.settings.s_registers[sreg::RING_COUNT].saturating_add(1),
                });
                self.settings.s_registers[sreg::RING_COUNT] =
                    self.settings.s_registers[sreg::RING_COUNT].saturating_add(1);
            }
            HardwareMessage::Connect(speed) => {
                self.events.send(ModemEvent::HardwareConnect(speed));
            }
            HardwareMessage::NoCarrier => {
                self.events.send(ModemEvent::HardwareCarrierLost);
            }
        }
        Some(message)
    }

    fn respond(&mut self, code: ResultCode) -> Vec<u8> {
        if code == ResultCode::Error {
            self.counters.command_errors += 1;
        }
        response::render(code, &self.settings).unwrap_or_default()
    }
}

//! # TelnetEngine - The Assembled Protocol Engine
//!
//! This module ties the parser, the option negotiator and the option
//! handlers together behind one transport-free interface. The caller owns
//! the socket: bytes read from it go into [`TelnetEngine::receive`], which
//! hands back clean application data plus any protocol replies that must be
//! written to the peer. Outbound application data goes through
//! [`TelnetEngine::escape_egress`] before it touches the wire.
//!
//! Keeping the engine transport-free means it is driven the same way in
//! production (from the network worker) and in tests (from byte vectors).
//!
//! ## Specific IAC command handling
//!
//! - **NOP** refreshes the activity flag and nothing else
//! - **GA** is swallowed when SUPPRESS-GO-AHEAD is in effect in either
//!   direction; otherwise it is counted so the caller can log it
//! - **AYT** answers with the visible string `[Yes]` + CRLF
//! - **IP, AO, BRK, DM, EC, EL, EOR** are tolerated silently

use crate::escape;
use crate::negotiation::OptionNegotiator;
use crate::options::{
    LinemodeOption, NawsOption, TelnetOptionHandler, TerminalTypeOption, WindowSize,
};
use crate::parser::TelnetParser;
use crate::protocol::{TelnetCommand, TelnetSequence, option};

pub use crate::escape::EscapeError;

/// Visible response to IAC AYT
const AYT_RESPONSE: &[u8] = b"[Yes]\r\n";

/// Everything that came out of one call to [`TelnetEngine::receive`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EngineOutput {
    /// Clean application data (no IAC sequences, escapes collapsed)
    pub data: Vec<u8>,
    /// Protocol bytes that must be written back to the peer
    pub replies: Vec<u8>,
    /// Protocol violations observed in this chunk
    pub violations: u32,
    /// Input contained at least one byte (data or command); callers use
    /// this to refresh their activity timers
    pub activity: bool,
    /// A WILL/WONT/DO/DONT or subnegotiation arrived in this chunk; the
    /// supervisor uses this for its negotiation-quiet window
    pub negotiated: bool,
}

/// The assembled Telnet protocol engine for one connection
///
/// Single-threaded by design: one socket has one engine, and the owning
/// worker serializes calls into it.
#[derive(Debug, Clone)]
pub struct TelnetEngine {
    parser: TelnetParser,
    negotiator: OptionNegotiator,
    ttype: TerminalTypeOption,
    naws: NawsOption,
    linemode: LinemodeOption,
    /// Running total of protocol violations on this connection
    violations: u64,
    /// GA commands seen while SGA was not in effect
    stray_go_aheads: u64,
}

impl Default for TelnetEngine {
    fn default() -> Self {
        Self::new(None, WindowSize::default())
    }
}

impl TelnetEngine {
    /// Create an engine reporting the given terminal type and window size
    ///
    /// `terminal_type` of `None` uses the default (`ANSI`).
    pub fn new(terminal_type: Option<&str>, window: WindowSize) -> Self {
        Self {
            parser: TelnetParser::new(),
            negotiator: OptionNegotiator::new(),
            ttype: terminal_type
                .map(TerminalTypeOption::new)
                .unwrap_or_default(),
            naws: NawsOption::new(window),
            linemode: LinemodeOption::new(),
            violations: 0,
            stray_go_aheads: 0,
        }
    }

    /// The proactive option requests to send right after connecting:
    /// WILL SGA, DO SGA, DO ECHO, WILL TERMINAL-TYPE
    pub fn open(&mut self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(12);
        for seq in self.negotiator.initial_requests() {
            bytes.extend_from_slice(&seq.to_bytes());
        }
        bytes
    }

    /// Feed bytes read from the peer through the protocol engine
    pub fn receive(&mut self, input: &[u8]) -> EngineOutput {
        let parsed = self.parser.parse(input);

        let mut out = EngineOutput {
            data: parsed.data,
            violations: parsed.violations,
            activity: !input.is_empty(),
            ..EngineOutput::default()
        };

        for sequence in parsed.sequences {
            match sequence {
                TelnetSequence::Command(cmd) => self.handle_command(cmd, &mut out),
                TelnetSequence::Negotiation { command, option } => {
                    out.negotiated = true;
                    let result = self.negotiator.receive(command, option);
                    if let Some(reply) = result.response {
                        out.replies.extend_from_slice(&reply.to_bytes());
                    }
                    if result.local_activated == Some(option::NAWS) {
                        // Peer turned NAWS on for us: report our size
                        let report = TelnetSequence::SubNegotiation {
                            option: option::NAWS,
                            data: self.naws.report_payload(),
                        };
                        out.replies.extend_from_slice(&report.to_bytes());
                    }
                }
                TelnetSequence::SubNegotiation { option, data } => {
                    out.negotiated = true;
                    self.handle_subnegotiation(option, &data, &mut out);
                }
            }
        }

        self.violations += u64::from(out.violations);
        out
    }

    fn handle_command(&mut self, cmd: TelnetCommand, out: &mut EngineOutput) {
        match cmd {
            TelnetCommand::NOP => {
                // Keepalive; activity flag is already set
            }
            TelnetCommand::GA => {
                if !self.negotiator.suppress_go_ahead() {
                    self.stray_go_aheads += 1;
                }
            }
            TelnetCommand::AYT => {
                out.replies.extend_from_slice(AYT_RESPONSE);
            }
            // Tolerated without further semantics
            TelnetCommand::IP
            | TelnetCommand::AO
            | TelnetCommand::BRK
            | TelnetCommand::DM
            | TelnetCommand::EC
            | TelnetCommand::EL
            | TelnetCommand::EOR => {}
            // A stray SE outside any subnegotiation
            TelnetCommand::SE => {
                out.violations += 1;
            }
            _ => {}
        }
    }

    fn handle_subnegotiation(&mut self, opt: u8, data: &[u8], out: &mut EngineOutput) {
        let result = match opt {
            option::TERMINAL_TYPE => self.ttype.handle_subnegotiation(data),
            option::NAWS => self.naws.handle_subnegotiation(data),
            option::LINEMODE => self.linemode.handle_subnegotiation(data),
            _ => {
                // Subnegotiation for an option we never agreed to
                out.violations += 1;
                return;
            }
        };

        match result {
            Ok(Some(payload)) => {
                let reply = TelnetSequence::SubNegotiation {
                    option: opt,
                    data: payload,
                };
                out.replies.extend_from_slice(&reply.to_bytes());
            }
            Ok(None) => {}
            Err(_) => out.violations += 1,
        }
    }

    /// Escape outbound application data into `output`, doubling IACs
    ///
    /// The output slice must hold at least twice the input length.
    pub fn escape_egress(&self, input: &[u8], output: &mut [u8]) -> Result<usize, EscapeError> {
        escape::escape_into(input, output)
    }

    /// True once every proactively requested option has been answered
    pub fn negotiation_settled(&self) -> bool {
        self.negotiator.is_settled()
    }

    /// Access to the negotiated option state
    pub fn negotiator(&self) -> &OptionNegotiator {
        &self.negotiator
    }

    /// The peer's reported window size, if it sent NAWS
    pub fn peer_window(&self) -> Option<WindowSize> {
        self.naws.peer_size()
    }

    /// The peer's reported terminal type, if it sent one
    pub fn peer_terminal_type(&self) -> Option<&str> {
        self.ttype.peer_type()
    }

    /// Total protocol violations on this connection
    pub fn violations(&self) -> u64 {
        self.violations
    }

    /// GA commands seen while SGA was not in effect
    pub fn stray_go_aheads(&self) -> u64 {
        self.stray_go_aheads
    }

    /// Reset all protocol state for a fresh connection
    pub fn reset(&mut self) {
        self.parser.reset();
        self.negotiator.reset();
        self.ttype.reset();
        self.naws.reset();
        self.linemode.reset();
    }
}

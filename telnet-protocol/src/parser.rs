//! # Telnet Command Parser
//!
//! This module implements parsing of Telnet command sequences from byte streams
//! according to **RFC 854** (Telnet Protocol Specification).
//!
//! ## Key Concepts:
//!
//! ### IAC State Machine (RFC 854, Section 4)
//! The parser is an eight-state machine:
//! - **Data**: Normal data bytes; 255 switches to Iac
//! - **Iac**: Found 255, next byte determines the action
//! - **Will / Wont / Do / Dont**: The next byte is the option code
//! - **Sub**: Inside IAC SB, accumulating the option code and payload
//! - **SubIac**: Saw IAC inside a subnegotiation; SE ends it, IAC is an
//!   escaped payload byte, anything else is a protocol violation
//!
//! After every completed sequence the machine is back in **Data**. The
//! emitted data stream never contains a raw 255 that was not escaped on
//! the wire.
//!
//! ### Command Sequences:
//! - Simple: `IAC <command>` (e.g., IAC NOP)
//! - With option: `IAC <command> <option>` (e.g., IAC WILL ECHO)
//! - Sub-negotiation: `IAC SB <option> <data...> IAC SE`
//! - Escaped data: `IAC IAC` (represents data byte 255)
//!
//! ### Oversized subnegotiations
//! Payloads are capped at [`MAX_SUBNEG_LEN`] bytes. Anything past the cap is
//! discarded and the sequence is flagged as a violation, but framing is still
//! tracked so the parser resynchronizes at the closing IAC SE.

use crate::protocol::{IAC, TelnetCommand, TelnetSequence};

/// Maximum accepted subnegotiation payload size in bytes.
///
/// Incoming payloads larger than this are truncated and counted as a
/// protocol violation.
pub const MAX_SUBNEG_LEN: usize = 4096;

/// Parser state for IAC sequence detection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ParserState {
    /// Expecting normal data or IAC byte
    Data,
    /// Found IAC (255), expecting command byte
    Iac,
    /// Found IAC WILL, expecting option byte
    Will,
    /// Found IAC WONT, expecting option byte
    Wont,
    /// Found IAC DO, expecting option byte
    Do,
    /// Found IAC DONT, expecting option byte
    Dont,
    /// Inside IAC SB, accumulating option code and payload
    Sub,
    /// Saw IAC while inside a subnegotiation
    SubIac,
}

/// Result of parsing a chunk of bytes
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ParseResult {
    /// Data bytes that should be passed to the application
    pub data: Vec<u8>,
    /// Telnet command sequences found in the stream
    pub sequences: Vec<TelnetSequence>,
    /// Protocol violations observed in this chunk (bad SB framing,
    /// oversized payloads). The stream stays usable; these are for
    /// diagnostics and counters.
    pub violations: u32,
}

/// Telnet command parser with stateful IAC sequence detection
#[derive(Debug, Clone)]
pub struct TelnetParser {
    state: ParserState,
    /// Option code of the subnegotiation currently being accumulated
    current_option: Option<u8>,
    /// Payload accumulator for the subnegotiation in progress
    sub_buffer: Vec<u8>,
    /// Set once the current subnegotiation ran past MAX_SUBNEG_LEN
    sub_truncated: bool,
}

impl Default for TelnetParser {
    fn default() -> Self {
        Self::new()
    }
}

impl TelnetParser {
    /// Create a new parser in the initial data state
    pub fn new() -> Self {
        Self {
            state: ParserState::Data,
            current_option: None,
            sub_buffer: Vec::new(),
            sub_truncated: false,
        }
    }

    /// Parse a chunk of bytes, returning data and command sequences
    ///
    /// This method can be called repeatedly with chunks of data from a TCP
    /// stream. It maintains state between calls, so command sequences that
    /// span multiple chunks are reassembled transparently. The whole input
    /// is always consumed.
    ///
    /// # Example
    /// ```rust
    /// use telnet_protocol::parser::TelnetParser;
    ///
    /// let mut parser = TelnetParser::new();
    ///
    /// // Parse bytes containing: "hello" + IAC WILL ECHO + "world"
    /// let input = vec![104, 101, 108, 108, 111, 255, 251, 1, 119, 111, 114, 108, 100];
    /// let result = parser.parse(&input);
    ///
    /// assert_eq!(result.data, b"helloworld");
    /// assert_eq!(result.sequences.len(), 1);
    /// ```
    pub fn parse(&mut self, input: &[u8]) -> ParseResult {
        let mut result = ParseResult::default();

        for &byte in input {
            match self.state {
                ParserState::Data => {
                    if byte == IAC {
                        self.state = ParserState::Iac;
                    } else {
                        result.data.push(byte);
                    }
                }

                ParserState::Iac => {
                    if byte == IAC {
                        // IAC IAC = escaped data byte 255
                        result.data.push(IAC);
                        self.state = ParserState::Data;
                    } else {
                        self.dispatch_command(byte, &mut result);
                    }
                }

                ParserState::Will => self.finish_negotiation(TelnetCommand::WILL, byte, &mut result),
                ParserState::Wont => self.finish_negotiation(TelnetCommand::WONT, byte, &mut result),
                ParserState::Do => self.finish_negotiation(TelnetCommand::DO, byte, &mut result),
                ParserState::Dont => self.finish_negotiation(TelnetCommand::DONT, byte, &mut result),

                ParserState::Sub => {
                    if byte == IAC {
                        self.state = ParserState::SubIac;
                    } else if self.current_option.is_none() {
                        // First byte after IAC SB is the option code
                        self.current_option = Some(byte);
                    } else {
                        self.accumulate_sub_byte(byte, &mut result);
                    }
                }

                ParserState::SubIac => {
                    if byte == TelnetCommand::SE.to_byte() {
                        self.finish_subnegotiation(&mut result);
                    } else if byte == IAC {
                        // IAC IAC inside a subnegotiation is an escaped payload byte
                        self.accumulate_sub_byte(IAC, &mut result);
                        self.state = ParserState::Sub;
                    } else {
                        // IAC <other> inside SB aborts the subnegotiation
                        result.violations += 1;
                        self.reset_sub();
                        self.state = ParserState::Data;
                    }
                }
            }
        }

        result
    }

    /// Handle the byte following a lone IAC
    fn dispatch_command(&mut self, byte: u8, result: &mut ParseResult) {
        match TelnetCommand::from_byte(byte) {
            Some(TelnetCommand::WILL) => self.state = ParserState::Will,
            Some(TelnetCommand::WONT) => self.state = ParserState::Wont,
            Some(TelnetCommand::DO) => self.state = ParserState::Do,
            Some(TelnetCommand::DONT) => self.state = ParserState::Dont,
            Some(TelnetCommand::SB) => {
                self.reset_sub();
                self.state = ParserState::Sub;
            }
            Some(cmd) => {
                // Simple command: SE/NOP/DM/BRK/IP/AO/AYT/EC/EL/GA/EOR
                result.sequences.push(TelnetSequence::Command(cmd));
                self.state = ParserState::Data;
            }
            None => {
                // Unknown command byte - not a legal sequence, count it
                // and drop both bytes so no raw IAC leaks downstream
                result.violations += 1;
                self.state = ParserState::Data;
            }
        }
    }

    /// Complete a WILL/WONT/DO/DONT sequence with its option byte
    fn finish_negotiation(&mut self, command: TelnetCommand, option: u8, result: &mut ParseResult) {
        result
            .sequences
            .push(TelnetSequence::Negotiation { command, option });
        self.state = ParserState::Data;
    }

    /// Append a payload byte to the subnegotiation in progress, honoring the cap
    fn accumulate_sub_byte(&mut self, byte: u8, result: &mut ParseResult) {
        if self.sub_buffer.len() < MAX_SUBNEG_LEN {
            self.sub_buffer.push(byte);
        } else if !self.sub_truncated {
            self.sub_truncated = true;
            result.violations += 1;
        }
    }

    /// Complete the subnegotiation at IAC SE
    fn finish_subnegotiation(&mut self, result: &mut ParseResult) {
        match self.current_option.take() {
            Some(option) => {
                result.sequences.push(TelnetSequence::SubNegotiation {
                    option,
                    data: std::mem::take(&mut self.sub_buffer),
                });
            }
            None => {
                // IAC SB IAC SE with no option byte at all
                result.violations += 1;
            }
        }
        self.sub_truncated = false;
        self.state = ParserState::Data;
    }

    fn reset_sub(&mut self) {
        self.current_option = None;
        self.sub_buffer.clear();
        self.sub_truncated = false;
    }

    /// True while the parser is mid-sequence, waiting for more bytes
    pub fn in_sequence(&self) -> bool {
        !matches!(self.state, ParserState::Data)
    }

    /// Reset parser to initial state (useful for new connections)
    pub fn reset(&mut self) {
        self.state = ParserState::Data;
        self.reset_sub();
    }
}

//! # Terminal Type Option Implementation (RFC 1091)
//!
//! The Terminal Type option lets the peer ask what kind of terminal is on
//! our end so it can adapt formatting and feature use.
//!
//! ## Sub-negotiation Protocol
//!
//! ### Query Terminal Type
//! ```text
//! IAC SB TERMINAL_TYPE SEND IAC SE
//! ```
//!
//! ### Terminal Type Response
//! ```text
//! IAC SB TERMINAL_TYPE IS <terminal-type-string> IAC SE
//! ```
//!
//! The bridge answers SEND with its configured terminal type (default
//! `ANSI`, matching what retro DTE software expects). If the peer ever
//! volunteers its own type with IS, we record it for diagnostics.

use super::{OptionError, TTYPE_IS, TTYPE_SEND, TelnetOptionHandler};
use crate::protocol::option;

/// Default terminal type reported to the peer
pub const DEFAULT_TERMINAL_TYPE: &str = "ANSI";

/// Terminal Type option handler
#[derive(Debug, Clone)]
pub struct TerminalTypeOption {
    /// The type string we report on SEND
    terminal_type: String,
    /// Terminal type the peer reported with IS, if any
    peer_type: Option<String>,
}

impl Default for TerminalTypeOption {
    fn default() -> Self {
        Self::new(DEFAULT_TERMINAL_TYPE)
    }
}

impl TerminalTypeOption {
    /// Create a handler reporting the given terminal type
    pub fn new(terminal_type: &str) -> Self {
        Self {
            terminal_type: terminal_type.to_string(),
            peer_type: None,
        }
    }

    /// The type string we report
    pub fn terminal_type(&self) -> &str {
        &self.terminal_type
    }

    /// Terminal type the peer reported, if it sent one
    pub fn peer_type(&self) -> Option<&str> {
        self.peer_type.as_deref()
    }
}

impl TelnetOptionHandler for TerminalTypeOption {
    fn option_code(&self) -> u8 {
        option::TERMINAL_TYPE
    }

    fn handle_subnegotiation(&mut self, data: &[u8]) -> Result<Option<Vec<u8>>, OptionError> {
        let Some((&sub, rest)) = data.split_first() else {
            return Err(OptionError::InvalidData("empty TTYPE payload".to_string()));
        };

        match sub {
            TTYPE_SEND => {
                let mut reply = Vec::with_capacity(self.terminal_type.len() + 1);
                reply.push(TTYPE_IS);
                reply.extend_from_slice(self.terminal_type.as_bytes());
                Ok(Some(reply))
            }
            TTYPE_IS => {
                self.peer_type = Some(String::from_utf8_lossy(rest).into_owned());
                Ok(None)
            }
            other => Err(OptionError::UnsupportedCommand(other)),
        }
    }

    fn reset(&mut self) {
        self.peer_type = None;
    }
}

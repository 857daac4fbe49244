//! # Telnet Option Implementations
//!
//! This module provides concrete implementations of the options the bridge
//! negotiates, as defined in their respective RFCs. Each option owns its
//! lifecycle state and knows how to answer its subnegotiations.
//!
//! ## Implemented Options
//!
//! ### Terminal Type Option (RFC 1091)
//! Answers the peer's SEND query with the configured terminal type string.
//!
//! ### NAWS - Negotiate About Window Size (RFC 1073)
//! Reports our window size and records the peer's.
//!
//! ### Linemode Option (RFC 1184)
//! Acknowledges MODE masks; FORWARDMASK and SLC are framed but not acted
//! on - the bridge is a byte pipe and does no local line editing.
//!
//! ## Architecture
//!
//! Each option implements [`TelnetOptionHandler`]: given a subnegotiation
//! payload it updates its own state and returns the reply payload (if any)
//! for the engine to frame as `IAC SB <opt> ... IAC SE`.

pub mod linemode;
pub mod naws;
pub mod terminal_type;

// Re-export main types for convenience
pub use linemode::LinemodeOption;
pub use naws::{NawsOption, WindowSize};
pub use terminal_type::TerminalTypeOption;

/// Terminal-Type subnegotiation subcommand: "here is my terminal type"
pub const TTYPE_IS: u8 = 0;
/// Terminal-Type subnegotiation subcommand: "send me your terminal type"
pub const TTYPE_SEND: u8 = 1;

/// Common trait for telnet option implementations
pub trait TelnetOptionHandler {
    /// The telnet option code this handler manages
    fn option_code(&self) -> u8;

    /// Handle an incoming subnegotiation payload (option code and framing
    /// already stripped). Returns the reply payload to frame and send, or
    /// `None` when no reply is called for.
    fn handle_subnegotiation(&mut self, data: &[u8]) -> Result<Option<Vec<u8>>, OptionError>;

    /// Reset the option to initial state (new connection)
    fn reset(&mut self);
}

/// Errors that can occur during option processing
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OptionError {
    /// Invalid subnegotiation data format
    InvalidData(String),
    /// Unsupported subnegotiation subcommand
    UnsupportedCommand(u8),
}

impl std::fmt::Display for OptionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OptionError::InvalidData(msg) => write!(f, "Invalid option data: {}", msg),
            OptionError::UnsupportedCommand(cmd) => write!(f, "Unsupported command: {}", cmd),
        }
    }
}

impl std::error::Error for OptionError {}

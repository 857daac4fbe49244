//! # Telnet Protocol Library
//!
//! A Rust library for the Telnet wire protocol as defined in:
//! - RFC 854: Telnet Protocol Specification (https://tools.ietf.org/html/rfc854)
//! - RFC 855: Telnet Option Specifications
//! - Various option-specific RFCs (857, 858, 1073, 1091, 1184)
//!
//! This library is designed to be:
//! - **Transport-free**: the caller owns the socket; the engine turns bytes
//!   into bytes, which makes it equally usable from threads, async tasks,
//!   or plain test vectors
//! - **Robust**: malformed sequences are counted and recovered from, never
//!   panicked on - a hostile peer can at worst waste its own bandwidth
//! - **Standards-compliant**: IAC escaping round-trips exactly, option
//!   negotiation cannot loop
//!
//! ## Architecture Overview
//!
//! The library is organized into several modules:
//! - `protocol`: Basic Telnet protocol constants and types (RFC 854)
//! - `parser`: The eight-state ingress IAC parser
//! - `escape`: Egress IAC doubling
//! - `negotiation`: Option negotiation with loop prevention
//! - `options`: Individual option implementations (Terminal Type, NAWS, Linemode)
//! - `engine`: The assembled per-connection protocol engine

pub mod engine;
pub mod escape;
pub mod negotiation;
pub mod options;
pub mod parser;
pub mod protocol;

// Re-export main types for convenience
pub use engine::{EngineOutput, TelnetEngine};
pub use escape::EscapeError;
pub use negotiation::OptionNegotiator;
pub use options::WindowSize;
pub use parser::{MAX_SUBNEG_LEN, ParseResult, TelnetParser};
pub use protocol::{IAC, TelnetCommand, TelnetSequence, option};

/// Library version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Supported Telnet RFCs
pub const SUPPORTED_RFCS: &[&str] = &[
    "RFC 854 - Telnet Protocol Specification",
    "RFC 855 - Telnet Option Specifications",
    "RFC 857 - Telnet Echo Option",
    "RFC 858 - Telnet Suppress Go Ahead Option",
    "RFC 1073 - Telnet Window Size Option",
    "RFC 1091 - Telnet Terminal-Type Option",
    "RFC 1184 - Telnet Linemode Option",
];

//! # Telnet Protocol Constants and Types
//!
//! This module implements the core Telnet protocol as defined in:
//! - **RFC 854**: Telnet Protocol Specification
//! - **RFC 855**: Telnet Option Specifications
//!
//! ## Key Concepts from RFC 854:
//!
//! ### IAC (Interpret As Command) - Byte 255
//! The IAC byte (255/0xFF) signals that the following bytes should be interpreted
//! as Telnet commands rather than data. Any data byte with value 255 must be
//! escaped as IAC IAC (255 255).
//!
//! ### Command Structure
//! Telnet commands follow the pattern: `IAC <command> [option]`
//! - For negotiation: `IAC WILL/WONT/DO/DONT <option>`
//! - For actions: `IAC <command>` (like IAC AYT for Are You There)
//!
//! ### Sub-option Structure (RFC 855)
//! Sub-options use: `IAC SB <option> <parameters...> IAC SE`
//! This is how TERMINAL-TYPE, NAWS and LINEMODE exchange their payloads.
//!
//! ## Options as raw bytes
//!
//! Negotiation must handle *any* of the 256 possible option codes, including
//! ones nobody has assigned, because a peer can request anything and an
//! unknown request still needs a DONT/WONT refusal. Options are therefore
//! carried as plain `u8` values throughout; the [`option`] module names the
//! codes this crate knows about.

/// IAC - Interpret As Command (RFC 854, Section 4)
///
/// The IAC byte (255/0xFF) indicates that the next byte(s) should be interpreted
/// as a Telnet command sequence rather than regular data.
///
/// **Important**: Any data byte with value 255 must be escaped as two consecutive
/// IAC bytes (255 255) to distinguish it from command sequences.
pub const IAC: u8 = 255;

/// Telnet Commands (RFC 854, Section 4)
///
/// These commands follow the IAC byte to indicate specific protocol operations.
/// Each command has a specific purpose and may require additional parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TelnetCommand {
    /// End of Record (RFC 885)
    /// Marks a record boundary in the data stream
    /// Format: IAC EOR
    EOR = 239,

    /// End of subnegotiation parameters (RFC 855)
    /// Used with SB to encapsulate option-specific parameters
    /// Format: IAC SB <option> <data...> IAC SE
    SE = 240,

    /// No Operation - can be used as keepalive
    /// Format: IAC NOP
    NOP = 241,

    /// Data Mark - indicates position of Synch event in data stream
    /// Used with TCP Urgent data for out-of-band signaling
    DM = 242,

    /// Break - indicates Break or Attention signal
    /// Format: IAC BRK
    BRK = 243,

    /// Interrupt Process - suspend, interrupt, abort, or terminate process
    /// Equivalent to Ctrl+C on many systems
    /// Format: IAC IP
    IP = 244,

    /// Abort Output - allow process to run to completion but discard output
    /// Format: IAC AO
    AO = 245,

    /// Are You There - request visible evidence that system is still running
    /// Should generate a response to confirm system is active
    /// Format: IAC AYT
    AYT = 246,

    /// Erase Character - delete the last character entered
    /// Format: IAC EC
    EC = 247,

    /// Erase Line - delete the current line being entered
    /// Format: IAC EL
    EL = 248,

    /// Go Ahead - used in half-duplex mode to signal turn-taking
    /// Suppressed whenever SGA is in effect
    /// Format: IAC GA
    GA = 249,

    /// Subnegotiation Begin (RFC 855)
    /// Starts option-specific parameter exchange
    /// Format: IAC SB <option> <parameters...> IAC SE
    SB = 250,

    /// WILL - sender wants to enable option on its own side
    /// Format: IAC WILL <option>
    WILL = 251,

    /// WON'T - sender wants to disable option or refuses to enable
    /// Format: IAC WONT <option>
    WONT = 252,

    /// DO - sender wants receiver to enable option
    /// Format: IAC DO <option>
    DO = 253,

    /// DON'T - sender wants receiver to disable option or refuses request
    /// Format: IAC DONT <option>
    DONT = 254,
}

impl TelnetCommand {
    /// Convert a byte to a TelnetCommand if it represents a valid command
    ///
    /// # Example
    /// ```
    /// use telnet_protocol::protocol::TelnetCommand;
    ///
    /// assert_eq!(TelnetCommand::from_byte(251), Some(TelnetCommand::WILL));
    /// assert_eq!(TelnetCommand::from_byte(100), None);
    /// ```
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            239 => Some(TelnetCommand::EOR),
            240 => Some(TelnetCommand::SE),
            241 => Some(TelnetCommand::NOP),
            242 => Some(TelnetCommand::DM),
            243 => Some(TelnetCommand::BRK),
            244 => Some(TelnetCommand::IP),
            245 => Some(TelnetCommand::AO),
            246 => Some(TelnetCommand::AYT),
            247 => Some(TelnetCommand::EC),
            248 => Some(TelnetCommand::EL),
            249 => Some(TelnetCommand::GA),
            250 => Some(TelnetCommand::SB),
            251 => Some(TelnetCommand::WILL),
            252 => Some(TelnetCommand::WONT),
            253 => Some(TelnetCommand::DO),
            254 => Some(TelnetCommand::DONT),
            _ => None,
        }
    }

    /// Convert command to its byte representation
    pub fn to_byte(self) -> u8 {
        self as u8
    }

    /// Check if this command is part of option negotiation
    ///
    /// Returns true for WILL, WONT, DO, DONT commands that drive the
    /// option negotiation state machine.
    pub fn is_negotiation_command(self) -> bool {
        matches!(
            self,
            TelnetCommand::WILL | TelnetCommand::WONT | TelnetCommand::DO | TelnetCommand::DONT
        )
    }

    /// Check if this command requires an option parameter
    ///
    /// Returns true for commands that must be followed by an option byte.
    pub fn requires_option(self) -> bool {
        matches!(
            self,
            TelnetCommand::WILL
                | TelnetCommand::WONT
                | TelnetCommand::DO
                | TelnetCommand::DONT
                | TelnetCommand::SB
        )
    }
}

/// Named Telnet option codes
///
/// Only the codes this bridge actually negotiates (plus a few every telnet
/// peer sends anyway) get names here. Everything else is still a legal
/// option byte - it just gets refused during negotiation.
pub mod option {
    /// Binary Transmission (RFC 856)
    /// 8-bit clean data path, needed for anything that is not 7-bit ASCII
    pub const BINARY: u8 = 0;

    /// Echo (RFC 857)
    /// Controls which side echoes typed characters
    pub const ECHO: u8 = 1;

    /// Suppress Go Ahead (RFC 858)
    /// Disables the half-duplex Go Ahead signal; negotiated by
    /// practically every modern telnet session
    pub const SUPPRESS_GO_AHEAD: u8 = 3;

    /// Status (RFC 859)
    pub const STATUS: u8 = 5;

    /// Timing Mark (RFC 860)
    pub const TIMING_MARK: u8 = 6;

    /// Terminal Type (RFC 1091)
    /// Lets the server ask what kind of terminal is on the other end
    pub const TERMINAL_TYPE: u8 = 24;

    /// End of Record (RFC 885)
    pub const END_OF_RECORD: u8 = 25;

    /// Negotiate About Window Size (RFC 1073)
    /// Reports terminal dimensions via subnegotiation
    pub const NAWS: u8 = 31;

    /// Terminal Speed (RFC 1079)
    pub const TERMINAL_SPEED: u8 = 32;

    /// Remote Flow Control (RFC 1372)
    pub const TOGGLE_FLOW_CONTROL: u8 = 33;

    /// Linemode (RFC 1184)
    /// Line-at-a-time editing mode with a MODE mask exchange
    pub const LINEMODE: u8 = 34;

    /// New Environment (RFC 1571)
    pub const NEW_ENVIRON: u8 = 39;

    /// Human-readable name for an option code, for diagnostics
    pub fn name(code: u8) -> Option<&'static str> {
        match code {
            BINARY => Some("BINARY"),
            ECHO => Some("ECHO"),
            SUPPRESS_GO_AHEAD => Some("SUPPRESS-GO-AHEAD"),
            STATUS => Some("STATUS"),
            TIMING_MARK => Some("TIMING-MARK"),
            TERMINAL_TYPE => Some("TERMINAL-TYPE"),
            END_OF_RECORD => Some("END-OF-RECORD"),
            NAWS => Some("NAWS"),
            TERMINAL_SPEED => Some("TERMINAL-SPEED"),
            TOGGLE_FLOW_CONTROL => Some("TOGGLE-FLOW-CONTROL"),
            LINEMODE => Some("LINEMODE"),
            NEW_ENVIRON => Some("NEW-ENVIRON"),
            _ => None,
        }
    }
}

/// Represents a complete Telnet command sequence parsed off the wire
///
/// This type captures the various forms of Telnet commands:
/// - Simple commands: IAC <command>
/// - Option negotiation: IAC <command> <option>
/// - Sub-negotiation: IAC SB <option> <data> IAC SE
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TelnetSequence {
    /// Simple command without parameters (e.g., IAC NOP)
    Command(TelnetCommand),

    /// Option negotiation command (e.g., IAC WILL ECHO)
    Negotiation { command: TelnetCommand, option: u8 },

    /// Sub-negotiation sequence (RFC 855)
    /// Contains option-specific data between IAC SB and IAC SE,
    /// with any IAC IAC escapes already collapsed
    SubNegotiation { option: u8, data: Vec<u8> },
}

impl TelnetSequence {
    /// Serialize this sequence to bytes for transmission
    ///
    /// Subnegotiation payload bytes equal to IAC are re-escaped on the way
    /// out, mirroring what the parser collapses on the way in.
    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            TelnetSequence::Command(cmd) => {
                vec![IAC, cmd.to_byte()]
            }
            TelnetSequence::Negotiation { command, option } => {
                vec![IAC, command.to_byte(), *option]
            }
            TelnetSequence::SubNegotiation { option, data } => {
                let mut bytes = Vec::with_capacity(data.len() + 5);
                bytes.push(IAC);
                bytes.push(TelnetCommand::SB.to_byte());
                bytes.push(*option);
                for &b in data {
                    bytes.push(b);
                    if b == IAC {
                        bytes.push(IAC);
                    }
                }
                bytes.push(IAC);
                bytes.push(TelnetCommand::SE.to_byte());
                bytes
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_iac_constant() {
        assert_eq!(IAC, 255);
        assert_eq!(IAC, 0xFF);
    }

    #[test]
    fn test_command_byte_conversion() {
        assert_eq!(TelnetCommand::from_byte(251), Some(TelnetCommand::WILL));
        assert_eq!(TelnetCommand::from_byte(252), Some(TelnetCommand::WONT));
        assert_eq!(TelnetCommand::from_byte(253), Some(TelnetCommand::DO));
        assert_eq!(TelnetCommand::from_byte(254), Some(TelnetCommand::DONT));
        assert_eq!(TelnetCommand::from_byte(239), Some(TelnetCommand::EOR));
        assert_eq!(TelnetCommand::from_byte(100), None);

        assert_eq!(TelnetCommand::WILL.to_byte(), 251);
        assert_eq!(TelnetCommand::WONT.to_byte(), 252);
        assert_eq!(TelnetCommand::DO.to_byte(), 253);
        assert_eq!(TelnetCommand::DONT.to_byte(), 254);
    }

    #[test]
    fn test_option_names() {
        assert_eq!(option::name(option::ECHO), Some("ECHO"));
        assert_eq!(option::name(option::TERMINAL_TYPE), Some("TERMINAL-TYPE"));
        assert_eq!(option::name(option::LINEMODE), Some("LINEMODE"));
        assert_eq!(option::name(99), None);
    }

    #[test]
    fn test_negotiation_commands() {
        assert!(TelnetCommand::WILL.is_negotiation_command());
        assert!(TelnetCommand::WONT.is_negotiation_command());
        assert!(TelnetCommand::DO.is_negotiation_command());
        assert!(TelnetCommand::DONT.is_negotiation_command());
        assert!(!TelnetCommand::NOP.is_negotiation_command());
    }

    #[test]
    fn test_commands_requiring_options() {
        assert!(TelnetCommand::WILL.requires_option());
        assert!(TelnetCommand::SB.requires_option());
        assert!(!TelnetCommand::NOP.requires_option());
        assert!(!TelnetCommand::AYT.requires_option());
    }

    #[test]
    fn test_sequence_serialization() {
        // Simple command: IAC NOP
        let cmd = TelnetSequence::Command(TelnetCommand::NOP);
        assert_eq!(cmd.to_bytes(), vec![255, 241]);

        // Negotiation: IAC WILL ECHO
        let neg = TelnetSequence::Negotiation {
            command: TelnetCommand::WILL,
            option: option::ECHO,
        };
        assert_eq!(neg.to_bytes(), vec![255, 251, 1]);

        // Sub-negotiation: IAC SB TERMINAL_TYPE <data> IAC SE
        let sub = TelnetSequence::SubNegotiation {
            option: option::TERMINAL_TYPE,
            data: vec![1, 65, 78, 83, 73], // SEND + "ANSI"
        };
        assert_eq!(
            sub.to_bytes(),
            vec![255, 250, 24, 1, 65, 78, 83, 73, 255, 240]
        );
    }

    #[test]
    fn test_subnegotiation_payload_iac_is_reescaped() {
        let sub = TelnetSequence::SubNegotiation {
            option: option::LINEMODE,
            data: vec![2, 255, 7],
        };
        assert_eq!(sub.to_bytes(), vec![255, 250, 34, 2, 255, 255, 7, 255, 240]);
    }
}

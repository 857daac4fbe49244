//! # Linemode Option Implementation (RFC 1184)
//!
//! Linemode negotiates where line editing happens. The bridge is a byte
//! pipe between a serial DTE and a socket, so it performs no editing at
//! all: MODE masks are acknowledged as required by the RFC, FORWARDMASK
//! and SLC subcommands are parsed for framing but otherwise ignored.
//!
//! ## MODE exchange
//!
//! ```text
//! peer:  IAC SB LINEMODE MODE <mask> IAC SE
//! us:    IAC SB LINEMODE MODE <mask | ACK> IAC SE
//! ```
//!
//! A MODE that already carries the ACK bit is an acknowledgement of our
//! own mask and must not be acknowledged again.

use super::{OptionError, TelnetOptionHandler};
use crate::protocol::option;

/// LINEMODE subcommand: mode mask exchange
pub const LM_MODE: u8 = 1;
/// LINEMODE subcommand: forwarding mask
pub const LM_FORWARDMASK: u8 = 2;
/// LINEMODE subcommand: set local characters
pub const LM_SLC: u8 = 3;

/// MODE mask bit: local line editing
pub const MODE_EDIT: u8 = 0x01;
/// MODE mask bit: trap signals locally
pub const MODE_TRAPSIG: u8 = 0x02;
/// MODE mask bit: acknowledgement of a received mask
pub const MODE_ACK: u8 = 0x04;

/// Linemode option handler
#[derive(Debug, Clone, Default)]
pub struct LinemodeOption {
    /// Last MODE mask the peer sent (ACK bit stripped)
    peer_mode: Option<u8>,
}

impl LinemodeOption {
    pub fn new() -> Self {
        Self::default()
    }

    /// Last mode mask received from the peer
    pub fn peer_mode(&self) -> Option<u8> {
        self.peer_mode
    }
}

impl TelnetOptionHandler for LinemodeOption {
    fn option_code(&self) -> u8 {
        option::LINEMODE
    }

    fn handle_subnegotiation(&mut self, data: &[u8]) -> Result<Option<Vec<u8>>, OptionError> {
        let Some((&sub, rest)) = data.split_first() else {
            return Err(OptionError::InvalidData(
                "empty LINEMODE payload".to_string(),
            ));
        };

        match sub {
            LM_MODE => {
                let Some(&mask) = rest.first() else {
                    return Err(OptionError::InvalidData("MODE without mask".to_string()));
                };
                self.peer_mode = Some(mask & !MODE_ACK);
                if mask & MODE_ACK != 0 {
                    // Already an acknowledgement, do not ack the ack
                    Ok(None)
                } else {
                    Ok(Some(vec![LM_MODE, mask | MODE_ACK]))
                }
            }
            // Framed but not acted on - the bridge does no line editing
            LM_FORWARDMASK | LM_SLC => Ok(None),
            other => Err(OptionError::UnsupportedCommand(other)),
        }
    }

    fn reset(&mut self) {
        self.peer_mode = None;
    }
}

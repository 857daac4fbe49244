//! # NAWS - Negotiate About Window Size (RFC 1073)
//!
//! NAWS carries terminal dimensions as a fixed four-byte subnegotiation:
//!
//! ```text
//! IAC SB NAWS <width-hi> <width-lo> <height-hi> <height-lo> IAC SE
//! ```
//!
//! The parser has already collapsed any IAC IAC escapes by the time the
//! payload reaches this handler, so the payload is exactly four bytes of
//! big-endian width and height. A width or height of zero means "unspecified".

use super::{OptionError, TelnetOptionHandler};
use crate::protocol::option;

/// Terminal window dimensions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowSize {
    /// Width in character columns
    pub width: u16,
    /// Height in character rows
    pub height: u16,
}

impl Default for WindowSize {
    fn default() -> Self {
        // The classic 80x24 terminal
        Self {
            width: 80,
            height: 24,
        }
    }
}

impl WindowSize {
    /// Encode as the four-byte NAWS payload
    pub fn to_payload(self) -> [u8; 4] {
        let w = self.width.to_be_bytes();
        let h = self.height.to_be_bytes();
        [w[0], w[1], h[0], h[1]]
    }
}

/// NAWS option handler
#[derive(Debug, Clone, Default)]
pub struct NawsOption {
    /// The size we report when the peer enables NAWS on our side
    local: WindowSize,
    /// Last size the peer reported
    peer: Option<WindowSize>,
}

impl NawsOption {
    pub fn new(local: WindowSize) -> Self {
        Self { local, peer: None }
    }

    /// The window size we report
    pub fn local_size(&self) -> WindowSize {
        self.local
    }

    /// The peer's last reported window size
    pub fn peer_size(&self) -> Option<WindowSize> {
        self.peer
    }

    /// Payload for our own size report, sent after NAWS is enabled locally
    pub fn report_payload(&self) -> Vec<u8> {
        self.local.to_payload().to_vec()
    }
}

impl TelnetOptionHandler for NawsOption {
    fn option_code(&self) -> u8 {
        option::NAWS
    }

    fn handle_subnegotiation(&mut self, data: &[u8]) -> Result<Option<Vec<u8>>, OptionError> {
        if data.len() != 4 {
            return Err(OptionError::InvalidData(format!(
                "NAWS payload must be 4 bytes, got {}",
                data.len()
            )));
        }

        self.peer = Some(WindowSize {
            width: u16::from_be_bytes([data[0], data[1]]),
            height: u16::from_be_bytes([data[2], data[3]]),
        });
        Ok(None)
    }

    fn reset(&mut self) {
        self.peer = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_peer_size_decoded() {
        let mut naws = NawsOption::default();

        naws.handle_subnegotiation(&[0, 132, 0, 43]).unwrap();

        assert_eq!(
            naws.peer_size(),
            Some(WindowSize {
                width: 132,
                height: 43
            })
        );
    }

    #[test]
    fn test_wide_terminal_big_endian() {
        let mut naws = NawsOption::default();

        naws.handle_subnegotiation(&[1, 44, 0, 50]).unwrap();

        assert_eq!(naws.peer_size().unwrap().width, 300);
    }

    #[test]
    fn test_report_payload_default() {
        let naws = NawsOption::default();
        assert_eq!(naws.report_payload(), vec![0, 80, 0, 24]);
    }

    #[test]
    fn test_bad_length_rejected() {
        let mut naws = NawsOption::default();
        assert!(naws.handle_subnegotiation(&[0, 80, 0]).is_err());
        assert!(naws.peer_size().is_none());
    }
}

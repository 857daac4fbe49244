//! Unsolicited hardware-message recognition.
//!
//! When the bridge fronts a real external modem instead of purely emulating
//! one, the device announces call events as CR/LF-bounded text lines mixed
//! into the data stream: `RING`, `CONNECT`, `CONNECT 2400`, `NO CARRIER`.
//! These must be intercepted and turned into state changes rather than
//! forwarded as data. Line assembly (tolerant of fragmentation across
//! reads) happens in the serial layer; this module only classifies whole
//! records. No regex needed - the vocabulary is three fixed words.

/// An out-of-band message from a fronted hardware modem.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HardwareMessage {
    /// Incoming call is ringing
    Ring,
    /// Call established, optionally with the negotiated speed
    Connect(Option<u32>),
    /// Call dropped
    NoCarrier,
}

/// Classify one CR/LF-bounded record. Returns `None` for anything that is
/// not a recognized modem message (such lines are ordinary data).
pub fn match_line(line: &[u8]) -> Option<HardwareMessage> {
    let text = std::str::from_utf8(line).ok()?.trim();

    if text == "RING" {
        return Some(HardwareMessage::Ring);
    }
    if text == "NO CARRIER" {
        return Some(HardwareMessage::NoCarrier);
    }
    if text == "CONNECT" {
        return Some(HardwareMessage::Connect(None));
    }
    if let Some(rest) = text.strip_prefix("CONNECT ") {
        // Speed suffix must be pure digits; "CONNECTED" is not a report
        if !rest.is_empty() && rest.bytes().all(|b| b.is_ascii_digit()) {
            return Some(HardwareMessage::Connect(rest.parse().ok()));
        }
    }
    None
}

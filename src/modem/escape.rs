//! Escape-sequence (`+++`) detection for online mode.
//!
//! The whole trick of the Hayes escape is telling three deliberate plus
//! signs apart from a `+++` that happens to occur in user traffic. Three
//! guard windows of S12 x 20 ms each do it:
//!
//! 1. **Pre-silence**: the first `+` only counts if no DTE byte arrived
//!    for at least the guard time before it.
//! 2. **Inter-character**: each following `+` must arrive within the guard
//!    time of the previous one; a late `+` flushes what was held and
//!    starts the attempt over at count one.
//! 3. **Post-silence**: after the third `+`, the line must stay quiet for
//!    the guard time. Only then does the modem drop to command mode.
//!
//! Candidate `+` bytes are *held*, not forwarded. When a guard fails they
//! are released downstream - they were user data all along. When the
//! sequence completes they are swallowed and never reach the network.
//!
//! All timing comes in as `Instant` arguments so tests can replay exact
//! timelines without sleeping.

use std::time::{Duration, Instant};

/// What a poll of the detector decided.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EscapePoll {
    /// Nothing to do yet
    Idle,
    /// Held bytes turned out to be data; forward them
    Release(Vec<u8>),
    /// A full guarded +++ was seen; switch to command mode
    Escaped,
}

/// Stateful guard-time escape detector.
#[derive(Debug, Clone)]
pub struct EscapeDetector {
    /// S2 at the time the call went online; None disables detection
    escape_char: Option<u8>,
    /// S12 x 20 ms at the time the call went online
    guard: Duration,
    /// Candidate escape characters seen so far (0-3)
    count: u8,
    /// When the most recent candidate arrived
    last_escape: Option<Instant>,
    /// When the most recent ordinary data byte arrived
    last_data: Option<Instant>,
}

impl EscapeDetector {
    pub fn new(escape_char: Option<u8>, guard: Duration) -> Self {
        Self {
            escape_char,
            guard,
            count: 0,
            last_escape: None,
            last_data: None,
        }
    }

    /// Candidate characters currently held back.
    pub fn held_count(&self) -> u8 {
        self.count
    }

    /// Feed one byte from the DTE. Returns the bytes to forward downstream
    /// right now (possibly empty while candidates are being held).
    pub fn feed(&mut self, byte: u8, now: Instant) -> Vec<u8> {
        let Some(esc) = self.escape_char else {
            // S2 > 127: detection disabled, everything is data
            self.last_data = Some(now);
            return vec![byte];
        };

        if byte != esc {
            // Ordinary byte: any held candidates were data after all
            let mut released = self.take_held(esc);
            released.push(byte);
            self.last_data = Some(now);
            return released;
        }

        match self.count {
            0 => {
                if self.pre_silence_ok(now) {
                    self.count = 1;
                    self.last_escape = Some(now);
                    Vec::new()
                } else {
                    // A + in the middle of traffic is just a +
                    self.last_data = Some(now);
                    vec![esc]
                }
            }
            1 | 2 => {
                if self.within_guard(now) {
                    self.count += 1;
                    self.last_escape = Some(now);
                    Vec::new()
                } else {
                    // Late +: flush the stale candidates; the gap itself
                    // was silence, so this + restarts the attempt
                    let released = self.take_held(esc);
                    self.count = 1;
                    self.last_escape = Some(now);
                    released
                }
            }
            _ => {
                // A fourth + breaks the sequence: all four were data
                let mut released = self.take_held(esc);
                released.push(esc);
                self.last_data = Some(now);
                released
            }
        }
    }

    /// Check the clock without new input. Call this regularly while online;
    /// it is what fires the post-silence completion and what eventually
    /// releases a lone `+` or `++` that never became a full escape.
    pub fn poll(&mut self, now: Instant) -> EscapePoll {
        let Some(esc) = self.escape_char else {
            return EscapePoll::Idle;
        };
        if self.count == 0 || self.within_guard(now) {
            return EscapePoll::Idle;
        }

        if self.count == 3 {
            self.count = 0;
            self.last_escape = None;
            EscapePoll::Escaped
        } else {
            let released = self.take_held(esc);
            self.last_data = Some(now);
            EscapePoll::Release(released)
        }
    }

    /// Reconfigure and clear state when a call goes online.
    pub fn reset(&mut self, escape_char: Option<u8>, guard: Duration) {
        self.escape_char = escape_char;
        self.guard = guard;
        self.count = 0;
        self.last_escape = None;
        self.last_data = None;
    }

    fn pre_silence_ok(&self, now: Instant) -> bool {
        match self.last_data {
            // No data since going online counts as silence
            None => true,
            Some(t) => now.duration_since(t) >= self.guard,
        }
    }

    fn within_guard(&self, now: Instant) -> bool {
        match self.last_escape {
            None => false,
            Some(t) => now.duration_since(t) <= self.guard,
        }
    }

    fn take_held(&mut self, esc: u8) -> Vec<u8> {
        let released = vec![esc; self.count as usize];
        self.count = 0;
        self.last_escape = None;
        released
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const GUARD: Duration = Duration::from_millis(1000);

    fn detector() -> EscapeDetector {
        EscapeDetector::new(Some(b'+'), GUARD)
    }

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn test_clean_escape_sequence() {
        let mut det = detector();
        let t0 = Instant::now();

        // Silence from online entry, then three spaced plusses
        assert!(det.feed(b'+', t0 + ms(1500)).is_empty());
        assert!(det.feed(b'+', t0 + ms(2000)).is_empty());
        assert!(det.feed(b'+', t0 + ms(2500)).is_empty());

        // Still inside the post-silence window
        assert_eq!(det.poll(t0 + ms(3000)), EscapePoll::Idle);
        // Window passed: escape fires, the plusses were never forwarded
        assert_eq!(det.poll(t0 + ms(4000)), EscapePoll::Escaped);
    }

    #[test]
    fn test_plus_in_traffic_is_data() {
        let mut det = detector();
        let t0 = Instant::now();

        // "foo+++bar" with no guard silences: every byte forwarded
        let mut forwarded = Vec::new();
        for (i, &b) in b"foo+++bar".iter().enumerate() {
            forwarded.extend(det.feed(b, t0 + ms(1500 + i as u64)));
        }
        assert_eq!(forwarded, b"foo+++bar");
        assert_eq!(det.held_count(), 0);
    }

    #[test]
    fn test_no_pre_silence_rejects_first_plus() {
        let mut det = detector();
        let t0 = Instant::now();

        det.feed(b'x', t0 + ms(100));
        // Only 200 ms after data: the + is forwarded immediately
        assert_eq!(det.feed(b'+', t0 + ms(300)), vec![b'+']);
    }

    #[test]
    fn test_late_plus_restarts_attempt() {
        let mut det = detector();
        let t0 = Instant::now();

        assert!(det.feed(b'+', t0 + ms(1500)).is_empty());
        assert!(det.feed(b'+', t0 + ms(2000)).is_empty());
        // Third + arrives 1.5 s after the second: too late. The two held
        // plusses flush, this one starts over as candidate #1
        let released = det.feed(b'+', t0 + ms(3500));
        assert_eq!(released, b"++");
        assert_eq!(det.held_count(), 1);

        // The restarted attempt can still complete
        assert!(det.feed(b'+', t0 + ms(3800)).is_empty());
        assert!(det.feed(b'+', t0 + ms(4100)).is_empty());
        assert_eq!(det.poll(t0 + ms(5200)), EscapePoll::Escaped);
    }

    #[test]
    fn test_data_after_plusses_releases_them() {
        let mut det = detector();
        let t0 = Instant::now();

        assert!(det.feed(b'+', t0 + ms(1500)).is_empty());
        assert!(det.feed(b'+', t0 + ms(1600)).is_empty());
        // Data byte breaks the sequence: both plusses come out with it
        assert_eq!(det.feed(b'a', t0 + ms(1700)), b"++a");
    }

    #[test]
    fn test_data_after_third_plus_cancels_escape() {
        let mut det = detector();
        let t0 = Instant::now();

        det.feed(b'+', t0 + ms(1500));
        det.feed(b'+', t0 + ms(1600));
        det.feed(b'+', t0 + ms(1700));
        // Post-silence violated by more data
        assert_eq!(det.feed(b'!', t0 + ms(1800)), b"+++!");
        assert_eq!(det.poll(t0 + ms(4000)), EscapePoll::Idle);
    }

    #[test]
    fn test_fourth_plus_cancels_escape() {
        let mut det = detector();
        let t0 = Instant::now();

        det.feed(b'+', t0 + ms(1500));
        det.feed(b'+', t0 + ms(1600));
        det.feed(b'+', t0 + ms(1700));
        assert_eq!(det.feed(b'+', t0 + ms(1800)), b"++++");
    }

    #[test]
    fn test_partial_sequence_released_on_timeout() {
        let mut det = detector();
        let t0 = Instant::now();

        det.feed(b'+', t0 + ms(1500));
        // One lone + and then nothing: after the guard it is data
        assert_eq!(det.poll(t0 + ms(1600)), EscapePoll::Idle);
        assert_eq!(det.poll(t0 + ms(2600)), EscapePoll::Release(vec![b'+']));
    }

    #[test]
    fn test_custom_escape_char() {
        let mut det = EscapeDetector::new(Some(b'%'), GUARD);
        let t0 = Instant::now();

        det.feed(b'%', t0 + ms(1500));
        det.feed(b'%', t0 + ms(1600));
        det.feed(b'%', t0 + ms(1700));
        assert_eq!(det.poll(t0 + ms(2800)), EscapePoll::Escaped);

        // '+' means nothing to this detector
        assert_eq!(det.feed(b'+', t0 + ms(5000)), vec![b'+']);
    }

    #[test]
    fn test_detection_disabled() {
        let mut det = EscapeDetector::new(None, GUARD);
        let t0 = Instant::now();

        assert_eq!(det.feed(b'+', t0 + ms(1500)), vec![b'+']);
        assert_eq!(det.feed(b'+', t0 + ms(2000)), vec![b'+']);
        assert_eq!(det.feed(b'+', t0 + ms(2500)), vec![b'+']);
        assert_eq!(det.poll(t0 + ms(4000)), EscapePoll::Idle);
    }

    #[test]
    fn test_utf8_traffic_never_triggers() {
        // Multi-byte UTF-8 lead/continuation bytes are all >= 0x80 and can
        // never collide with a 7-bit escape character
        let mut det = detector();
        let t0 = Instant::now();

        let text = "héllo ∑ümlaut".as_bytes();
        let mut forwarded = Vec::new();
        for (i, &b) in text.iter().enumerate() {
            forwarded.extend(det.feed(b, t0 + ms(2000 + i as u64)));
        }
        assert_eq!(forwarded, text);
        assert_eq!(det.held_count(), 0);
    }
}

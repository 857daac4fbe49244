//! Modem settings and the S-register file.
//!
//! An emulated Hayes modem is mostly a pile of small knobs: echo, verbosity,
//! result-code gating, signal coupling modes, and 256 byte-valued
//! S-registers. Two profile slots hold snapshots for AT&W / ATZ; they live
//! in memory only and reset with the process.

use crate::errors::{BridgeError, BridgeResult};

/// Named S-register indices
pub mod sreg {
    /// Rings before hardware auto-answer (0 = disabled)
    pub const AUTO_ANSWER: usize = 0;
    /// Incoming ring counter
    pub const RING_COUNT: usize = 1;
    /// Escape character (43 = '+'; values above 127 disable escape detection)
    pub const ESCAPE_CHAR: usize = 2;
    /// Command line terminator (CR)
    pub const CR_CHAR: usize = 3;
    /// Response line feed character
    pub const LF_CHAR: usize = 4;
    /// Command line editing character (backspace)
    pub const BACKSPACE: usize = 5;
    /// Wait before blind dialing, seconds
    pub const DIAL_WAIT: usize = 6;
    /// Wait for carrier after dial, seconds
    pub const CARRIER_WAIT: usize = 7;
    /// Comma pause time in the dial string, seconds
    pub const COMMA_PAUSE: usize = 8;
    /// Carrier detect response time, tenths of a second
    pub const CARRIER_DETECT: usize = 9;
    /// Carrier loss disconnect time, tenths of a second
    pub const CARRIER_LOSS: usize = 10;
    /// DTMF tone duration, milliseconds
    pub const DTMF_TIME: usize = 11;
    /// Escape guard time, fiftieths of a second (x 20 ms)
    pub const GUARD_TIME: usize = 12;
}

/// The complete AT-visible modem configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModemSettings {
    /// ATE - echo command-mode input back to the DTE
    pub echo: bool,
    /// ATV - verbose (text) result codes vs numeric
    pub verbose: bool,
    /// ATQ - suppress all result codes
    pub quiet: bool,
    /// ATX - result code set level, 0-4
    pub result_codes_level: u8,
    /// AT&C - 0: DCD always on, 1: DCD follows carrier
    pub dcd_mode: u8,
    /// AT&D - 0: ignore DTR, 1: command mode, 2: hang up, 3: reset
    pub dtr_mode: u8,
    /// ATB - bell/CCITT answer tones
    pub bell_mode: u8,
    /// ATL - speaker volume, 0-3
    pub speaker_volume: u8,
    /// ATM - speaker control, 0-3
    pub speaker_control: u8,
    /// AT\N - error correction mode
    pub error_correction_mode: u8,
    /// AT&S - DSR line behavior
    pub dsr_mode: u8,
    /// The S-register file
    pub s_registers: [u8; 256],
}

impl Default for ModemSettings {
    fn default() -> Self {
        Self::factory()
    }
}

impl ModemSettings {
    /// Factory defaults, also what AT&F restores.
    pub fn factory() -> Self {
        let mut s_registers = [0u8; 256];
        s_registers[sreg::AUTO_ANSWER] = 0;
        s_registers[sreg::RING_COUNT] = 0;
        s_registers[sreg::ESCAPE_CHAR] = 43; // '+'
        s_registers[sreg::CR_CHAR] = 13;
        s_registers[sreg::LF_CHAR] = 10;
        s_registers[sreg::BACKSPACE] = 8;
        s_registers[sreg::DIAL_WAIT] = 2;
        s_registers[sreg::CARRIER_WAIT] = 60;
        s_registers[sreg::COMMA_PAUSE] = 2;
        s_registers[sreg::CARRIER_DETECT] = 6;
        s_registers[sreg::CARRIER_LOSS] = 7;
        s_registers[sreg::DTMF_TIME] = 95;
        s_registers[sreg::GUARD_TIME] = 50;

        Self {
            echo: true,
            verbose: true,
            quiet: false,
            result_codes_level: 4,
            dcd_mode: 1,
            dtr_mode: 2,
            bell_mode: 0,
            speaker_volume: 1,
            speaker_control: 1,
            error_correction_mode: 3,
            dsr_mode: 0,
            s_registers,
        }
    }

    /// Read S-register `n`.
    pub fn register(&self, n: usize) -> BridgeResult<u8> {
        self.s_registers
            .get(n)
            .copied()
            .ok_or_else(|| BridgeError::InvalidArgument(format!("S{} out of range", n)))
    }

    /// Write S-register `n`, enforcing per-register invariants.
    pub fn set_register(&mut self, n: usize, value: u8) -> BridgeResult<()> {
        if n >= self.s_registers.len() {
            return Err(BridgeError::InvalidArgument(format!("S{} out of range", n)));
        }
        // The command terminator must stay printable-range ASCII
        if n == sreg::CR_CHAR && value > 127 {
            return Err(BridgeError::InvalidArgument(
                "S3 must be 127 or less".to_string(),
            ));
        }
        self.s_registers[n] = value;
        Ok(())
    }

    /// The escape character, or `None` when S2 > 127 disables detection.
    pub fn escape_char(&self) -> Option<u8> {
        let c = self.s_registers[sreg::ESCAPE_CHAR];
        (c <= 127).then_some(c)
    }

    /// Escape guard time: S12 x 20 ms.
    pub fn guard_time(&self) -> std::time::Duration {
        std::time::Duration::from_millis(u64::from(self.s_registers[sreg::GUARD_TIME]) * 20)
    }

    /// One settings line in the classic AT&V format.
    fn profile_line(&self) -> String {
        format!(
            "E{} Q{} V{} X{} &C{} &D{} &S{} B{} L{} M{} \\N{}",
            u8::from(self.echo),
            u8::from(self.quiet),
            u8::from(self.verbose),
            self.result_codes_level,
            self.dcd_mode,
            self.dtr_mode,
            self.dsr_mode,
            self.bell_mode,
            self.speaker_volume,
            self.speaker_control,
            self.error_correction_mode,
        )
    }

    /// S-register block in the classic four-per-line format, first 16 registers.
    fn register_block(&self) -> String {
        let mut out = String::new();
        for row in 0..4 {
            for col in 0..4 {
                let n = row * 4 + col;
                out.push_str(&format!("S{:02}:{:03}", n, self.s_registers[n]));
                if col < 3 {
                    out.push(' ');
                }
            }
            out.push_str("\r\n");
        }
        out
    }
}

/// The two AT&W snapshot slots.
#[derive(Debug, Clone)]
pub struct ProfileSlots {
    slots: [ModemSettings; 2],
}

impl Default for ProfileSlots {
    fn default() -> Self {
        Self {
            slots: [ModemSettings::factory(), ModemSettings::factory()],
        }
    }
}

impl ProfileSlots {
    /// Store a snapshot in slot `n` (AT&W).
    pub fn store(&mut self, n: usize, settings: &ModemSettings) -> BridgeResult<()> {
        let slot = self
            .slots
            .get_mut(n)
            .ok_or_else(|| BridgeError::InvalidArgument(format!("no profile slot {}", n)))?;
        *slot = settings.clone();
        Ok(())
    }

    /// Load the snapshot in slot `n` (ATZ).
    pub fn load(&self, n: usize) -> BridgeResult<ModemSettings> {
        self.slots
            .get(n)
            .cloned()
            .ok_or_else(|| BridgeError::InvalidArgument(format!("no profile slot {}", n)))
    }
}

/// Render the AT&V configuration dump: active settings plus both stored
/// profiles.
pub fn dump_configuration(active: &ModemSettings, profiles: &ProfileSlots) -> String {
    let mut out = String::new();
    out.push_str("ACTIVE PROFILE:\r\n");
    out.push_str(&active.profile_line());
    out.push_str("\r\n");
    out.push_str(&active.register_block());
    for n in 0..2 {
        // Slots always hold a snapshot (factory until AT&W overwrites)
        if let Ok(profile) = profiles.load(n) {
            out.push_str(&format!("STORED PROFILE {}:\r\n", n));
            out.push_str(&profile.profile_line());
            out.push_str("\r\n");
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_factory_defaults() {
        let s = ModemSettings::factory();
        assert!(s.echo);
        assert!(s.verbose);
        assert!(!s.quiet);
        assert_eq!(s.result_codes_level, 4);
        assert_eq!(s.dcd_mode, 1);
        assert_eq!(s.dtr_mode, 2);
        assert_eq!(s.s_registers[sreg::ESCAPE_CHAR], 43);
        assert_eq!(s.s_registers[sreg::CR_CHAR], 13);
        assert_eq!(s.s_registers[sreg::GUARD_TIME], 50);
    }

    #[test]
    fn test_s3_range_enforced() {
        let mut s = ModemSettings::factory();
        assert!(s.set_register(sreg::CR_CHAR, 127).is_ok());
        assert!(s.set_register(sreg::CR_CHAR, 128).is_err());
    }

    #[test]
    fn test_escape_char_disabled_above_127() {
        let mut s = ModemSettings::factory();
        assert_eq!(s.escape_char(), Some(43));
        s.set_register(sreg::ESCAPE_CHAR, 200).unwrap();
        assert_eq!(s.escape_char(), None);
    }

    #[test]
    fn test_guard_time_scaling() {
        let mut s = ModemSettings::factory();
        assert_eq!(s.guard_time(), std::time::Duration::from_millis(1000));
        s.set_register(sreg::GUARD_TIME, 25).unwrap();
        assert_eq!(s.guard_time(), std::time::Duration::from_millis(500));
    }

    #[test]
    fn test_profile_store_load() {
        let mut profiles = ProfileSlots::default();
        let mut s = ModemSettings::factory();
        s.echo = false;
        s.set_register(sreg::AUTO_ANSWER, 2).unwrap();

        profiles.store(1, &s).unwrap();
        let loaded = profiles.load(1).unwrap();
        assert!(!loaded.echo);
        assert_eq!(loaded.s_registers[sreg::AUTO_ANSWER], 2);

        // Slot 0 still factory
        assert!(profiles.load(0).unwrap().echo);
    }

    #[test]
    fn test_profile_slot_bounds() {
        let mut profiles = ProfileSlots::default();
        let s = ModemSettings::factory();
        assert!(profiles.store(2, &s).is_err());
        assert!(profiles.load(5).is_err());
    }

    #[test]
    fn test_dump_contains_profiles_and_registers() {
        let dump = dump_configuration(&ModemSettings::factory(), &ProfileSlots::default());
        assert!(dump.contains("ACTIVE PROFILE:"));
        assert!(dump.contains("STORED PROFILE 0:"));
        assert!(dump.contains("STORED PROFILE 1:"));
        assert!(dump.contains("S02:043"));
        assert!(dump.contains("S12:050"));
        assert!(dump.contains("E1 Q0 V1 X4"));
    }
}

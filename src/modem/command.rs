//! AT command-line parsing and chained execution.
//!
//! After the `AT` attention prefix, the rest of the line is a chain of
//! commands executed left to right: `ATE1V1Q0X4` is four commands. The
//! chain aborts on the first failing command and the whole line gets one
//! terminating result code. Commands that start or end a call (D, A, O)
//! do not complete synchronously; the caller sees them as actions and the
//! final result code comes from the connection outcome.
//!
//! A few commands consume the remainder of the line by definition: the
//! dial string after D, and everything after Z (a reset throws away the
//! rest of the line, per long-standing Hayes behavior).

use tracing::debug;

use super::registers::{ModemSettings, ProfileSlots, dump_configuration};
use super::response::ResultCode;

/// Side effects a command chain asks the bridge to perform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModemAction {
    /// ATD - place a call (the dial string is recorded but the bridge
    /// always dials its configured peer)
    Dial(String),
    /// ATA - answer an incoming call
    Answer,
    /// ATH - hang up
    Hangup,
    /// ATO - return to online mode
    GoOnline,
    /// ATZ<n> - profile reset; the settings have already been reloaded
    Reset(u8),
}

/// The outcome of executing one AT line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutcome {
    /// Terminating result code; `None` when a Dial/Answer/GoOnline action
    /// defers the response to the connection outcome
    pub result: Option<ResultCode>,
    /// Informational text (ATI, AT&V, ATS<n>?) emitted before the result
    pub output: Vec<u8>,
    /// Actions for the bridge supervisor
    pub actions: Vec<ModemAction>,
}

impl CommandOutcome {
    fn error() -> Self {
        Self {
            result: Some(ResultCode::Error),
            output: Vec::new(),
            actions: Vec::new(),
        }
    }
}

/// Execute the chain in `tail` (the line with the `AT` prefix stripped).
pub fn execute_chain(
    tail: &[u8],
    settings: &mut ModemSettings,
    profiles: &mut ProfileSlots,
) -> CommandOutcome {
    let mut outcome = CommandOutcome {
        result: Some(ResultCode::Ok),
        output: Vec::new(),
        actions: Vec::new(),
    };

    let mut i = 0;
    while i < tail.len() {
        let c = tail[i].to_ascii_uppercase();
        i += 1;

        // Spaces between chained commands are tolerated
        if c == b' ' {
            continue;
        }

        let ok = match c {
            b'E' => {
                let (v, rest) = take_param(tail, i);
                i = rest;
                set_bool(&mut settings.echo, v)
            }
            b'V' => {
                let (v, rest) = take_param(tail, i);
                i = rest;
                set_bool(&mut settings.verbose, v)
            }
            b'Q' => {
                let (v, rest) = take_param(tail, i);
                i = rest;
                set_bool(&mut settings.quiet, v)
            }
            b'X' => {
                let (v, rest) = take_param(tail, i);
                i = rest;
                set_ranged(&mut settings.result_codes_level, v, 4)
            }
            b'B' => {
                let (v, rest) = take_param(tail, i);
                i = rest;
                set_ranged(&mut settings.bell_mode, v, 1)
            }
            b'L' => {
                let (v, rest) = take_param(tail, i);
                i = rest;
                set_ranged(&mut settings.speaker_volume, v, 3)
            }
            b'M' => {
                let (v, rest) = take_param(tail, i);
                i = rest;
                set_ranged(&mut settings.speaker_control, v, 3)
            }
            b'I' => {
                let (v, rest) = take_param(tail, i);
                i = rest;
                execute_info(v, &mut outcome)
            }
            b'H' => {
                let (v, rest) = take_param(tail, i);
                i = rest;
                if v <= 1 {
                    outcome.actions.push(ModemAction::Hangup);
                    true
                } else {
                    false
                }
            }
            b'A' => {
                outcome.actions.push(ModemAction::Answer);
                outcome.result = None;
                true
            }
            b'O' => {
                let (v, rest) = take_param(tail, i);
                i = rest;
                if v == 0 {
                    outcome.actions.push(ModemAction::GoOnline);
                    outcome.result = None;
                    true
                } else {
                    false
                }
            }
            b'D' => {
                // Everything left is the dial string
                let dial = String::from_utf8_lossy(&tail[i..]).trim().to_string();
                i = tail.len();
                debug!(dial = %dial, "dial requested");
                outcome.actions.push(ModemAction::Dial(dial));
                outcome.result = None;
                true
            }
            b'Z' => {
                let (v, rest) = take_param(tail, i);
                i = rest;
                match profiles.load(v as usize) {
                    Ok(loaded) => {
                        *settings = loaded;
                        outcome.actions.push(ModemAction::Reset(v as u8));
                        // A reset discards the rest of the line
                        i = tail.len();
                        true
                    }
                    Err(_) => false,
                }
            }
            b'&' => {
                let (done, rest) = execute_ampersand(tail, i, settings, profiles, &mut outcome);
                i = rest;
                done
            }
            b'\\' => {
                let (done, rest) = execute_backslash(tail, i, settings);
                i = rest;
                done
            }
            b'S' => {
                let (done, rest) = execute_s_register(tail, i, settings, &mut outcome);
                i = rest;
                done
            }
            _ => false,
        };

        if !ok {
            debug!(
                command = %char::from(c),
                "command failed, aborting chain"
            );
            // Settings already changed by earlier chain members stay changed
            let mut err = CommandOutcome::error();
            err.output = outcome.output;
            return err;
        }
    }

    outcome
}

/// Parse an optional decimal parameter; absent means 0.
fn take_param(tail: &[u8], mut i: usize) -> (u32, usize) {
    let mut value: u32 = 0;
    while i < tail.len() && tail[i].is_ascii_digit() {
        value = value.saturating_mul(10) + u32::from(tail[i] - b'0');
        i += 1;
    }
    (value, i)
}

fn set_bool(field: &mut bool, value: u32) -> bool {
    match value {
        0 => {
            *field = false;
            true
        }
        1 => {
            *field = true;
            true
        }
        _ => false,
    }
}

fn set_ranged(field: &mut u8, value: u32, max: u8) -> bool {
    if value <= u32::from(max) {
        *field = value as u8;
        true
    } else {
        false
    }
}

/// ATI information levels.
fn execute_info(level: u32, outcome: &mut CommandOutcome) -> bool {
    match level {
        0 => {
            outcome.output.extend_from_slice(b"\r\nMODEMBRIDGE\r\n");
            true
        }
        3 => {
            outcome.output.extend_from_slice(
                format!("\r\nmodembridge {}\r\n", env!("CARGO_PKG_VERSION")).as_bytes(),
            );
            true
        }
        0..=9 => true,
        _ => false,
    }
}

/// Extended `&` commands.
fn execute_ampersand(
    tail: &[u8],
    mut i: usize,
    settings: &mut ModemSettings,
    profiles: &mut ProfileSlots,
    outcome: &mut CommandOutcome,
) -> (bool, usize) {
    let Some(&c) = tail.get(i) else {
        return (false, i);
    };
    i += 1;

    let ok = match c.to_ascii_uppercase() {
        b'C' => {
            let (v, rest) = take_param(tail, i);
            i = rest;
            set_ranged(&mut settings.dcd_mode, v, 1)
        }
        b'D' => {
            let (v, rest) = take_param(tail, i);
            i = rest;
            set_ranged(&mut settings.dtr_mode, v, 3)
        }
        b'S' => {
            let (v, rest) = take_param(tail, i);
            i = rest;
            set_ranged(&mut settings.dsr_mode, v, 1)
        }
        b'F' => {
            let (_, rest) = take_param(tail, i);
            i = rest;
            *settings = ModemSettings::factory();
            true
        }
        b'V' => {
            outcome.output.extend_from_slice(b"\r\n");
            outcome
                .output
                .extend_from_slice(dump_configuration(settings, profiles).as_bytes());
            true
        }
        b'W' => {
            let (v, rest) = take_param(tail, i);
            i = rest;
            profiles.store(v as usize, settings).is_ok()
        }
        _ => false,
    };
    (ok, i)
}

/// `\` commands (error correction selection).
fn execute_backslash(tail: &[u8], mut i: usize, settings: &mut ModemSettings) -> (bool, usize) {
    let Some(&c) = tail.get(i) else {
        return (false, i);
    };
    i += 1;

    match c.to_ascii_uppercase() {
        b'N' => {
            let (v, rest) = take_param(tail, i);
            i = rest;
            (set_ranged(&mut settings.error_correction_mode, v, 5), i)
        }
        _ => (false, i),
    }
}

/// S-register access: `S<n>?` reads, `S<n>=<v>` writes.
fn execute_s_register(
    tail: &[u8],
    mut i: usize,
    settings: &mut ModemSettings,
    outcome: &mut CommandOutcome,
) -> (bool, usize) {
    let (n, rest) = take_param(tail, i);
    i = rest;
    if n > 255 {
        return (false, i);
    }

    match tail.get(i) {
        Some(b'?') => {
            i += 1;
            match settings.register(n as usize) {
                Ok(v) => {
                    outcome
                        .output
                        .extend_from_slice(format!("\r\n{:03}\r\n", v).as_bytes());
                    (true, i)
                }
                Err(_) => (false, i),
            }
        }
        Some(b'=') => {
            i += 1;
            let (v, rest) = take_param(tail, i);
            i = rest;
            if v > 255 {
                return (false, i);
            }
            (settings.set_register(n as usize, v as u8).is_ok(), i)
        }
        _ => (false, i),
    }
}

//! Result code formatting.
//!
//! A Hayes modem speaks to its DTE in a fixed vocabulary of result codes,
//! presented either as words (ATV1) or bare digits (ATV0), framed in CR/LF
//! taken from S3/S4. ATQ1 silences everything. ATX gates the extended
//! codes: below the gate a code degrades to its basic form (CONNECT loses
//! its speed suffix, BUSY and NO DIALTONE report as NO CARRIER) rather
//! than disappearing, because the DTE still needs an answer.

use super::registers::{ModemSettings, sreg};

/// The result vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultCode {
    Ok,
    /// Call is up; the speed is reported at X1 and above
    Connect(Option<u32>),
    Ring,
    NoCarrier,
    Error,
    /// Requires X2+
    NoDialtone,
    /// Requires X3+
    Busy,
    /// Requires X4
    NoAnswer,
}

impl ResultCode {
    /// Numeric form (ATV0). Speed-reporting CONNECT codes use the classic
    /// per-rate assignments.
    pub fn numeric(self) -> u8 {
        match self {
            ResultCode::Ok => 0,
            ResultCode::Connect(None) => 1,
            ResultCode::Connect(Some(speed)) => match speed {
                1200 => 5,
                2400 => 10,
                4800 => 11,
                9600 => 13,
                14400 => 15,
                19200 => 14,
                38400 => 28,
                57600 => 18,
                115200 => 19,
                _ => 1,
            },
            ResultCode::Ring => 2,
            ResultCode::NoCarrier => 3,
            ResultCode::Error => 4,
            ResultCode::NoDialtone => 6,
            ResultCode::Busy => 7,
            ResultCode::NoAnswer => 8,
        }
    }

    /// Verbose form (ATV1).
    pub fn text(self) -> String {
        match self {
            ResultCode::Ok => "OK".to_string(),
            ResultCode::Connect(None) => "CONNECT".to_string(),
            ResultCode::Connect(Some(speed)) => format!("CONNECT {}", speed),
            ResultCode::Ring => "RING".to_string(),
            ResultCode::NoCarrier => "NO CARRIER".to_string(),
            ResultCode::Error => "ERROR".to_string(),
            ResultCode::NoDialtone => "NO DIALTONE".to_string(),
            ResultCode::Busy => "BUSY".to_string(),
            ResultCode::NoAnswer => "NO ANSWER".to_string(),
        }
    }

    /// Lowest ATX level at which this code is reported as-is.
    fn min_level(self) -> u8 {
        match self {
            ResultCode::Connect(Some(_)) => 1,
            ResultCode::NoDialtone => 2,
            ResultCode::Busy => 3,
            ResultCode::NoAnswer => 4,
            _ => 0,
        }
    }

    /// Degrade a gated code to what the configured X level can express.
    fn gate(self, level: u8) -> ResultCode {
        if level >= self.min_level() {
            return self;
        }
        match self {
            ResultCode::Connect(Some(_)) => ResultCode::Connect(None),
            ResultCode::NoDialtone | ResultCode::Busy | ResultCode::NoAnswer => {
                ResultCode::NoCarrier
            }
            other => other,
        }
    }
}

/// Render a result code for the DTE, or `None` under ATQ1.
///
/// Verbose framing is `<CR><LF><text><CR><LF>`, numeric framing is
/// `<CR><LF><digits><CR><LF>`, with CR and LF taken from S3/S4.
pub fn render(code: ResultCode, settings: &ModemSettings) -> Option<Vec<u8>> {
    if settings.quiet {
        return None;
    }

    let code = code.gate(settings.result_codes_level);
    let cr = settings.s_registers[sreg::CR_CHAR];
    let lf = settings.s_registers[sreg::LF_CHAR];

    let body = if settings.verbose {
        code.text()
    } else {
        code.numeric().to_string()
    };

    let mut out = Vec::with_capacity(body.len() + 4);
    out.push(cr);
    out.push(lf);
    out.extend_from_slice(body.as_bytes());
    out.push(cr);
    out.push(lf);
    Some(out)
}

use crate::errors::ConfigError;

use std::fs;
use std::time::Duration;

/// Serial parity setting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Parity {
    None,
    Odd,
    Even,
}

/// Serial flow control setting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowControl {
    None,
    RtsCts,
    XonXoff,
    Both,
}

/// How incoming rings get answered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AutoAnswerMode {
    /// The bridge issues ATA itself after two rings in the answer window
    Software,
    /// S0 controls answering inside the modem engine
    Hardware,
}

#[derive(Debug, Clone)]
pub struct BridgeConfig {
    pub serial: SerialConfig,
    pub network: NetworkConfig,
    pub modem: ModemConfig,
    pub pipeline: PipelineConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone)]
pub struct SerialConfig {
    pub device: String,
    pub baud: u32,
    pub parity: Parity,
    pub data_bits: u8,
    pub stop_bits: u8,
    pub flow: FlowControl,
    /// Directory for the UUCP lock file; /var/lock in production,
    /// overridable so tests can point it somewhere writable
    pub lock_dir: String,
}

#[derive(Debug, Clone)]
pub struct NetworkConfig {
    pub host: String,
    pub port: u16,
    pub connect_timeout: Duration,
    /// Reconnect after ERROR with exponential backoff when true
    pub reconnect: bool,
}

#[derive(Debug, Clone)]
pub struct ModemConfig {
    /// Semicolon-separated AT commands run once at startup
    pub init_string: String,
    pub auto_answer: AutoAnswerMode,
    /// Optional AT command sent periodically to verify a fronted modem is alive
    pub health_check: Option<String>,
    /// Terminal type reported in TERMINAL-TYPE subnegotiation
    pub terminal_type: String,
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub quantum_ms: u64,
    pub min_quantum_ms: u64,
    pub max_quantum_ms: u64,
    pub quantum_bytes: usize,
    pub serial_weight: u32,
    pub telnet_weight: u32,
    pub starvation_ms: u64,
    pub latency_target_ms: u64,
    /// Per-direction pipe capacity in bytes
    pub pipe_capacity: usize,
    pub buffer_min: usize,
    pub buffer_max: usize,
    pub buffer_step: usize,
}

#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// tracing env-filter expression, e.g. "info" or "modembridge=debug"
    pub filter: String,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            serial: SerialConfig {
                device: "/dev/ttyS0".to_string(),
                baud: 38400,
                parity: Parity::None,
                data_bits: 8,
                stop_bits: 1,
                flow: FlowControl::RtsCts,
                lock_dir: "/var/lock".to_string(),
            },
            network: NetworkConfig {
                host: "127.0.0.1".to_string(),
                port: 2323,
                connect_timeout: Duration::from_secs(30),
                reconnect: true,
            },
            modem: ModemConfig {
                init_string: "ATZ;ATE1Q0V1".to_string(),
                auto_answer: AutoAnswerMode::Software,
                health_check: None,
                terminal_type: "ANSI".to_string(),
            },
            pipeline: PipelineConfig {
                quantum_ms: 50,
                min_quantum_ms: 10,
                max_quantum_ms: 200,
                quantum_bytes: 16384,
                serial_weight: 5,
                telnet_weight: 5,
                starvation_ms: 500,
                latency_target_ms: 100,
                pipe_capacity: 16384,
                buffer_min: 4096,
                buffer_max: 65536,
                buffer_step: 512,
            },
            logging: LoggingConfig {
                filter: "info".to_string(),
            },
        }
    }
}

/// The bridge.conf section headers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Section {
    Serial,
    Network,
    Modem,
    Pipeline,
    Logging,
}

impl Section {
    fn from_header(name: &str) -> Result<Self, ConfigError> {
        match name {
            "serial" => Ok(Section::Serial),
            "network" => Ok(Section::Network),
            "modem" => Ok(Section::Modem),
            "pipeline" => Ok(Section::Pipeline),
            "logging" => Ok(Section::Logging),
            other => Err(ConfigError::UnknownSection(other.to_string())),
        }
    }
}

/// Parse one typed value, naming the offending key on failure.
fn parse_field<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value
        .parse()
        .map_err(|_| ConfigError::InvalidValue(key.to_string(), value.to_string()))
}

impl BridgeConfig {
    pub fn load_from_file(path: &str) -> Result<Self, ConfigError> {
        let Ok(content) = fs::read_to_string(path) else {
            // No file yet: write the defaults out so there is something
            // to edit next time
            let config = Self::default();
            if let Err(e) = fs::write(path, config.to_config_file_format()) {
                tracing::warn!("could not write default config to {}: {}", path, e);
            }
            return Ok(config);
        };
        Self::parse_config(&content)
    }

    pub fn parse_config(content: &str) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let mut section: Option<Section> = None;

        for raw in content.lines() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            if let Some(header) = line.strip_prefix('[') {
                let name = header
                    .strip_suffix(']')
                    .ok_or_else(|| ConfigError::UnknownSection(line.to_string()))?;
                section = Some(Section::from_header(name)?);
                continue;
            }

            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            let key = key.trim();
            let value = value.trim().trim_matches('"');
            match section {
                Some(Section::Serial) => config.apply_serial(key, value)?,
                Some(Section::Network) => config.apply_network(key, value)?,
                Some(Section::Modem) => config.apply_modem(key, value)?,
                Some(Section::Pipeline) => config.apply_pipeline(key, value)?,
                Some(Section::Logging) => config.apply_logging(key, value)?,
                // A key before any [section] header belongs nowhere
                None => return Err(ConfigError::UnknownKey(key.to_string())),
            }
        }

        Ok(config)
    }

    fn apply_serial(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        match key {
            "device" => self.serial.device = value.to_string(),
            "baud" => self.serial.baud = parse_field(key, value)?,
            "parity" => {
                self.serial.parity = match value {
                    "N" | "none" => Parity::None,
                    "O" | "odd" => Parity::Odd,
                    "E" | "even" => Parity::Even,
                    _ => {
                        return Err(ConfigError::InvalidValue(
                            key.to_string(),
                            value.to_string(),
                        ));
                    }
                };
            }
            "data_bits" => {
                let bits: u8 = parse_field(key, value)?;
                if bits != 7 && bits != 8 {
                    return Err(ConfigError::InvalidValue(
                        key.to_string(),
                        value.to_string(),
                    ));
                }
                self.serial.data_bits = bits;
            }
            "stop_bits" => {
                let bits: u8 = parse_field(key, value)?;
                if bits != 1 && bits != 2 {
                    return Err(ConfigError::InvalidValue(
                        key.to_string(),
                        value.to_string(),
                    ));
                }
                self.serial.stop_bits = bits;
            }
            "flow" => {
                self.serial.flow = match value {
                    "none" => FlowControl::None,
                    "rtscts" => FlowControl::RtsCts,
                    "xonxoff" => FlowControl::XonXoff,
                    "both" => FlowControl::Both,
                    _ => {
                        return Err(ConfigError::InvalidValue(
                            key.to_string(),
                            value.to_string(),
                        ));
                    }
                };
            }
            "lock_dir" => self.serial.lock_dir = value.to_string(),
            _ => return Err(ConfigError::UnknownKey(key.to_string())),
        }
        Ok(())
    }

    fn apply_network(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        match key {
            "host" => self.network.host = value.to_string(),
            "port" => self.network.port = parse_field(key, value)?,
            "connect_timeout" => {
                self.network.connect_timeout = Duration::from_secs(parse_field(key, value)?);
            }
            "reconnect" => self.network.reconnect = parse_field(key, value)?,
            _ => return Err(ConfigError::UnknownKey(key.to_string())),
        }
        Ok(())
    }

    fn apply_modem(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        match key {
            "init_string" => self.modem.init_string = value.to_string(),
            "auto_answer" => {
                self.modem.auto_answer = match value {
                    "software" => AutoAnswerMode::Software,
                    "hardware" => AutoAnswerMode::Hardware,
                    _ => {
                        return Err(ConfigError::InvalidValue(
                            key.to_string(),
                            value.to_string(),
                        ));
                    }
                };
            }
            "health_check" => {
                self.modem.health_check = match value {
                    "" | "none" => None,
                    cmd => Some(cmd.to_string()),
                };
            }
            "terminal_type" => self.modem.terminal_type = value.to_string(),
            _ => return Err(ConfigError::UnknownKey(key.to_string())),
        }
        Ok(())
    }

    fn apply_pipeline(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        match key {
            "quantum_ms" => self.pipeline.quantum_ms = parse_field(key, value)?,
            "min_quantum_ms" => self.pipeline.min_quantum_ms = parse_field(key, value)?,
            "max_quantum_ms" => self.pipeline.max_quantum_ms = parse_field(key, value)?,
            "quantum_bytes" => self.pipeline.quantum_bytes = parse_field(key, value)?,
            "serial_weight" => self.pipeline.serial_weight = parse_field(key, value)?,
            "telnet_weight" => self.pipeline.telnet_weight = parse_field(key, value)?,
            "starvation_ms" => self.pipeline.starvation_ms = parse_field(key, value)?,
            "latency_target_ms" => self.pipeline.latency_target_ms = parse_field(key, value)?,
            "pipe_capacity" => self.pipeline.pipe_capacity = parse_field(key, value)?,
            "buffer_min" => self.pipeline.buffer_min = parse_field(key, value)?,
            "buffer_max" => self.pipeline.buffer_max = parse_field(key, value)?,
            "buffer_step" => self.pipeline.buffer_step = parse_field(key, value)?,
            _ => return Err(ConfigError::UnknownKey(key.to_string())),
        }
        Ok(())
    }

    fn apply_logging(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        match key {
            "filter" => self.logging.filter = value.to_string(),
            _ => return Err(ConfigError::UnknownKey(key.to_string())),
        }
        Ok(())
    }

    fn to_config_file_format(&self) -> String {
        format!(
            r#"# modembridge Configuration File
# Lines starting with # are comments

[serial]
# Serial device and line parameters
device = "{}"
baud = {}
# Parity: "N", "O", "E"
parity = "{}"
data_bits = {}
stop_bits = {}
# Flow control: "none", "rtscts", "xonxoff", "both"
flow = "{}"
lock_dir = "{}"

[network]
# Telnet peer to bridge the call to
host = "{}"
port = {}
# Connect timeout in seconds
connect_timeout = {}
reconnect = {}

[modem]
# Semicolon-separated AT commands run once at startup
init_string = "{}"
# Auto-answer: "software" (bridge issues ATA) or "hardware" (S0 driven)
auto_answer = "{}"
# Optional AT command for periodic modem health checks ("none" disables)
health_check = "{}"
terminal_type = "{}"

[pipeline]
# Fair-scheduler quantum in milliseconds, bounded by min/max
quantum_ms = {}
min_quantum_ms = {}
max_quantum_ms = {}
quantum_bytes = {}
# Scheduling weights (serial : telnet)
serial_weight = {}
telnet_weight = {}
starvation_ms = {}
latency_target_ms = {}
# Buffer sizing in bytes
pipe_capacity = {}
buffer_min = {}
buffer_max = {}
buffer_step = {}

[logging]
# tracing filter, e.g. "info" or "modembridge=debug"
filter = "{}"
"#,
            self.serial.device,
            self.serial.baud,
            match self.serial.parity {
                Parity::None => "N",
                Parity::Odd => "O",
                Parity::Even => "E",
            },
            self.serial.data_bits,
            self.serial.stop_bits,
            match self.serial.flow {
                FlowControl::None => "none",
                FlowControl::RtsCts => "rtscts",
                FlowControl::XonXoff => "xonxoff",
                FlowControl::Both => "both",
            },
            self.serial.lock_dir,
            self.network.host,
            self.network.port,
            self.network.connect_timeout.as_secs(),
            self.network.reconnect,
            self.modem.init_string,
            match self.modem.auto_answer {
                AutoAnswerMode::Software => "software",
                AutoAnswerMode::Hardware => "hardware",
            },
            self.modem.health_check.as_deref().unwrap_or("none"),
            self.modem.terminal_type,
            self.pipeline.quantum_ms,
            self.pipeline.min_quantum_ms,
            self.pipeline.max_quantum_ms,
            self.pipeline.quantum_bytes,
            self.pipeline.serial_weight,
            self.pipeline.telnet_weight,
            self.pipeline.starvation_ms,
            self.pipeline.latency_target_ms,
            self.pipeline.pipe_capacity,
            self.pipeline.buffer_min,
            self.pipeline.buffer_max,
            self.pipeline.buffer_step,
            self.logging.filter,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = BridgeConfig::default();
        assert_eq!(config.serial.baud, 38400);
        assert_eq!(config.serial.data_bits, 8);
        assert_eq!(config.network.port, 2323);
        assert_eq!(config.pipeline.quantum_ms, 50);
        assert_eq!(config.pipeline.serial_weight, 5);
        assert!(matches!(config.modem.auto_answer, AutoAnswerMode::Software));
    }

    #[test]
    fn test_parse_sections() {
        let content = r#"
[serial]
device = "/dev/ttyUSB0"
baud = 9600
parity = "E"
data_bits = 7
stop_bits = 2
flow = "xonxoff"

[network]
host = "bbs.example.org"
port = 23

[modem]
auto_answer = "hardware"
terminal_type = "VT100"

[pipeline]
serial_weight = 7
telnet_weight = 3
"#;

        let config = BridgeConfig::parse_config(content).unwrap();
        assert_eq!(config.serial.device, "/dev/ttyUSB0");
        assert_eq!(config.serial.baud, 9600);
        assert_eq!(config.serial.parity, Parity::Even);
        assert_eq!(config.serial.data_bits, 7);
        assert_eq!(config.serial.stop_bits, 2);
        assert_eq!(config.serial.flow, FlowControl::XonXoff);
        assert_eq!(config.network.host, "bbs.example.org");
        assert_eq!(config.network.port, 23);
        assert!(matches!(config.modem.auto_answer, AutoAnswerMode::Hardware));
        assert_eq!(config.modem.terminal_type, "VT100");
        assert_eq!(config.pipeline.serial_weight, 7);
        assert_eq!(config.pipeline.telnet_weight, 3);
    }

    #[test]
    fn test_invalid_data_bits_rejected() {
        let content = "[serial]\ndata_bits = 9\n";
        assert!(BridgeConfig::parse_config(content).is_err());
    }

    #[test]
    fn test_unknown_section_rejected() {
        let content = "[nonsense]\nkey = 1\n";
        assert!(BridgeConfig::parse_config(content).is_err());
    }

    #[test]
    fn test_unknown_key_rejected() {
        let content = "[serial]\nwarp_speed = 9\n";
        assert!(BridgeConfig::parse_config(content).is_err());
    }

    #[test]
    fn test_key_outside_section_rejected() {
        let content = "orphan = 1\n[serial]\n";
        assert!(matches!(
            BridgeConfig::parse_config(content),
            Err(ConfigError::UnknownKey(_))
        ));
    }

    #[test]
    fn test_unterminated_header_rejected() {
        let content = "[serial\nbaud = 9600\n";
        assert!(matches!(
            BridgeConfig::parse_config(content),
            Err(ConfigError::UnknownSection(_))
        ));
    }

    #[test]
    fn test_config_file_round_trip() {
        let config = BridgeConfig::default();
        let rendered = config.to_config_file_format();
        let parsed = BridgeConfig::parse_config(&rendered).unwrap();
        assert_eq!(parsed.serial.device, config.serial.device);
        assert_eq!(parsed.pipeline.buffer_max, config.pipeline.buffer_max);
        assert_eq!(parsed.logging.filter, config.logging.filter);
    }

    #[test]
    fn test_health_check_none() {
        let content = "[modem]\nhealth_check = \"none\"\n";
        let config = BridgeConfig::parse_config(content).unwrap();
        assert!(config.modem.health_check.is_none());

        let content = "[modem]\nhealth_check = \"AT\"\n";
        let config = BridgeConfig::parse_config(content).unwrap();
        assert_eq!(config.modem.health_check.as_deref(), Some("AT"));
    }
}

use std::fmt;

/// Custom configuration errors
#[derive(Debug)]
pub enum ConfigError {
    InvalidValue(String, String),
    UnknownKey(String),
    UnknownSection(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::InvalidValue(key, value) => {
                write!(f, "Invalid value '{}' for key '{}'", value, key)
            }
            ConfigError::UnknownKey(key) => write!(f, "Unknown configuration key: '{}'", key),
            ConfigError::UnknownSection(section) => write!(f, "Unknown section: '{}'", section),
        }
    }
}

impl std::error::Error for ConfigError {}

/// Custom bridge errors
///
/// The taxonomy the whole crate reports through. Transient I/O conditions
/// (EAGAIN, short writes) are retried where they happen and never become a
/// variant here; what surfaces is what a caller can act on.
#[derive(Debug)]
pub enum BridgeError {
    /// I/O related errors (serial device, socket, lock file)
    Io(std::io::Error),

    /// A caller passed an argument the API cannot accept
    InvalidArgument(String),

    /// A deadline elapsed before the operation made progress
    Timeout(String),

    /// A buffer or pipe refused data because it is full
    BufferFull,

    /// Operation on a pipe or endpoint that has been shut down
    Closed,

    /// Protocol-level garbage (bad AT line, invalid IAC usage)
    Protocol(String),

    /// A state transition the static graph does not allow
    InvalidState { from: String, event: String },

    /// The carrier dropped while a call was up
    CarrierLost,

    /// The serial device could not be locked
    DeviceLocked(String),

    /// Configuration error
    Configuration(String),
}

impl fmt::Display for BridgeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BridgeError::Io(err) => write!(f, "I/O error: {}", err),
            BridgeError::InvalidArgument(msg) => write!(f, "Invalid argument: {}", msg),
            BridgeError::Timeout(what) => write!(f, "Timed out: {}", what),
            BridgeError::BufferFull => write!(f, "Buffer full"),
            BridgeError::Closed => write!(f, "Endpoint closed"),
            BridgeError::Protocol(msg) => write!(f, "Protocol error: {}", msg),
            BridgeError::InvalidState { from, event } => {
                write!(
                    f,
                    "Invalid transition: '{}' does not accept '{}'",
                    from, event
                )
            }
            BridgeError::CarrierLost => write!(f, "Carrier lost"),
            BridgeError::DeviceLocked(dev) => write!(f, "Device is locked: {}", dev),
            BridgeError::Configuration(msg) => write!(f, "Configuration error: {}", msg),
        }
    }
}

impl std::error::Error for BridgeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            BridgeError::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for BridgeError {
    fn from(err: std::io::Error) -> Self {
        use std::io::ErrorKind;

        match err.kind() {
            ErrorKind::TimedOut | ErrorKind::WouldBlock => BridgeError::Timeout(err.to_string()),
            _ => BridgeError::Io(err),
        }
    }
}

impl From<ConfigError> for BridgeError {
    fn from(err: ConfigError) -> Self {
        BridgeError::Configuration(err.to_string())
    }
}

impl From<nix::errno::Errno> for BridgeError {
    fn from(err: nix::errno::Errno) -> Self {
        BridgeError::Io(std::io::Error::from_raw_os_error(err as i32))
    }
}

/// Result type alias for bridge operations
pub type BridgeResult<T> = Result<T, BridgeError>;

//! Serial line abstraction: raw-mode byte I/O, modem-control signals, and
//! UUCP device locking.
//!
//! The serial line never interprets the bytes it moves; it is the transport
//! underneath the modem engine. Reads and writes are non-blocking (the
//! device is opened O_NONBLOCK with VMIN=0/VTIME=0), with a bounded EAGAIN
//! retry on the write side. Modem-control lines (DTR, RTS out; DCD, DSR,
//! CTS in) go through the TIOCM ioctls; they may be poked by the supervisor
//! while the serial worker owns the data path, so those calls serialize on
//! a short internal critical section.

use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::os::fd::AsFd;
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::thread;
use std::time::{Duration, Instant};

use nix::sys::termios::{
    BaudRate, ControlFlags, InputFlags, SetArg, SpecialCharacterIndices, cfmakeraw, cfsetspeed,
    tcdrain, tcgetattr, tcsetattr,
};
use tracing::{debug, info, warn};

use crate::config::{FlowControl, Parity, SerialConfig};
use crate::errors::{BridgeError, BridgeResult};

/// The transport seam between the bridge workers and the physical port.
///
/// Production uses [`SerialLine`]; tests substitute an in-memory double so
/// the whole pipeline can run without a device node. In null-modem wiring
/// the DTE's DTR arrives on our DSR pin, which is why DSR is part of the
/// contract.
pub trait SerialIo: Send {
    fn read(&mut self, buf: &mut [u8]) -> BridgeResult<usize>;
    fn write(&mut self, buf: &[u8]) -> BridgeResult<usize>;
    fn write_all(&mut self, buf: &[u8]) -> BridgeResult<()>;
    fn get_dcd(&mut self) -> BridgeResult<bool>;
    fn get_dsr(&mut self) -> BridgeResult<bool>;
    fn set_dtr(&mut self, level: bool) -> BridgeResult<()>;
    fn hangup(&mut self) -> BridgeResult<()>;
}

/// How many EAGAIN retries a write attempts before draining and giving up
const WRITE_RETRIES: u32 = 3;

/// How long DTR stays dropped during a hangup
const DTR_DROP_TIME: Duration = Duration::from_millis(1100);

/// UUCP-style exclusive device lock.
///
/// Lives at `<lock_dir>/LCK..<basename>` and contains the owner PID as a
/// ten-character decimal field plus newline, the format every other UUCP
/// tool on the system expects. The lock is released when the handle drops.
#[derive(Debug)]
pub struct DeviceLock {
    path: PathBuf,
}

impl DeviceLock {
    /// Acquire the lock for `device`, replacing a stale one if its owner
    /// process is gone.
    pub fn acquire(device: &str, lock_dir: &str) -> BridgeResult<Self> {
        let basename = Path::new(device)
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| {
                BridgeError::InvalidArgument(format!("bad device path: {}", device))
            })?;
        let path = Path::new(lock_dir).join(format!("LCK..{}", basename));

        if path.exists() {
            match Self::lock_owner(&path) {
                Some(pid) if Self::process_alive(pid) => {
                    return Err(BridgeError::DeviceLocked(format!(
                        "{} (held by pid {})",
                        device, pid
                    )));
                }
                _ => {
                    info!(device, "removing stale lock file");
                    let _ = std::fs::remove_file(&path);
                }
            }
        }

        // Write to a temp name then rename so a concurrent locker never
        // observes a half-written PID
        let tmp = path.with_extension(format!("tmp{}", std::process::id()));
        let mut file = File::create(&tmp)?;
        write!(file, "{:10}\n", std::process::id())?;
        file.sync_all()?;
        std::fs::rename(&tmp, &path)?;

        debug!(path = %path.display(), "device lock acquired");
        Ok(Self { path })
    }

    /// PID recorded in an existing lock file, if it parses
    fn lock_owner(path: &Path) -> Option<i32> {
        let content = std::fs::read_to_string(path).ok()?;
        content.trim().parse().ok()
    }

    fn process_alive(pid: i32) -> bool {
        // Signal 0 probes existence without delivering anything
        unsafe { libc::kill(pid, 0) == 0 }
    }
}

impl Drop for DeviceLock {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            warn!(path = %self.path.display(), "failed to remove lock file: {}", e);
        }
    }
}

/// An open serial device in raw mode.
pub struct SerialLine {
    file: File,
    /// Serializes TIOCM ioctls between the serial worker and the supervisor
    signal_guard: Mutex<()>,
    /// Scratch for read_line record assembly
    line_buf: Vec<u8>,
    /// Held for the lifetime of the port; dropping it releases the lock
    _lock: DeviceLock,
}

impl SerialLine {
    /// Lock and open `config.device`, configuring raw mode with the given
    /// line parameters.
    pub fn open(config: &SerialConfig) -> BridgeResult<Self> {
        let lock = DeviceLock::acquire(&config.device, &config.lock_dir)?;

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_NOCTTY | libc::O_NONBLOCK)
            .open(&config.device)?;

        let mut line = Self {
            file,
            signal_guard: Mutex::new(()),
            line_buf: Vec::with_capacity(256),
            _lock: lock,
        };
        line.configure(config)?;

        info!(
            device = %config.device,
            baud = config.baud,
            "serial line open"
        );
        Ok(line)
    }

    /// Apply raw mode: no canonical processing, no output post-processing,
    /// VMIN=0/VTIME=0, plus the configured framing and flow control.
    fn configure(&mut self, config: &SerialConfig) -> BridgeResult<()> {
        let mut tio = tcgetattr(self.file.as_fd())?;

        cfmakeraw(&mut tio);

        // Framing
        tio.control_flags &= !ControlFlags::CSIZE;
        tio.control_flags |= match config.data_bits {
            7 => ControlFlags::CS7,
            _ => ControlFlags::CS8,
        };
        match config.parity {
            Parity::None => {
                tio.control_flags &= !(ControlFlags::PARENB | ControlFlags::PARODD);
            }
            Parity::Even => {
                tio.control_flags |= ControlFlags::PARENB;
                tio.control_flags &= !ControlFlags::PARODD;
            }
            Parity::Odd => {
                tio.control_flags |= ControlFlags::PARENB | ControlFlags::PARODD;
            }
        }
        if config.stop_bits == 2 {
            tio.control_flags |= ControlFlags::CSTOPB;
        } else {
            tio.control_flags &= !ControlFlags::CSTOPB;
        }

        // Flow control
        tio.control_flags &= !ControlFlags::CRTSCTS;
        tio.input_flags &= !(InputFlags::IXON | InputFlags::IXOFF);
        match config.flow {
            FlowControl::None => {}
            FlowControl::RtsCts => tio.control_flags |= ControlFlags::CRTSCTS,
            FlowControl::XonXoff => tio.input_flags |= InputFlags::IXON | InputFlags::IXOFF,
            FlowControl::Both => {
                tio.control_flags |= ControlFlags::CRTSCTS;
                tio.input_flags |= InputFlags::IXON | InputFlags::IXOFF;
            }
        }

        // Receiver on, modem status lines honored
        tio.control_flags |= ControlFlags::CREAD;

        // Non-blocking reads even without O_NONBLOCK
        tio.control_chars[SpecialCharacterIndices::VMIN as usize] = 0;
        tio.control_chars[SpecialCharacterIndices::VTIME as usize] = 0;

        cfsetspeed(&mut tio, baud_constant(config.baud)?)?;
        tcsetattr(self.file.as_fd(), SetArg::TCSANOW, &tio)?;
        Ok(())
    }

    /// Non-blocking read. 0 means no data pending; an error is fatal and
    /// the caller must re-open the device.
    pub fn read(&mut self, buf: &mut [u8]) -> BridgeResult<usize> {
        match self.file.read(buf) {
            Ok(n) => Ok(n),
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => Ok(0),
            Err(e) => Err(BridgeError::Io(e)),
        }
    }

    /// Write with bounded EAGAIN retries; after the retry budget the output
    /// queue is drained and whatever was accepted is reported.
    pub fn write(&mut self, buf: &[u8]) -> BridgeResult<usize> {
        let mut written = 0;
        let mut retries = 0;
        while written < buf.len() {
            match self.file.write(&buf[written..]) {
                Ok(n) => {
                    written += n;
                    retries = 0;
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    retries += 1;
                    if retries > WRITE_RETRIES {
                        tcdrain(self.file.as_fd())?;
                        break;
                    }
                    thread::sleep(Duration::from_millis(1));
                }
                Err(e) => return Err(BridgeError::Io(e)),
            }
        }
        Ok(written)
    }

    /// Write the whole buffer or fail; used for modem responses which must
    /// not be half-delivered.
    pub fn write_all(&mut self, buf: &[u8]) -> BridgeResult<()> {
        let mut written = 0;
        while written < buf.len() {
            let n = self.write(&buf[written..])?;
            if n == 0 {
                return Err(BridgeError::Timeout("serial write stalled".to_string()));
            }
            written += n;
        }
        Ok(())
    }

    /// Change the line speed on the open device, draining pending output
    /// first so nothing in flight is garbled.
    pub fn set_baudrate(&mut self, baud: u32) -> BridgeResult<()> {
        tcdrain(self.file.as_fd())?;
        let mut tio = tcgetattr(self.file.as_fd())?;
        cfsetspeed(&mut tio, baud_constant(baud)?)?;
        tcsetattr(self.file.as_fd(), SetArg::TCSADRAIN, &tio)?;
        info!(baud, "baudrate changed");
        Ok(())
    }

    /// Assemble a CR- or LF-terminated record from the device, returning
    /// it without the terminator. Returns `None` if no complete record
    /// arrives before the deadline. Empty records (the blank halves of
    /// "\r\nRING\r\n" framing) are skipped.
    pub fn read_line(&mut self, deadline: Instant) -> BridgeResult<Option<Vec<u8>>> {
        loop {
            if let Some(record) = extract_record(&mut self.line_buf) {
                return Ok(Some(record));
            }
            if Instant::now() >= deadline {
                return Ok(None);
            }

            let mut chunk = [0u8; 128];
            let n = self.read(&mut chunk)?;
            if n == 0 {
                thread::sleep(Duration::from_millis(5));
            } else {
                self.line_buf.extend_from_slice(&chunk[..n]);
            }
        }
    }

    pub fn set_dtr(&self, level: bool) -> BridgeResult<()> {
        self.modify_signal(libc::TIOCM_DTR, level)
    }

    pub fn set_rts(&self, level: bool) -> BridgeResult<()> {
        self.modify_signal(libc::TIOCM_RTS, level)
    }

    pub fn get_dcd(&self) -> BridgeResult<bool> {
        Ok(self.read_signals()? & libc::TIOCM_CAR != 0)
    }

    pub fn get_dsr(&self) -> BridgeResult<bool> {
        Ok(self.read_signals()? & libc::TIOCM_DSR != 0)
    }

    pub fn get_cts(&self) -> BridgeResult<bool> {
        Ok(self.read_signals()? & libc::TIOCM_CTS != 0)
    }

    /// Classic modem hangup: drop DTR for over a second, then restore it.
    pub fn dtr_drop_hangup(&self) -> BridgeResult<()> {
        info!("dropping DTR for hangup");
        self.set_dtr(false)?;
        thread::sleep(DTR_DROP_TIME);
        self.set_dtr(true)
    }

    fn read_signals(&self) -> BridgeResult<libc::c_int> {
        let _guard = self.signal_guard.lock().unwrap_or_else(|e| e.into_inner());
        let mut bits: libc::c_int = 0;
        let rc = unsafe { libc::ioctl(self.file.as_raw_fd(), libc::TIOCMGET, &mut bits) };
        if rc < 0 {
            return Err(BridgeError::Io(std::io::Error::last_os_error()));
        }
        Ok(bits)
    }

    fn modify_signal(&self, bit: libc::c_int, level: bool) -> BridgeResult<()> {
        let _guard = self.signal_guard.lock().unwrap_or_else(|e| e.into_inner());
        let request = if level { libc::TIOCMBIS } else { libc::TIOCMBIC };
        let rc = unsafe { libc::ioctl(self.file.as_raw_fd(), request, &bit) };
        if rc < 0 {
            return Err(BridgeError::Io(std::io::Error::last_os_error()));
        }
        Ok(())
    }
}

impl SerialIo for SerialLine {
    fn read(&mut self, buf: &mut [u8]) -> BridgeResult<usize> {
        SerialLine::read(self, buf)
    }

    fn write(&mut self, buf: &[u8]) -> BridgeResult<usize> {
        SerialLine::write(self, buf)
    }

    fn write_all(&mut self, buf: &[u8]) -> BridgeResult<()> {
        SerialLine::write_all(self, buf)
    }

    fn get_dcd(&mut self) -> BridgeResult<bool> {
        SerialLine::get_dcd(self)
    }

    fn get_dsr(&mut self) -> BridgeResult<bool> {
        SerialLine::get_dsr(self)
    }

    fn set_dtr(&mut self, level: bool) -> BridgeResult<()> {
        SerialLine::set_dtr(self, level)
    }

    fn hangup(&mut self) -> BridgeResult<()> {
        self.dtr_drop_hangup()
    }
}

/// Split the first complete CR/LF-terminated record out of `buf`.
/// Empty records are consumed and skipped.
pub(crate) fn extract_record(buf: &mut Vec<u8>) -> Option<Vec<u8>> {
    loop {
        let pos = buf.iter().position(|&b| b == b'\r' || b == b'\n')?;
        let record: Vec<u8> = buf.drain(..=pos).take(pos).collect();
        if !record.is_empty() {
            return Some(record);
        }
    }
}

/// Map a numeric rate onto the termios constant.
fn baud_constant(baud: u32) -> BridgeResult<BaudRate> {
    Ok(match baud {
        300 => BaudRate::B300,
        1200 => BaudRate::B1200,
        2400 => BaudRate::B2400,
        4800 => BaudRate::B4800,
        9600 => BaudRate::B9600,
        19200 => BaudRate::B19200,
        38400 => BaudRate::B38400,
        57600 => BaudRate::B57600,
        115200 => BaudRate::B115200,
        230400 => BaudRate::B230400,
        _ => {
            return Err(BridgeError::InvalidArgument(format!(
                "unsupported baudrate: {}",
                baud
            )));
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_lock_file_format() {
        let dir = TempDir::new().unwrap();
        let lock_dir = dir.path().to_str().unwrap();

        let lock = DeviceLock::acquire("/dev/ttyTEST0", lock_dir).unwrap();
        let content = std::fs::read_to_string(dir.path().join("LCK..ttyTEST0")).unwrap();

        // "%10d\n": ten-character right-aligned decimal plus newline
        assert_eq!(content.len(), 11);
        assert!(content.ends_with('\n'));
        assert_eq!(
            content.trim().parse::<u32>().unwrap(),
            std::process::id()
        );
        drop(lock);
    }

    #[test]
    fn test_lock_released_on_drop() {
        let dir = TempDir::new().unwrap();
        let lock_dir = dir.path().to_str().unwrap();
        let lock_path = dir.path().join("LCK..ttyTEST1");

        {
            let _lock = DeviceLock::acquire("/dev/ttyTEST1", lock_dir).unwrap();
            assert!(lock_path.exists());
        }
        assert!(!lock_path.exists());
    }

    #[test]
    fn test_live_lock_refused() {
        let dir = TempDir::new().unwrap();
        let lock_dir = dir.path().to_str().unwrap();

        let _first = DeviceLock::acquire("/dev/ttyTEST2", lock_dir).unwrap();
        let second = DeviceLock::acquire("/dev/ttyTEST2", lock_dir);
        assert!(matches!(second, Err(BridgeError::DeviceLocked(_))));
    }

    #[test]
    fn test_stale_lock_replaced() {
        let dir = TempDir::new().unwrap();
        let lock_dir = dir.path().to_str().unwrap();
        let lock_path = dir.path().join("LCK..ttyTEST3");

        // A PID that can't be a live process (max pid is far below this
        // on any default kernel)
        std::fs::write(&lock_path, format!("{:10}\n", 999_999_990)).unwrap();

        let lock = DeviceLock::acquire("/dev/ttyTEST3", lock_dir).unwrap();
        let content = std::fs::read_to_string(&lock_path).unwrap();
        assert_eq!(
            content.trim().parse::<u32>().unwrap(),
            std::process::id()
        );
        drop(lock);
    }

    #[test]
    fn test_extract_record_basic() {
        let mut buf = b"RING\r\n".to_vec();
        assert_eq!(extract_record(&mut buf), Some(b"RING".to_vec()));
        assert_eq!(extract_record(&mut buf), None);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_extract_record_skips_blank_lines() {
        let mut buf = b"\r\nCONNECT 2400\r\n".to_vec();
        assert_eq!(extract_record(&mut buf), Some(b"CONNECT 2400".to_vec()));
    }

    #[test]
    fn test_extract_record_partial_kept() {
        let mut buf = b"NO CAR".to_vec();
        assert_eq!(extract_record(&mut buf), None);
        buf.extend_from_slice(b"RIER\r");
        assert_eq!(extract_record(&mut buf), Some(b"NO CARRIER".to_vec()));
    }

    #[test]
    fn test_baud_constants() {
        assert!(baud_constant(9600).is_ok());
        assert!(baud_constant(38400).is_ok());
        assert!(matches!(
            baud_constant(1234),
            Err(BridgeError::InvalidArgument(_))
        ));
    }
}

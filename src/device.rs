//! Writing to the serial device.
//!
//! Most USB serial adapters turn the hang-up signal raised when the device
//! file is closed into a reset of the board behind them. To avoid resetting
//! the board on every write, each write goes through the same sequence on a
//! freshly opened file:
//!
//! 1. open the device file for writing,
//! 2. clear `HUPCL` on the line and reassert the configured output speed,
//! 3. write the payload with a single `write` call,
//! 4. close the file.
//!
//! The file is never kept open between writes, so that a board unplugged and
//! plugged back is picked up by the next write instead of leaving us with a
//! stale descriptor.

use std::{
    fs::{self, File, OpenOptions},
    io::{self, Write},
    os::unix::fs::OpenOptionsExt,
    path::{Path, PathBuf},
};

use log::{debug, warn};
use nix::sys::termios::{cfsetospeed, tcgetattr, tcsetattr, BaudRate, ControlFlags, SetArg};
use serialport::{available_ports, SerialPortType};
use thiserror::Error;

use crate::error::{Error as SetupError, Result};

// =============================================================================
// Public Interface
// =============================================================================

/// Outcome of one write attempt on the device.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum WriteOutcome {
    Success,
    Failure,
}

/// A downstream device the forwarding loop hands its payloads to.
pub trait Device {
    /// Write `payload` to the device in one attempt. Failures are logged
    /// unless `silent` is set, and are never retried.
    fn send(&mut self, payload: &[u8], silent: bool) -> WriteOutcome;
}

/// The reasons a single write attempt fails.
#[derive(Debug, Error)]
pub enum WriteError {
    #[error("cannot open device file: {0}")]
    Open(#[source] io::Error),
    #[error("cannot clear HUPCL of device file: {0}")]
    ClearHupcl(#[source] nix::Error),
    #[error("nothing to write")]
    Empty,
    #[error("write to device file: {0}")]
    Write(#[source] io::Error),
    #[error("short write to device file: {written} of {expected} bytes")]
    ShortWrite { written: usize, expected: usize },
}

/// The serial device file the bridge writes to.
#[derive(Debug, Clone)]
pub struct SerialDevice {
    path: PathBuf,
    speed: BaudRate,
}

impl SerialDevice {
    /// A device at `path` whose line is set to `baud_rate` before each write.
    pub fn new(path: impl Into<PathBuf>, baud_rate: u32) -> Result<Self> {
        let speed = line_speed(baud_rate).ok_or(SetupError::UnsupportedBaudRate(baud_rate))?;
        Ok(SerialDevice {
            path: path.into(),
            speed,
        })
    }

    /// The device file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// One open, clear, write, close cycle. The file is closed when it goes
    /// out of scope, whichever step failed.
    fn try_send(&self, payload: &[u8]) -> std::result::Result<usize, WriteError> {
        let mut file = OpenOptions::new()
            .write(true)
            .custom_flags(nix::libc::O_NOCTTY)
            .open(&self.path)
            .map_err(WriteError::Open)?;

        clear_hupcl(&file, self.speed).map_err(WriteError::ClearHupcl)?;

        if payload.is_empty() {
            return Err(WriteError::Empty);
        }

        let written = file.write(payload).map_err(WriteError::Write)?;
        if written != payload.len() {
            return Err(WriteError::ShortWrite {
                written,
                expected: payload.len(),
            });
        }
        Ok(written)
    }
}

impl Device for SerialDevice {
    fn send(&mut self, payload: &[u8], silent: bool) -> WriteOutcome {
        match self.try_send(payload) {
            Ok(written) => {
                debug!("wrote {} bytes to {}", written, self.path.display());
                WriteOutcome::Success
            }
            Err(WriteError::Empty) => {
                debug!("refusing an empty write to {}", self.path.display());
                WriteOutcome::Failure
            }
            Err(e) => {
                if !silent {
                    warn!("error: {}", e);
                }
                WriteOutcome::Failure
            }
        }
    }
}

/// Maps a speed in symbols-per-second to the termios constant, for the
/// standard speeds only.
pub fn line_speed(baud_rate: u32) -> Option<BaudRate> {
    let speed = match baud_rate {
        1200 => BaudRate::B1200,
        2400 => BaudRate::B2400,
        4800 => BaudRate::B4800,
        9600 => BaudRate::B9600,
        19_200 => BaudRate::B19200,
        38_400 => BaudRate::B38400,
        57_600 => BaudRate::B57600,
        115_200 => BaudRate::B115200,
        230_400 => BaudRate::B230400,
        460_800 => BaudRate::B460800,
        500_000 => BaudRate::B500000,
        576_000 => BaudRate::B576000,
        921_600 => BaudRate::B921600,
        1_000_000 => BaudRate::B1000000,
        _ => return None,
    };
    Some(speed)
}

/// Look `path` up among the serial ports of the system and describe it, for
/// diagnostics. Symbolic links such as `/dev/serial/by-id/...` are resolved
/// first. `None` when the port is not currently known to the system.
pub fn describe_port(path: &Path) -> Option<String> {
    let resolved = fs::canonicalize(path).unwrap_or_else(|_| path.to_owned());
    let ports = match available_ports() {
        Ok(ports) => ports,
        Err(ref e) => {
            debug!("cannot enumerate serial ports: {}", e);
            return None;
        }
    };

    ports
        .into_iter()
        .find(|p| Path::new(&p.port_name) == resolved)
        .map(|p| match p.port_type {
            // USB ports give us more info about the connected serial
            // controller
            SerialPortType::UsbPort(info) => format!(
                "{}: USB {:04x}:{:04x} ({} / {})",
                p.port_name,
                info.vid,
                info.pid,
                info.manufacturer.as_ref().map_or("", String::as_str),
                info.product.as_ref().map_or("", String::as_str)
            ),
            SerialPortType::PciPort => format!("{}: PCI", p.port_name),
            SerialPortType::BluetoothPort => format!("{}: Bluetooth", p.port_name),
            SerialPortType::Unknown => p.port_name,
        })
}

// =============================================================================
// Private stuff
// =============================================================================

fn clear_hupcl(file: &File, speed: BaudRate) -> nix::Result<()> {
    let mut termios = tcgetattr(file)?;
    termios.control_flags.remove(ControlFlags::HUPCL);
    cfsetospeed(&mut termios, speed)?;
    tcsetattr(file, SetArg::TCSANOW, &termios)
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::{env, io::Read, os::fd::AsFd};

    use nix::{
        pty::{openpty, OpenptyResult},
        sys::termios::{cfgetospeed, cfmakeraw},
        unistd::ttyname,
    };

    /// A pseudo-terminal standing in for the serial adapter. The slave side is
    /// switched to raw mode with `HUPCL` set, the way a freshly plugged
    /// adapter comes up, and stays open for the whole test.
    ///
    /// Without pseudo-terminals the calling test is skipped with a notice on
    /// stderr, unless `MAPPER_DEVUSB_REQUIRE_PTY` is set, which makes it fail.
    fn serial_pair() -> Option<(OpenptyResult, PathBuf)> {
        match open_pair() {
            Ok(pair) => Some(pair),
            Err(e) if env::var_os("MAPPER_DEVUSB_REQUIRE_PTY").is_some() => {
                panic!("no pseudo-terminal available: {}", e)
            }
            Err(e) => {
                eprintln!("skipped: no pseudo-terminal available: {}", e);
                None
            }
        }
    }

    fn open_pair() -> nix::Result<(OpenptyResult, PathBuf)> {
        let pty = openpty(None, None)?;
        let mut termios = tcgetattr(pty.slave.as_fd())?;
        cfmakeraw(&mut termios);
        termios.control_flags.insert(ControlFlags::HUPCL);
        tcsetattr(pty.slave.as_fd(), SetArg::TCSANOW, &termios)?;
        let path = ttyname(pty.slave.as_fd())?;
        Ok((pty, path))
    }

    #[test]
    fn writes_payload_verbatim_and_clears_hupcl() {
        let Some((pty, path)) = serial_pair() else {
            return;
        };
        let mut device = SerialDevice::new(&path, 9600).unwrap();

        assert_eq!(device.send(b"hello\n", false), WriteOutcome::Success);

        let mut master = File::from(pty.master);
        let mut received = [0u8; 6];
        master.read_exact(&mut received).unwrap();
        assert_eq!(&received, b"hello\n");

        let termios = tcgetattr(pty.slave.as_fd()).unwrap();
        assert!(!termios.control_flags.contains(ControlFlags::HUPCL));
        assert_eq!(cfgetospeed(&termios), BaudRate::B9600);
    }

    #[test]
    fn empty_payload_is_a_failure_and_writes_nothing() {
        let Some((pty, path)) = serial_pair() else {
            return;
        };
        let mut device = SerialDevice::new(&path, 115_200).unwrap();

        assert_eq!(device.send(b"", false), WriteOutcome::Failure);
        assert_eq!(device.send(b"x", false), WriteOutcome::Success);

        // Only the second write may show up on the line.
        let mut master = File::from(pty.master);
        let mut received = [0u8; 1];
        master.read_exact(&mut received).unwrap();
        assert_eq!(&received, b"x");
    }

    #[test]
    fn missing_device_is_a_failure() {
        let dir = tempfile::tempdir().unwrap();
        let mut device = SerialDevice::new(dir.path().join("ttyUSB9"), 115_200).unwrap();
        assert_eq!(device.send(b"noop\n", false), WriteOutcome::Failure);
        assert_eq!(device.send(b"noop\n", true), WriteOutcome::Failure);
        assert!(!dir.path().join("ttyUSB9").exists());
    }

    #[test]
    fn not_a_tty_is_a_failure_before_writing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("devA");
        fs::write(&path, b"before").unwrap();

        let mut device = SerialDevice::new(&path, 115_200).unwrap();
        assert!(matches!(
            device.try_send(b"payload"),
            Err(WriteError::ClearHupcl(_))
        ));
        assert_eq!(device.send(b"payload", false), WriteOutcome::Failure);
        assert_eq!(fs::read(&path).unwrap(), b"before");
    }

    #[test]
    fn unsupported_speed_is_rejected() {
        assert!(matches!(
            SerialDevice::new("/dev/ttyUSB0", 1234),
            Err(SetupError::UnsupportedBaudRate(1234))
        ));
    }

    #[test]
    fn standard_speeds() {
        assert_eq!(line_speed(9600), Some(BaudRate::B9600));
        assert_eq!(line_speed(115_200), Some(BaudRate::B115200));
        assert_eq!(line_speed(921_600), Some(BaudRate::B921600));
        assert_eq!(line_speed(0), None);
        assert_eq!(line_speed(100_000), None);
    }

    #[test]
    fn describe_unknown_port() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(describe_port(&dir.path().join("ttyUSB9")), None);
    }

    #[test]
    fn error_messages() {
        let e = WriteError::Open(io::Error::from_raw_os_error(2));
        assert!(e.to_string().starts_with("cannot open device file: "));
        let e = WriteError::ShortWrite {
            written: 3,
            expected: 5,
        };
        assert_eq!(
            e.to_string(),
            "short write to device file: 3 of 5 bytes"
        );
    }
}

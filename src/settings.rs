//! Runtime settings of the bridge: which device to feed, which FIFO to read,
//! where to log and how to pace the keep-alive writes.
//!
//! Use the [builder](https://doc.rust-lang.org/1.0.0/style/ownership/builders.html)
//! pattern to set the configurable values. The settings are immutable once
//! [`SettingsBuilder::finalize`] has validated them.

use std::{fmt, path::PathBuf, str::FromStr, time::Duration};

use serde::Deserialize;

use crate::{
    device::{self, WriteOutcome},
    error::{Error, Result},
};

/// FIFO used when none is configured.
pub const DEFAULT_FIFO: &str = "/tmp/arduino";

/// Speed the serial line is set to every time the device is opened.
pub const DEFAULT_BAUD_RATE: u32 = 115_200;

/// Size of the buffer a single FIFO read fills.
pub const DEFAULT_BUFFER_SIZE: usize = 8192;

// =============================================================================
// Public Interface
// =============================================================================

/// How much of the keep-alive traffic ends up in the log.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeepAliveLog {
    /// Nothing, not even the failures.
    Never,
    /// Only the failed keep-alive writes.
    #[serde(rename = "error")]
    OnError,
    /// Every attempt, and its failures.
    Always,
}

impl KeepAliveLog {
    /// Whether a keep-alive attempt is logged before it is made.
    pub fn announces(self) -> bool {
        self == KeepAliveLog::Always
    }

    /// Whether the device writer must keep quiet about failed keep-alive
    /// writes.
    pub fn silent(self) -> bool {
        self == KeepAliveLog::Never
    }
}

impl FromStr for KeepAliveLog {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "never" => Ok(KeepAliveLog::Never),
            "error" => Ok(KeepAliveLog::OnError),
            "always" => Ok(KeepAliveLog::Always),
            _ => Err(format!(
                "`{}` is not one of `never`, `error`, `always`",
                s
            )),
        }
    }
}

impl fmt::Display for KeepAliveLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            KeepAliveLog::Never => "never",
            KeepAliveLog::OnError => "error",
            KeepAliveLog::Always => "always",
        })
    }
}

/// Groups all the settings of the bridge. Instances are only created through
/// [`SettingsBuilder`], which validates them.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Settings {
    /// The device file of the serial line the data is forwarded to.
    pub device: PathBuf,
    /// The named pipe the data is read from.
    pub fifo: PathBuf,
    /// Where the log goes. `None` means the standard error stream.
    pub log_file: Option<PathBuf>,
    /// Idle time before a keep-alive when the last write went through.
    pub keep_alive_on_success: Duration,
    /// Idle time before a keep-alive when the last write failed.
    pub keep_alive_on_failure: Duration,
    /// Logging policy of the keep-alive writes.
    pub keep_alive_log: KeepAliveLog,
    /// Log at debug level.
    pub debug: bool,
    /// Detach from the terminal once the FIFO is open.
    pub daemon: bool,
    /// Output speed reasserted on the serial line before every write.
    pub baud_rate: u32,
    /// Maximum number of bytes taken from the FIFO in one read.
    pub buffer_size: usize,

    /// Restrict creation of `Settings` instances unless through the
    /// `SettingsBuilder`.
    #[doc(hidden)]
    _private_use_builder: (),
}

impl Settings {
    /// The time to wait for FIFO data before sending a keep-alive, given the
    /// outcome of the previous write.
    pub fn keep_alive_interval(&self, last: WriteOutcome) -> Duration {
        match last {
            WriteOutcome::Success => self.keep_alive_on_success,
            WriteOutcome::Failure => self.keep_alive_on_failure,
        }
    }
}

/// The builder for the [`Settings`] values.
///
/// All values but the device have defaults that will be used if not
/// explicitly set.
///
/// **Example**
///
/// ```
/// use mapper_devusb::SettingsBuilder;
///
/// let settings = SettingsBuilder::new()
///     .device("/dev/ttyUSB0")
///     .finalize()
///     .unwrap();
/// assert_eq!(settings.fifo.to_str(), Some("/tmp/arduino"));
/// ```
#[derive(Debug, Clone)]
pub struct SettingsBuilder {
    device: Option<PathBuf>,
    fifo: PathBuf,
    log_file: Option<PathBuf>,
    keep_alive_on_success: Duration,
    keep_alive_on_failure: Duration,
    keep_alive_log: KeepAliveLog,
    debug: bool,
    daemon: bool,
    baud_rate: u32,
    buffer_size: usize,
}

impl Default for SettingsBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl SettingsBuilder {
    /// Start building the settings using default values and no device.
    pub fn new() -> Self {
        SettingsBuilder {
            device: None,
            fifo: PathBuf::from(DEFAULT_FIFO),
            log_file: None,
            keep_alive_on_success: Duration::from_secs(60),
            keep_alive_on_failure: Duration::from_secs(5),
            keep_alive_log: KeepAliveLog::Always,
            debug: false,
            daemon: false,
            baud_rate: DEFAULT_BAUD_RATE,
            buffer_size: DEFAULT_BUFFER_SIZE,
        }
    }

    /// Set the device file of the serial line
    pub fn device(mut self, device: impl Into<PathBuf>) -> Self {
        self.device = Some(device.into());
        self
    }

    /// Set the path of the FIFO
    pub fn fifo(mut self, fifo: impl Into<PathBuf>) -> Self {
        self.fifo = fifo.into();
        self
    }

    /// Log into a file instead of the standard error stream
    pub fn log_file(mut self, log_file: impl Into<PathBuf>) -> Self {
        self.log_file = Some(log_file.into());
        self
    }

    /// Set the keep-alive interval used while writes succeed
    pub fn keep_alive_on_success(mut self, interval: Duration) -> Self {
        self.keep_alive_on_success = interval;
        self
    }

    /// Set the keep-alive interval used while writes fail
    pub fn keep_alive_on_failure(mut self, interval: Duration) -> Self {
        self.keep_alive_on_failure = interval;
        self
    }

    /// Set the logging policy of the keep-alive writes
    pub fn keep_alive_log(mut self, policy: KeepAliveLog) -> Self {
        self.keep_alive_log = policy;
        self
    }

    /// Enable or disable debug logging
    pub fn debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    /// Run detached from the terminal
    pub fn daemon(mut self, daemon: bool) -> Self {
        self.daemon = daemon;
        self
    }

    /// Set the serial line speed in symbols-per-second
    pub fn baud_rate(mut self, baud_rate: u32) -> Self {
        self.baud_rate = baud_rate;
        self
    }

    /// Set the maximum number of bytes taken from the FIFO in one read
    pub fn buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = buffer_size;
        self
    }

    /// Validate the values and produce the settings.
    pub fn finalize(self) -> Result<Settings> {
        let device = self.device.ok_or(Error::MissingDevice)?;
        if self.keep_alive_on_success.is_zero() {
            return Err(zero_value(
                "keep-alive-success",
                self.keep_alive_on_success,
            ));
        }
        if self.keep_alive_on_failure.is_zero() {
            return Err(zero_value(
                "keep-alive-failure",
                self.keep_alive_on_failure,
            ));
        }
        if self.buffer_size == 0 {
            return Err(Error::InvalidValue {
                option: "buffer-size",
                value: "0".into(),
                reason: "must not be zero",
            });
        }
        if device::line_speed(self.baud_rate).is_none() {
            return Err(Error::UnsupportedBaudRate(self.baud_rate));
        }

        Ok(Settings {
            device,
            fifo: self.fifo,
            log_file: self.log_file,
            keep_alive_on_success: self.keep_alive_on_success,
            keep_alive_on_failure: self.keep_alive_on_failure,
            keep_alive_log: self.keep_alive_log,
            debug: self.debug,
            daemon: self.daemon,
            baud_rate: self.baud_rate,
            buffer_size: self.buffer_size,
            _private_use_builder: (),
        })
    }
}

// =============================================================================
// Private stuff
// =============================================================================

fn zero_value(option: &'static str, value: Duration) -> Error {
    Error::InvalidValue {
        option,
        value: format!("{:?}", value),
        reason: "must not be zero",
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[test]
fn all_default() {
    let settings = SettingsBuilder::new()
        .device("/dev/ttyACM0")
        .finalize()
        .unwrap();
    assert_eq!(
        settings,
        Settings {
            device: PathBuf::from("/dev/ttyACM0"),
            fifo: PathBuf::from("/tmp/arduino"),
            log_file: None,
            keep_alive_on_success: Duration::from_secs(60),
            keep_alive_on_failure: Duration::from_secs(5),
            keep_alive_log: KeepAliveLog::Always,
            debug: false,
            daemon: false,
            baud_rate: 115_200,
            buffer_size: 8192,
            _private_use_builder: (),
        }
    )
}

#[test]
fn missing_device() {
    let result = SettingsBuilder::new().fifo("/tmp/other").finalize();
    assert!(matches!(result, Err(Error::MissingDevice)));
}

#[test]
fn fifo_and_log_file() {
    let settings = SettingsBuilder::new()
        .device("/tmp/devA")
        .fifo("/run/mapper")
        .log_file("/var/log/mapper.log")
        .finalize()
        .unwrap();
    assert_eq!(settings.fifo, PathBuf::from("/run/mapper"));
    assert_eq!(settings.log_file, Some(PathBuf::from("/var/log/mapper.log")));
}

#[test]
fn keep_alive_intervals() {
    let settings = SettingsBuilder::new()
        .device("/tmp/devA")
        .keep_alive_on_success(Duration::from_secs(120))
        .keep_alive_on_failure(Duration::from_millis(500))
        .finalize()
        .unwrap();
    assert_eq!(
        settings.keep_alive_interval(WriteOutcome::Success),
        Duration::from_secs(120)
    );
    assert_eq!(
        settings.keep_alive_interval(WriteOutcome::Failure),
        Duration::from_millis(500)
    );
}

#[test]
fn zero_interval_is_rejected() {
    let result = SettingsBuilder::new()
        .device("/tmp/devA")
        .keep_alive_on_failure(Duration::from_secs(0))
        .finalize();
    match result {
        Err(Error::InvalidValue { option, .. }) => assert_eq!(option, "keep-alive-failure"),
        other => panic!("unexpected result {:?}", other),
    }
}

#[test]
fn zero_buffer_is_rejected() {
    let result = SettingsBuilder::new()
        .device("/tmp/devA")
        .buffer_size(0)
        .finalize();
    assert!(matches!(
        result,
        Err(Error::InvalidValue {
            option: "buffer-size",
            ..
        })
    ));
}

#[test]
fn baud_rate() {
    let settings = SettingsBuilder::new()
        .device("/tmp/devA")
        .baud_rate(9600)
        .finalize()
        .unwrap();
    assert_eq!(settings.baud_rate, 9600);

    let result = SettingsBuilder::new()
        .device("/tmp/devA")
        .baud_rate(12_345)
        .finalize();
    assert!(matches!(result, Err(Error::UnsupportedBaudRate(12_345))));
}

#[test]
fn flags() {
    let settings = SettingsBuilder::new()
        .device("/tmp/devA")
        .debug(true)
        .daemon(true)
        .keep_alive_log(KeepAliveLog::Never)
        .finalize()
        .unwrap();
    assert!(settings.debug);
    assert!(settings.daemon);
    assert_eq!(settings.keep_alive_log, KeepAliveLog::Never);
}

#[test]
fn keep_alive_log_policy() {
    assert_eq!("never".parse(), Ok(KeepAliveLog::Never));
    assert_eq!("error".parse(), Ok(KeepAliveLog::OnError));
    assert_eq!("always".parse(), Ok(KeepAliveLog::Always));
    assert!("sometimes".parse::<KeepAliveLog>().is_err());

    assert!(KeepAliveLog::Always.announces());
    assert!(!KeepAliveLog::OnError.announces());
    assert!(!KeepAliveLog::Never.announces());

    assert!(KeepAliveLog::Never.silent());
    assert!(!KeepAliveLog::OnError.silent());
    assert!(!KeepAliveLog::Always.silent());

    assert_eq!(KeepAliveLog::OnError.to_string(), "error");
}

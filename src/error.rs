//! Errors that prevent the bridge from starting.
//!
//! Anything that goes wrong once the forwarding loop runs is reported through
//! the log and recovered locally; only the setup phase can fail with an
//! [`Error`], and the command line front end turns it into a process exit
//! status with [`Error::exit_code`].

use std::{io, path::PathBuf};

use thiserror::Error;

/// Result type for the setup phase.
pub type Result<T> = std::result::Result<T, Error>;

/// Fatal setup errors.
#[derive(Debug, Error)]
pub enum Error {
    /// No device file was given, neither on the command line nor in the
    /// configuration file.
    #[error("missing device file")]
    MissingDevice,

    /// A setting has a value that cannot be used.
    #[error("invalid value `{value}` for `{option}`: {reason}")]
    InvalidValue {
        option: &'static str,
        value: String,
        reason: &'static str,
    },

    /// The baud rate is not one of the standard serial line speeds.
    #[error("unsupported baud rate {0}")]
    UnsupportedBaudRate(u32),

    /// The configuration file could not be read.
    #[error("cannot read configuration file `{}`: {source}", path.display())]
    ConfigRead { path: PathBuf, source: io::Error },

    /// The configuration file is not valid.
    #[error("invalid configuration file `{}`: {source}", path.display())]
    ConfigParse {
        path: PathBuf,
        source: toml::de::Error,
    },

    /// The log file could not be opened for appending.
    #[error("cannot open log file `{}`: {source}", path.display())]
    LogFile { path: PathBuf, source: io::Error },

    /// The logger was already installed.
    #[error("cannot install logger: {0}")]
    Logger(#[from] log::SetLoggerError),

    /// The FIFO could not be opened; the bridge cannot run without it.
    #[error("unable to open server FIFO `{}`: {source}", path.display())]
    FifoOpen { path: PathBuf, source: io::Error },

    /// Detaching from the terminal failed.
    #[error("cannot start as a daemon: {0}")]
    Daemon(#[source] nix::Error),
}

impl Error {
    /// The process exit status to use when the bridge fails to start with
    /// this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::FifoOpen { .. } => 2,
            Error::LogFile { .. } => 3,
            _ => 1,
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[test]
fn exit_codes() {
    assert_eq!(Error::MissingDevice.exit_code(), 1);
    assert_eq!(Error::UnsupportedBaudRate(12).exit_code(), 1);
    assert_eq!(
        Error::FifoOpen {
            path: "/tmp/arduino".into(),
            source: io::Error::from(io::ErrorKind::NotFound),
        }
        .exit_code(),
        2
    );
    assert_eq!(
        Error::LogFile {
            path: "/var/log/x.log".into(),
            source: io::Error::from(io::ErrorKind::PermissionDenied),
        }
        .exit_code(),
        3
    );
}

#[test]
fn invalid_value_message() {
    let err = Error::InvalidValue {
        option: "keep-alive-failure",
        value: "0".into(),
        reason: "must not be zero",
    };
    assert_eq!(
        err.to_string(),
        "invalid value `0` for `keep-alive-failure`: must not be zero"
    );
}

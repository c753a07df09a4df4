//! The forwarding loop: everything written into the FIFO goes to the serial
//! device, with keep-alive writes in between when the FIFO stays idle.
//!
//! **Example** - Running the bridge:
//! ```no_run
//! use mapper_devusb::{prepare, SettingsBuilder};
//!
//! let settings = SettingsBuilder::new().device("/dev/ttyUSB0").finalize()?;
//! let stats = prepare(settings)?.run();
//! println!("{}", stats);
//! # Ok::<(), mapper_devusb::Error>(())
//! ```

mod events;
mod state_machine;
mod states;

use std::{borrow::Cow, env, fmt};

use log::{debug, warn};

use crate::{
    device::SerialDevice,
    error::{Error, Result},
    fifo::{self, Fifo},
    settings::Settings,
};

pub use state_machine::{factory, Forwarder};

/// Written to the device whenever the FIFO stays idle for a whole interval.
pub const KEEP_ALIVE: &[u8] = b"noop\n";

/// A chunk starting with these bytes stops the loop instead of being
/// forwarded.
pub const SENTINEL: &[u8] = b"EOF()";

/// Counters of what went through the loop.
#[derive(Debug, Default, Copy, Clone, Eq, PartialEq)]
pub struct Stats {
    /// Chunks read from the FIFO, the sentinel included.
    pub received: u64,
    /// Chunks written to the device.
    pub forwarded: u64,
    /// Keep-alive writes.
    pub keep_alives: u64,
    /// Writes that failed, keep-alives included.
    pub failures: u64,
}

impl fmt::Display for Stats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} received, {} forwarded, {} keep-alives, {} failed writes",
            self.received, self.forwarded, self.keep_alives, self.failures
        )
    }
}

/// Prepare the FIFO and detach if asked to, returning the forwarding loop
/// ready to [`run`](Forwarder::run).
///
/// Failing to open the FIFO is fatal. Once the loop runs, nothing is: device
/// errors are logged and retried at the next keep-alive. Detaching forks, so
/// anything relying on threads must be set up after this returns.
pub fn prepare(mut settings: Settings) -> Result<Forwarder> {
    fifo::ensure(&settings.fifo);
    let fifo = Fifo::open(&settings.fifo)?;

    if settings.daemon {
        // The daemon runs from `/`.
        if settings.device.is_relative() {
            if let Ok(cwd) = env::current_dir() {
                settings.device = cwd.join(&settings.device);
            }
        }
        if settings.log_file.is_none() {
            warn!("running as a daemon without a log file, messages are discarded from now on");
        }
        nix::unistd::daemon(false, false).map_err(Error::Daemon)?;
        debug!("detached, pid {}", std::process::id());
    }

    let device = SerialDevice::new(settings.device.clone(), settings.baud_rate)?;
    Ok(factory(settings, fifo, Box::new(device)))
}

/// Whether `chunk` is the termination request.
pub fn is_sentinel(chunk: &[u8]) -> bool {
    chunk.starts_with(SENTINEL)
}

/// The text logged for a received chunk: up to the first NUL, without one
/// trailing `\n` and then one trailing `\r`.
pub fn echo(chunk: &[u8]) -> Cow<'_, str> {
    let mut text = match chunk.iter().position(|&b| b == 0) {
        Some(nul) => &chunk[..nul],
        None => chunk,
    };
    if let Some(rest) = text.strip_suffix(b"\n") {
        text = rest;
    }
    if let Some(rest) = text.strip_suffix(b"\r") {
        text = rest;
    }
    String::from_utf8_lossy(text)
}

// =============================================================================
// Unit Tests
// =============================================================================

#[test]
fn sentinel_is_an_exact_prefix() {
    assert!(is_sentinel(b"EOF()"));
    assert!(is_sentinel(b"EOF()\n"));
    assert!(is_sentinel(b"EOF()trailing"));
    assert!(!is_sentinel(b"EOF(1)"));
    assert!(!is_sentinel(b"xEOF()"));
    assert!(!is_sentinel(b"EOF("));
    assert!(!is_sentinel(b"eof()"));
    assert!(!is_sentinel(b""));
}

#[test]
fn echo_trims_one_line_ending() {
    assert_eq!(echo(b"hello\n"), "hello");
    assert_eq!(echo(b"hello\r\n"), "hello");
    assert_eq!(echo(b"hello\r"), "hello");
    assert_eq!(echo(b"hello\n\n"), "hello\n");
    assert_eq!(echo(b"hello\n\r"), "hello\n");
    assert_eq!(echo(b"hello"), "hello");
    assert_eq!(echo(b"\n"), "");
}

#[test]
fn echo_stops_at_nul() {
    assert_eq!(echo(b"ab\0cd\n"), "ab");
    assert_eq!(echo(b"\0"), "");
}

#[test]
fn stats_summary() {
    let stats = Stats {
        received: 4,
        forwarded: 3,
        keep_alives: 2,
        failures: 1,
    };
    assert_eq!(
        stats.to_string(),
        "4 received, 3 forwarded, 2 keep-alives, 1 failed writes"
    );
}

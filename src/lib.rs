//! `mapper-devusb` provides a named pipe (FIFO) whose content is forwarded to
//! a serial device, typically an Arduino board behind a USB serial adapter.
//!
//! Opening then closing the device file of such an adapter raises the
//! hang-up signal (`HUPCL`), which most adapters turn into a reset of the
//! board. Writing to the board with a plain `echo ... > /dev/ttyUSB0` hence
//! resets it every time. `mapper-devusb` clears `HUPCL` on every open, before
//! anything is written, the resilient equivalent of `stty -hupcl`. Clients
//! write to the FIFO instead of the device and the board is left alone.
//!
//! When the FIFO stays idle, a keep-alive `noop` command is written to the
//! device. Should the board be unplugged and plugged back, the reset that
//! comes with it then hopefully happens on that harmless write rather than on
//! a meaningful one. The idle interval is long while writes succeed and short
//! while they fail, so that the board coming back is noticed quickly.
//!
//! Writing a line starting with `EOF()` into the FIFO stops the bridge.
//!
//! The forwarding loop is implemented as a state machine, in terms of
//! **states** and **transitions** between them:
//!
//! * It can only be in one state at any time.
//! * Each state can have its own associated data if needed.
//! * Some data is shared between **all** states (the settings, the FIFO, the
//!   device and the read buffer).
//! * Transitions between states are triggered via typed **events**.
//! * Only explicitly defined transitions are permitted, and the transition
//!   from an event into a new state is written as a [`From`] implementation,
//!   so that any other transition is a compile-time error.

mod config;
mod device;
mod error;
mod fifo;
mod forwarder;
mod logging;
mod settings;

pub use config::{FileConfig, KeepAliveConfig};
pub use device::{describe_port, line_speed, Device, SerialDevice, WriteError, WriteOutcome};
pub use error::{Error, Result};
pub use fifo::{ensure as ensure_fifo, Fifo, Preparation, Readiness};
pub use forwarder::{echo, factory, is_sentinel, prepare, Forwarder, Stats, KEEP_ALIVE, SENTINEL};
pub use logging::{init as init_logging, level as log_level};
pub use settings::{
    KeepAliveLog, Settings, SettingsBuilder, DEFAULT_BAUD_RATE, DEFAULT_BUFFER_SIZE, DEFAULT_FIFO,
};

//! States for the forwarding loop state machine.
//!
//! This modules is private and restricted to the
//! [`forwarder`](crate::forwarder) scope. The public interface of the
//! forwarding loop is provided by [`forwarder`](crate::forwarder).
//!
//! ```ignore
//! use super::states::*;
//! ```
//!
//! Refer to the [`state_machine`](super::state_machine) module for an overview
//! of states, events and transitions.

use std::fmt;

use hexplay::HexViewBuilder;
use log::{debug, info, log_enabled, trace, warn, Level::Trace};

use super::{echo, events::*, is_sentinel, Stats, KEEP_ALIVE};
use crate::{
    device::{Device, WriteOutcome},
    fifo::{Fifo, Readiness},
    settings::Settings,
};

// =============================================================================
// Crate-Public Interface
// =============================================================================

/// Everything the states share: the settings, both ends of the bridge, the
/// read buffer and the running statistics.
pub(crate) struct Link {
    pub settings: Settings,
    /// The FIFO, until the `Done` state closes it.
    pub fifo: Option<Fifo>,
    pub device: Box<dyn Device>,
    /// Sized once to the configured read size.
    pub buffer: Vec<u8>,
    pub stats: Stats,
}
impl Link {
    pub fn new(settings: Settings, fifo: Fifo, device: Box<dyn Device>) -> Self {
        let buffer = vec![0; settings.buffer_size];
        Link {
            settings,
            fifo: Some(fifo),
            device,
            buffer,
            stats: Stats::default(),
        }
    }

    /// Write the keep-alive command, logging it according to the keep-alive
    /// policy.
    fn keep_alive(&mut self) -> WriteOutcome {
        let policy = self.settings.keep_alive_log;
        if policy.announces() {
            info!("sending noop()");
        }
        self.stats.keep_alives += 1;
        let outcome = self.device.send(KEEP_ALIVE, policy.silent());
        self.account(outcome)
    }

    /// Forward the first `len` bytes of the buffer.
    fn forward(&mut self, len: usize) -> WriteOutcome {
        self.stats.forwarded += 1;
        let outcome = self.device.send(&self.buffer[..len], false);
        self.account(outcome)
    }

    fn account(&mut self, outcome: WriteOutcome) -> WriteOutcome {
        if outcome == WriteOutcome::Failure {
            self.stats.failures += 1;
        }
        outcome
    }
}
impl fmt::Debug for Link {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Link")
            .field("device", &self.settings.device)
            .field("fifo", &self.fifo)
            .field("stats", &self.stats)
            .finish()
    }
}

/// Trait adding the ability for a state to be `run` after a transition into it.
pub(crate) trait Runnable {
    /// A state implements this method so it can be `run` after the state
    /// machine transitions into it.
    ///
    /// During this call, the state does its work on the shared `link` and
    /// requests a transition to a new state by returning the appropriate
    /// `event`. The `event` is then consumed to create the new `state` using
    /// the corresponding [`From`] trait implementation.
    fn run(&mut self, link: &mut Link) -> Event;
}

// Waiting State ===============================================================

/// The state where the loop blocks until the FIFO has data or the keep-alive
/// interval elapses. The interval depends on the outcome of the last write:
/// the long one after a success, the short one after a failure.
///
///  * **[`DrainEvent`] => [`DrainingState`]** when data can be read,
///  * **[`WaitEvent`] => [`WaitingState`]** after a keep-alive write on
///    timeout, or after the wait itself failed (e.g. interrupted),
///  * **[`DoneEvent`] => [`DoneState`]** if the FIFO is already gone.
#[derive(Debug)]
pub(crate) struct WaitingState {
    pub last: WriteOutcome,
}
impl Runnable for WaitingState {
    fn run(&mut self, link: &mut Link) -> Event {
        trace!("=> Waiting");
        let timeout = link.settings.keep_alive_interval(self.last);

        let readiness = match &link.fifo {
            Some(fifo) => fifo.wait(timeout),
            None => return Event::Done(DoneEvent {}),
        };

        match readiness {
            Ok(Readiness::Ready) => Event::Drain(DrainEvent { last: self.last }),
            Ok(Readiness::TimedOut) => Event::Wait(WaitEvent {
                last: link.keep_alive(),
            }),
            Err(e) => {
                warn!("error: select: {}", e);
                Event::Wait(WaitEvent { last: self.last })
            }
        }
    }
}

// Draining State ==============================================================

/// The state where one chunk is read from the FIFO, echoed to the log, then
/// either recognized as the termination sentinel or forwarded verbatim.
///
///  * **[`WaitEvent`] => [`WaitingState`]** after the chunk was forwarded, or
///    when nothing was read,
///  * **[`DoneEvent`] => [`DoneState`]** when the chunk starts with the
///    sentinel.
#[derive(Debug)]
pub(crate) struct DrainingState {
    pub last: WriteOutcome,
}
impl Runnable for DrainingState {
    fn run(&mut self, link: &mut Link) -> Event {
        trace!("=> Draining");

        let read = match link.fifo.as_mut() {
            Some(fifo) => fifo.read(&mut link.buffer),
            None => return Event::Done(DoneEvent {}),
        };
        let len = match read {
            Ok(len) => len,
            Err(ref e) => {
                debug!("read from fifo: {}", e);
                0
            }
        };
        if len == 0 {
            return Event::Wait(WaitEvent { last: self.last });
        }

        link.stats.received += 1;
        let chunk = &link.buffer[..len];
        info!("received: [{}]", echo(chunk));

        // Dump the received data in a hex table for debugging
        if log_enabled!(Trace) {
            let view = HexViewBuilder::new(chunk)
                .address_offset(0)
                .row_width(16)
                .finish();
            trace!("\n{}", view);
        }

        if is_sentinel(chunk) {
            info!("quitting");
            return Event::Done(DoneEvent {});
        }

        Event::Wait(WaitEvent {
            last: link.forward(len),
        })
    }
}

// Done State ==================================================================

/// Reached when the loop is about to terminate.
///
/// This state goes into a 2-phase execution. During the initial phase, it
/// closes the FIFO. It then triggers the [`ExitEvent`] to cause the state
/// machine to exit its event loop.
#[derive(Debug, Copy, Clone)]
pub(crate) struct DoneState {
    /// When `true` instructs the state machine to exit its event loop.
    pub should_exit: bool,
}
impl Runnable for DoneState {
    fn run(&mut self, link: &mut Link) -> Event {
        trace!("=> Done");
        if let Some(fifo) = link.fifo.take() {
            debug!("closing server fifo '{}'", fifo.path().display());
        }
        Event::Exit(ExitEvent {})
    }
}

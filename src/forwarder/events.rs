//! Events of the forwarding loop state machine.
//!
//! This modules is private and restricted to the
//! [`forwarder`](crate::forwarder) scope.
//!
//! ```ignore
//! use super::events::*;
//! ```
//!
//! Refer to the [`state_machine`](super::state_machine) module for an overview
//! of states, events and transitions.

use crate::device::WriteOutcome;

// =============================================================================
// Crate-Public Interface
// =============================================================================

// WaitEvent ===================================================================

/// Event fired to trigger a transition to [`WaitingState`].
///
/// This event can happen under one of the following circumstances:
///
///  1. While at the [`WaitingState`], after a keep-alive write or after a
///     failed wait.
///  2. While at the [`DrainingState`], after a chunk was forwarded or when
///     nothing could be read.
///
/// [`WaitingState`]: super::states::WaitingState
/// [`DrainingState`]: super::states::DrainingState
#[derive(Debug)]
pub(crate) struct WaitEvent {
    /// Outcome of the most recent write, which selects the next timeout.
    pub last: WriteOutcome,
}

// DrainEvent ==================================================================

/// Event fired when the FIFO has data to read. It triggers a transition to
/// [`DrainingState`](super::states::DrainingState).
#[derive(Debug)]
pub(crate) struct DrainEvent {
    /// Outcome of the most recent write, carried over untouched.
    pub last: WriteOutcome,
}

// DoneEvent ===================================================================

/// Event fired when the termination sentinel was received, or when there is
/// no FIFO left to wait on. It triggers a transition to the `Done` state.
#[derive(Debug)]
pub(crate) struct DoneEvent {}

// ExitEvent ===================================================================

/// The last event of the state machine; its event loop terminates and hands
/// the statistics back to the caller.
#[derive(Debug)]
pub(crate) struct ExitEvent {}

// Events enum ==================================================================

/// Events that can be triggered within the forwarding loop state machine.
#[derive(Debug)]
pub(crate) enum Event {
    Wait(WaitEvent),
    Drain(DrainEvent),
    Done(DoneEvent),
    Exit(ExitEvent),
}

//! Forwarding loop state machine.
//!
//! The loop alternates between waiting on the FIFO and draining one chunk
//! from it. A timeout while waiting sends a keep-alive to the device; a chunk
//! is forwarded to the device unless it starts with the termination sentinel.
//! The outcome of the last write is the only thing carried from one iteration
//! to the next, and it picks the timeout of the next wait.
//!
//! ```text
//!                 START (last write = Failure)
//!                   |
//!                   v
//!             .-----------.  timeout: keep-alive write
//!       .---->|  Waiting  |-----------------.
//!       |     '-----------'<----------------'
//!       |           |
//!       |      data ready
//!       |           v
//!       |     .-----------.   sentinel   .------.
//!       '-----| Draining  |------------->| Done |---> END
//!  forwarded  '-----------'              '------'
//!  or nothing
//!    read
//! ```

use super::events::*;
use super::states::*;
use super::Stats;
use crate::{
    device::{Device, WriteOutcome},
    fifo::Fifo,
    settings::Settings,
};

// =============================================================================
// Public Interface
// =============================================================================

/// The forwarding loop. Use the [`factory()`] function to get an instance
/// then run it by calling its [`run()`](Forwarder::run) method.
#[derive(Debug)]
pub struct Forwarder {
    sm: ForwarderStates,
}
impl Forwarder {
    /// The event loop runs until the `Done` state is reached and its
    /// `should_exit` flag is set, which only happens after the termination
    /// sentinel was received. The FIFO is closed by then.
    pub fn run(self) -> Stats {
        let mut sm = self.sm;
        loop {
            sm = sm.step();
            if let ForwarderStates::Done(done) = &sm {
                if done.state.should_exit {
                    return done.link.stats;
                }
            }
        }
    }
}

/// Factory function for the forwarding loop, reading from `fifo` and writing
/// to `device`.
pub fn factory(settings: Settings, fifo: Fifo, device: Box<dyn Device>) -> Forwarder {
    Forwarder {
        // The first wait uses the short interval.
        sm: ForwarderStates::Waiting(ForwarderSM {
            link: Link::new(settings, fifo, device),
            state: WaitingState {
                last: WriteOutcome::Failure,
            },
        }),
    }
}

// =============================================================================
// Private stuff
// =============================================================================

/// The raw state machine implementing the forwarding loop.
///
/// The generic parameter holds the current state; the `link` is the data all
/// states share and is carried over on every transition.
#[derive(Debug)]
struct ForwarderSM<S: Runnable> {
    link: Link,
    state: S,
}
impl<S: Runnable> ForwarderSM<S> {
    fn run(&mut self) -> Event {
        self.state.run(&mut self.link)
    }

    /// Consume this machine into one in the `next` state.
    fn transition<T: Runnable>(self, next: T) -> ForwarderSM<T> {
        ForwarderSM {
            link: self.link,
            state: next,
        }
    }
}

/// An enum wrapper around the states of the forwarding loop state machine.
#[derive(Debug)]
enum ForwarderStates {
    Waiting(ForwarderSM<WaitingState>),
    Draining(ForwarderSM<DrainingState>),
    Done(ForwarderSM<DoneState>),
}
impl ForwarderStates {
    /// The unit of work in the state machine event loop. It runs the current
    /// state and decides the next transition from the event it returns. Only
    /// the transitions listed here are legal.
    fn step(self) -> Self {
        match self {
            ForwarderStates::Waiting(mut sm) => {
                let event = sm.run();
                match event {
                    Event::Wait(ev) => ForwarderStates::Waiting(sm.transition(ev.into())),
                    Event::Drain(ev) => ForwarderStates::Draining(sm.transition(ev.into())),
                    Event::Done(ev) => ForwarderStates::Done(sm.transition(ev.into())),
                    _ => unreachable!("illegal event {:#?} at current state {:#?}", event, sm),
                }
            }
            ForwarderStates::Draining(mut sm) => {
                let event = sm.run();
                match event {
                    Event::Wait(ev) => ForwarderStates::Waiting(sm.transition(ev.into())),
                    Event::Done(ev) => ForwarderStates::Done(sm.transition(ev.into())),
                    _ => unreachable!("illegal event {:#?} at current state {:#?}", event, sm),
                }
            }
            ForwarderStates::Done(mut sm) => {
                let event = sm.run();
                match event {
                    Event::Exit(ev) => ForwarderStates::Done(sm.transition(ev.into())),
                    _ => unreachable!("illegal event {:#?} at current state {:#?}", event, sm),
                }
            }
        }
    }
}

// -----------------------------------------------------------------------------
// State from Event transitions
// -----------------------------------------------------------------------------

impl From<WaitEvent> for WaitingState {
    fn from(event: WaitEvent) -> WaitingState {
        WaitingState { last: event.last }
    }
}

impl From<DrainEvent> for DrainingState {
    fn from(event: DrainEvent) -> DrainingState {
        DrainingState { last: event.last }
    }
}

impl From<DoneEvent> for DoneState {
    fn from(_: DoneEvent) -> DoneState {
        DoneState { should_exit: false }
    }
}

impl From<ExitEvent> for DoneState {
    fn from(_: ExitEvent) -> DoneState {
        DoneState { should_exit: true }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::{
        cell::RefCell,
        collections::VecDeque,
        fs::{File, OpenOptions},
        io::Write,
        path::Path,
        rc::Rc,
        time::{Duration, Instant},
    };

    use tempfile::TempDir;

    use crate::{fifo, settings::KeepAliveLog, SettingsBuilder};

    type Writes = Rc<RefCell<Vec<(Vec<u8>, bool)>>>;

    /// A device that records what it is given, answers with scripted
    /// outcomes, and can push more input into the FIFO after each write, the
    /// way a client reacting to the board would.
    struct ScriptedDevice {
        writes: Writes,
        outcomes: VecDeque<WriteOutcome>,
        fallback: WriteOutcome,
        replies: VecDeque<Option<&'static [u8]>>,
        client: File,
    }
    impl Device for ScriptedDevice {
        fn send(&mut self, payload: &[u8], silent: bool) -> WriteOutcome {
            self.writes.borrow_mut().push((payload.to_vec(), silent));
            if let Some(Some(reply)) = self.replies.pop_front() {
                self.client.write_all(reply).unwrap();
            }
            self.outcomes.pop_front().unwrap_or(self.fallback)
        }
    }

    struct Fixture {
        _dir: TempDir,
        client: File,
        writes: Writes,
        link: Link,
    }

    fn fixture(
        builder: SettingsBuilder,
        fallback: WriteOutcome,
        replies: Vec<Option<&'static [u8]>>,
    ) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("arduino");
        fifo::ensure(&path);
        let fifo = Fifo::open(&path).unwrap();
        let client = open_client(&path);

        let writes = Writes::default();
        let device = ScriptedDevice {
            writes: writes.clone(),
            outcomes: VecDeque::new(),
            fallback,
            replies: replies.into(),
            client: open_client(&path),
        };
        let settings = builder
            .device(dir.path().join("devA"))
            .fifo(&path)
            .finalize()
            .unwrap();

        Fixture {
            _dir: dir,
            client,
            writes,
            link: Link::new(settings, fifo, Box::new(device)),
        }
    }

    fn open_client(path: &Path) -> File {
        OpenOptions::new().write(true).open(path).unwrap()
    }

    fn run(link: Link) -> Stats {
        Forwarder {
            sm: ForwarderStates::Waiting(ForwarderSM {
                link,
                state: WaitingState {
                    last: WriteOutcome::Failure,
                },
            }),
        }
        .run()
    }

    fn payloads(writes: &Writes) -> Vec<Vec<u8>> {
        writes.borrow().iter().map(|(p, _)| p.clone()).collect()
    }

    fn quiet() -> SettingsBuilder {
        SettingsBuilder::new()
            .keep_alive_on_success(Duration::from_secs(30))
            .keep_alive_on_failure(Duration::from_secs(30))
    }

    #[test]
    fn forwards_raw_bytes_and_stops_on_sentinel() {
        let mut f = fixture(quiet(), WriteOutcome::Success, vec![Some(b"EOF()")]);
        f.client.write_all(b"hello\n").unwrap();

        let stats = run(f.link);

        assert_eq!(payloads(&f.writes), vec![b"hello\n".to_vec()]);
        assert_eq!(
            stats,
            Stats {
                received: 2,
                forwarded: 1,
                keep_alives: 0,
                failures: 0,
            }
        );
    }

    #[test]
    fn sentinel_must_start_the_chunk() {
        let mut f = fixture(
            quiet(),
            WriteOutcome::Success,
            vec![Some(b"xEOF()"), Some(b"EOF()\n")],
        );
        f.client.write_all(b"EOF(1)").unwrap();

        let stats = run(f.link);

        assert_eq!(
            payloads(&f.writes),
            vec![b"EOF(1)".to_vec(), b"xEOF()".to_vec()]
        );
        assert_eq!(stats.received, 3);
        assert_eq!(stats.forwarded, 2);
    }

    #[test]
    fn sends_keep_alives_while_idle() {
        let builder = SettingsBuilder::new()
            .keep_alive_on_success(Duration::from_secs(30))
            .keep_alive_on_failure(Duration::from_millis(10));
        let f = fixture(builder, WriteOutcome::Failure, vec![None, None, Some(b"EOF()")]);

        let stats = run(f.link);

        assert_eq!(payloads(&f.writes), vec![b"noop\n".to_vec(); 3]);
        assert_eq!(
            stats,
            Stats {
                received: 1,
                forwarded: 0,
                keep_alives: 3,
                failures: 3,
            }
        );
    }

    #[test]
    fn oversized_input_is_forwarded_in_segments() {
        let builder = quiet().buffer_size(5);
        let mut f = fixture(builder, WriteOutcome::Success, vec![None, Some(b"EOF()")]);
        f.client.write_all(b"abcdefghij").unwrap();

        let stats = run(f.link);

        assert_eq!(
            payloads(&f.writes),
            vec![b"abcde".to_vec(), b"fghij".to_vec()]
        );
        assert_eq!(stats.forwarded, 2);
    }

    #[test]
    fn wait_uses_the_interval_of_the_last_outcome() {
        for last in [WriteOutcome::Success, WriteOutcome::Failure] {
            let (on_success, on_failure) = match last {
                WriteOutcome::Success => (Duration::from_millis(50), Duration::from_secs(60)),
                WriteOutcome::Failure => (Duration::from_secs(60), Duration::from_millis(50)),
            };
            let builder = SettingsBuilder::new()
                .keep_alive_on_success(on_success)
                .keep_alive_on_failure(on_failure);
            let mut f = fixture(builder, WriteOutcome::Failure, vec![]);

            let started = Instant::now();
            let event = WaitingState { last }.run(&mut f.link);
            assert!(started.elapsed() < Duration::from_secs(30));

            assert!(matches!(
                event,
                Event::Wait(WaitEvent {
                    last: WriteOutcome::Failure
                })
            ));
            assert_eq!(payloads(&f.writes), vec![b"noop\n".to_vec()]);
        }
    }

    #[test]
    fn write_outcome_is_carried_to_the_next_wait() {
        for outcome in [WriteOutcome::Success, WriteOutcome::Failure] {
            let mut f = fixture(quiet(), outcome, vec![]);
            f.client.write_all(b"G1 X10\n").unwrap();

            let event = DrainingState {
                last: WriteOutcome::Failure,
            }
            .run(&mut f.link);

            match event {
                Event::Wait(WaitEvent { last }) => assert_eq!(last, outcome),
                other => panic!("unexpected event {:?}", other),
            }
        }
    }

    #[test]
    fn keep_alive_failures_are_silent_only_when_never_logged() {
        for (policy, silent) in [
            (KeepAliveLog::Never, true),
            (KeepAliveLog::OnError, false),
            (KeepAliveLog::Always, false),
        ] {
            let builder = SettingsBuilder::new()
                .keep_alive_on_failure(Duration::from_millis(10))
                .keep_alive_log(policy);
            let mut f = fixture(builder, WriteOutcome::Failure, vec![]);

            WaitingState {
                last: WriteOutcome::Failure,
            }
            .run(&mut f.link);

            assert_eq!(
                f.writes.borrow().as_slice(),
                &[(b"noop\n".to_vec(), silent)]
            );
        }
    }

    #[test]
    fn forwarded_writes_are_never_silent() {
        let builder = quiet().keep_alive_log(KeepAliveLog::Never);
        let mut f = fixture(builder, WriteOutcome::Failure, vec![]);
        f.client.write_all(b"M104 S200\n").unwrap();

        DrainingState {
            last: WriteOutcome::Failure,
        }
        .run(&mut f.link);

        assert_eq!(
            f.writes.borrow().as_slice(),
            &[(b"M104 S200\n".to_vec(), false)]
        );
    }

    #[test]
    fn done_closes_the_fifo() {
        let mut f = fixture(quiet(), WriteOutcome::Success, vec![]);

        let event = DoneState { should_exit: false }.run(&mut f.link);

        assert!(matches!(event, Event::Exit(_)));
        assert!(f.link.fifo.is_none());
        // Nothing left to wait on.
        let event = WaitingState {
            last: WriteOutcome::Success,
        }
        .run(&mut f.link);
        assert!(matches!(event, Event::Done(_)));
    }
}

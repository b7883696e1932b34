//! The seams between this sans-I/O core and the application-supplied event
//! loop / transport (§5, §9 "Coroutine-shaped control flow"). Rather than
//! doing socket I/O itself, the core emits a queue of `Action`s the
//! embedding application must carry out, and the application calls back in
//! (`Context::on_connect_result`, `Context::on_timer_fired`,
//! `Context::receive_frame`, ...) to deliver the results. No thread or
//! internal lock is ever created here.

use bytes::Bytes;

use crate::candidate::Candidate;
use crate::credentials::Credentials;

/// One unit of work the embedding application must perform on the core's
/// behalf.
#[derive(Debug)]
pub enum Action {
    /// Attempt to connect to `candidate`; report the outcome via
    /// `Context::on_connect_result`.
    Connect(Candidate),
    /// Arm (or re-arm) a timer; fire `Context::on_timer_fired(id)` at or
    /// after `deadline_usec` (an opaque, monotonic microsecond clock the
    /// application owns — matches `pa_context_rttime_new`'s deferral to
    /// the mainloop's own clock).
    TimerArm { id: TimerId, deadline_usec: u64 },
    /// Cancel a previously armed timer; a no-op if it already fired.
    TimerCancel { id: TimerId },
}

/// Identifies one timer. Reply timeouts are keyed by their tag (unique for
/// the life of the context, per the monotonic tag counter); user-requested
/// realtime events get their own counter so the two spaces never collide.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub enum TimerId {
    ReplyTimeout(u32),
    UserEvent(u64),
}

/// Why a connection attempt to one candidate failed, coarse enough to
/// drive the retry-vs-fatal classification in §4.9.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ConnectErrorKind {
    ConnectionRefused,
    TimedOut,
    HostUnreachable,
    Other,
}

impl ConnectErrorKind {
    /// §4.2 / §4.9: these three are the only transient failures that
    /// advance to the next candidate instead of failing the context.
    pub fn is_transient(self) -> bool {
        matches!(
            self,
            ConnectErrorKind::ConnectionRefused
                | ConnectErrorKind::TimedOut
                | ConnectErrorKind::HostUnreachable
        )
    }
}

/// The live, connected byte-level transport ("framed-stream"). Declared
/// narrow on purpose: framing, buffering, and credential passing on the
/// wire are the transport's job, not this core's.
pub trait FramedTransport {
    /// Queue `frame` for transmission; frames queued in this call order
    /// reach the peer in that order (§5 "Ordering guarantees").
    fn send(&mut self, frame: Bytes);
    /// Announce the negotiated SHM decision (§4.5) to the transport.
    fn enable_shm(&mut self, enabled: bool);
    /// Whether the peer is reachable over a local-only channel (unix
    /// socket or loopback), independent of SHM eligibility.
    fn is_local(&self) -> bool;
    /// Whether this transport can carry out-of-band UID/GID credentials.
    fn supports_credentials(&self) -> bool;
    /// True while there are still queued-but-unsent bytes (`is_pending`,
    /// `drain`, §4.7/§6.1).
    fn has_queued_bytes(&self) -> bool;
}

#[cfg(any(test, feature = "test-util"))]
pub mod test_support {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    /// An in-memory transport for unit/integration tests: records every
    /// frame sent so assertions can inspect the outbound tag sequence,
    /// and reports "pending" for exactly one call after each send so
    /// drain-related tests can observe a transient non-idle state.
    #[derive(Default)]
    pub struct RecordingTransport {
        pub sent: Rc<RefCell<Vec<Bytes>>>,
        pub local: bool,
        pub creds_supported: bool,
        pub shm_enabled: Rc<RefCell<Option<bool>>>,
        pub queued: Rc<RefCell<bool>>,
    }

    impl FramedTransport for RecordingTransport {
        fn send(&mut self, frame: Bytes) {
            self.sent.borrow_mut().push(frame);
        }

        fn enable_shm(&mut self, enabled: bool) {
            *self.shm_enabled.borrow_mut() = Some(enabled);
        }

        fn is_local(&self) -> bool {
            self.local
        }

        fn supports_credentials(&self) -> bool {
            self.creds_supported
        }

        fn has_queued_bytes(&self) -> bool {
            *self.queued.borrow()
        }
    }
}

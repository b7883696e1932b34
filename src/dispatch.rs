//! Tagged-reply dispatch (§3 "Dispatch", §4.7, §9 "Dynamic command
//! dispatch"). Every request this core sends carries a monotonically
//! increasing tag; the peer's `REPLY`/`ERROR` frame echoes it back. This
//! table is the tag -> pending-request map that turns that echo into a
//! completion.
//!
//! An exhaustive tagged variant with a total match beats raw
//! function-pointer arrays here, so a pending reply's continuation is a
//! closed `ReplyKind` enum matched inside `Context` rather than a boxed
//! closure that would need to name `Context` itself (and vice versa) to
//! run.

use fnv::FnvHashMap;

use crate::error::ErrorCode;
use crate::operation::Operation;
use crate::proplist::{Proplist, UpdateMode};
use crate::wire::FrameReader;

/// What kind of request is waiting on a tag, and how to resume it. The
/// handshake replies (`Auth`, `SetName`) are internal-only: they drive the
/// context's own state machine and never surface an `Operation` to the
/// caller. `SimpleAck` is the shape every public one-shot request (set
/// name, set default sink/source, exit-daemon, proplist update/remove)
/// reduces to (§4.7: "a boolean success plus an optional error code").
/// `drain()` has no wire round trip at all — see `Context::drain` — so it
/// never appears here.
pub enum ReplyKind {
    Auth,
    SetName,
    SimpleAck {
        on_result: Box<dyn FnOnce(bool)>,
    },
    /// `proplist_update`, and `set_name` on peers new enough to use a
    /// proplist replace instead of the legacy name-only command: applies
    /// the local mirror on success before invoking `on_result` (§4.7,
    /// testable property 10).
    ProplistUpdate {
        mode: UpdateMode,
        payload: Proplist,
        on_result: Box<dyn FnOnce(bool)>,
    },
    ProplistRemove {
        keys: Vec<String>,
        on_result: Box<dyn FnOnce(bool)>,
    },
    /// `set_name` on peers below the proplist cutoff: mirrors the plain
    /// name string locally on success.
    SetNameLegacy {
        name: String,
        on_result: Box<dyn FnOnce(bool)>,
    },
}

pub struct PendingReply {
    pub kind: ReplyKind,
    /// Absent for the two handshake replies; present (and cancellable by
    /// the caller) for everything else.
    pub operation: Option<Operation>,
}

/// The three ways a pending reply can resolve.
pub enum DispatchOutcome {
    Reply(FrameReader),
    Error(ErrorCode),
    Timeout,
}

/// The tag -> pending-request table plus the monotonic tag counter that
/// feeds it (§3 data model: the counter lives on `Context`, the table
/// lives here).
#[derive(Default)]
pub struct Dispatch {
    pending: FnvHashMap<u32, PendingReply>,
}

impl Dispatch {
    pub fn new() -> Self {
        Dispatch::default()
    }

    /// Record a pending reply under `tag`. Tags are unique for the life of
    /// the context (the counter never wraps within any realistic session),
    /// so no existing entry is ever displaced.
    pub fn register(&mut self, tag: u32, pending: PendingReply) {
        self.pending.insert(tag, pending);
    }

    /// Remove and return the pending reply for `tag`, if any (a REPLY,
    /// ERROR, or TIMEOUT frame all consume their entry exactly once).
    pub fn take(&mut self, tag: u32) -> Option<PendingReply> {
        self.pending.remove(&tag)
    }

    pub fn is_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Cancel every pending operation and drop their entries (§4.6 unlink
    /// step 3: "fail every outstanding operation"). Handshake-only entries
    /// carry no `Operation` and are simply dropped.
    pub fn cancel_all(&mut self) {
        for (_, pending) in self.pending.drain() {
            if let Some(op) = pending.operation {
                op.cancel();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::rc::Rc;

    fn simple_ack(flag: &Rc<Cell<Option<bool>>>) -> ReplyKind {
        let flag = Rc::clone(flag);
        ReplyKind::SimpleAck {
            on_result: Box::new(move |ok| flag.set(Some(ok))),
        }
    }

    #[test]
    fn take_removes_the_entry() {
        let mut dispatch = Dispatch::new();
        dispatch.register(1, PendingReply { kind: ReplyKind::Auth, operation: None });
        assert!(dispatch.is_pending());
        assert!(dispatch.take(1).is_some());
        assert!(!dispatch.is_pending());
        assert!(dispatch.take(1).is_none());
    }

    #[test]
    fn cancel_all_cancels_every_operation_and_clears_the_table() {
        let mut dispatch = Dispatch::new();
        let op_a = Operation::new();
        let op_b = Operation::new();
        let flag = Rc::new(Cell::new(None));

        dispatch.register(1, PendingReply { kind: simple_ack(&flag), operation: Some(op_a.clone()) });
        dispatch.register(2, PendingReply { kind: ReplyKind::SetName, operation: Some(op_b.clone()) });

        dispatch.cancel_all();

        assert!(!dispatch.is_pending());
        assert_eq!(op_a.state(), crate::operation::OperationState::Cancelled);
        assert_eq!(op_b.state(), crate::operation::OperationState::Cancelled);
    }

    #[test]
    fn unrelated_tags_do_not_collide() {
        let mut dispatch = Dispatch::new();
        dispatch.register(1, PendingReply { kind: ReplyKind::Auth, operation: None });
        dispatch.register(2, PendingReply { kind: ReplyKind::SetName, operation: None });
        assert_eq!(dispatch.pending_count(), 2);
        assert!(matches!(dispatch.take(1).unwrap().kind, ReplyKind::Auth));
        assert!(matches!(dispatch.take(2).unwrap().kind, ReplyKind::SetName));
    }
}

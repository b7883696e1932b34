//! One in-flight user request (§3 "Operation", §4.7, §5 "Cancellation").
//!
//! A cheap `Rc`-backed handle rather than a manual refcount pair: the
//! dispatch table holds a strong clone for the lifetime of the pending
//! reply (so bulk cancellation at context unlink is just iterating that
//! table), and the value returned to the caller is a second clone. When
//! the last clone drops, the inner state simply deallocates — there is no
//! separate `ref`/`unref` pair to get wrong.

use std::cell::Cell;
use std::rc::Rc;

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum OperationState {
    Running,
    Done,
    Cancelled,
}

#[derive(Debug)]
struct OperationInner {
    state: Cell<OperationState>,
}

/// A handle to one in-flight request. Cloning shares the same underlying
/// state; `cancel()` and `state()` observe/affect all clones equally.
#[derive(Debug, Clone)]
pub struct Operation {
    inner: Rc<OperationInner>,
}

impl Operation {
    pub(crate) fn new() -> Operation {
        Operation {
            inner: Rc::new(OperationInner {
                state: Cell::new(OperationState::Running),
            }),
        }
    }

    pub fn state(&self) -> OperationState {
        self.inner.state.get()
    }

    /// Idempotent (§5), and safe to call re-entrantly from the
    /// operation's own completion callback.
    pub fn cancel(&self) {
        if self.inner.state.get() == OperationState::Running {
            self.inner.state.set(OperationState::Cancelled);
        }
    }

    pub(crate) fn mark_done(&self) {
        if self.inner.state.get() == OperationState::Running {
            self.inner.state.set(OperationState::Done);
        }
    }

}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancel_is_idempotent() {
        let op = Operation::new();
        op.cancel();
        op.cancel();
        assert_eq!(op.state(), OperationState::Cancelled);
    }

    #[test]
    fn done_does_not_override_cancelled() {
        let op = Operation::new();
        op.cancel();
        op.mark_done();
        assert_eq!(op.state(), OperationState::Cancelled);
    }

    #[test]
    fn clones_observe_shared_state() {
        let op = Operation::new();
        let clone = op.clone();
        clone.cancel();
        assert_eq!(op.state(), OperationState::Cancelled);
    }
}

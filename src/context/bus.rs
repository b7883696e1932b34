//! Bus-mediated reconnection wait (§4.4). The message-bus client itself is
//! an external collaborator; this module only reacts to the narrow signal
//! the embedding application forwards once it observes the daemon's
//! well-known name appear.

use crate::candidate::{per_user_candidates, system_wide_candidate};

use super::{connect, Context, ContextState};

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum BusKind {
    Session,
    System,
}

/// Implemented by the embedding application's message-bus wrapper; this
/// core never links a bus client directly.
pub trait NameOwnerWatcher {
    fn is_watching(&self) -> bool;
}

/// The application calls this when it observes a name-owner-changed signal
/// for the daemon's well-known name.
pub fn on_name_owner_changed(ctx: &mut Context, bus: BusKind) {
    if ctx.state != ContextState::Connecting || ctx.connect_in_flight {
        return;
    }

    let endpoints = match bus {
        BusKind::Session => per_user_candidates(&ctx.config, &ctx.runtime_dir),
        BusKind::System => vec![system_wide_candidate()],
    };
    ctx.candidates.prepend(endpoints);
    connect::try_next(ctx);
}

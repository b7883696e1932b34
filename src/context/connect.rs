//! The connection cascade driver (§4.2). Owns nothing of its own — it only
//! pops from `Context::candidates` and either queues an `Action::Connect`,
//! triggers one autospawn attempt, arms the bus wait, or fails the context
//! once every avenue is exhausted.

use crate::candidate::per_user_candidates;
use crate::error::ErrorCode;
use crate::event_loop::{Action, ConnectErrorKind, FramedTransport};

use super::{autospawn, handshake, Context};

/// Pop the next candidate and queue a connect attempt; if the list is
/// empty, run autospawn once, then the bus wait, then fail.
pub fn try_next(ctx: &mut Context) {
    loop {
        if let Some(candidate) = ctx.candidates.pop_front() {
            ctx.connect_in_flight = true;
            ctx.actions.push_back(Action::Connect(candidate));
            return;
        }

        if ctx.autospawn_allowed && !ctx.autospawn_used {
            ctx.autospawn_used = true;
            match autospawn::run(ctx) {
                Ok(()) => {
                    let reseeded = per_user_candidates(&ctx.config, &ctx.runtime_dir);
                    ctx.candidates.prepend(reseeded);
                    continue;
                }
                Err(code) => {
                    ctx.fail(code);
                    return;
                }
            }
        }

        if ctx.no_fail && !ctx.user_specified_server && ctx.bus_wait_viable() {
            // Suspend: remain in Connecting until a bus signal re-seeds
            // the candidate list (§4.4) or the caller disconnects.
            return;
        }

        ctx.fail(ErrorCode::ConnectionRefused);
        return;
    }
}

/// The embedding application calls this once it knows the outcome of the
/// `Action::Connect` it was asked to perform.
pub fn on_connect_result(ctx: &mut Context, result: Result<Box<dyn FramedTransport>, ConnectErrorKind>) {
    ctx.connect_in_flight = false;
    match result {
        Ok(transport) => {
            ctx.is_local = Some(transport.is_local());
            ctx.transport = Some(transport);
            handshake::begin_authorizing(ctx);
        }
        Err(kind) if kind.is_transient() => try_next(ctx),
        Err(_) => ctx.fail(ErrorCode::Io),
    }
}

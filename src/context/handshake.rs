//! Version exchange, SHM eligibility negotiation, and the client-name
//! handshake that together drive Authorizing → SettingName → Ready
//! (§4.5). Split into small free functions that take `&mut Context`
//! rather than methods, since these functions are only ever reached from
//! within `context::mod`'s own dispatch and never form part of the public
//! API.

use bytes::Bytes;

use crate::credentials::{credential_passing_available, local_credentials, Credentials};
use crate::dispatch::{DispatchOutcome, PendingReply, ReplyKind};
use crate::error::ErrorCode;
use crate::proplist::{Proplist, PROP_APPLICATION_NAME};
use crate::wire::{Command, FrameWriter, SHM_ELIGIBLE_BIT, VERSION_MASK};

use super::{Context, ContextState};

/// Below this negotiated version the peer is too old to speak to at all.
pub const MINIMUM_PROTOCOL_VERSION: u32 = 8;
/// The protocol version this core advertises.
pub const LOCAL_PROTOCOL_VERSION: u32 = 35;
/// Peer versions below this cannot do SHM at all.
const SHM_MINIMUM_PEER_VERSION: u32 = 10;
/// Peer versions at or above this one encode their own SHM bit in the AUTH
/// reply; below it SHM eligibility cannot be advertised so it is assumed
/// absent.
const SHM_ADVERTISING_PEER_VERSION: u32 = 13;
/// Peer versions at or above this one exchange a full property list and a
/// server-assigned client index during `SET_CLIENT_NAME`.
const PROPLIST_PEER_VERSION: u32 = 13;

pub fn begin_authorizing(ctx: &mut Context) {
    let want_shm = ctx.config.enable_shm();
    ctx.local_shm_eligible = want_shm;

    let mut combined = LOCAL_PROTOCOL_VERSION;
    if want_shm {
        combined |= SHM_ELIGIBLE_BIT;
    }

    let tag = ctx.next_tag();
    let mut w = FrameWriter::command(Command::Auth, tag);
    w.put_u32(combined);
    w.put_fixed(&ctx.config.cookie);

    if let Some(transport) = ctx.transport.as_mut() {
        if transport.supports_credentials() {
            let creds = local_credentials();
            w.put_u32(creds.uid);
            w.put_u32(creds.gid);
        }
        transport.send(w.finish());
    }

    ctx.dispatch
        .register(tag, PendingReply { kind: ReplyKind::Auth, operation: None });
    ctx.transition(ContextState::Authorizing);
}

pub fn on_auth_reply(ctx: &mut Context, outcome: DispatchOutcome, credentials: Option<Credentials>) {
    let mut reader = match outcome {
        DispatchOutcome::Reply(reader) => reader,
        DispatchOutcome::Error(code) => {
            ctx.fail(code);
            return;
        }
        DispatchOutcome::Timeout => {
            ctx.fail(ErrorCode::Timeout);
            return;
        }
    };

    let raw = match reader.get_u32() {
        Ok(v) => v,
        Err(_) => {
            ctx.fail(ErrorCode::Protocol);
            return;
        }
    };

    let masked = raw & VERSION_MASK;
    let (peer_version, peer_advertised_shm) = if masked >= SHM_ADVERTISING_PEER_VERSION {
        (masked, raw & SHM_ELIGIBLE_BIT != 0)
    } else {
        (raw, false)
    };

    if peer_version < MINIMUM_PROTOCOL_VERSION {
        ctx.fail(ErrorCode::Version);
        return;
    }

    let mut shm_enabled = ctx.local_shm_eligible;
    if peer_version < SHM_MINIMUM_PEER_VERSION {
        shm_enabled = false;
    }
    if peer_version >= SHM_ADVERTISING_PEER_VERSION && !peer_advertised_shm {
        shm_enabled = false;
    }
    if credential_passing_available() {
        let local_uid = local_credentials().uid;
        match credentials {
            Some(peer) if peer.uid == local_uid => {}
            _ => shm_enabled = false,
        }
    } else {
        shm_enabled = false;
    }

    ctx.peer_version = Some(peer_version);
    ctx.shm_enabled = shm_enabled;
    if let Some(transport) = ctx.transport.as_mut() {
        transport.enable_shm(shm_enabled);
    }

    send_set_client_name(ctx);
}

fn send_set_client_name(ctx: &mut Context) {
    let tag = ctx.next_tag();
    let peer_version = ctx.peer_version.unwrap_or(0);
    let mut w = FrameWriter::command(Command::SetClientName, tag);

    if peer_version >= PROPLIST_PEER_VERSION {
        let mut proplist = ctx.proplist.clone();
        proplist.sets(PROP_APPLICATION_NAME, &ctx.name);
        w.put_proplist(&proplist);
    } else {
        w.put_string(Some(&ctx.name));
    }

    if let Some(transport) = ctx.transport.as_mut() {
        transport.send(w.finish());
    }

    ctx.dispatch
        .register(tag, PendingReply { kind: ReplyKind::SetName, operation: None });
    ctx.transition(ContextState::SettingName);
}

pub fn on_set_name_reply(ctx: &mut Context, outcome: DispatchOutcome) {
    let mut reader = match outcome {
        DispatchOutcome::Reply(reader) => reader,
        DispatchOutcome::Error(code) => {
            ctx.fail(code);
            return;
        }
        DispatchOutcome::Timeout => {
            ctx.fail(ErrorCode::Timeout);
            return;
        }
    };

    let peer_version = ctx.peer_version.unwrap_or(0);
    if peer_version >= PROPLIST_PEER_VERSION {
        let index = match reader.get_u32() {
            Ok(v) => v,
            Err(_) => {
                ctx.fail(ErrorCode::Protocol);
                return;
            }
        };
        if index == u32::max_value() {
            ctx.fail(ErrorCode::Protocol);
            return;
        }
        ctx.client_index = Some(index);
    }

    ctx.transition(ContextState::Ready);
}

/// Helper used by `Context::set_name` to resend the legacy-form command
/// outside the handshake, for peers below the proplist cutoff.
pub fn legacy_name_frame(tag: u32, name: &str) -> Bytes {
    let mut w = FrameWriter::command(Command::SetClientName, tag);
    w.put_string(Some(name));
    w.finish()
}

pub fn proplist_peer_version_cutoff() -> u32 {
    PROPLIST_PEER_VERSION
}

//! Shared frame-building and handshake-driving helpers for the
//! integration tests. Every test here only touches `Context` through its
//! public surface plus the `FramedTransport` mock, the same seam a real
//! socket-backed transport would use.

use std::cell::RefCell;
use std::rc::Rc;

use bytes::Bytes;

use pulse_client_core::event_loop::test_support::RecordingTransport;
use pulse_client_core::wire::{Command, FrameWriter};
use pulse_client_core::{Context, ContextState, ErrorCode};

pub fn build_reply_frame(tag: u32, extra: impl FnOnce(&mut FrameWriter)) -> Bytes {
    let mut w = FrameWriter::command(Command::Reply, tag);
    extra(&mut w);
    w.finish()
}

pub fn build_error_frame(tag: u32, code: ErrorCode) -> Bytes {
    let mut w = FrameWriter::command(Command::Error, tag);
    w.put_u32(code.as_u32());
    w.finish()
}

/// Drive a freshly `connect()`-ed context through one candidate and the
/// full AUTH/SET_CLIENT_NAME handshake, returning the transport's
/// recorded outbound frames and negotiated SHM flag for assertions.
pub fn drive_to_ready(
    ctx: &mut Context,
    transport: RecordingTransport,
    peer_version: u32,
    peer_shm: bool,
) -> (Rc<RefCell<Vec<Bytes>>>, Rc<RefCell<Option<bool>>>) {
    ctx.poll_actions();
    let sent = Rc::clone(&transport.sent);
    let shm_enabled = Rc::clone(&transport.shm_enabled);
    ctx.on_connect_result(Ok(Box::new(transport)));
    assert_eq!(ctx.state(), ContextState::Authorizing);

    let auth_reply = build_reply_frame(0, |w| {
        let mut field = peer_version;
        if peer_shm {
            field |= 0x8000_0000;
        }
        w.put_u32(field);
    });
    ctx.receive_frame(auth_reply, None);
    assert_eq!(ctx.state(), ContextState::SettingName);

    let name_reply = build_reply_frame(1, |w| {
        if peer_version >= 13 {
            w.put_u32(1);
        }
    });
    ctx.receive_frame(name_reply, None);
    assert_eq!(ctx.state(), ContextState::Ready);

    (sent, shm_enabled)
}

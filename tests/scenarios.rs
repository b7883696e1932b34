//! End-to-end seed scenarios (S1-S6) driven entirely through `Context`'s
//! public surface against the `RecordingTransport` mock.

mod support;

use std::cell::Cell;
use std::rc::Rc;

use slog::{o, Discard, Logger};

use pulse_client_core::config::ClientConfig;
use pulse_client_core::event_loop::test_support::RecordingTransport;
use pulse_client_core::{ConnectErrorKind, Context, ContextState, ErrorCode};

use support::mock_transport::{build_error_frame, build_reply_frame, drive_to_ready};

fn logger() -> Logger {
    Logger::root(Discard, o!())
}

fn new_context(config: ClientConfig) -> Context {
    Context::new(logger(), "integration-test", None).with_config(config)
}

fn cookie_config() -> ClientConfig {
    let mut config = ClientConfig::default();
    config.cookie_valid = true;
    config
}

/// S1 - local socket, SHM negotiated on when both sides agree and the
/// peer's credentials match the local UID.
#[test]
fn s1_local_socket_shm_same_uid() {
    let mut ctx = new_context(cookie_config());
    ctx.connect(Some("unix:/tmp/s1.sock"), 0, None).unwrap();

    let transport = RecordingTransport {
        local: true,
        creds_supported: true,
        ..Default::default()
    };
    let local_uid = pulse_client_core::credentials::local_credentials().uid;
    ctx.poll_actions();
    let sent = Rc::clone(&transport.sent);
    let shm_enabled = Rc::clone(&transport.shm_enabled);
    ctx.on_connect_result(Ok(Box::new(transport)));
    assert_eq!(ctx.state(), ContextState::Authorizing);

    let auth_reply = build_reply_frame(0, |w| w.put_u32(30 | 0x8000_0000));
    ctx.receive_frame(
        auth_reply,
        Some(pulse_client_core::credentials::Credentials { uid: local_uid, gid: 0 }),
    );
    assert_eq!(ctx.state(), ContextState::SettingName);
    assert_eq!(*shm_enabled.borrow(), Some(true));

    let name_reply = build_reply_frame(1, |w| w.put_u32(7));
    ctx.receive_frame(name_reply, None);

    assert_eq!(ctx.state(), ContextState::Ready);
    assert_eq!(ctx.client_index(), Some(7));
    assert_eq!(sent.borrow().len(), 2);
}

/// S2 - per-user and system sockets refused, TCP localhost accepts;
/// `is_local` reflects the accepted candidate and SHM is forced off.
#[test]
fn s2_localhost_tcp_fallback() {
    let mut config = cookie_config();
    config.auto_connect_localhost = true;
    let mut ctx = new_context(config);
    ctx.connect(None, 0, None).unwrap();

    let actions = ctx.poll_actions();
    assert_eq!(actions.len(), 1, "first candidate queued");
    ctx.on_connect_result(Err(ConnectErrorKind::ConnectionRefused));

    let actions = ctx.poll_actions();
    assert_eq!(actions.len(), 1, "second candidate queued after first refusal");
    ctx.on_connect_result(Err(ConnectErrorKind::ConnectionRefused));

    // Third candidate (tcp4:127.0.0.1) accepts, not local.
    ctx.poll_actions();
    let transport = RecordingTransport {
        local: false,
        creds_supported: false,
        ..Default::default()
    };
    let shm_enabled = Rc::clone(&transport.shm_enabled);
    ctx.on_connect_result(Ok(Box::new(transport)));
    assert_eq!(ctx.is_local(), Some(false));

    let auth_reply = build_reply_frame(0, |w| w.put_u32(30));
    ctx.receive_frame(auth_reply, None);
    assert_eq!(*shm_enabled.borrow(), Some(false));
}

/// S5 - no-fail with no user-specified server suspends in Connecting
/// until a session-bus name-owner-changed signal re-seeds candidates.
#[test]
fn s5_bus_mediated_wait_reaches_ready() {
    use pulse_client_core::context::BusKind;

    let mut config = cookie_config();
    config.autospawn = false;
    config.legacy_runtime_dirs = false;
    let mut ctx = new_context(config);
    ctx.connect(None, pulse_client_core::context::CONNECT_NO_FAIL, None).unwrap();

    // Drain both built-in local-socket candidates (per-user, system-wide)
    // and fail them; with autospawn off and no-fail set the context
    // should suspend rather than fail once the list is exhausted.
    ctx.poll_actions();
    ctx.on_connect_result(Err(ConnectErrorKind::ConnectionRefused));
    ctx.poll_actions();
    ctx.on_connect_result(Err(ConnectErrorKind::ConnectionRefused));
    assert_eq!(ctx.state(), ContextState::Connecting);
    assert!(ctx.poll_actions().is_empty());

    ctx.on_name_owner_changed(BusKind::Session);
    let actions = ctx.poll_actions();
    assert_eq!(actions.len(), 1, "bus signal re-seeds and retries");

    let transport = RecordingTransport::default();
    ctx.on_connect_result(Ok(Box::new(transport)));
    let auth_reply = build_reply_frame(0, |w| w.put_u32(30));
    ctx.receive_frame(auth_reply, None);
    let name_reply = build_reply_frame(1, |_| {});
    ctx.receive_frame(name_reply, None);
    assert_eq!(ctx.state(), ContextState::Ready);
}

/// S6 - the peer answers a request with ERROR; the operation's callback
/// reports failure, `errno()` reflects the code, and the context stays
/// Ready rather than failing.
#[test]
fn s6_peer_error_keeps_context_ready() {
    let mut ctx = new_context(cookie_config());
    ctx.connect(Some("unix:/tmp/s6.sock"), 0, None).unwrap();
    let transport = RecordingTransport::default();
    let (_, _) = drive_to_ready(&mut ctx, transport, 30, false);

    let result = Rc::new(Cell::new(None));
    let result2 = Rc::clone(&result);
    ctx.set_default_sink("X", Box::new(move |ok| result2.set(Some(ok))))
        .unwrap();

    let error_frame = build_error_frame(2, ErrorCode::Access);
    ctx.receive_frame(error_frame, None);

    assert_eq!(result.get(), Some(false));
    assert_eq!(ctx.errno(), ErrorCode::Access);
    assert_eq!(ctx.state(), ContextState::Ready);
}

#[test]
fn connect_rejects_empty_server_string_end_to_end() {
    let mut ctx = new_context(cookie_config());
    let err = ctx.connect(Some(""), 0, None).unwrap_err();
    assert_eq!(err.code(), ErrorCode::Invalid);
    assert_eq!(ctx.state(), ContextState::Unconnected);
}

#[test]
fn candidate_parsing_is_reachable_from_the_public_surface() {
    let candidates =
        pulse_client_core::candidate::parse_server_string("tcp4:127.0.0.1,unix:/tmp/x").unwrap();
    assert_eq!(candidates.len(), 2);
}

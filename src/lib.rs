//! Client-side connection core for a network audio server protocol.
//!
//! This crate is sans-I/O: [`context::Context`] never touches a socket,
//! a clock, or a signal handler directly. It emits [`event_loop::Action`]s
//! for the embedding application to carry out and exposes narrow entry
//! points (`on_connect_result`, `on_timer_fired`, `receive_frame`, ...)
//! for the application to report their outcomes back in. The one
//! exception is autospawn (`context::SpawnHooks`), which forks and waits
//! synchronously by design — see `context::autospawn`.

pub mod candidate;
pub mod config;
pub mod context;
pub mod credentials;
pub mod dispatch;
pub mod error;
pub mod event_loop;
pub mod operation;
pub mod proplist;
pub mod streams;
pub mod wire;

pub use context::{BusKind, Context, ContextState, NameOwnerWatcher, SpawnHooks};
pub use error::{ErrorCode, PulseError, Result};
pub use event_loop::{Action, ConnectErrorKind, FramedTransport, TimerId};
pub use operation::{Operation, OperationState};

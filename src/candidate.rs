//! Endpoint List Builder (§4.1). Produces the ordered, then destructively
//! consumed, list of candidate endpoints the Connector walks.

use std::collections::VecDeque;
use std::env;
use std::fmt;
use std::path::{Path, PathBuf};

use crate::config::ClientConfig;
use crate::error::{ErrorCode, PulseError};

pub const DEFAULT_SOCKET_NAME: &str = "native";
pub const DEFAULT_PORT: u16 = 4713;
pub const SYSTEM_RUNTIME_PATH: &str = "/var/run/pulse";

/// A single endpoint considered in the connection cascade.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum Candidate {
    Unix(PathBuf),
    Tcp4(String),
    Tcp6(String),
}

impl fmt::Display for Candidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Candidate::Unix(path) => write!(f, "unix:{}", path.display()),
            Candidate::Tcp4(host) => write!(f, "tcp4:{}", host),
            Candidate::Tcp6(host) => write!(f, "tcp6:{}", host),
        }
    }
}

/// Parse a single textual endpoint of the kind a user-supplied server
/// string or an injected bus-waiter endpoint carries.
pub fn parse_candidate(text: &str) -> Candidate {
    if let Some(host) = text.strip_prefix("tcp4:") {
        Candidate::Tcp4(host.to_owned())
    } else if let Some(host) = text.strip_prefix("tcp6:") {
        Candidate::Tcp6(host.to_owned())
    } else if let Some(path) = text.strip_prefix("unix:") {
        Candidate::Unix(PathBuf::from(path))
    } else {
        Candidate::Unix(PathBuf::from(text))
    }
}

/// Parse a user-supplied server string: comma/whitespace-delimited,
/// order-preserving (§4.1). Rejects an all-empty string with *invalid*.
pub fn parse_server_string(server: &str) -> Result<Vec<Candidate>, PulseError> {
    if server.is_empty() {
        return Err(PulseError::new(ErrorCode::Invalid));
    }
    let candidates: Vec<Candidate> = server
        .split(|c: char| c == ',' || c.is_whitespace())
        .filter(|s| !s.is_empty())
        .map(parse_candidate)
        .collect();
    if candidates.is_empty() {
        return Err(PulseError::new(ErrorCode::Invalid));
    }
    Ok(candidates)
}

/// A destructively-consumed queue of candidates; `Connector::try_next`
/// pops from the front.
#[derive(Debug, Default)]
pub struct CandidateList {
    queue: VecDeque<Candidate>,
}

impl CandidateList {
    pub fn from_vec(candidates: Vec<Candidate>) -> Self {
        CandidateList {
            queue: candidates.into(),
        }
    }

    pub fn pop_front(&mut self) -> Option<Candidate> {
        self.queue.pop_front()
    }

    pub fn prepend(&mut self, candidates: Vec<Candidate>) {
        for c in candidates.into_iter().rev() {
            self.queue.push_front(c);
        }
    }
}

/// Per-user local socket candidates: legacy paths (if enabled and owned by
/// the current user) followed by the current runtime path's socket.
pub fn per_user_candidates(config: &ClientConfig, runtime_dir: &Path) -> Vec<Candidate> {
    let mut out = Vec::new();

    if config.legacy_runtime_dirs {
        if let Some(home) = env::var_os("HOME") {
            let very_old = PathBuf::from(&home).join(".pulse");
            if owned_by_current_user(&very_old) {
                out.push(Candidate::Unix(very_old.join(DEFAULT_SOCKET_NAME)));
            }
        }
        if let (Some(user), Some(app)) = (env::var("USER").ok(), Some("pulse")) {
            let old = PathBuf::from("/tmp").join(format!("{}-{}", app, user));
            if owned_by_current_user(&old) {
                out.push(Candidate::Unix(old.join(DEFAULT_SOCKET_NAME)));
            }
        }
    }

    out.push(Candidate::Unix(runtime_dir.join(DEFAULT_SOCKET_NAME)));
    out
}

pub fn system_wide_candidate() -> Candidate {
    Candidate::Unix(PathBuf::from(SYSTEM_RUNTIME_PATH).join(DEFAULT_SOCKET_NAME))
}

/// `XDG_RUNTIME_DIR/pulse`, falling back to `/run/user/<uid>/pulse` when
/// unset (matches the reference client's own fallback).
pub fn default_runtime_dir() -> PathBuf {
    let base = env::var_os("XDG_RUNTIME_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(format!("/run/user/{}", current_uid())));
    base.join("pulse")
}

#[cfg(unix)]
fn owned_by_current_user(path: &Path) -> bool {
    use std::os::unix::fs::MetadataExt;
    match std::fs::metadata(path) {
        Ok(meta) => meta.is_dir() && meta.uid() == current_uid(),
        Err(_) => false,
    }
}

#[cfg(unix)]
fn current_uid() -> u32 {
    crate::credentials::local_credentials().uid
}

#[cfg(not(unix))]
fn owned_by_current_user(_path: &Path) -> bool {
    false
}

#[cfg(not(unix))]
fn current_uid() -> u32 {
    0
}

/// Build the default candidate list (no user-specified server), in final
/// iteration order: per-user, system-wide, TCP localhost (if enabled),
/// display-derived host (if enabled). Equivalent to prepending in reverse
/// priority onto a single list, but building the forward order directly
/// here is simpler to read.
pub fn build_default_list(config: &ClientConfig, runtime_dir: &Path) -> Vec<Candidate> {
    let mut out = per_user_candidates(config, runtime_dir);
    out.push(system_wide_candidate());

    if config.auto_connect_localhost {
        out.push(Candidate::Tcp4("127.0.0.1".to_owned()));
        out.push(Candidate::Tcp6("[::1]".to_owned()));
    }

    if config.auto_connect_display {
        if let Some(host) = display_derived_host() {
            out.push(Candidate::Tcp4(host));
        }
    }

    out
}

/// The part of `DISPLAY` before the first `:`, if any and non-empty.
pub fn display_derived_host() -> Option<String> {
    let display = env::var("DISPLAY").ok()?;
    let host = display.split(':').next().unwrap_or("");
    if host.is_empty() {
        None
    } else {
        Some(host.to_owned())
    }
}

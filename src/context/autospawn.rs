//! One-shot local daemon launch (§4.3). The parent blocks in `waitpid` —
//! the single synchronous point in an otherwise cooperative, non-blocking
//! core (§5) — accepted because it runs at most once per `connect()` call
//! and only when autospawn was opted into.

use crate::error::ErrorCode;

use super::Context;

/// Caller-supplied hooks run around the fork, mirroring the reference
/// implementation's `prefork`/`atfork`/`postfork` callbacks (e.g. to
/// release a lock held across the fork).
#[derive(Default)]
pub struct SpawnHooks {
    pub prefork: Option<Box<dyn FnMut()>>,
    pub atfork: Option<Box<dyn FnMut()>>,
    pub postfork: Option<Box<dyn FnMut()>>,
}

/// Argv is built as `[daemon_binary, "--start", ...extra_args]`, capped
/// here so a pathological `extra-arguments` config can't grow an unbounded
/// exec argument list.
pub const MAX_AUTOSPAWN_ARGS: usize = 32;

#[cfg(all(unix, feature = "creds"))]
mod unix_impl {
    use std::ffi::{CStr, CString};

    use nix::sys::wait::{waitpid, WaitStatus};
    use nix::unistd::{execvp, fork, ForkResult};

    use super::{Context, SpawnHooks, MAX_AUTOSPAWN_ARGS};
    use crate::error::ErrorCode;

    fn sigchld_disposition() -> (bool, bool) {
        unsafe {
            let mut act: libc::sigaction = std::mem::zeroed();
            libc::sigaction(libc::SIGCHLD, std::ptr::null(), &mut act);
            let is_ignored = act.sa_sigaction == libc::SIG_IGN;
            let no_cldwait = (act.sa_flags & libc::SA_NOCLDWAIT) != 0;
            (is_ignored, no_cldwait)
        }
    }

    pub(super) fn running_as_root() -> bool {
        nix::unistd::getuid().is_root()
    }

    fn build_argv(daemon_binary: &str, extra_arguments: &str) -> Vec<CString> {
        let mut argv = Vec::with_capacity(MAX_AUTOSPAWN_ARGS);
        argv.push(CString::new(daemon_binary).unwrap_or_else(|_| CString::new("pulseaudio").unwrap()));
        argv.push(CString::new("--start").unwrap());
        for arg in extra_arguments.split_whitespace() {
            if argv.len() >= MAX_AUTOSPAWN_ARGS {
                break;
            }
            if let Ok(c) = CString::new(arg) {
                argv.push(c);
            }
        }
        argv
    }

    pub fn run(ctx: &mut Context, mut hooks: SpawnHooks) -> Result<(), ErrorCode> {
        let (ignored, no_cldwait) = sigchld_disposition();
        if ignored || no_cldwait {
            return Err(ErrorCode::ConnectionRefused);
        }

        if let Some(prefork) = hooks.prefork.as_mut() {
            prefork();
        }

        let argv = build_argv(&ctx.config.daemon_binary, &ctx.config.extra_arguments);

        match unsafe { fork() } {
            Ok(ForkResult::Child) => {
                if let Some(atfork) = hooks.atfork.as_mut() {
                    atfork();
                }
                close_inherited_fds();
                let argv_refs: Vec<&CStr> = argv.iter().map(|c| c.as_c_str()).collect();
                let _ = execvp(&argv[0], &argv_refs);
                std::process::exit(1);
            }
            Ok(ForkResult::Parent { child }) => {
                if let Some(postfork) = hooks.postfork.as_mut() {
                    postfork();
                }
                loop {
                    match waitpid(child, None) {
                        Ok(WaitStatus::Exited(_, 0)) => return Ok(()),
                        Ok(WaitStatus::Exited(_, _)) | Ok(WaitStatus::Signaled(..)) => {
                            return Err(ErrorCode::ConnectionRefused)
                        }
                        Err(nix::Error::Sys(nix::errno::Errno::EINTR)) => continue,
                        Err(nix::Error::Sys(nix::errno::Errno::ECHILD)) => return Ok(()),
                        _ => continue,
                    }
                }
            }
            Err(_) => Err(ErrorCode::Internal),
        }
    }

    /// Close file descriptors above stderr so the daemon doesn't inherit
    /// whatever the client process happened to have open.
    fn close_inherited_fds() {
        let max_fd = nix::unistd::sysconf(nix::unistd::SysconfVar::OPEN_MAX)
            .ok()
            .flatten()
            .unwrap_or(1024);
        for fd in 3..max_fd as i32 {
            let _ = nix::unistd::close(fd);
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;
        use crate::config::ClientConfig;

        fn ctx_with(daemon_binary: &str, extra_arguments: &str) -> Context {
            let mut config = ClientConfig::default();
            config.daemon_binary = daemon_binary.to_owned();
            config.extra_arguments = extra_arguments.to_owned();
            Context::new(slog::Logger::root(slog::Discard, slog::o!()), "autospawn-test", None)
                .with_config(config)
        }

        #[test]
        fn build_argv_caps_at_max_autospawn_args() {
            let many = (0..MAX_AUTOSPAWN_ARGS * 2)
                .map(|i| format!("--opt{}", i))
                .collect::<Vec<_>>()
                .join(" ");
            let argv = build_argv("pulseaudio", &many);
            assert_eq!(argv.len(), MAX_AUTOSPAWN_ARGS);
        }

        #[test]
        fn build_argv_starts_with_binary_then_start_flag() {
            let argv = build_argv("/usr/bin/audiod", "--log-target=syslog");
            assert_eq!(argv[0].to_str().unwrap(), "/usr/bin/audiod");
            assert_eq!(argv[1].to_str().unwrap(), "--start");
            assert_eq!(argv[2].to_str().unwrap(), "--log-target=syslog");
        }

        /// S4: a SIGCHLD disposition of SIG_IGN (or SA_NOCLDWAIT) means
        /// `waitpid` can never observe the spawned daemon's exit, so
        /// autospawn must refuse to fork at all — matching the ground
        /// truth's `PA_ERR_CONNECTIONREFUSED`, not an internal failure.
        #[test]
        fn sigchld_ignored_blocks_autospawn() {
            unsafe {
                let mut old: libc::sigaction = std::mem::zeroed();
                let mut ign: libc::sigaction = std::mem::zeroed();
                ign.sa_sigaction = libc::SIG_IGN;
                libc::sigaction(libc::SIGCHLD, &ign, &mut old);

                let (ignored, _) = sigchld_disposition();
                assert!(ignored);

                let mut ctx = ctx_with("pulseaudio", "");
                let result = run(&mut ctx, SpawnHooks::default());
                assert_eq!(result, Err(ErrorCode::ConnectionRefused));

                libc::sigaction(libc::SIGCHLD, &old, std::ptr::null_mut());
            }
        }

        /// S3: with a default SIGCHLD disposition, a daemon binary that
        /// exits 0 succeeds. Root is gated out one level up, at
        /// `Context::connect`, so `run` itself never special-cases it.
        #[test]
        fn spawning_a_binary_that_exits_cleanly_succeeds() {
            unsafe {
                let mut old: libc::sigaction = std::mem::zeroed();
                let mut dfl: libc::sigaction = std::mem::zeroed();
                dfl.sa_sigaction = libc::SIG_DFL;
                libc::sigaction(libc::SIGCHLD, &dfl, &mut old);

                let mut ctx = ctx_with("/bin/true", "");
                let result = run(&mut ctx, SpawnHooks::default());

                libc::sigaction(libc::SIGCHLD, &old, std::ptr::null_mut());

                assert_eq!(result, Ok(()));
            }
        }
    }
}

#[cfg(all(unix, feature = "creds"))]
pub fn run(ctx: &mut Context) -> Result<(), ErrorCode> {
    let hooks = ctx.spawn_hooks.take().unwrap_or_default();
    unix_impl::run(ctx, hooks)
}

#[cfg(not(all(unix, feature = "creds")))]
pub fn run(_ctx: &mut Context) -> Result<(), ErrorCode> {
    Err(ErrorCode::Internal)
}

/// Whether the local process is running as root. A root client never
/// autospawns (§4.3, §9 property 13) — checked at `Context::connect` time
/// rather than inside `run`, so root simply skips straight past autospawn
/// to the bus wait or `ConnectionRefused` instead of failing fatally.
#[cfg(all(unix, feature = "creds"))]
pub fn running_as_root() -> bool {
    unix_impl::running_as_root()
}

#[cfg(not(all(unix, feature = "creds")))]
pub fn running_as_root() -> bool {
    false
}

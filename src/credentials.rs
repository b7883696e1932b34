//! Peer credential passing (§4.5, §4.9, §9 "Credential passing"). The
//! actual out-of-band transmission is the framed-stream transport's job;
//! this module only defines the value the transport hands back and the
//! local-identity lookup used to populate the outbound side.

/// UID/GID pair carried alongside the AUTH frame, and (when the platform
/// and transport support it) attached to the matching inbound reply.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct Credentials {
    pub uid: u32,
    pub gid: u32,
}

/// The local process's identity, used both to fill in the outbound
/// `Credentials` and as the comparand for the SHM safety check.
#[cfg(feature = "creds")]
pub fn local_credentials() -> Credentials {
    Credentials {
        uid: nix::unistd::getuid().as_raw(),
        gid: nix::unistd::getgid().as_raw(),
    }
}

#[cfg(not(feature = "creds"))]
pub fn local_credentials() -> Credentials {
    Credentials { uid: 0, gid: 0 }
}

/// Whether this platform/build can receive out-of-band credentials at all.
/// When `false`, the SHM safety check in §4.5 must conservatively disable
/// SHM rather than trust an unverified peer UID.
pub fn credential_passing_available() -> bool {
    cfg!(feature = "creds") && cfg!(unix)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_credentials_are_stable_within_process() {
        assert_eq!(local_credentials(), local_credentials());
    }
}

//! The stable error taxonomy exposed via `Context::errno`, plus a
//! `std::error::Error`-compatible wrapper for the handful of APIs (config
//! loading, wire decoding) that return a `Result` instead of going through
//! a callback.

use std::fmt;
use std::io;

/// Numeric codes observable via `Context::errno()`. Stable: application
/// code may match on these across releases.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
#[repr(u32)]
pub enum ErrorCode {
    Ok = 0,
    Access,
    Command,
    Invalid,
    Exists,
    NoEntity,
    ConnectionRefused,
    Protocol,
    Timeout,
    AuthKey,
    Internal,
    ConnectionTerminated,
    Killed,
    InvalidServer,
    ModInitFailed,
    BadState,
    NoData,
    Version,
    TooLarge,
    NotSupported,
    Unknown,
    NoDataPresent,
    Forked,
    Io,
    Busy,
}

impl ErrorCode {
    const MAX: u32 = ErrorCode::Busy as u32 + 1;

    /// Coerce a wire-supplied code into the taxonomy, per §7: a code at or
    /// above the max is folded into `Unknown` rather than rejected outright.
    pub fn from_wire(code: u32) -> ErrorCode {
        match code {
            0 => ErrorCode::Ok,
            1 => ErrorCode::Access,
            2 => ErrorCode::Command,
            3 => ErrorCode::Invalid,
            4 => ErrorCode::Exists,
            5 => ErrorCode::NoEntity,
            6 => ErrorCode::ConnectionRefused,
            7 => ErrorCode::Protocol,
            8 => ErrorCode::Timeout,
            9 => ErrorCode::AuthKey,
            10 => ErrorCode::Internal,
            11 => ErrorCode::ConnectionTerminated,
            12 => ErrorCode::Killed,
            13 => ErrorCode::InvalidServer,
            14 => ErrorCode::ModInitFailed,
            15 => ErrorCode::BadState,
            16 => ErrorCode::NoData,
            17 => ErrorCode::Version,
            18 => ErrorCode::TooLarge,
            19 => ErrorCode::NotSupported,
            20 => ErrorCode::Unknown,
            21 => ErrorCode::NoDataPresent,
            22 => ErrorCode::Forked,
            23 => ErrorCode::Io,
            24 => ErrorCode::Busy,
            _ => ErrorCode::Unknown,
        }
    }

    pub fn as_u32(self) -> u32 {
        self as u32
    }

    fn message(self) -> &'static str {
        use ErrorCode::*;
        match self {
            Ok => "no error",
            Access => "access denied",
            Command => "unknown command",
            Invalid => "invalid argument",
            Exists => "entity exists",
            NoEntity => "no such entity",
            ConnectionRefused => "connection refused",
            Protocol => "protocol error",
            Timeout => "timeout",
            AuthKey => "authentication key rejected",
            Internal => "internal error",
            ConnectionTerminated => "connection terminated",
            Killed => "entity killed",
            InvalidServer => "invalid server reference",
            ModInitFailed => "module initialization failed",
            BadState => "bad state",
            NoData => "no data",
            Version => "unsupported protocol version",
            TooLarge => "too large",
            NotSupported => "not supported",
            Unknown => "unknown error code",
            NoDataPresent => "no data present",
            Forked => "context forked",
            Io => "io error",
            Busy => "resource busy",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.message())
    }
}

impl Default for ErrorCode {
    fn default() -> Self {
        ErrorCode::Ok
    }
}

/// Error type returned by the small set of APIs that are not callback-based
/// (configuration loading, wire decoding used directly by tests). A
/// `Fail`-deriving enum-ish wrapper with a `Display` impl and conversions
/// from the lower layers.
#[derive(Debug)]
pub struct PulseError {
    code: ErrorCode,
    cause: Option<io::Error>,
}

impl failure::Fail for PulseError {
    fn cause(&self) -> Option<&dyn failure::Fail> {
        self.cause.as_ref().map(|e| e as &dyn failure::Fail)
    }
}

impl PulseError {
    pub fn new(code: ErrorCode) -> Self {
        PulseError { code, cause: None }
    }

    pub fn io(err: io::Error) -> Self {
        PulseError {
            code: ErrorCode::Io,
            cause: Some(err),
        }
    }

    pub fn code(&self) -> ErrorCode {
        self.code
    }
}

impl fmt::Display for PulseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.cause {
            Some(io_err) => write!(f, "{}: {}", self.code, io_err),
            None => write!(f, "{}", self.code),
        }
    }
}

impl From<ErrorCode> for PulseError {
    fn from(code: ErrorCode) -> Self {
        PulseError::new(code)
    }
}

impl From<io::Error> for PulseError {
    fn from(err: io::Error) -> Self {
        PulseError::io(err)
    }
}

pub type Result<T> = std::result::Result<T, PulseError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn boundary_code_is_coerced_to_unknown() {
        assert_eq!(ErrorCode::from_wire(ErrorCode::MAX), ErrorCode::Unknown);
        assert_eq!(ErrorCode::from_wire(ErrorCode::MAX + 1000), ErrorCode::Unknown);
    }

    #[test]
    fn known_codes_round_trip() {
        assert_eq!(ErrorCode::from_wire(ErrorCode::Access as u32), ErrorCode::Access);
        assert_eq!(ErrorCode::from_wire(ErrorCode::Busy as u32), ErrorCode::Busy);
    }

    #[test]
    fn display_includes_io_cause() {
        let err = PulseError::io(io::Error::new(io::ErrorKind::Other, "boom"));
        assert!(format!("{}", err).contains("boom"));
    }
}

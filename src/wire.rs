//! The tagged-frame wire codec (§6.2, §4.10). Built as a
//! `coding::{BufExt, BufMutExt}` split over `bytes::{Buf, BufMut}`: a pair
//! of small extension traits that turn "is there enough left, and is it
//! valid UTF-8/a valid variant" into a typed `Result` instead of a panic.
//!
//! This module owns only the byte-level shape of frames. Framing
//! (length-prefixing on the socket) and credential passing are the
//! transport's job (`crate::transport::FramedTransport`), not this one's.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::convert::TryFrom;
use std::io::Cursor;

use crate::error::{ErrorCode, PulseError};
use crate::proplist::Proplist;

/// Every command this core sends or receives. `repr(u32)` so the wire
/// value and the Rust discriminant agree; `TryFrom<u32>` makes dispatch an
/// exhaustive `match` rather than a raw function-pointer table (§9).
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
#[repr(u32)]
pub enum Command {
    Reply = 0,
    Error = 1,
    Timeout = 2,
    Auth = 3,
    SetClientName = 4,
    UpdateClientProplist = 5,
    RemoveClientProplist = 6,
    SetDefaultSink = 7,
    SetDefaultSource = 8,
    Exit = 9,
    Request = 10,
    Overflow = 11,
    Underflow = 12,
    PlaybackStreamKilled = 13,
    RecordStreamKilled = 14,
    PlaybackStreamMoved = 15,
    RecordStreamMoved = 16,
    PlaybackStreamSuspended = 17,
    RecordStreamSuspended = 18,
    Started = 19,
    PlaybackStreamEvent = 20,
    RecordStreamEvent = 21,
    PlaybackBufferAttrChanged = 22,
    RecordBufferAttrChanged = 23,
    SubscribeEvent = 24,
    ClientEvent = 25,
    Extension = 26,
}

impl TryFrom<u32> for Command {
    type Error = PulseError;

    fn try_from(value: u32) -> Result<Self, <Self as TryFrom<u32>>::Error> {
        use Command::*;
        Ok(match value {
            0 => Reply,
            1 => Error,
            2 => Timeout,
            3 => Auth,
            4 => SetClientName,
            5 => UpdateClientProplist,
            6 => RemoveClientProplist,
            7 => SetDefaultSink,
            8 => SetDefaultSource,
            9 => Exit,
            10 => Request,
            11 => Overflow,
            12 => Underflow,
            13 => PlaybackStreamKilled,
            14 => RecordStreamKilled,
            15 => PlaybackStreamMoved,
            16 => RecordStreamMoved,
            17 => PlaybackStreamSuspended,
            18 => RecordStreamSuspended,
            19 => Started,
            20 => PlaybackStreamEvent,
            21 => RecordStreamEvent,
            22 => PlaybackBufferAttrChanged,
            23 => RecordBufferAttrChanged,
            24 => SubscribeEvent,
            25 => ClientEvent,
            26 => Extension,
            _ => return Err(PulseError::new(ErrorCode::Command)),
        })
    }
}

/// The MSB of the version field carries the sender's SHM eligibility
/// starting at protocol 13 (§4.5).
pub const SHM_ELIGIBLE_BIT: u32 = 0x8000_0000;
pub const VERSION_MASK: u32 = 0x7FFF_FFFF;

/// Builds one outbound frame's payload (the command/tag pair is written by
/// `FrameWriter::command`, matching `pa_tagstruct_command`).
pub struct FrameWriter {
    buf: BytesMut,
}

impl FrameWriter {
    /// Start a new frame for `command`, writing `(command, tag)` as the
    /// leading 32-bit fields the way every request on the wire does.
    pub fn command(command: Command, tag: u32) -> Self {
        let mut w = FrameWriter {
            buf: BytesMut::with_capacity(64),
        };
        w.put_u32(command as u32);
        w.put_u32(tag);
        w
    }

    pub fn put_u32(&mut self, value: u32) {
        self.buf.reserve(4);
        self.buf.put_u32_le(value);
    }

    pub fn put_bool(&mut self, value: bool) {
        self.buf.reserve(1);
        self.buf.put_u8(value as u8);
    }

    pub fn put_bytes(&mut self, bytes: &[u8]) {
        self.buf.reserve(4 + bytes.len());
        self.buf.put_u32_le(bytes.len() as u32);
        self.buf.put_slice(bytes);
    }

    pub fn put_fixed(&mut self, bytes: &[u8]) {
        self.buf.reserve(bytes.len());
        self.buf.put_slice(bytes);
    }

    pub fn put_string(&mut self, value: Option<&str>) {
        match value {
            Some(s) => self.put_bytes(s.as_bytes()),
            None => self.put_u32(u32::max_value()),
        }
    }

    pub fn put_proplist(&mut self, p: &Proplist) {
        self.put_u32(p.len() as u32);
        for (key, value) in p.iter() {
            self.put_string(Some(key));
            self.put_bytes(value);
        }
    }

    pub fn finish(self) -> Bytes {
        self.buf.freeze()
    }
}

/// Reads one inbound frame's payload. All getters return a `PulseError`
/// with code `Protocol` on a short or malformed buffer rather than
/// panicking, matching §4.5's "any payload decoding failure ... fails the
/// context with *protocol*".
pub struct FrameReader {
    cursor: Cursor<Bytes>,
}

impl FrameReader {
    pub fn new(payload: Bytes) -> Self {
        FrameReader {
            cursor: Cursor::new(payload),
        }
    }

    fn remaining(&self) -> usize {
        self.cursor.remaining()
    }

    fn protocol_err<T>() -> Result<T, PulseError> {
        Err(PulseError::new(ErrorCode::Protocol))
    }

    pub fn get_u32(&mut self) -> Result<u32, PulseError> {
        if self.remaining() < 4 {
            return Self::protocol_err();
        }
        Ok(self.cursor.get_u32_le())
    }

    pub fn get_bool(&mut self) -> Result<bool, PulseError> {
        if self.remaining() < 1 {
            return Self::protocol_err();
        }
        Ok(self.cursor.get_u8() != 0)
    }

    pub fn get_bytes(&mut self) -> Result<Vec<u8>, PulseError> {
        let len = self.get_u32()? as usize;
        if self.remaining() < len {
            return Self::protocol_err();
        }
        let mut out = vec![0u8; len];
        self.cursor.copy_to_slice(&mut out);
        Ok(out)
    }

    pub fn get_string(&mut self) -> Result<Option<String>, PulseError> {
        let marker_pos = self.cursor.position();
        let len_field = self.get_u32()?;
        if len_field == u32::max_value() {
            return Ok(None);
        }
        self.cursor.set_position(marker_pos);
        let bytes = self.get_bytes()?;
        String::from_utf8(bytes)
            .map(Some)
            .map_err(|_| PulseError::new(ErrorCode::Protocol))
    }

    pub fn get_proplist(&mut self) -> Result<Proplist, PulseError> {
        let count = self.get_u32()?;
        let mut p = Proplist::new();
        for _ in 0..count {
            let key = self
                .get_string()?
                .ok_or_else(|| PulseError::new(ErrorCode::Protocol))?;
            let value = self.get_bytes()?;
            p.sets(&key, &String::from_utf8_lossy(&value));
        }
        Ok(p)
    }

    pub fn eof(&self) -> bool {
        self.remaining() == 0
    }

    pub fn expect_eof(&self) -> Result<(), PulseError> {
        if self.eof() {
            Ok(())
        } else {
            Self::protocol_err()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_scalar_fields() {
        let mut w = FrameWriter::command(Command::Auth, 7);
        w.put_u32(0x1234_5678);
        w.put_bool(true);
        let bytes = w.finish();

        let mut r = FrameReader::new(bytes);
        assert_eq!(r.get_u32().unwrap(), Command::Auth as u32);
        assert_eq!(r.get_u32().unwrap(), 7);
        assert_eq!(r.get_u32().unwrap(), 0x1234_5678);
        assert!(r.get_bool().unwrap());
        assert!(r.eof());
    }

    #[test]
    fn round_trips_string_and_none() {
        let mut w = FrameWriter::command(Command::SetClientName, 1);
        w.put_string(Some("client"));
        w.put_string(None);
        let bytes = w.finish();

        let mut r = FrameReader::new(bytes);
        r.get_u32().unwrap();
        r.get_u32().unwrap();
        assert_eq!(r.get_string().unwrap().as_deref(), Some("client"));
        assert_eq!(r.get_string().unwrap(), None);
    }

    #[test]
    fn short_buffer_is_protocol_error() {
        let mut r = FrameReader::new(Bytes::from_static(&[0, 0]));
        assert_eq!(r.get_u32().unwrap_err().code(), ErrorCode::Protocol);
    }

    #[test]
    fn trailing_bytes_fail_expect_eof() {
        let mut w = FrameWriter::command(Command::Reply, 0);
        w.put_u32(1);
        let mut r = FrameReader::new(w.finish());
        r.get_u32().unwrap();
        r.get_u32().unwrap();
        assert!(r.expect_eof().is_err());
    }

    #[test]
    fn proplist_round_trips() {
        let mut p = Proplist::new();
        p.sets("a", "1");
        p.sets("b", "2");
        let mut w = FrameWriter::command(Command::SetClientName, 0);
        w.put_proplist(&p);
        let bytes = w.finish();

        let mut r = FrameReader::new(bytes);
        r.get_u32().unwrap();
        r.get_u32().unwrap();
        let decoded = r.get_proplist().unwrap();
        assert_eq!(decoded.gets("a"), Some("1"));
        assert_eq!(decoded.gets("b"), Some("2"));
    }

    #[test]
    fn unknown_command_is_rejected() {
        assert!(Command::try_from(999).is_err());
    }
}

//! Stream Registry and inbound media routing (§3 "Stream Registry", §4.8,
//! §9 "Cyclic references"). The per-stream audio data path itself (block
//! queues, timing, buffer-attr negotiation) is an external collaborator;
//! this module only keeps the two non-owning `channel -> stream` maps and
//! drives the narrow `StreamSink` interface the owning stream subsystem
//! implements.

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use fnv::FnvHashMap;

/// Opaque seek mode passed through to the stream's block queue unexamined;
/// its semantics belong to the out-of-scope data path.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct SeekMode(pub u32);

/// The terminal state a stream is driven to when its owning context
/// unlinks (§4.6 step 5): `Failed` mirrors a context `Failed`, `Terminated`
/// mirrors anything else terminal.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum StreamTerminal {
    Failed,
    Terminated,
}

/// The unsolicited, channel-addressed notifications the dispatch table
/// routes to a stream rather than to a pending reply (§4.7 "Unsolicited
/// commands").
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum StreamEvent {
    Killed,
    Moved,
    Suspended(bool),
    Overflow,
    Underflow,
    Started,
    BufferAttrChanged,
}

/// The narrow interface the stream subsystem implements so this core can
/// route inbound frames without owning stream state.
pub trait StreamSink {
    /// Advance the block queue's read/write position.
    fn seek(&mut self, offset: i64, mode: SeekMode);
    /// Push `data` into the queue, aligned to the queue's block size.
    fn push_align(&mut self, data: &[u8]);
    /// Bytes currently buffered and available to read.
    fn buffered_length(&self) -> usize;
    /// Invoked when buffered data became available after a push (§4.8:
    /// "if the stream has a read-callback and the queue has buffered
    /// length > 0, invoke the callback with that length").
    fn notify_readable(&mut self, length: usize);
    /// Drive the stream to its terminal state at context unlink.
    fn set_terminal_state(&mut self, terminal: StreamTerminal);
    /// An unsolicited, channel-addressed notification arrived for this
    /// stream (§4.7).
    fn on_event(&mut self, event: StreamEvent);
}

type SinkRef = Weak<RefCell<dyn StreamSink>>;

#[derive(Default)]
pub struct StreamRegistry {
    playback: FnvHashMap<u32, SinkRef>,
    record: FnvHashMap<u32, SinkRef>,
}

impl StreamRegistry {
    pub fn new() -> Self {
        StreamRegistry::default()
    }

    pub fn register_playback(&mut self, channel: u32, stream: &Rc<RefCell<dyn StreamSink>>) {
        self.playback.insert(channel, Rc::downgrade(stream));
    }

    pub fn register_record(&mut self, channel: u32, stream: &Rc<RefCell<dyn StreamSink>>) {
        self.record.insert(channel, Rc::downgrade(stream));
    }

    /// The stream subsystem calls this when a stream is destroyed (§5:
    /// "responsible for removing registrations on destruction").
    pub fn unregister_playback(&mut self, channel: u32) {
        self.playback.remove(&channel);
    }

    pub fn unregister_record(&mut self, channel: u32) {
        self.record.remove(&channel);
    }

    pub fn playback_stream(&self, channel: u32) -> Option<Rc<RefCell<dyn StreamSink>>> {
        self.playback.get(&channel).and_then(Weak::upgrade)
    }

    pub fn record_stream(&self, channel: u32) -> Option<Rc<RefCell<dyn StreamSink>>> {
        self.record.get(&channel).and_then(Weak::upgrade)
    }

    /// Route one inbound media frame (§4.8). `data` is `None` for a
    /// zero-length advance (the chunk carried no memory block); `length`
    /// is the chunk's advertised length either way.
    pub fn route_media(&self, channel: u32, offset: i64, seek: SeekMode, data: Option<&[u8]>, length: usize) {
        let stream = match self.record_stream(channel) {
            Some(s) => s,
            None => return, // absent channel: drop silently (§4.8)
        };
        let mut stream = stream.borrow_mut();
        match data {
            Some(bytes) => {
                stream.seek(offset, seek);
                stream.push_align(bytes);
            }
            None => {
                stream.seek(offset + length as i64, seek);
            }
        }
        let buffered = stream.buffered_length();
        if buffered > 0 {
            stream.notify_readable(buffered);
        }
    }

    /// Route one unsolicited, channel-addressed notification to the
    /// matching stream (playback or record, per `on_playback`). Silently
    /// dropped if the channel is unknown or the stream already went away.
    pub fn dispatch_event(&self, on_playback: bool, channel: u32, event: StreamEvent) {
        let stream = if on_playback {
            self.playback_stream(channel)
        } else {
            self.record_stream(channel)
        };
        if let Some(stream) = stream {
            stream.borrow_mut().on_event(event);
        }
    }

    /// Drive every still-live registered stream to its terminal state and
    /// drop the (now-routing-only) registrations, as context unlink
    /// requires (§4.6 step 5).
    pub fn terminate_all(&mut self, terminal: StreamTerminal) {
        for sink in self.playback.values().filter_map(Weak::upgrade) {
            sink.borrow_mut().set_terminal_state(terminal);
        }
        for sink in self.record.values().filter_map(Weak::upgrade) {
            sink.borrow_mut().set_terminal_state(terminal);
        }
        self.playback.clear();
        self.record.clear();
    }
}

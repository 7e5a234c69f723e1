//! Media I/O capability layer.
//!
//! The core never talks to codecs directly; it records and replays
//! segments through the `FrameSource` / `FrameSink` traits and obtains
//! concrete implementations from a `MediaBackend`. The built-in backend
//! uses a raw length-prefixed container so the pipeline runs end-to-end
//! without external codec bindings; ffmpeg-style backends slot in behind
//! the same traits.

mod raw;
mod synthetic;

pub use raw::{RawFileSink, RawFileSource, RawMediaBackend};
pub use synthetic::SyntheticSource;

use std::path::Path;

use anyhow::Result;

use crate::frame::Frame;

/// A device or file frames are grabbed from.
///
/// `grab` may return `Ok(None)` for a transient empty read (live devices)
/// or end of stream (files); callers treat a grab error as transient too.
pub trait FrameSource: Send {
    fn grab(&mut self) -> Result<Option<Frame>>;

    /// Timestamp of the most recently grabbed frame, in microseconds.
    fn timestamp_us(&self) -> i64;

    /// Native frame rate of the source.
    fn frame_rate(&self) -> f64;

    fn close(&mut self) -> Result<()>;
}

/// A sink frames are serialized into, in write order.
pub trait FrameSink: Send {
    /// Set the timestamp applied to subsequently written frames.
    fn set_timestamp(&mut self, timestamp_us: i64);

    fn write(&mut self, frame: &Frame) -> Result<()>;

    fn close(&mut self) -> Result<()>;
}

/// Encoder settings shared by the continuous recorder and the batch
/// re-encoder.
#[derive(Clone, Debug)]
pub struct SinkSettings {
    pub width: u32,
    pub height: u32,
    pub frame_rate: f64,
    pub bit_rate: u32,
    /// 1..=51, lower means less loss.
    pub quality: u8,
    pub codec: String,
    /// Container format, doubles as the file extension.
    pub format: String,
}

/// Factory for sources and sinks bound to a concrete container/codec.
pub trait MediaBackend: Send + Sync {
    fn open_source(&self, path: &Path) -> Result<Box<dyn FrameSource>>;

    fn open_sink(&self, path: &Path, settings: &SinkSettings) -> Result<Box<dyn FrameSink>>;
}

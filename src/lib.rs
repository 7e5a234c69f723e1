//! Presence-aware surveillance DVR core.
//!
//! A capture loop grabs frames from a camera (or stub) source and fans
//! them out on a single-threaded frame bus, so every consumer sees the
//! same total order. Two consumers ship by default:
//!
//! - the **continuous recorder**, which writes every frame into dated
//!   segment files and registers each finished segment for processing;
//! - the **recognition voter**, which, while activated, tallies
//!   recognized identities over a window of presence frames and reports
//!   the winner.
//!
//! Off the live path, the **batch processor** drains registered segments
//! oldest-first, annotates them with detection and recognition results,
//! and re-encodes them, keeping only frames near human presence when the
//! presence-aware mode is on.
//!
//! Every long-running component implements [`element::Element`] and
//! moves through the same lifecycle states; worker loops exit as soon as
//! their element leaves STARTED.
//!
//! # Module Structure
//!
//! - `bus` / `capture`: live frame distribution and acquisition
//! - `recorder` / `process`: continuous recording and batch processing
//! - `recognize`: live identity voting
//! - `detect` / `media`: capability traits with stub implementations
//! - `storage`: segment registry and frame stats (SQLite or in-memory)

pub mod bus;
pub mod capture;
pub mod config;
pub mod detect;
pub mod element;
pub mod frame;
pub mod media;
pub mod overlay;
pub mod process;
pub mod recognize;
pub mod recorder;
pub mod storage;

pub use bus::{FrameBus, FrameListener, SubscriberId};
pub use capture::CaptureLoop;
pub use config::{OperatingMode, WatchdogConfig};
pub use element::{Element, Lifecycle, State};
pub use frame::{Frame, Region};
pub use process::{PresenceAwareProcessor, ProcessorBackends, ProcessorSettings};
pub use recognize::{PersonRecognizedCallback, RecognitionVoter};
pub use recorder::ContinuousRecorder;
pub use storage::{
    FrameStat, FrameStatStore, InMemorySegmentStore, Segment, SegmentRegistry, SqliteSegmentStore,
};

//! Presence-aware batch processor.
//!
//! Drains the segment registry oldest-first: each raw segment is decoded,
//! run through detection, classification and recognition, annotated, and
//! re-encoded into a `processed/` sibling directory. In presence-aware
//! mode only frames near detected presence survive re-encoding; in normal
//! mode every frame does. A fully processed segment is marked in the
//! registry and its raw file deleted.
//!
//! One processor per registry; the registry has no claim protocol for
//! competing workers.

use std::fs;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use chrono::NaiveDateTime;

use crate::config::OperatingMode;
use crate::detect::{AttributeClassifier, Detector, IdentityMatcher};
use crate::element::{Element, Lifecycle, State};
use crate::media::{MediaBackend, SinkSettings};
use crate::overlay;
use crate::storage::{FrameStat, FrameStatStore, Segment, SegmentRegistry};

const IDLE_BACKOFF: Duration = Duration::from_secs(10);
const BACKOFF_SLICE: Duration = Duration::from_millis(200);
const PROCESSED_DIR: &str = "processed";

/// Detection, classification and recognition backends, shared behind
/// locks because the capability traits take `&mut self`.
pub struct ProcessorBackends {
    pub detector: Mutex<Box<dyn Detector>>,
    pub classifier: Mutex<Box<dyn AttributeClassifier>>,
    pub matcher: Mutex<Box<dyn IdentityMatcher>>,
}

impl ProcessorBackends {
    pub fn new(
        detector: Box<dyn Detector>,
        classifier: Box<dyn AttributeClassifier>,
        matcher: Box<dyn IdentityMatcher>,
    ) -> Self {
        Self {
            detector: Mutex::new(detector),
            classifier: Mutex::new(classifier),
            matcher: Mutex::new(matcher),
        }
    }
}

/// Decides which frames survive re-encoding. Presence reloads the
/// counter to the threshold; each absent frame afterwards spends one
/// count. With threshold `T`, one presence frame keeps itself plus the
/// next `T` frames.
struct RetentionCounter {
    threshold: u32,
    remaining: u32,
}

impl RetentionCounter {
    fn new(threshold: u32) -> Self {
        Self {
            threshold,
            remaining: 0,
        }
    }

    fn observe(&mut self, presence: bool) -> bool {
        if presence {
            self.remaining = self.threshold;
            true
        } else if self.remaining > 0 {
            self.remaining -= 1;
            true
        } else {
            false
        }
    }
}

#[derive(Clone)]
pub struct ProcessorSettings {
    pub mode: OperatingMode,
    pub retention_threshold: u32,
    pub encoding: SinkSettings,
}

pub struct PresenceAwareProcessor {
    lifecycle: Lifecycle,
    worker: Mutex<Option<thread::JoinHandle<()>>>,
    shared: Arc<Shared>,
}

struct Shared {
    registry: Arc<dyn SegmentRegistry>,
    stats: Arc<dyn FrameStatStore>,
    media: Arc<dyn MediaBackend>,
    backends: Arc<ProcessorBackends>,
    settings: ProcessorSettings,
}

impl PresenceAwareProcessor {
    pub fn new(
        registry: Arc<dyn SegmentRegistry>,
        stats: Arc<dyn FrameStatStore>,
        media: Arc<dyn MediaBackend>,
        backends: Arc<ProcessorBackends>,
        settings: ProcessorSettings,
    ) -> Self {
        Self {
            lifecycle: Lifecycle::new("processor"),
            worker: Mutex::new(None),
            shared: Arc::new(Shared {
                registry,
                stats,
                media,
                backends,
                settings,
            }),
        }
    }
}

impl Element for PresenceAwareProcessor {
    fn lifecycle(&self) -> &Lifecycle {
        &self.lifecycle
    }

    fn start(&self) -> Result<()> {
        self.lifecycle.start_with(|| {
            let shared = Arc::clone(&self.shared);
            let lifecycle = self.lifecycle.clone();
            let handle = thread::Builder::new()
                .name("processor".to_string())
                .spawn(move || run(shared, lifecycle))?;
            *self
                .worker
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(handle);
            Ok(())
        })
    }

    fn stop(&self) -> Result<()> {
        self.lifecycle.stop_with(|| {
            let handle = self
                .worker
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .take();
            if let Some(handle) = handle {
                if handle.join().is_err() {
                    log::error!("processor: worker panicked");
                }
            }
            Ok(())
        })
    }
}

fn run(shared: Arc<Shared>, lifecycle: Lifecycle) {
    while lifecycle.is_running() {
        match shared.registry.next_unprocessed() {
            Ok(Some(segment)) => {
                if !segment.exists() {
                    log::warn!(
                        "processor: segment {} file {} is gone, soft-deleting",
                        segment.id,
                        segment.file_path.display()
                    );
                    if let Err(err) = shared.registry.soft_delete(segment.id) {
                        log::error!("processor: soft-delete of {} failed: {:#}", segment.id, err);
                        backoff(&lifecycle);
                    }
                    continue;
                }
                if let Err(err) = process_segment(&shared, &lifecycle, &segment) {
                    log::error!("processor: segment {} failed: {:#}", segment.id, err);
                    backoff(&lifecycle);
                }
            }
            Ok(None) => backoff(&lifecycle),
            Err(err) => {
                log::error!("processor: registry poll failed: {:#}", err);
                backoff(&lifecycle);
            }
        }
    }
}

/// Sleep the idle interval in short slices so stop is picked up quickly.
fn backoff(lifecycle: &Lifecycle) {
    let mut waited = Duration::ZERO;
    while waited < IDLE_BACKOFF && lifecycle.is_running() {
        thread::sleep(BACKOFF_SLICE);
        waited += BACKOFF_SLICE;
    }
}

fn process_segment(shared: &Shared, lifecycle: &Lifecycle, segment: &Segment) -> Result<()> {
    log::info!(
        "processor: processing segment {} ({})",
        segment.id,
        segment.file_path.display()
    );

    let mut source = shared.media.open_source(&segment.file_path)?;
    let frame_rate = source.frame_rate();

    let out_dir = segment
        .file_path
        .parent()
        .ok_or_else(|| anyhow!("segment {} has no parent directory", segment.id))?
        .join(PROCESSED_DIR);
    fs::create_dir_all(&out_dir)
        .with_context(|| format!("creating {}", out_dir.display()))?;
    let out_path = out_dir.join(&segment.file_name);

    let mut sink_settings = shared.settings.encoding.clone();
    sink_settings.frame_rate = frame_rate;
    let mut sink = shared.media.open_sink(&out_path, &sink_settings)?;

    let mut retention = RetentionCounter::new(shared.settings.retention_threshold);
    let mut frame_index: u64 = 0;
    let result = (|| -> Result<()> {
        while let Some(mut frame) = source.grab()? {
            if lifecycle.state() > State::Started {
                break;
            }
            let elapsed_us = ((frame_index as f64 / frame_rate) * 1_000_000.0) as i64;
            let timestamp = segment.from + chrono::Duration::microseconds(elapsed_us);
            frame_index += 1;

            let presence = annotate_and_record(shared, segment, &mut frame, timestamp)?;
            let keep = match shared.settings.mode {
                OperatingMode::Normal => true,
                OperatingMode::PresenceAware => retention.observe(presence),
            };
            if keep {
                sink.set_timestamp(elapsed_us);
                sink.write(&frame)?;
            }
        }
        Ok(())
    })();

    if let Err(err) = source.close() {
        log::warn!("processor: source close failed: {:#}", err);
    }
    if let Err(err) = sink.close() {
        log::warn!("processor: sink close failed: {:#}", err);
    }
    result?;

    // Interrupted by shutdown: leave the segment for the next run.
    if lifecycle.state() > State::Started {
        log::info!("processor: segment {} interrupted by shutdown", segment.id);
        return Ok(());
    }

    shared.registry.mark_processed(segment.id)?;
    if let Err(err) = fs::remove_file(&segment.file_path) {
        log::warn!(
            "processor: failed to delete raw file {}: {}",
            segment.file_path.display(),
            err
        );
    }
    log::info!("processor: segment {} done ({})", segment.id, out_path.display());
    Ok(())
}

/// Run the recognition pipeline over one frame, burn in annotations and
/// persist a stat per detected face. Returns whether anyone was present.
fn annotate_and_record(
    shared: &Shared,
    segment: &Segment,
    frame: &mut crate::frame::Frame,
    timestamp: NaiveDateTime,
) -> Result<bool> {
    let detection = shared
        .backends
        .detector
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
        .detect(frame)?;

    for face in &detection.faces {
        let caption = shared
            .backends
            .classifier
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .classify(&face.crop)?;
        let identity = shared
            .backends
            .matcher
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .recognize(&face.crop)?;

        overlay::draw_region_outline(frame, &face.region, overlay::WHITE);
        overlay::draw_label(
            frame,
            &caption,
            face.region.x as i32 - 10,
            face.region.y as i32 - 10,
            overlay::WHITE,
        );

        let stored = shared.stats.append_if_not_duplicate(&FrameStat {
            segment_id: segment.id,
            timestamp,
            caption: caption.clone(),
            face: face.crop.data.clone(),
            identity,
        })?;
        if !stored {
            log::trace!("processor: collapsed duplicate stat for segment {}", segment.id);
        }
    }

    let stamp = timestamp.format("%Y-%m-%d %H:%M:%S").to_string();
    overlay::draw_label(frame, &stamp, 10, 20, overlay::YELLOW);

    Ok(detection.presence())
}

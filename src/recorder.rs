//! Continuous recorder.
//!
//! Subscribes to the frame bus and streams every frame into one segment
//! file per run. Files live under `<storage_root>/<YYYY-MM-DD>/` and are
//! named by wall-clock time of day; on stop the file is renamed to carry
//! both its start and end time and the segment is registered for batch
//! processing. Registration failures are logged, never raised, so a dead
//! database cannot take the recorder down with it.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock};
use std::thread;

use anyhow::{anyhow, Context, Result};
use chrono::{Local, NaiveDate, NaiveDateTime, NaiveTime};
use crossbeam_channel::{unbounded, Sender};
use regex::Regex;

use crate::bus::{FrameBus, FrameListener, SubscriberId};
use crate::element::{Element, Lifecycle};
use crate::frame::Frame;
use crate::media::{MediaBackend, SinkSettings};
use crate::storage::SegmentRegistry;

const START_STEM_FORMAT: &str = "%H-%M-%S%.3f";
const DAY_DIR_FORMAT: &str = "%Y-%m-%d";

/// Bus listener that forwards frames into the recorder's write queue.
struct RecorderTap {
    tx: Sender<(Arc<Frame>, i64)>,
}

impl FrameListener for RecorderTap {
    fn on_frame(&self, frame: &Arc<Frame>, timestamp_us: i64) {
        if self.tx.send((Arc::clone(frame), timestamp_us)).is_err() {
            log::trace!("recorder queue closed, dropping frame at {}us", timestamp_us);
        }
    }
}

struct ActiveRecording {
    path: PathBuf,
    subscriber: SubscriberId,
    tx: Sender<(Arc<Frame>, i64)>,
    worker: thread::JoinHandle<()>,
}

pub struct ContinuousRecorder {
    lifecycle: Lifecycle,
    bus: Arc<FrameBus>,
    backend: Arc<dyn MediaBackend>,
    registry: Arc<dyn SegmentRegistry>,
    storage_root: PathBuf,
    settings: SinkSettings,
    active: Mutex<Option<ActiveRecording>>,
}

impl ContinuousRecorder {
    pub fn new(
        bus: Arc<FrameBus>,
        backend: Arc<dyn MediaBackend>,
        registry: Arc<dyn SegmentRegistry>,
        storage_root: PathBuf,
        settings: SinkSettings,
    ) -> Self {
        Self {
            lifecycle: Lifecycle::new("recorder"),
            bus,
            backend,
            registry,
            storage_root,
            settings,
            active: Mutex::new(None),
        }
    }

    fn finalize(&self, recording: ActiveRecording) {
        self.bus.unsubscribe(recording.subscriber);
        drop(recording.tx);
        if recording.worker.join().is_err() {
            log::error!("recorder: writer thread panicked");
        }

        let ended_at = Local::now().naive_local();
        let final_path = match finalized_path(&recording.path, ended_at.time()) {
            Ok(path) => path,
            Err(err) => {
                log::error!("recorder: cannot finalize {}: {:#}", recording.path.display(), err);
                return;
            }
        };
        if let Err(err) = fs::rename(&recording.path, &final_path) {
            log::error!(
                "recorder: rename {} -> {} failed: {}",
                recording.path.display(),
                final_path.display(),
                err
            );
            return;
        }

        match parse_segment_range(&final_path) {
            Ok((from, to)) => match self.registry.create(&final_path, from, to) {
                Ok(segment) => log::info!(
                    "recorder: registered segment {} ({})",
                    segment.id,
                    final_path.display()
                ),
                Err(err) => log::error!(
                    "recorder: failed to register {}: {:#}",
                    final_path.display(),
                    err
                ),
            },
            Err(err) => log::error!(
                "recorder: unparseable segment name {}: {:#}",
                final_path.display(),
                err
            ),
        }
    }
}

impl Element for ContinuousRecorder {
    fn lifecycle(&self) -> &Lifecycle {
        &self.lifecycle
    }

    fn start(&self) -> Result<()> {
        self.lifecycle.start_with(|| {
            let now = Local::now().naive_local();
            let dir = self.storage_root.join(now.format(DAY_DIR_FORMAT).to_string());
            fs::create_dir_all(&dir)
                .with_context(|| format!("creating segment directory {}", dir.display()))?;

            let stem = now.format(START_STEM_FORMAT).to_string();
            let path = dir.join(format!("{}.{}", stem, self.settings.format));
            let mut sink = self.backend.open_sink(&path, &self.settings)?;

            let (tx, rx) = unbounded::<(Arc<Frame>, i64)>();
            let worker = thread::Builder::new()
                .name("recorder".to_string())
                .spawn(move || {
                    while let Ok((frame, timestamp_us)) = rx.recv() {
                        sink.set_timestamp(timestamp_us);
                        if let Err(err) = sink.write(&frame) {
                            log::error!("recorder: write failed: {:#}", err);
                        }
                    }
                    if let Err(err) = sink.close() {
                        log::error!("recorder: sink close failed: {:#}", err);
                    }
                })?;

            let subscriber = self.bus.subscribe(Arc::new(RecorderTap { tx: tx.clone() }));
            *self
                .active
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(ActiveRecording {
                path,
                subscriber,
                tx,
                worker,
            });
            Ok(())
        })
    }

    /// Unsubscribes, drains the write queue, closes the file and registers
    /// the finished segment.
    fn stop(&self) -> Result<()> {
        self.lifecycle.stop_with(|| {
            let recording = self
                .active
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .take();
            if let Some(recording) = recording {
                self.finalize(recording);
            }
            Ok(())
        })
    }
}

fn time_stem_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(\d{2}-\d{2}-\d{2}\.\d{3})-(\d{2}-\d{2}-\d{2}\.\d{3})$")
            .expect("segment stem regex")
    })
}

fn finalized_path(path: &Path, ended_at: NaiveTime) -> Result<PathBuf> {
    let stem = path
        .file_stem()
        .and_then(|stem| stem.to_str())
        .ok_or_else(|| anyhow!("segment file has no stem"))?;
    let ext = path
        .extension()
        .and_then(|ext| ext.to_str())
        .ok_or_else(|| anyhow!("segment file has no extension"))?;
    let end_stem = ended_at.format(START_STEM_FORMAT).to_string();
    Ok(path.with_file_name(format!("{}-{}.{}", stem, end_stem, ext)))
}

/// Recover the `[from, to)` range of a finalized segment from its path:
/// the day directory carries the date, the file name both times of day.
/// A recording that crosses midnight ends on the following day.
pub fn parse_segment_range(path: &Path) -> Result<(NaiveDateTime, NaiveDateTime)> {
    let stem = path
        .file_stem()
        .and_then(|stem| stem.to_str())
        .ok_or_else(|| anyhow!("segment file has no stem"))?;
    let captures = time_stem_regex()
        .captures(stem)
        .ok_or_else(|| anyhow!("segment stem {:?} does not match <start>-<end>", stem))?;

    let day = path
        .parent()
        .and_then(|dir| dir.file_name())
        .and_then(|name| name.to_str())
        .ok_or_else(|| anyhow!("segment file has no day directory"))?;
    let date = NaiveDate::parse_from_str(day, DAY_DIR_FORMAT)
        .with_context(|| format!("day directory {:?}", day))?;

    let from = NaiveTime::parse_from_str(&captures[1], START_STEM_FORMAT)?;
    let to = NaiveTime::parse_from_str(&captures[2], START_STEM_FORMAT)?;

    let from = date.and_time(from);
    let mut to = date.and_time(to);
    if to < from {
        to += chrono::Duration::days(1);
    }
    Ok((from, to))
}

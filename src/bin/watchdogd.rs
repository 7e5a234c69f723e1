//! watchdogd - presence-aware DVR daemon
//!
//! Wires the full pipeline: capture -> frame bus -> continuous recorder,
//! with the batch processor draining finished segments and the
//! recognition voter watching the live feed. Runs until Ctrl-C, then
//! shuts the elements down in reverse order so the last segment is
//! finalized and registered.

use std::sync::Arc;

use anyhow::{anyhow, Result};
use clap::Parser;
use crossbeam_channel::unbounded;

use watchdog_core::detect::{StubClassifier, StubDetector, StubMatcher};
use watchdog_core::media::{FrameSource, MediaBackend, RawMediaBackend, SinkSettings, SyntheticSource};
use watchdog_core::{
    CaptureLoop, ContinuousRecorder, Element, FrameBus, PersonRecognizedCallback,
    PresenceAwareProcessor, ProcessorBackends, ProcessorSettings, RecognitionVoter,
    SegmentRegistry, SqliteSegmentStore, WatchdogConfig,
};

#[derive(Parser, Debug)]
#[command(name = "watchdogd", about = "Presence-aware surveillance DVR daemon")]
struct Cli {
    /// Config file path (overrides WATCHDOG_CONFIG).
    #[arg(long)]
    config: Option<std::path::PathBuf>,

    /// Capture device, e.g. stub://camera0 or a recorded file path.
    #[arg(long, env = "WATCHDOG_DEVICE")]
    device: Option<String>,

    /// SQLite database path.
    #[arg(long)]
    db_path: Option<String>,

    /// Root directory for segment storage.
    #[arg(long)]
    storage_root: Option<String>,

    /// Retention mode: normal or presence_aware.
    #[arg(long)]
    mode: Option<String>,

    /// Drain the segment backlog with the batch processor, then exit.
    #[arg(long)]
    oneshot: bool,
}

struct LogCallback;

impl PersonRecognizedCallback for LogCallback {
    fn on_recognized(&self, identity: &str) {
        log::info!("door: recognized {}", identity);
    }

    fn on_not_recognized(&self) {
        log::info!("door: presence not recognized");
    }
}

fn open_source(cfg: &WatchdogConfig, backend: &RawMediaBackend) -> Result<Box<dyn FrameSource>> {
    let device = cfg.capture.device.as_str();
    if device.starts_with("stub://") {
        return Ok(Box::new(SyntheticSource::open(
            device,
            cfg.capture.width,
            cfg.capture.height,
            cfg.capture.frame_rate,
        )));
    }
    let path = std::path::Path::new(device);
    if path.is_file() {
        return backend.open_source(path);
    }
    Err(anyhow!("unsupported capture device {:?}", device))
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let mut cfg = match cli.config.as_deref() {
        Some(path) => WatchdogConfig::load_from(Some(path))?,
        None => WatchdogConfig::load()?,
    };
    if let Some(device) = cli.device {
        cfg.capture.device = device;
    }
    if let Some(db_path) = cli.db_path {
        cfg.db_path = db_path;
    }
    if let Some(root) = cli.storage_root {
        cfg.storage_root = root.into();
    }
    if let Some(mode) = cli.mode.as_deref() {
        cfg.mode = match mode {
            "normal" => watchdog_core::OperatingMode::Normal,
            "presence_aware" => watchdog_core::OperatingMode::PresenceAware,
            other => return Err(anyhow!("--mode must be normal or presence_aware, got {:?}", other)),
        };
    }

    std::fs::create_dir_all(&cfg.storage_root)?;
    let store = Arc::new(SqliteSegmentStore::open(&cfg.db_path)?);
    let backend = Arc::new(RawMediaBackend);
    let bus = Arc::new(FrameBus::new());

    let settings = SinkSettings {
        width: cfg.capture.width,
        height: cfg.capture.height,
        frame_rate: cfg.capture.frame_rate,
        bit_rate: cfg.encoding.bit_rate,
        quality: cfg.encoding.quality,
        codec: cfg.encoding.codec.clone(),
        format: cfg.encoding.format.clone(),
    };

    let processor = PresenceAwareProcessor::new(
        store.clone(),
        store.clone(),
        backend.clone(),
        Arc::new(ProcessorBackends::new(
            Box::new(StubDetector::new()),
            Box::new(StubClassifier::new("Unknown:[?]")),
            Box::new(StubMatcher::unknown()),
        )),
        ProcessorSettings {
            mode: cfg.mode,
            retention_threshold: cfg.retention_threshold,
            encoding: settings.clone(),
        },
    );

    if cli.oneshot {
        log::info!("oneshot: draining segment backlog");
        processor.start()?;
        while store.next_unprocessed()?.is_some() {
            std::thread::sleep(std::time::Duration::from_millis(500));
        }
        processor.stop()?;
        log::info!("oneshot: backlog drained");
        return Ok(());
    }

    let source = open_source(&cfg, &RawMediaBackend)?;
    let capture = CaptureLoop::new(source, Arc::clone(&bus));
    let recorder = ContinuousRecorder::new(
        Arc::clone(&bus),
        backend,
        store.clone(),
        cfg.storage_root.clone(),
        settings,
    );
    let voter = RecognitionVoter::new(
        Arc::clone(&bus),
        Box::new(StubDetector::new()),
        Box::new(StubMatcher::unknown()),
        cfg.voting_window,
    );

    let (shutdown_tx, shutdown_rx) = unbounded::<()>();
    ctrlc::set_handler(move || {
        let _ = shutdown_tx.send(());
    })?;

    bus.start()?;
    processor.start()?;
    recorder.start()?;
    capture.start()?;
    voter.activate(Arc::new(LogCallback));
    log::info!(
        "watchdogd running: device={} mode={:?} storage={}",
        cfg.capture.device,
        cfg.mode,
        cfg.storage_root.display()
    );

    shutdown_rx
        .recv()
        .map_err(|_| anyhow!("shutdown channel closed unexpectedly"))?;
    log::info!("shutting down");

    capture.stop()?;
    if voter.is_active() {
        voter.deactivate();
    }
    recorder.stop()?;
    processor.stop()?;
    bus.stop()?;
    Ok(())
}

//! Live capture loop.
//!
//! Pulls frames from a [`FrameSource`] at the source's nominal rate and
//! publishes them to the frame bus. Grab failures and empty reads are
//! skipped and the loop keeps going; only a lifecycle transition past
//! STARTED ends it.

use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use anyhow::{anyhow, Result};

use crate::bus::FrameBus;
use crate::element::{Element, Lifecycle, State};
use crate::media::FrameSource;

pub struct CaptureLoop {
    lifecycle: Lifecycle,
    bus: Arc<FrameBus>,
    source: Mutex<Option<Box<dyn FrameSource>>>,
    worker: Mutex<Option<thread::JoinHandle<()>>>,
}

impl CaptureLoop {
    pub fn new(source: Box<dyn FrameSource>, bus: Arc<FrameBus>) -> Self {
        Self {
            lifecycle: Lifecycle::new("capture"),
            bus,
            source: Mutex::new(Some(source)),
            worker: Mutex::new(None),
        }
    }
}

impl Element for CaptureLoop {
    fn lifecycle(&self) -> &Lifecycle {
        &self.lifecycle
    }

    fn start(&self) -> Result<()> {
        self.lifecycle.start_with(|| {
            let mut source = self
                .source
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .take()
                .ok_or_else(|| anyhow!("capture loop already consumed its source"))?;

            let bus = Arc::clone(&self.bus);
            let lifecycle = self.lifecycle.clone();
            let interval = Duration::from_secs_f64(1.0 / source.frame_rate());

            let handle = thread::Builder::new()
                .name("capture".to_string())
                .spawn(move || {
                    loop {
                        match source.grab() {
                            Ok(Some(frame)) => {
                                bus.publish(Arc::new(frame), source.timestamp_us());
                            }
                            Ok(None) => log::trace!("capture: no frame available"),
                            Err(err) => log::error!("capture: grab failed: {:#}", err),
                        }
                        thread::sleep(interval);
                        if lifecycle.state() > State::Started {
                            break;
                        }
                    }
                    if let Err(err) = source.close() {
                        log::warn!("capture: source close failed: {:#}", err);
                    }
                })?;

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
                    log::error!("capture: worker panicked");
                }
            }
            Ok(())
        })
    }
}

//! Fan-out frame bus.
//!
//! All distribution happens on one worker thread, so every listener sees
//! frames in the exact order they were published. Listeners are notified
//! in subscription order within a frame.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;

use anyhow::Result;
use crossbeam_channel::{select, unbounded, Sender};

use crate::element::{Element, Lifecycle};
use crate::frame::Frame;

/// Receives every frame published to the bus while subscribed.
pub trait FrameListener: Send + Sync {
    fn on_frame(&self, frame: &Arc<Frame>, timestamp_us: i64);
}

/// Handle returned by [`FrameBus::subscribe`], used to unsubscribe.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubscriberId(u64);

type ListenerMap = BTreeMap<u64, Arc<dyn FrameListener>>;

pub struct FrameBus {
    lifecycle: Lifecycle,
    listeners: Arc<Mutex<ListenerMap>>,
    next_id: AtomicU64,
    tx: Mutex<Option<Sender<(Arc<Frame>, i64)>>>,
    shutdown_tx: Mutex<Option<Sender<()>>>,
    worker: Mutex<Option<thread::JoinHandle<()>>>,
}

impl FrameBus {
    pub fn new() -> Self {
        Self {
            lifecycle: Lifecycle::new("frame-bus"),
            listeners: Arc::new(Mutex::new(BTreeMap::new())),
            next_id: AtomicU64::new(1),
            tx: Mutex::new(None),
            shutdown_tx: Mutex::new(None),
            worker: Mutex::new(None),
        }
    }

    /// Register a listener. Takes effect for the next published frame.
    pub fn subscribe(&self, listener: Arc<dyn FrameListener>) -> SubscriberId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        lock(&self.listeners).insert(id, listener);
        SubscriberId(id)
    }

    /// Remove a listener. Unknown ids are ignored.
    pub fn unsubscribe(&self, id: SubscriberId) {
        lock(&self.listeners).remove(&id.0);
    }

    /// Hand a frame to the distribution worker. Dropped with a log line
    /// when the bus is not running.
    pub fn publish(&self, frame: Arc<Frame>, timestamp_us: i64) {
        let guard = lock_opt(&self.tx);
        match guard.as_ref() {
            Some(tx) => {
                if tx.send((frame, timestamp_us)).is_err() {
                    log::warn!("frame bus worker gone, dropping frame at {}us", timestamp_us);
                }
            }
            None => log::trace!("frame bus not running, dropping frame at {}us", timestamp_us),
        }
    }
}

impl Default for FrameBus {
    fn default() -> Self {
        Self::new()
    }
}

impl Element for FrameBus {
    fn lifecycle(&self) -> &Lifecycle {
        &self.lifecycle
    }

    fn start(&self) -> Result<()> {
        self.lifecycle.start_with(|| {
            let (tx, rx) = unbounded::<(Arc<Frame>, i64)>();
            let (shutdown_tx, shutdown_rx) = unbounded::<()>();
            let listeners = Arc::clone(&self.listeners);

            let handle = thread::Builder::new()
                .name("frame-bus".to_string())
                .spawn(move || loop {
                    select! {
                        recv(rx) -> msg => match msg {
                            Ok((frame, timestamp_us)) => {
                                let snapshot: Vec<Arc<dyn FrameListener>> =
                                    lock(&listeners).values().cloned().collect();
                                for listener in snapshot {
                                    listener.on_frame(&frame, timestamp_us);
                                }
                            }
                            Err(_) => break,
                        },
                        recv(shutdown_rx) -> _ => break,
                    }
                })?;

            *lock_opt(&self.tx) = Some(tx);
            *lock_opt(&self.shutdown_tx) = Some(shutdown_tx);
            *lock_opt(&self.worker) = Some(handle);
            Ok(())
        })
    }

    /// Stops distribution immediately. Frames still queued are discarded
    /// and the listener set is cleared.
    fn stop(&self) -> Result<()> {
        self.lifecycle.stop_with(|| {
            lock_opt(&self.tx).take();
            if let Some(shutdown) = lock_opt(&self.shutdown_tx).take() {
                let _ = shutdown.send(());
            }
            if let Some(handle) = lock_opt(&self.worker).take() {
                if handle.join().is_err() {
                    log::error!("frame bus worker panicked");
                }
            }
            lock(&self.listeners).clear();
            Ok(())
        })
    }
}

fn lock(map: &Mutex<ListenerMap>) -> MutexGuard<'_, ListenerMap> {
    map.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn lock_opt<T>(slot: &Mutex<Option<T>>) -> MutexGuard<'_, Option<T>> {
    slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

//! Shared start/stop protocol for long-running pipeline elements.
//!
//! Every element owns a `Lifecycle` cell and drives it through the same
//! sequence: NON_EXISTENT -> STARTING -> STARTED -> STOPPING -> STOPPED.
//! The cell is an atomic so worker threads can observe transitions without
//! taking a lock; worker loops exit as soon as the state moves past
//! `Started`.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use anyhow::Result;

/// Lifecycle states, totally ordered in transition sequence.
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum State {
    NonExistent = 0,
    Starting = 1,
    Started = 2,
    Stopping = 3,
    Stopped = 4,
}

impl State {
    fn from_u8(raw: u8) -> State {
        match raw {
            0 => State::NonExistent,
            1 => State::Starting,
            2 => State::Started,
            3 => State::Stopping,
            _ => State::Stopped,
        }
    }
}

impl std::fmt::Display for State {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            State::NonExistent => "NON_EXISTENT",
            State::Starting => "STARTING",
            State::Started => "STARTED",
            State::Stopping => "STOPPING",
            State::Stopped => "STOPPED",
        };
        f.write_str(name)
    }
}

/// Shared lifecycle cell.
///
/// Cloning shares the underlying state; an element hands clones to its
/// worker threads so they can poll for shutdown.
#[derive(Clone)]
pub struct Lifecycle {
    name: &'static str,
    state: Arc<AtomicU8>,
}

impl Lifecycle {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            state: Arc::new(AtomicU8::new(State::NonExistent as u8)),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn state(&self) -> State {
        State::from_u8(self.state.load(Ordering::SeqCst))
    }

    fn set(&self, state: State) {
        self.state.store(state as u8, Ordering::SeqCst);
    }

    /// True while a worker loop should keep running.
    pub fn is_running(&self) -> bool {
        self.state() <= State::Started
    }

    /// Run the element's start-work inside the STARTING -> STARTED
    /// transition. A failed start leaves the state at STARTING; callers
    /// must not reuse the element after that.
    pub fn start_with(&self, work: impl FnOnce() -> Result<()>) -> Result<()> {
        log::debug!("{}: starting", self.name);
        self.set(State::Starting);
        work()?;
        self.set(State::Started);
        log::info!("{}: started", self.name);
        Ok(())
    }

    /// Run the element's stop-work inside the STOPPING -> STOPPED
    /// transition. A no-op when the state is already at or past STOPPING.
    pub fn stop_with(&self, work: impl FnOnce() -> Result<()>) -> Result<()> {
        if self.state() < State::Stopping {
            log::debug!("{}: stopping", self.name);
            self.set(State::Stopping);
            work()?;
            self.set(State::Stopped);
            log::info!("{}: stopped", self.name);
        } else {
            log::warn!("{}: skipping stop, state is {}", self.name, self.state());
        }
        Ok(())
    }
}

/// A long-running pipeline component with the shared lifecycle protocol.
pub trait Element {
    fn lifecycle(&self) -> &Lifecycle;

    fn start(&self) -> Result<()>;

    fn stop(&self) -> Result<()>;

    fn state(&self) -> State {
        self.lifecycle().state()
    }
}

//! The broadcaster: one shared playback position, many listeners.
//!
//! `Broadcaster` is the cheap, cloneable handle the HTTP layer talks to. All
//! mutable state sits in a single `StationState` behind one lock; the control
//! loop (see `control_loop`) is the only task that touches decoders or writes
//! to listener queues.
//!
//! ```text
//! handlers --(command)--> StationState <--(lock)-- control loop --> decoder
//!                                                       |
//!                                                       v
//!                                        ClientQueue x N --> /stream bodies
//! ```

pub mod clients;
mod control_loop;
pub mod decoder;
pub mod state;

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::error::{Result, StationError};
use crate::library::{Track, TrackSource, TrackSummary};

pub use clients::{ClientStream, NextChunk};
pub use decoder::{Codec, DecoderConfig};
pub use state::{LoopMode, PendingCommand, Phase, StatusSnapshot};

use state::StationState;

/// Runtime knobs for the broadcaster.
#[derive(Debug, Clone)]
pub struct StationConfig {
    pub decoder: DecoderConfig,
    /// Chunks a listener may have queued before it counts as slow.
    pub client_queue_capacity: usize,
    /// How long fan-out waits on a full listener queue before dropping it.
    pub fan_out_deadline: Duration,
    /// Reader-side wait before re-polling an empty queue.
    pub idle_timeout: Duration,
    /// How often the playing file is checked for existence.
    pub file_check_interval: Duration,
    /// Pause after a decode session produced nothing.
    pub retry_backoff: Duration,
    pub start_paused: bool,
}

impl Default for StationConfig {
    fn default() -> Self {
        Self {
            decoder: DecoderConfig::default(),
            client_queue_capacity: 512,
            fan_out_deadline: Duration::from_millis(500),
            idle_timeout: Duration::from_secs(2),
            file_check_interval: Duration::from_secs(2),
            retry_backoff: Duration::from_millis(250),
            start_paused: false,
        }
    }
}

pub(crate) struct Shared {
    pub(crate) state: Mutex<StationState>,
    /// Poked on every state change the control loop may care about.
    pub(crate) changed: Notify,
    pub(crate) shutdown: watch::Sender<bool>,
    pub(crate) config: StationConfig,
}

impl Shared {
    fn update<T>(&self, f: impl FnOnce(&mut StationState) -> T) -> T {
        let out = f(&mut self.state.lock());
        self.changed.notify_one();
        out
    }
}

#[derive(Clone)]
pub struct Broadcaster {
    shared: Arc<Shared>,
    task: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl Broadcaster {
    pub fn new(config: StationConfig) -> Self {
        let (shutdown, _) = watch::channel(false);
        let shared = Shared {
            state: Mutex::new(StationState::new(config.start_paused)),
            changed: Notify::new(),
            shutdown,
            config,
        };
        Self {
            shared: Arc::new(shared),
            task: Arc::new(Mutex::new(None)),
        }
    }

    pub fn config(&self) -> &StationConfig {
        &self.shared.config
    }

    pub fn content_type(&self) -> &str {
        &self.shared.config.decoder.content_type
    }

    // --- lifecycle ------------------------------------------------------------

    /// Starts the control loop unless it is already running. Must be called
    /// from within a tokio runtime.
    pub fn ensure_running(&self) {
        let mut task = self.task.lock();
        if task.as_ref().is_some_and(|h| !h.is_finished()) {
            return;
        }
        if *self.shared.shutdown.borrow() {
            return;
        }
        *task = Some(tokio::spawn(control_loop::run(self.shared.clone())));
        info!("broadcaster started");
    }

    pub fn is_running(&self) -> bool {
        self.task.lock().as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Asks the control loop to stop and hands back its join handle.
    pub fn shutdown(&self) -> Option<JoinHandle<()>> {
        self.shared.shutdown.send_replace(true);
        self.shared.changed.notify_one();
        self.task.lock().take()
    }

    // --- commands -------------------------------------------------------------

    pub fn request_play(&self) -> Result<()> {
        self.shared.update(|st| st.play())
    }

    pub fn request_pause(&self) {
        self.shared.update(|st| st.pause())
    }

    /// Flips pause; returns the new paused flag.
    pub fn toggle_pause(&self) -> Result<bool> {
        self.shared.update(|st| st.toggle())
    }

    pub fn request_next(&self) -> Result<()> {
        self.shared.update(|st| st.request(PendingCommand::Next))
    }

    pub fn request_prev(&self) -> Result<()> {
        self.shared.update(|st| st.request(PendingCommand::Prev))
    }

    pub fn request_jump(&self, id: &str) -> Result<TrackSummary> {
        self.shared.update(|st| st.jump_to_id(id).map(Track::summary))
    }

    pub fn set_loop_mode(&self, mode: LoopMode) {
        self.shared.update(|st| st.set_loop_mode(mode))
    }

    // --- playlist -------------------------------------------------------------

    /// Full replace after a rescan. Returns the new length.
    pub fn replace_playlist(&self, tracks: Vec<Track>) -> usize {
        self.shared.update(|st| {
            st.replace_playlist(tracks);
            st.playlist().len()
        })
    }

    /// Scans `source` off the async threads and installs the result.
    ///
    /// A failed scan empties the playlist, parking the loop until the next
    /// successful one.
    pub async fn rescan(&self, source: &TrackSource) -> usize {
        let scan_source = source.clone();
        let res = tokio::task::spawn_blocking(move || scan_source.scan()).await;
        let tracks = match res {
            Ok(Ok(tracks)) => tracks,
            Ok(Err(e)) => {
                warn!("rescan of {} failed: {e}", source.root().display());
                self.shared.state.lock().record_error(&e);
                Vec::new()
            }
            Err(e) => {
                let e = StationError::Scan(format!("scan task failed: {e}"));
                warn!("{e}");
                self.shared.state.lock().record_error(&e);
                Vec::new()
            }
        };

        for t in &tracks {
            tracing::debug!("  {}: {}", t.id, t.path.display());
        }
        let n = self.replace_playlist(tracks);
        info!("rescan: {n} track(s) in {}", source.root().display());
        n
    }

    // --- listeners ------------------------------------------------------------

    /// Registers a new listener. It only sees chunks produced from now on.
    pub fn connect(&self) -> ClientStream {
        let (queue, count) = {
            let mut st = self.shared.state.lock();
            let q = st.clients.register(self.shared.config.client_queue_capacity);
            (q, st.clients.len())
        };
        info!("client {} connected; clients now: {count}", queue.id());

        let weak = Arc::downgrade(&self.shared);
        ClientStream::new(
            queue,
            Box::new(move |id| {
                if let Some(shared) = weak.upgrade() {
                    let mut st = shared.state.lock();
                    st.clients.unregister(id);
                    info!("client {id} disconnected; clients now: {}", st.clients.len());
                }
            }),
        )
    }

    pub fn client_count(&self) -> usize {
        self.shared.state.lock().clients.len()
    }

    // --- status ---------------------------------------------------------------

    pub fn status(&self) -> StatusSnapshot {
        self.shared.state.lock().snapshot()
    }
}

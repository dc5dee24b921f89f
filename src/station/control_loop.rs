//! The broadcaster's control loop.
//!
//! One task, started by `Broadcaster::ensure_running`. It decides what to do
//! under the station lock, then does the slow part (decoder I/O, fan-out,
//! process teardown) with the lock released.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::clients::{drain_all, fan_out};
use super::decoder::{DecodeSession, DecoderManager};
use super::state::Phase;
use super::Shared;
use crate::error::StationError;
use crate::library::Track;

enum Step {
    Wait,
    Play(Track),
}

enum TrackOutcome {
    /// Decoder ran dry on its own.
    Ended,
    /// A next/prev/jump is waiting.
    Interrupted,
    /// The file disappeared mid-track.
    Vanished,
    Shutdown,
}

pub(crate) async fn run(shared: Arc<Shared>) {
    let mut shutdown = shared.shutdown.subscribe();
    let mut decoder = DecoderManager::new(shared.config.decoder.clone());

    while !*shutdown.borrow() {
        let step = {
            let mut st = shared.state.lock();
            if st.playlist().is_empty() {
                st.set_phase(Phase::IdleNoPlaylist);
                Step::Wait
            } else if let Some(cmd) = st.consume_pending() {
                // Left over from the end of the previous track; nothing is
                // decoding, but queues may still hold its tail.
                st.set_phase(Phase::Transitioning);
                let queues = st.clients.live();
                drop(st);
                drain_all(&queues);
                debug!("applied {cmd:?} between tracks");
                continue;
            } else if st.paused() {
                st.set_phase(Phase::WaitingPaused);
                Step::Wait
            } else {
                match st.current() {
                    Some(track) => Step::Play(track.clone()),
                    None => Step::Wait,
                }
            }
        };

        let track = match step {
            Step::Wait => {
                if !wait_for_change(&shared, &mut shutdown, None).await {
                    break;
                }
                continue;
            }
            Step::Play(track) => track,
        };

        if let Err(e) = tokio::fs::File::open(&track.path).await {
            let err = StationError::TrackUnreadable { id: track.id.clone(), reason: e.to_string() };
            warn!("{err}; removing {} from playlist", track.path.display());
            let mut st = shared.state.lock();
            st.remove_current_if(&track.path);
            st.record_error(&err);
            continue;
        }

        let mut session = match decoder.start(&track) {
            Ok(s) => s,
            Err(e) => {
                let err = StationError::TrackUnreadable { id: track.id.clone(), reason: e.to_string() };
                warn!("decoder spawn failed: {err}");
                if !end_of_track(&shared, &mut shutdown, &err).await {
                    break;
                }
                continue;
            }
        };
        info!("playing: {} - {}", track.id, track.path.display());

        let outcome = stream_track(&shared, &mut shutdown, &mut session, &track).await;
        let produced = session.bytes_read();
        decoder.stop(session).await;

        match outcome {
            TrackOutcome::Shutdown => break,
            TrackOutcome::Interrupted => {
                let queues = {
                    let mut st = shared.state.lock();
                    st.set_phase(Phase::Transitioning);
                    st.clients.live()
                };
                let dropped = drain_all(&queues);
                let cmd = {
                    let mut st = shared.state.lock();
                    st.consume_pending()
                };
                info!("playout interrupted ({cmd:?}): {}; drained {dropped} queued chunk(s)", track.id);
            }
            TrackOutcome::Vanished => {
                let err = StationError::TrackUnreadable {
                    id: track.id.clone(),
                    reason: "file vanished during playback".into(),
                };
                warn!("{err}");
                let queues = {
                    let mut st = shared.state.lock();
                    st.set_phase(Phase::Transitioning);
                    st.remove_current_if(&track.path);
                    st.record_error(&err);
                    st.clients.live()
                };
                drain_all(&queues);
            }
            TrackOutcome::Ended if produced == 0 => {
                let err = StationError::TrackUnreadable {
                    id: track.id.clone(),
                    reason: "decoder produced no data".into(),
                };
                warn!("{err}");
                if !end_of_track(&shared, &mut shutdown, &err).await {
                    break;
                }
            }
            TrackOutcome::Ended => {
                info!("playout end: {} ({produced} bytes)", track.id);
                let mut st = shared.state.lock();
                st.set_phase(Phase::TrackEnded);
                if st.pending().is_none() {
                    st.finish_track();
                }
            }
        }
    }

    let mut st = shared.state.lock();
    st.clients.close_all();
    let idle = st.playlist().is_empty();
    st.set_phase(if idle { Phase::IdleNoPlaylist } else { Phase::WaitingPaused });
    info!("broadcaster stopped");
}

/// Pumps one decode session into the listener queues until it ends, a
/// command arrives, the file goes away, or the station shuts down.
async fn stream_track(
    shared: &Shared,
    shutdown: &mut watch::Receiver<bool>,
    session: &mut DecodeSession,
    track: &Track,
) -> TrackOutcome {
    let cfg = &shared.config;
    let mut last_file_check = Instant::now();

    loop {
        let (interrupted, paused) = {
            let mut st = shared.state.lock();
            let interrupted = st.pending().is_some();
            let paused = st.paused();
            if !interrupted {
                st.set_phase(if paused { Phase::WaitingPaused } else { Phase::Playing });
            }
            (interrupted, paused)
        };
        if interrupted {
            return TrackOutcome::Interrupted;
        }
        if paused {
            // Hold the decoder where it is; it blocks on its full pipe.
            if !wait_for_change(shared, shutdown, None).await {
                return TrackOutcome::Shutdown;
            }
            continue;
        }

        if last_file_check.elapsed() >= cfg.file_check_interval {
            last_file_check = Instant::now();
            match tokio::fs::try_exists(&track.path).await {
                Ok(true) => {}
                Ok(false) => return TrackOutcome::Vanished,
                // Could be transient (NFS, permissions); keep playing.
                Err(e) => warn!("cannot check {}: {e}", track.path.display()),
            }
        }

        let chunk = tokio::select! {
            _ = shutdown.changed() => return TrackOutcome::Shutdown,
            _ = shared.changed.notified() => continue,
            // A stalled decoder must not hide a deleted file.
            _ = tokio::time::sleep_until(last_file_check + cfg.file_check_interval) => continue,
            chunk = session.read_chunk() => chunk,
        };
        let Some(chunk) = chunk else {
            return TrackOutcome::Ended;
        };

        let queues = shared.state.lock().clients.live();
        if queues.is_empty() {
            continue;
        }
        let overloaded = fan_out(&queues, &chunk, cfg.fan_out_deadline).await;
        if !overloaded.is_empty() {
            let mut st = shared.state.lock();
            for q in overloaded {
                q.close();
                st.clients.unregister(q.id());
                warn!("{}; clients now: {}", StationError::ClientOverload(q.id().to_string()), st.clients.len());
            }
        }
    }
}

/// Treats a failed track like a natural end, then backs off briefly so a
/// broken decoder cannot spin the loop. Returns false on shutdown.
async fn end_of_track(
    shared: &Shared,
    shutdown: &mut watch::Receiver<bool>,
    err: &StationError,
) -> bool {
    {
        let mut st = shared.state.lock();
        st.record_error(err);
        st.set_phase(Phase::TrackEnded);
        if st.pending().is_none() {
            st.finish_track();
        }
    }
    wait_for_change(shared, shutdown, Some(shared.config.retry_backoff)).await
}

/// Sleeps until the state changes, `limit` elapses, or shutdown is
/// requested. Returns false only for shutdown.
async fn wait_for_change(
    shared: &Shared,
    shutdown: &mut watch::Receiver<bool>,
    limit: Option<Duration>,
) -> bool {
    if *shutdown.borrow() {
        return false;
    }
    let sleep = async {
        match limit {
            Some(d) => tokio::time::sleep(d).await,
            None => std::future::pending::<()>().await,
        }
    };
    tokio::select! {
        _ = shutdown.changed() => false,
        _ = shared.changed.notified() => true,
        _ = sleep => true,
    }
}

//! Playback state shared between the control surface and the control loop.
//!
//! Everything here is synchronous and cheap: callers hold the station lock
//! only for the duration of one of these methods.

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::clients::ClientRegistry;
use crate::error::{Result, StationError};
use crate::library::{Track, TrackSummary};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoopMode {
    /// Stop after the last track.
    #[default]
    None,
    /// Repeat the current track.
    One,
    /// Cycle the whole playlist.
    All,
}

impl LoopMode {
    pub fn as_str(self) -> &'static str {
        match self {
            LoopMode::None => "none",
            LoopMode::One => "one",
            LoopMode::All => "all",
        }
    }
}

impl fmt::Display for LoopMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LoopMode {
    type Err = StationError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "none" => Ok(LoopMode::None),
            "one" => Ok(LoopMode::One),
            "all" => Ok(LoopMode::All),
            other => Err(StationError::InvalidLoopMode(other.to_string())),
        }
    }
}

/// Where the control loop currently is. Reported through `/status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    IdleNoPlaylist,
    WaitingPaused,
    Playing,
    Transitioning,
    TrackEnded,
}

/// The single outstanding transition request. Later requests overwrite it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendingCommand {
    Next,
    Prev,
    /// Index resolved from a track id when the request was made.
    Jump(usize),
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusSnapshot {
    pub playlist: Vec<TrackSummary>,
    pub index: usize,
    pub current: Option<TrackSummary>,
    pub paused: bool,
    #[serde(rename = "loop")]
    pub loop_mode: LoopMode,
    pub clients: usize,
    pub phase: Phase,
    pub last_error: Option<String>,
}

pub struct StationState {
    playlist: Vec<Track>,
    index: usize,
    paused: bool,
    loop_mode: LoopMode,
    pending: Option<PendingCommand>,
    phase: Phase,
    last_error: Option<String>,
    pub(crate) clients: ClientRegistry,
}

impl StationState {
    pub fn new(start_paused: bool) -> Self {
        Self {
            playlist: Vec::new(),
            index: 0,
            paused: start_paused,
            loop_mode: LoopMode::None,
            pending: None,
            phase: Phase::IdleNoPlaylist,
            last_error: None,
            clients: ClientRegistry::default(),
        }
    }

    pub fn playlist(&self) -> &[Track] {
        &self.playlist
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn paused(&self) -> bool {
        self.paused
    }

    pub fn loop_mode(&self) -> LoopMode {
        self.loop_mode
    }

    pub fn pending(&self) -> Option<PendingCommand> {
        self.pending
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn current(&self) -> Option<&Track> {
        self.playlist.get(self.index)
    }

    pub(crate) fn set_phase(&mut self, phase: Phase) {
        self.phase = phase;
    }

    pub(crate) fn record_error(&mut self, err: &StationError) {
        self.last_error = Some(err.to_string());
    }

    // --- commands -----------------------------------------------------------

    pub fn play(&mut self) -> Result<()> {
        if self.playlist.is_empty() {
            return Err(StationError::EmptyPlaylist);
        }
        self.paused = false;
        Ok(())
    }

    pub fn pause(&mut self) {
        self.paused = true;
    }

    /// Returns the new paused flag.
    pub fn toggle(&mut self) -> Result<bool> {
        if self.paused {
            self.play()?;
        } else {
            self.pause();
        }
        Ok(self.paused)
    }

    pub fn set_loop_mode(&mut self, mode: LoopMode) {
        self.loop_mode = mode;
    }

    /// Stores a transition request for the control loop. Implicitly unpauses.
    pub fn request(&mut self, cmd: PendingCommand) -> Result<()> {
        if self.playlist.is_empty() {
            return Err(StationError::EmptyPlaylist);
        }
        self.pending = Some(cmd);
        self.paused = false;
        Ok(())
    }

    /// Resolves `id` against the current playlist and requests a jump to it.
    pub fn jump_to_id(&mut self, id: &str) -> Result<&Track> {
        let idx = self
            .playlist
            .iter()
            .position(|t| t.id == id)
            .ok_or_else(|| StationError::NotFound(id.to_string()))?;
        self.request(PendingCommand::Jump(idx))?;
        Ok(&self.playlist[idx])
    }

    // --- control loop side --------------------------------------------------

    /// Takes the pending command (if any) and moves the cursor accordingly.
    ///
    /// Index arithmetic uses the playlist length as it is now, so a rescan
    /// between request and consumption can never push the cursor out of range.
    pub fn consume_pending(&mut self) -> Option<PendingCommand> {
        let cmd = self.pending.take()?;
        let len = self.playlist.len();
        if len == 0 {
            return Some(cmd);
        }
        match cmd {
            PendingCommand::Next => self.index = (self.index + 1) % len,
            PendingCommand::Prev => self.index = (self.index + len - 1) % len,
            PendingCommand::Jump(idx) if idx < len => self.index = idx,
            PendingCommand::Jump(_) => {}
        }
        Some(cmd)
    }

    /// Applies the loop policy after a track played to its end.
    pub fn finish_track(&mut self) {
        let len = self.playlist.len();
        if len == 0 {
            self.index = 0;
            return;
        }
        match self.loop_mode {
            LoopMode::One => {}
            LoopMode::All => self.index = (self.index + 1) % len,
            LoopMode::None => {
                if self.index + 1 < len {
                    self.index += 1;
                } else {
                    self.index = len - 1;
                    self.paused = true;
                }
            }
        }
    }

    /// Drops the track at the cursor if it is still the file at `path`.
    ///
    /// Matched by path: a rescan renumbers ids, so the same id may now name
    /// another file. Returns false when the playlist moved on in the meantime,
    /// in which case nothing is removed.
    pub fn remove_current_if(&mut self, path: &Path) -> bool {
        match self.playlist.get(self.index) {
            Some(t) if t.path == path => {
                self.playlist.remove(self.index);
                self.clamp_index();
                true
            }
            _ => false,
        }
    }

    pub fn replace_playlist(&mut self, tracks: Vec<Track>) {
        self.playlist = tracks;
        self.clamp_index();
    }

    fn clamp_index(&mut self) {
        self.index = self.index.min(self.playlist.len().saturating_sub(1));
    }

    pub fn snapshot(&self) -> StatusSnapshot {
        StatusSnapshot {
            playlist: self.playlist.iter().map(Track::summary).collect(),
            index: self.index,
            current: self.current().map(Track::summary),
            paused: self.paused,
            loop_mode: self.loop_mode,
            clients: self.clients.len(),
            phase: self.phase,
            last_error: self.last_error.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn tracks(names: &[&str]) -> Vec<Track> {
        names
            .iter()
            .enumerate()
            .map(|(i, n)| Track {
                id: format!("{:03}", i + 1),
                path: PathBuf::from(format!("/music/{n}")),
                name: n.to_string(),
            })
            .collect()
    }

    fn station(names: &[&str]) -> StationState {
        let mut st = StationState::new(false);
        st.replace_playlist(tracks(names));
        st
    }

    #[test]
    fn three_nexts_wrap_around() {
        let mut st = station(&["a.mp3", "b.mp3", "c.mp3"]);
        st.set_loop_mode(LoopMode::All);

        let mut seen = Vec::new();
        for _ in 0..3 {
            st.request(PendingCommand::Next).unwrap();
            st.consume_pending();
            seen.push(st.index());
        }
        assert_eq!(seen, vec![1, 2, 0]);
    }

    #[test]
    fn next_and_prev_are_modular() {
        for len in 1..6usize {
            let names: Vec<String> = (0..len).map(|i| format!("{i}.mp3")).collect();
            let refs: Vec<&str> = names.iter().map(String::as_str).collect();
            for start in 0..len {
                let mut st = station(&refs);
                st.request(PendingCommand::Jump(start)).unwrap();
                st.consume_pending();

                let steps: [i64; 9] = [1, 1, -1, 1, -1, -1, -1, 1, 1];
                let mut net: i64 = 0;
                for s in steps {
                    let cmd = if s > 0 { PendingCommand::Next } else { PendingCommand::Prev };
                    st.request(cmd).unwrap();
                    st.consume_pending();
                    net += s;
                    let expected = (start as i64 + net).rem_euclid(len as i64) as usize;
                    assert_eq!(st.index(), expected);
                    assert!(st.index() < len);
                }
            }
        }
    }

    #[test]
    fn later_command_overwrites_pending_one() {
        let mut st = station(&["a", "b", "c"]);
        st.request(PendingCommand::Next).unwrap();
        st.request(PendingCommand::Prev).unwrap();
        assert_eq!(st.consume_pending(), Some(PendingCommand::Prev));
        assert_eq!(st.index(), 2);
        assert_eq!(st.consume_pending(), None);
    }

    #[test]
    fn select_unpauses_and_lands_on_id() {
        let mut st = station(&["a", "b", "c"]);
        st.pause();
        st.jump_to_id("003").unwrap();
        assert!(!st.paused());
        st.consume_pending();
        assert_eq!(st.current().unwrap().id, "003");
    }

    #[test]
    fn select_unknown_id_leaves_cursor_alone() {
        let mut st = station(&["a", "b", "c"]);
        st.request(PendingCommand::Next).unwrap();
        st.consume_pending();
        st.pause();

        let err = st.jump_to_id("042").unwrap_err();
        assert_eq!(err, StationError::NotFound("042".into()));
        assert_eq!(st.index(), 1);
        assert!(st.paused());
        assert_eq!(st.pending(), None);
    }

    #[test]
    fn play_on_empty_playlist_keeps_paused_state() {
        let mut st = StationState::new(true);
        assert_eq!(st.play(), Err(StationError::EmptyPlaylist));
        assert!(st.paused());
        assert_eq!(st.request(PendingCommand::Next), Err(StationError::EmptyPlaylist));
        assert_eq!(st.request(PendingCommand::Prev), Err(StationError::EmptyPlaylist));
        assert_eq!(st.toggle(), Err(StationError::EmptyPlaylist));
    }

    #[test]
    fn loop_one_never_moves() {
        let mut st = station(&["a", "b", "c"]);
        st.set_loop_mode(LoopMode::One);
        st.request(PendingCommand::Jump(1)).unwrap();
        st.consume_pending();
        for _ in 0..5 {
            st.finish_track();
            assert_eq!(st.index(), 1);
        }
        assert!(!st.paused());
    }

    #[test]
    fn loop_all_returns_after_n_ends() {
        let mut st = station(&["a", "b", "c", "d"]);
        st.set_loop_mode(LoopMode::All);
        st.request(PendingCommand::Jump(2)).unwrap();
        st.consume_pending();
        for _ in 0..4 {
            st.finish_track();
        }
        assert_eq!(st.index(), 2);
    }

    #[test]
    fn loop_none_pauses_on_last_track() {
        let mut st = station(&["a", "b", "c"]);
        st.request(PendingCommand::Jump(2)).unwrap();
        st.consume_pending();
        st.finish_track();
        assert!(st.paused());
        assert_eq!(st.index(), 2);

        let mut st = station(&["a", "b", "c"]);
        st.finish_track();
        assert_eq!(st.index(), 1);
        assert!(!st.paused());
    }

    #[test]
    fn removing_last_entry_reclamps() {
        let mut st = station(&["a", "b", "c"]);
        st.request(PendingCommand::Jump(2)).unwrap();
        st.consume_pending();
        assert!(st.remove_current_if(Path::new("/music/c")));
        assert_eq!(st.index(), 1);
        assert_eq!(st.playlist().len(), 2);

        assert!(!st.remove_current_if(Path::new("/music/a")));
        assert!(st.remove_current_if(Path::new("/music/b")));
        assert!(st.remove_current_if(Path::new("/music/a")));
        assert!(st.playlist().is_empty());
        assert_eq!(st.index(), 0);
        assert!(st.current().is_none());
    }

    #[test]
    fn removal_ignores_a_renumbered_id() {
        let mut st = station(&["a", "b", "c"]);
        st.request(PendingCommand::Jump(1)).unwrap();
        st.consume_pending();
        let playing = st.current().unwrap().clone();

        // "b" deleted and rescanned away: "c" now carries id 002 at the cursor.
        st.replace_playlist(tracks(&["a", "c"]));
        assert_eq!(st.current().unwrap().id, playing.id);

        assert!(!st.remove_current_if(&playing.path));
        let names: Vec<&str> = st.playlist().iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, ["a", "c"]);
        assert_eq!(st.current().unwrap().name, "c");
    }

    #[test]
    fn shrinking_rescan_clamps_and_ignores_stale_jump() {
        let mut st = station(&["a", "b", "c", "d"]);
        st.request(PendingCommand::Jump(3)).unwrap();
        st.consume_pending();
        st.request(PendingCommand::Jump(3)).unwrap();
        st.replace_playlist(tracks(&["a", "b"]));
        assert_eq!(st.index(), 1);

        st.consume_pending();
        assert_eq!(st.index(), 1);
    }

    #[test]
    fn loop_mode_parses_wire_names_only() {
        assert_eq!("all".parse::<LoopMode>().unwrap(), LoopMode::All);
        assert!(matches!("ALL".parse::<LoopMode>(), Err(StationError::InvalidLoopMode(_))));
        assert_eq!(LoopMode::One.to_string(), "one");
    }

    #[test]
    fn snapshot_serializes_loop_key() {
        let mut st = station(&["a.mp3"]);
        st.set_loop_mode(LoopMode::All);
        let v = serde_json::to_value(st.snapshot()).unwrap();
        assert_eq!(v["loop"], "all");
        assert_eq!(v["current"]["id"], "001");
        assert_eq!(v["phase"], "idle_no_playlist");
        assert_eq!(v["clients"], 0);
    }
}

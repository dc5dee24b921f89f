//! Shared fixtures: a temp music folder and a station whose "decoder" is a
//! shell script, so tests never need ffmpeg.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::time::Duration;

use lanradio::library::{Track, TrackSource};
use lanradio::station::{Broadcaster, DecoderConfig, StationConfig};

pub struct MusicDir {
    pub dir: tempfile::TempDir,
}

impl MusicDir {
    /// Creates `files` (name, contents) in a fresh temp folder.
    pub fn with_files(files: &[(&str, &[u8])]) -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        for (name, body) in files {
            std::fs::write(dir.path().join(name), body).expect("write track");
        }
        Self { dir }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn source(&self) -> TrackSource {
        TrackSource::new(self.dir.path())
    }

    pub fn tracks(&self) -> Vec<Track> {
        self.source().scan().expect("scan")
    }
}

/// `script` runs as `sh -c script <track path>`, so `$0` is the file.
pub fn shell_config(script: &str) -> StationConfig {
    StationConfig {
        decoder: DecoderConfig {
            program: "sh".into(),
            args: vec!["-c".into(), script.into(), "{input}".into()],
            content_type: "audio/mpeg".into(),
            chunk_size: 64,
            stop_timeout: Duration::from_millis(200),
        },
        client_queue_capacity: 4096,
        fan_out_deadline: Duration::from_millis(200),
        idle_timeout: Duration::from_millis(100),
        file_check_interval: Duration::from_millis(50),
        retry_backoff: Duration::from_millis(20),
        start_paused: false,
    }
}

pub fn shell_station(script: &str) -> Broadcaster {
    Broadcaster::new(shell_config(script))
}

pub fn missing_track(id: &str) -> Track {
    Track {
        id: id.to_string(),
        path: PathBuf::from(format!("/nonexistent/lanradio-test/{id}.mp3")),
        name: format!("{id}.mp3"),
    }
}

/// Polls `check` until it holds or `limit` passes.
pub async fn wait_until(limit: Duration, mut check: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + limit;
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}

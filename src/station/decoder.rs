//! Decode sessions: one external process per playing track.
//!
//! The default pipeline is ffmpeg reading the file in real time (`-re`) and
//! writing an encoded stream to stdout. Any program that writes the stream to
//! stdout works; `{input}` in the argument list is replaced by the track path.

use std::process::Stdio;
use std::time::Duration;

use bytes::Bytes;
use tokio::io::AsyncReadExt;
use tokio::process::{Child, ChildStdout, Command};

use crate::error::StationError;
use crate::library::Track;

pub const INPUT_PLACEHOLDER: &str = "{input}";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum Codec {
    #[default]
    Mp3,
    Aac,
}

impl Codec {
    pub fn content_type(self) -> &'static str {
        match self {
            Codec::Mp3 => "audio/mpeg",
            Codec::Aac => "audio/aac",
        }
    }

    fn ffmpeg_args(self) -> [&'static str; 4] {
        match self {
            Codec::Mp3 => ["-c:a", "libmp3lame", "-f", "mp3"],
            Codec::Aac => ["-c:a", "aac", "-f", "adts"],
        }
    }
}

#[derive(Debug, Clone)]
pub struct DecoderConfig {
    pub program: String,
    pub args: Vec<String>,
    pub content_type: String,
    /// Upper bound for a single read from the decoder's stdout.
    pub chunk_size: usize,
    /// How long `stop` waits for the killed process before giving up on it.
    pub stop_timeout: Duration,
}

impl DecoderConfig {
    pub fn ffmpeg(bin: impl Into<String>, codec: Codec, bitrate_kbps: u16) -> Self {
        let mut args: Vec<String> = ["-hide_banner", "-loglevel", "error", "-re", "-i", INPUT_PLACEHOLDER, "-vn"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        args.extend(codec.ffmpeg_args().iter().map(|s| s.to_string()));
        args.push("-b:a".into());
        args.push(format!("{bitrate_kbps}k"));
        args.push("pipe:1".into());

        Self {
            program: bin.into(),
            args,
            content_type: codec.content_type().to_string(),
            chunk_size: 1024,
            stop_timeout: Duration::from_millis(200),
        }
    }

    fn command_for(&self, track: &Track) -> Command {
        let input = track.path.to_string_lossy();
        let mut cmd = Command::new(&self.program);
        for arg in &self.args {
            cmd.arg(arg.replace(INPUT_PLACEHOLDER, &input));
        }
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);
        cmd
    }
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self::ffmpeg("ffmpeg", Codec::Mp3, 192)
    }
}

/// A running decoder and its stdout. Owned by whoever called `start`.
pub struct DecodeSession {
    track_id: String,
    child: Child,
    stdout: ChildStdout,
    buf: Vec<u8>,
    bytes_read: u64,
}

impl DecodeSession {
    pub fn pid(&self) -> Option<u32> {
        self.child.id()
    }

    pub fn bytes_read(&self) -> u64 {
        self.bytes_read
    }

    /// Next piece of the stream, or `None` once the decoder is done.
    ///
    /// Read errors are logged and reported as end of stream. Cancel-safe.
    pub async fn read_chunk(&mut self) -> Option<Bytes> {
        match self.stdout.read(&mut self.buf).await {
            Ok(0) => None,
            Ok(n) => {
                self.bytes_read += n as u64;
                Some(Bytes::copy_from_slice(&self.buf[..n]))
            }
            Err(e) => {
                tracing::warn!("decoder read failed for track {}: {e}", self.track_id);
                None
            }
        }
    }
}

/// Spawns and reaps decode sessions, one at a time.
pub struct DecoderManager {
    config: DecoderConfig,
    active: Option<String>,
}

impl DecoderManager {
    pub fn new(config: DecoderConfig) -> Self {
        Self { config, active: None }
    }

    /// Id of the track whose session has been started but not stopped.
    pub fn active(&self) -> Option<&str> {
        self.active.as_deref()
    }

    pub fn start(&mut self, track: &Track) -> anyhow::Result<DecodeSession> {
        if let Some(prev) = &self.active {
            // Callers stop before they start; reaching this is a bug upstream.
            tracing::error!("decode session for {prev} still active while starting {}", track.id);
        }

        let mut child = self.config.command_for(track).spawn()?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| anyhow::anyhow!("decoder stdout unavailable"))?;

        self.active = Some(track.id.clone());
        Ok(DecodeSession {
            track_id: track.id.clone(),
            child,
            stdout,
            buf: vec![0u8; self.config.chunk_size.max(1)],
            bytes_read: 0,
        })
    }

    /// Kills the session and waits (bounded) for the process to go away.
    ///
    /// A process that outlives the grace period is logged and abandoned to
    /// `kill_on_drop`; the caller never sees an error.
    pub async fn stop(&mut self, session: DecodeSession) {
        self.active = None;
        let DecodeSession { track_id, mut child, stdout, .. } = session;
        drop(stdout);

        if let Ok(Some(_)) = child.try_wait() {
            return;
        }
        if let Err(e) = child.start_kill() {
            tracing::debug!("decoder for {track_id} already gone: {e}");
        }
        match tokio::time::timeout(self.config.stop_timeout, child.wait()).await {
            Ok(Ok(status)) => tracing::debug!("decoder for {track_id} exited: {status}"),
            Ok(Err(e)) => tracing::warn!("waiting on decoder for {track_id} failed: {e}"),
            Err(_) => {
                let err = StationError::ProcessTeardownTimeout(self.config.stop_timeout);
                tracing::warn!("{err} (track {track_id}); treating as terminated");
            }
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::path::{Path, PathBuf};

    fn shell(script: &str) -> DecoderConfig {
        DecoderConfig {
            program: "sh".into(),
            args: vec!["-c".into(), script.into(), INPUT_PLACEHOLDER.into()],
            content_type: "audio/mpeg".into(),
            chunk_size: 4,
            stop_timeout: Duration::from_millis(200),
        }
    }

    fn track(path: PathBuf) -> Track {
        Track { id: "001".into(), name: "t".into(), path }
    }

    #[test]
    fn ffmpeg_args_carry_codec_and_bitrate() {
        let cfg = DecoderConfig::ffmpeg("/usr/bin/ffmpeg", Codec::Aac, 128);
        assert_eq!(cfg.content_type, "audio/aac");
        assert!(cfg.args.windows(2).any(|w| w == ["-b:a", "128k"]));
        assert!(cfg.args.windows(2).any(|w| w == ["-f", "adts"]));
        assert!(cfg.args.windows(2).any(|w| w == ["-i", INPUT_PLACEHOLDER]));
        assert_eq!(cfg.args.last().map(String::as_str), Some("pipe:1"));
    }

    #[tokio::test]
    async fn reads_stream_in_chunks_until_eof() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("a.mp3");
        std::fs::write(&file, b"0123456789").unwrap();

        let mut mgr = DecoderManager::new(shell("cat \"$0\""));
        let mut session = mgr.start(&track(file)).unwrap();
        assert_eq!(mgr.active(), Some("001"));

        let mut out = Vec::new();
        while let Some(chunk) = session.read_chunk().await {
            assert!(chunk.len() <= 4);
            out.extend_from_slice(&chunk);
        }
        assert_eq!(out, b"0123456789");
        assert_eq!(session.bytes_read(), 10);

        mgr.stop(session).await;
        assert_eq!(mgr.active(), None);
    }

    #[tokio::test]
    async fn failing_decoder_reads_as_eof() {
        let mut mgr = DecoderManager::new(shell("exit 1"));
        let mut session = mgr.start(&track(PathBuf::from("/nonexistent.mp3"))).unwrap();
        assert_eq!(session.read_chunk().await, None);
        mgr.stop(session).await;
    }

    #[tokio::test]
    async fn missing_program_is_a_start_error() {
        let mut cfg = shell("true");
        cfg.program = "/definitely/not/a/decoder".into();
        let mut mgr = DecoderManager::new(cfg);
        assert!(mgr.start(&track(PathBuf::from("/x.mp3"))).is_err());
        assert_eq!(mgr.active(), None);
    }

    #[tokio::test]
    async fn stop_kills_a_running_process_promptly() {
        let mut mgr = DecoderManager::new(shell("exec sleep 30"));
        let session = mgr.start(&track(PathBuf::from("/x.mp3"))).unwrap();
        let pid = session.pid().unwrap();
        let proc_path = format!("/proc/{pid}");

        let started = std::time::Instant::now();
        mgr.stop(session).await;
        assert!(started.elapsed() < Duration::from_millis(200) + Duration::from_millis(300));

        if Path::new("/proc/self").exists() {
            // Give the reaper a moment in case the wait timed out.
            for _ in 0..20 {
                if !Path::new(&proc_path).exists() {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
            assert!(!Path::new(&proc_path).exists());
        }
    }
}

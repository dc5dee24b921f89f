//! Command line / environment configuration.
//!
//! Every flag has a `LANRADIO_*` environment fallback so the engine can run
//! under systemd or a container without arguments.

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;

use crate::library::TrackSource;
use crate::station::{Codec, DecoderConfig, StationConfig};

#[derive(Debug, Clone, Parser)]
#[command(name = "lanradio-engine", version, about = "Shared-playback radio station for a local music folder")]
pub struct Config {
    /// Folder scanned for tracks. Created on startup if missing.
    #[arg(long, env = "LANRADIO_MUSIC_DIR", default_value = "music")]
    pub music_dir: PathBuf,

    #[arg(long, env = "LANRADIO_BIND", default_value = "0.0.0.0:8080")]
    pub bind: SocketAddr,

    #[arg(long, env = "LANRADIO_FFMPEG", default_value = "ffmpeg")]
    pub ffmpeg: String,

    #[arg(long, env = "LANRADIO_CODEC", value_enum, default_value = "mp3")]
    pub codec: Codec,

    #[arg(
        long,
        env = "LANRADIO_BITRATE_KBPS",
        default_value_t = 192,
        value_parser = clap::value_parser!(u16).range(32..=320)
    )]
    pub bitrate_kbps: u16,

    /// Bytes read from the decoder per chunk.
    #[arg(long, env = "LANRADIO_CHUNK_SIZE", default_value_t = 1024)]
    pub chunk_size: usize,

    /// Chunks a listener may lag behind before it is dropped.
    #[arg(long, env = "LANRADIO_CLIENT_QUEUE", default_value_t = 512)]
    pub client_queue: usize,

    #[arg(long, env = "LANRADIO_START_PAUSED")]
    pub start_paused: bool,

    #[arg(
        long,
        env = "LANRADIO_EXTENSIONS",
        value_delimiter = ',',
        default_value = "mp3,wav,ogg,flac,m4a,aac"
    )]
    pub extensions: Vec<String>,
}

impl Config {
    pub fn station_config(&self) -> StationConfig {
        let mut decoder = DecoderConfig::ffmpeg(self.ffmpeg.clone(), self.codec, self.bitrate_kbps);
        decoder.chunk_size = self.chunk_size.max(1);
        StationConfig {
            decoder,
            client_queue_capacity: self.client_queue.max(1),
            start_paused: self.start_paused,
            ..StationConfig::default()
        }
    }

    pub fn track_source(&self) -> TrackSource {
        TrackSource::with_extensions(self.music_dir.clone(), self.extensions.clone())
    }
}

//! Track source: turns the music folder into an ordered, id-tagged playlist.

use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::error::{Result, StationError};

/// Extensions the decoder is expected to handle.
pub const DEFAULT_EXTENSIONS: &[&str] = &["mp3", "wav", "ogg", "flac", "m4a", "aac"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Track {
    /// Zero-padded scan position ("001", "002", ...). Only stable until the next rescan.
    pub id: String,
    pub path: PathBuf,
    pub name: String,
}

/// What listeners and the control surface get to see of a track.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TrackSummary {
    pub id: String,
    pub name: String,
}

impl Track {
    pub fn summary(&self) -> TrackSummary {
        TrackSummary { id: self.id.clone(), name: self.name.clone() }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct FolderDebug {
    pub music_folder: String,
    pub exists: bool,
    /// Entry count, or the read error as text.
    pub entries_in_folder: serde_json::Value,
    pub allowed_ext: Vec<String>,
    pub hostname: Option<String>,
}

#[derive(Debug, Clone)]
pub struct TrackSource {
    root: PathBuf,
    extensions: Vec<String>,
}

impl TrackSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self::with_extensions(root, DEFAULT_EXTENSIONS.iter().map(|e| e.to_string()).collect())
    }

    pub fn with_extensions(root: impl Into<PathBuf>, extensions: Vec<String>) -> Self {
        let extensions = extensions
            .into_iter()
            .map(|e| e.trim_start_matches('.').to_ascii_lowercase())
            .collect();
        Self { root: root.into(), extensions }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Walks the folder and assigns fresh ids in traversal order.
    ///
    /// Within a directory, files come first (sorted by name), then each
    /// subdirectory (sorted by name) is descended into.
    pub fn scan(&self) -> Result<Vec<Track>> {
        if !self.root.is_dir() {
            return Err(StationError::Scan(format!(
                "music folder does not exist: {}",
                self.root.display()
            )));
        }

        let mut found = Vec::new();
        self.walk(&self.root, &mut found)?;

        let tracks = found
            .into_iter()
            .enumerate()
            .map(|(i, path)| Track {
                id: format!("{:03}", i + 1),
                name: path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default(),
                path,
            })
            .collect();
        Ok(tracks)
    }

    fn walk(&self, dir: &Path, out: &mut Vec<PathBuf>) -> Result<()> {
        let rd = std::fs::read_dir(dir)
            .map_err(|e| StationError::Scan(format!("failed to read_dir({}): {e}", dir.display())))?;

        let mut files = Vec::new();
        let mut subdirs = Vec::new();
        for ent in rd {
            let ent = ent.map_err(|e| StationError::Scan(format!("failed to read_dir entry: {e}")))?;
            let p = ent.path();
            if p.is_dir() {
                subdirs.push(p);
            } else if p.is_file() && self.is_allowed(&p) {
                files.push(p);
            }
        }
        files.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
        subdirs.sort();

        out.extend(files);
        for sub in subdirs {
            self.walk(&sub, out)?;
        }
        Ok(())
    }

    fn is_allowed(&self, path: &Path) -> bool {
        let Some(ext) = path.extension().and_then(|e| e.to_str()) else {
            return false;
        };
        let ext = ext.to_ascii_lowercase();
        self.extensions.iter().any(|a| *a == ext)
    }

    pub fn debug_info(&self) -> FolderDebug {
        let exists = self.root.exists();
        let entries_in_folder = if exists {
            match std::fs::read_dir(&self.root) {
                Ok(rd) => serde_json::Value::from(rd.count()),
                Err(e) => serde_json::Value::from(format!("error: {e}")),
            }
        } else {
            serde_json::Value::from(0)
        };

        FolderDebug {
            music_folder: self.root.display().to_string(),
            exists,
            entries_in_folder,
            allowed_ext: self.extensions.iter().map(|e| format!(".{e}")).collect(),
            hostname: sysinfo::System::host_name(),
        }
    }
}

//! Video and photo files on disk.
//!
//! Artifacts are plain files under `<base_dir>/videos` and
//! `<base_dir>/photos`, named `<kind>_<YYYYMMDD_HHMMSS>.<ext>`. There is no
//! index: listings and retention read the directories each time.

use crate::config::SentryConfig;
use crate::errors::CameraError;
use crate::types::{Artifact, ArtifactKind};
use chrono::{DateTime, Local};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

const FILE_TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";
const PHOTO_EXTENSION: &str = "jpg";

/// Response body of the file listing.
#[derive(Debug, Clone, Default, Serialize)]
pub struct FileListing {
    pub videos: Vec<Artifact>,
    pub photos: Vec<Artifact>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanupReport {
    pub removed: Vec<PathBuf>,
    pub failed: usize,
}

#[derive(Debug, Clone)]
pub struct Catalog {
    videos_dir: PathBuf,
    photos_dir: PathBuf,
    video_extension: String,
}

impl Catalog {
    pub fn new(
        videos_dir: impl Into<PathBuf>,
        photos_dir: impl Into<PathBuf>,
        video_extension: impl Into<String>,
    ) -> Self {
        Self {
            videos_dir: videos_dir.into(),
            photos_dir: photos_dir.into(),
            video_extension: video_extension.into(),
        }
    }

    pub fn from_config(config: &SentryConfig) -> Self {
        Self::new(
            config.videos_dir(),
            config.photos_dir(),
            config.recording.video_extension.clone(),
        )
    }

    pub fn dir(&self, kind: ArtifactKind) -> &Path {
        match kind {
            ArtifactKind::Video => &self.videos_dir,
            ArtifactKind::Photo => &self.photos_dir,
        }
    }

    fn extension(&self, kind: ArtifactKind) -> &str {
        match kind {
            ArtifactKind::Video => &self.video_extension,
            ArtifactKind::Photo => PHOTO_EXTENSION,
        }
    }

    pub fn ensure_dirs(&self) -> Result<(), CameraError> {
        for dir in [&self.videos_dir, &self.photos_dir] {
            fs::create_dir_all(dir).map_err(|e| {
                CameraError::file_io(format!("Cannot create {}: {}", dir.display(), e))
            })?;
        }
        Ok(())
    }

    /// `video_20240101_120000.mp4`, `photo_20240101_120000.jpg`.
    pub fn artifact_name(kind: ArtifactKind, at: DateTime<Local>, extension: &str) -> String {
        format!(
            "{}_{}.{}",
            kind.prefix(),
            at.format(FILE_TIMESTAMP_FORMAT),
            extension
        )
    }

    pub fn new_video_path(&self) -> Result<PathBuf, CameraError> {
        self.new_path(ArtifactKind::Video, Local::now())
    }

    pub fn new_photo_path(&self) -> Result<PathBuf, CameraError> {
        self.new_path(ArtifactKind::Photo, Local::now())
    }

    /// Fresh path for an artifact taken at `at`. Two artifacts within the
    /// same second get `_1`, `_2`, ... suffixes instead of overwriting.
    pub fn new_path(&self, kind: ArtifactKind, at: DateTime<Local>) -> Result<PathBuf, CameraError> {
        let dir = self.dir(kind);
        fs::create_dir_all(dir)?;

        let extension = self.extension(kind);
        let candidate = dir.join(Self::artifact_name(kind, at, extension));
        if !candidate.exists() {
            return Ok(candidate);
        }

        let stem = format!("{}_{}", kind.prefix(), at.format(FILE_TIMESTAMP_FORMAT));
        (1..1000)
            .map(|n| dir.join(format!("{}_{}.{}", stem, n, extension)))
            .find(|path| !path.exists())
            .ok_or_else(|| CameraError::file_io(format!("No free file name for {}", stem)))
    }

    /// Every regular file in the kind's directory, newest first. A missing
    /// directory lists as empty.
    pub fn list(&self, kind: ArtifactKind) -> Result<Vec<Artifact>, CameraError> {
        let dir = self.dir(kind);
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(CameraError::file_io(format!(
                    "Cannot list {}: {}",
                    dir.display(),
                    e
                )))
            }
        };

        let mut artifacts: Vec<Artifact> = entries
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| {
                let metadata = entry.metadata().ok()?;
                if !metadata.is_file() {
                    return None;
                }
                Some(Artifact {
                    name: entry.file_name().to_string_lossy().into_owned(),
                    path: entry.path(),
                    kind,
                    created_at: DateTime::<Local>::from(file_time(&metadata)),
                    size_bytes: metadata.len(),
                })
            })
            .collect();

        artifacts.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.name.cmp(&a.name)));
        Ok(artifacts)
    }

    pub fn listing(&self) -> Result<FileListing, CameraError> {
        Ok(FileListing {
            videos: self.list(ArtifactKind::Video)?,
            photos: self.list(ArtifactKind::Photo)?,
        })
    }

    /// Delete artifacts whose file time is older than `max_age`.
    pub fn cleanup_older_than(&self, max_age: Duration) -> Result<CleanupReport, CameraError> {
        let cutoff = SystemTime::now()
            .checked_sub(max_age)
            .unwrap_or(SystemTime::UNIX_EPOCH);
        let mut report = CleanupReport::default();

        for kind in [ArtifactKind::Video, ArtifactKind::Photo] {
            for artifact in self.list(kind)? {
                if SystemTime::from(artifact.created_at) >= cutoff {
                    continue;
                }
                match fs::remove_file(&artifact.path) {
                    Ok(()) => {
                        log::info!("Removed expired {}: {}", kind.prefix(), artifact.name);
                        report.removed.push(artifact.path);
                    }
                    Err(e) => {
                        log::warn!("Could not remove {}: {}", artifact.path.display(), e);
                        report.failed += 1;
                    }
                }
            }
        }
        Ok(report)
    }

    pub fn cleanup_days(&self, days: u64) -> Result<CleanupReport, CameraError> {
        self.cleanup_older_than(Duration::from_secs(days.saturating_mul(SECS_PER_DAY)))
    }
}

const SECS_PER_DAY: u64 = 24 * 60 * 60;

fn file_time(metadata: &fs::Metadata) -> SystemTime {
    metadata
        .created()
        .or_else(|_| metadata.modified())
        .unwrap_or_else(|_| SystemTime::now())
}

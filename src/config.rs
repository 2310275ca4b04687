//! Configuration management for SentryCam
//!
//! Settings live in a TOML file with one table per subsystem. Any key can be
//! overridden from the environment as `SENTRYCAM__<TABLE>__<KEY>`, e.g.
//! `SENTRYCAM__MOTION__PIXEL_THRESHOLD=2500`.

use crate::errors::CameraError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

const ENV_PREFIX: &str = "SENTRYCAM";

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SentryConfig {
    pub camera: CameraConfig,
    pub motion: MotionConfig,
    pub recording: RecordingConfig,
    pub storage: StorageConfig,
    pub server: ServerConfig,
}

/// Capture device configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CameraConfig {
    /// Device backend: "v4l" for a real camera, "synthetic" for generated frames
    pub backend: String,
    /// V4L2 device index (/dev/videoN)
    pub device_index: u32,
    /// Live preview resolution [width, height]
    pub preview_resolution: [u32; 2],
    /// Low-resolution stream used by the motion sampler
    pub sampling_resolution: [u32; 2],
    /// Recording resolution
    pub video_resolution: [u32; 2],
    /// Still photo resolution
    pub photo_resolution: [u32; 2],
    pub framerate: u32,
    /// JPEG quality for stream frames and photos (1-100)
    pub jpeg_quality: u8,
    /// Settle time after opening the device
    pub warmup_ms: u64,
}

/// Motion detection tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MotionConfig {
    /// Per-pixel intensity change (0-255) that counts as "changed"
    pub delta_threshold: u8,
    /// Number of changed pixels above which motion is reported
    pub pixel_threshold: u32,
    pub sample_interval_ms: u64,
    /// Length of the clip recorded when motion triggers a recording
    pub auto_record_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordingConfig {
    /// Encoder bitrate in bits per second
    pub bitrate: u32,
    /// Duration used for manual recordings that do not specify one
    pub max_duration_secs: u64,
    pub video_extension: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Root directory; videos/ and photos/ are created beneath it
    pub base_dir: PathBuf,
    /// Files older than this many days are removed at startup
    pub cleanup_days: u64,
    /// Presence marker written when started with --auto-start
    pub marker_file: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub bind: String,
    /// Pause between live stream frames
    pub stream_interval_ms: u64,
}

impl Default for SentryConfig {
    fn default() -> Self {
        Self {
            camera: CameraConfig {
                backend: "v4l".to_string(),
                device_index: 0,
                preview_resolution: [640, 480],
                sampling_resolution: [320, 240],
                video_resolution: [1920, 1080],
                photo_resolution: [1920, 1080],
                framerate: 30,
                jpeg_quality: 85,
                warmup_ms: 2000,
            },
            motion: MotionConfig {
                delta_threshold: 30,
                pixel_threshold: 1000,
                sample_interval_ms: 500,
                auto_record_secs: 60,
            },
            recording: RecordingConfig {
                bitrate: 10_000_000,
                max_duration_secs: 300,
                video_extension: "mp4".to_string(),
            },
            storage: StorageConfig {
                base_dir: default_base_dir(),
                cleanup_days: 7,
                marker_file: "system_active.txt".to_string(),
            },
            server: ServerConfig {
                bind: "0.0.0.0:5000".to_string(),
                stream_interval_ms: 100,
            },
        }
    }
}

/// `$HOME/surveillance`, or `./surveillance` when HOME is unset.
fn default_base_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(|home| PathBuf::from(home).join("surveillance"))
        .unwrap_or_else(|| PathBuf::from("surveillance"))
}

impl SentryConfig {
    /// Load defaults, then the TOML file at `path` (if it exists), then
    /// environment overrides.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, CameraError> {
        let path = path.as_ref();
        if path.exists() {
            log::info!("Loading configuration from {:?}", path);
        } else {
            log::info!("Config file not found at {:?}, using defaults", path);
        }

        let defaults = config::Config::try_from(&Self::default())
            .map_err(|e| CameraError::config(format!("Failed to build defaults: {}", e)))?;

        let layered = config::Config::builder()
            .add_source(defaults)
            .add_source(
                config::File::from(path)
                    .format(config::FileFormat::Toml)
                    .required(false),
            )
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| CameraError::config(format!("Failed to read config: {}", e)))?;

        let config: SentryConfig = layered
            .try_deserialize()
            .map_err(|e| CameraError::config(format!("Failed to parse config: {}", e)))?;

        config.validate().map_err(CameraError::config)?;
        Ok(config)
    }

    /// Save configuration to TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), CameraError> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                CameraError::file_io(format!("Failed to create config directory: {}", e))
            })?;
        }

        let toml_string = toml::to_string_pretty(self)
            .map_err(|e| CameraError::config(format!("Failed to serialize config: {}", e)))?;

        fs::write(path, toml_string)
            .map_err(|e| CameraError::file_io(format!("Failed to write config file: {}", e)))?;

        log::info!("Saved configuration to {:?}", path);
        Ok(())
    }

    pub fn default_path() -> PathBuf {
        PathBuf::from("sentrycam.toml")
    }

    /// Load from the default location, falling back to defaults on any error
    pub fn load_or_default() -> Self {
        Self::load(Self::default_path()).unwrap_or_else(|e| {
            log::warn!("Failed to load config, using defaults: {}", e);
            Self::default()
        })
    }

    pub fn validate(&self) -> Result<(), String> {
        let resolutions = [
            ("preview", self.camera.preview_resolution),
            ("sampling", self.camera.sampling_resolution),
            ("video", self.camera.video_resolution),
            ("photo", self.camera.photo_resolution),
        ];
        for (name, [w, h]) in resolutions {
            if w == 0 || h == 0 {
                return Err(format!("Invalid {} resolution {}x{}", name, w, h));
            }
        }
        if self.camera.framerate == 0 || self.camera.framerate > 120 {
            return Err("Framerate must be between 1 and 120".to_string());
        }
        if self.camera.jpeg_quality == 0 || self.camera.jpeg_quality > 100 {
            return Err("JPEG quality must be between 1 and 100".to_string());
        }

        if self.motion.delta_threshold == 0 {
            return Err("Motion delta threshold must be positive".to_string());
        }
        if self.motion.sample_interval_ms == 0 {
            return Err("Motion sample interval must be positive".to_string());
        }
        if self.motion.auto_record_secs == 0 {
            return Err("Motion auto-record duration must be positive".to_string());
        }

        if self.recording.bitrate == 0 {
            return Err("Recording bitrate must be positive".to_string());
        }
        if self.recording.max_duration_secs == 0 {
            return Err("Maximum recording duration must be positive".to_string());
        }
        if self.recording.video_extension.is_empty() {
            return Err("Video extension must not be empty".to_string());
        }

        if self.server.stream_interval_ms == 0 {
            return Err("Stream interval must be positive".to_string());
        }
        Ok(())
    }

    pub fn videos_dir(&self) -> PathBuf {
        self.storage.base_dir.join("videos")
    }

    pub fn photos_dir(&self) -> PathBuf {
        self.storage.base_dir.join("photos")
    }

    pub fn marker_path(&self) -> PathBuf {
        self.storage.base_dir.join(&self.storage.marker_file)
    }
}

impl MotionConfig {
    pub fn sample_interval(&self) -> Duration {
        Duration::from_millis(self.sample_interval_ms)
    }

    pub fn auto_record_duration(&self) -> Duration {
        Duration::from_secs(self.auto_record_secs)
    }
}

impl RecordingConfig {
    pub fn default_duration(&self) -> Duration {
        Duration::from_secs(self.max_duration_secs)
    }
}

impl ServerConfig {
    pub fn stream_interval(&self) -> Duration {
        Duration::from_millis(self.stream_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = SentryConfig::default();
        assert_eq!(config.motion.delta_threshold, 30);
        assert_eq!(config.motion.pixel_threshold, 1000);
        assert_eq!(config.motion.sample_interval(), Duration::from_millis(500));
        assert_eq!(config.motion.auto_record_duration(), Duration::from_secs(60));
        assert_eq!(config.recording.bitrate, 10_000_000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut bad = SentryConfig::default();
        bad.camera.sampling_resolution = [0, 240];
        assert!(bad.validate().is_err());

        let mut bad = SentryConfig::default();
        bad.camera.jpeg_quality = 0;
        assert!(bad.validate().is_err());

        let mut bad = SentryConfig::default();
        bad.motion.sample_interval_ms = 0;
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_derived_paths() {
        let mut config = SentryConfig::default();
        config.storage.base_dir = PathBuf::from("/srv/cam");
        assert_eq!(config.videos_dir(), PathBuf::from("/srv/cam/videos"));
        assert_eq!(config.photos_dir(), PathBuf::from("/srv/cam/photos"));
        assert_eq!(
            config.marker_path(),
            PathBuf::from("/srv/cam/system_active.txt")
        );
    }

    #[test]
    fn test_config_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sentrycam.toml");

        let mut config = SentryConfig::default();
        config.motion.pixel_threshold = 4321;
        config.camera.backend = "synthetic".to_string();
        config.save_to_file(&path).unwrap();

        let loaded = SentryConfig::load(&path).unwrap();
        assert_eq!(loaded.motion.pixel_threshold, 4321);
        assert_eq!(loaded.camera.backend, "synthetic");
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("partial.toml");
        fs::write(&path, "[motion]\nsample_interval_ms = 250\n").unwrap();

        let loaded = SentryConfig::load(&path).unwrap();
        assert_eq!(loaded.motion.sample_interval_ms, 250);
        assert_eq!(loaded.motion.pixel_threshold, 1000);
        assert_eq!(loaded.server.bind, "0.0.0.0:5000");
    }

    #[test]
    fn test_invalid_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        fs::write(&path, "[camera]\njpeg_quality = 0\n").unwrap();

        let err = SentryConfig::load(&path).unwrap_err();
        assert!(err.is(crate::errors::FailureKind::ConfigInvalid));
    }

    #[test]
    fn test_load_nonexistent_file() {
        let loaded = SentryConfig::load("definitely_missing_sentrycam.toml").unwrap();
        assert_eq!(loaded.camera.framerate, 30);
    }

    #[test]
    fn test_config_toml_format() {
        let toml_string = toml::to_string_pretty(&SentryConfig::default()).unwrap();
        assert!(toml_string.contains("[camera]"));
        assert!(toml_string.contains("[motion]"));
        assert!(toml_string.contains("[recording]"));
        assert!(toml_string.contains("[storage]"));
        assert!(toml_string.contains("[server]"));
        assert!(toml_string.contains("pixel_threshold"));
    }
}

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Pixel layout of a frame buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PixelFormat {
    Rgb8,
    Bgr8,
    Gray8,
    /// Planar YUV 4:2:0; only the Y plane is used for intensity.
    Yuv420,
}

impl PixelFormat {
    /// Expected buffer length for a frame of the given size.
    pub fn buffer_len(&self, width: u32, height: u32) -> usize {
        let pixels = width as usize * height as usize;
        match self {
            PixelFormat::Rgb8 | PixelFormat::Bgr8 => pixels * 3,
            PixelFormat::Gray8 => pixels,
            PixelFormat::Yuv420 => pixels + 2 * ((width as usize / 2) * (height as usize / 2)),
        }
    }
}

/// One decoded image sample from the capture device.
#[derive(Debug, Clone)]
pub struct Frame {
    pub sequence: u64,
    pub captured_at: DateTime<Local>,
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub data: Vec<u8>,
}

impl Frame {
    pub fn new(data: Vec<u8>, width: u32, height: u32, format: PixelFormat) -> Self {
        Self {
            sequence: 0,
            captured_at: Local::now(),
            width,
            height,
            format,
            data,
        }
    }

    pub fn with_sequence(mut self, sequence: u64) -> Self {
        self.sequence = sequence;
        self
    }

    /// True when the buffer length matches the declared size and format.
    pub fn is_valid(&self) -> bool {
        self.width > 0
            && self.height > 0
            && self.data.len() == self.format.buffer_len(self.width, self.height)
    }
}

/// The three mutually exclusive uses of the capture device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CameraMode {
    Preview,
    Recording,
    MotionSampling,
}

impl CameraMode {
    /// Whether `capture_frame` may be called in this mode.
    pub fn permits_pull(&self) -> bool {
        matches!(self, CameraMode::Preview | CameraMode::MotionSampling)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CameraMode::Preview => "preview",
            CameraMode::Recording => "recording",
            CameraMode::MotionSampling => "motion_sampling",
        }
    }
}

/// A mode together with the configuration it is entered with.
#[derive(Debug, Clone, PartialEq)]
pub enum ModeParams {
    Preview {
        width: u32,
        height: u32,
    },
    Recording {
        path: PathBuf,
        width: u32,
        height: u32,
        framerate: u32,
        bitrate: u32,
    },
    MotionSampling {
        width: u32,
        height: u32,
    },
}

impl ModeParams {
    pub fn mode(&self) -> CameraMode {
        match self {
            ModeParams::Preview { .. } => CameraMode::Preview,
            ModeParams::Recording { .. } => CameraMode::Recording,
            ModeParams::MotionSampling { .. } => CameraMode::MotionSampling,
        }
    }

    pub fn resolution(&self) -> (u32, u32) {
        match self {
            ModeParams::Preview { width, height }
            | ModeParams::Recording { width, height, .. }
            | ModeParams::MotionSampling { width, height } => (*width, *height),
        }
    }
}

/// What the device reports after a recording sink has been finalized.
#[derive(Debug, Clone, PartialEq)]
pub struct SinkStats {
    pub path: PathBuf,
    pub frames_written: u64,
    pub bytes_written: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactKind {
    Video,
    Photo,
}

impl ArtifactKind {
    pub fn prefix(&self) -> &'static str {
        match self {
            ArtifactKind::Video => "video",
            ArtifactKind::Photo => "photo",
        }
    }
}

/// A video or photo file on disk.
#[derive(Debug, Clone, Serialize)]
pub struct Artifact {
    pub name: String,
    #[serde(skip)]
    pub path: PathBuf,
    #[serde(skip)]
    pub kind: ArtifactKind,
    #[serde(rename = "date", serialize_with = "serialize_local_time")]
    pub created_at: DateTime<Local>,
    #[serde(rename = "size")]
    pub size_bytes: u64,
}

pub(crate) const DISPLAY_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

fn serialize_local_time<S>(time: &DateTime<Local>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    serializer.serialize_str(&time.format(DISPLAY_TIME_FORMAT).to_string())
}

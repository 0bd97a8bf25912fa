//! Core domain types shared by the capture, vision and alerting layers.

use chrono::{DateTime, Utc};
use image::codecs::jpeg::JpegEncoder;
use image::{ExtendedColorType, RgbImage};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

// ============================================================================
// Camera identity
// ============================================================================

/// Stable camera identifier, the key for every per-camera map.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CameraId(String);

impl CameraId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CameraId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CameraId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for CameraId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

// ============================================================================
// Frames
// ============================================================================

/// A decoded video frame in packed RGB24 layout.
///
/// Pixel data is reference counted, so cloning a frame (for the buffer
/// snapshot, the recorder queue or a photo attachment) never copies pixels.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    width: u32,
    height: u32,
    data: Arc<[u8]>,
}

impl Frame {
    /// Wrap raw RGB24 bytes. Returns `None` if the buffer length does not
    /// match `width * height * 3`.
    pub fn from_rgb(width: u32, height: u32, data: Vec<u8>) -> Option<Self> {
        if data.len() != Self::byte_len(width, height) {
            return None;
        }
        Some(Self {
            width,
            height,
            data: data.into(),
        })
    }

    /// A black frame of the given size.
    pub fn blank(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            data: vec![0u8; Self::byte_len(width, height)].into(),
        }
    }

    /// Size in bytes of an RGB24 frame with the given dimensions.
    pub fn byte_len(width: u32, height: u32) -> usize {
        width as usize * height as usize * 3
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Copy into an owned `RgbImage` for drawing.
    pub fn to_image(&self) -> RgbImage {
        RgbImage::from_raw(self.width, self.height, self.data.to_vec())
            .unwrap_or_else(|| RgbImage::new(self.width, self.height))
    }

    pub fn from_image(image: RgbImage) -> Self {
        let (width, height) = image.dimensions();
        Self {
            width,
            height,
            data: image.into_raw().into(),
        }
    }

    /// Encode the frame as a baseline JPEG.
    pub fn encode_jpeg(&self, quality: u8) -> Result<Vec<u8>, image::ImageError> {
        let mut out = Vec::with_capacity(self.data.len() / 8);
        JpegEncoder::new_with_quality(&mut out, quality).encode(
            &self.data,
            self.width,
            self.height,
            ExtendedColorType::Rgb8,
        )?;
        Ok(out)
    }
}

/// A frame together with its arrival instant and a per-source sequence number.
#[derive(Debug, Clone)]
pub struct TimedFrame {
    pub frame: Frame,
    pub captured_at: tokio::time::Instant,
    /// Monotonic per-source counter, lets consumers skip frames they already saw.
    pub sequence: u64,
}

// ============================================================================
// Keypoints
// ============================================================================

/// Normalized 2D image coordinate (0.0..=1.0 on both axes, y grows downwards).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "[f32; 2]", into = "[f32; 2]")]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

impl From<[f32; 2]> for Point {
    fn from([x, y]: [f32; 2]) -> Self {
        Self { x, y }
    }
}

impl From<Point> for [f32; 2] {
    fn from(p: Point) -> Self {
        [p.x, p.y]
    }
}

fn default_score() -> f32 {
    1.0
}

/// Joint positions for one detected subject, as produced by the pose oracle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Keypoints {
    pub left_shoulder: Point,
    pub right_shoulder: Point,
    pub left_hip: Point,
    pub right_hip: Point,
    pub left_knee: Point,
    pub right_knee: Point,
    pub left_ankle: Point,
    pub right_ankle: Point,
    /// Detection confidence reported by the oracle.
    #[serde(default = "default_score")]
    pub score: f32,
}

impl Keypoints {
    pub fn joints(&self) -> [Point; 8] {
        [
            self.left_shoulder,
            self.right_shoulder,
            self.left_hip,
            self.right_hip,
            self.left_knee,
            self.right_knee,
            self.left_ankle,
            self.right_ankle,
        ]
    }
}

// ============================================================================
// Posture and fall events
// ============================================================================

/// Discrete body pose classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PostureLabel {
    Standing,
    Sitting,
    Crouching,
    Fallen,
    Unknown,
}

impl fmt::Display for PostureLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PostureLabel::Standing => "standing",
            PostureLabel::Sitting => "sitting",
            PostureLabel::Crouching => "crouching",
            PostureLabel::Fallen => "fallen",
            PostureLabel::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// Events emitted by the two-stage fall confirmation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FallEvent {
    PossibleFall,
    ConfirmedFall,
    Recovery,
}

impl fmt::Display for FallEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FallEvent::PossibleFall => "possible fall",
            FallEvent::ConfirmedFall => "confirmed fall",
            FallEvent::Recovery => "recovery",
        };
        f.write_str(s)
    }
}

// ============================================================================
// Alert records
// ============================================================================

/// What an alert history entry was raised for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    /// Duration-gated fall alert (text plus optional photo).
    Fall,
    /// Finalized evidence video sent after recovery or teardown.
    VideoEvidence,
}

impl fmt::Display for AlertKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AlertKind::Fall => f.write_str("fall detected"),
            AlertKind::VideoEvidence => f.write_str("video evidence"),
        }
    }
}

/// Overall outcome of one dispatch attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchStatus {
    /// At least one recipient accepted the notification.
    Sent,
    /// Every recipient failed, or none were configured.
    Failed,
}

/// One entry of the bounded alert history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertRecord {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub camera: CameraId,
    pub camera_name: String,
    pub event_type: AlertKind,
    pub status: DispatchStatus,
    /// Per-recipient outcomes, `recipient: outcome` joined with `; `.
    pub detail: String,
    pub evidence_path: Option<PathBuf>,
}

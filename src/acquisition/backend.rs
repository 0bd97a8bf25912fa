//! Video source abstraction.
//!
//! A [`CaptureBackend`] opens sources; each opened [`Capture`] yields decoded
//! frames until it fails or is released. Reconnection, pacing and the
//! watchdog live in [`FrameSource`](super::FrameSource), not here.

use super::{CaptureError, SourceSpec};
use crate::types::Frame;
use async_trait::async_trait;

/// Opens camera sources.
#[async_trait]
pub trait CaptureBackend: Send + Sync + 'static {
    /// Open a source. Fails with [`CaptureError::Open`] or
    /// [`CaptureError::Timeout`] when the source is unreachable.
    async fn open(&self, spec: &SourceSpec) -> Result<Box<dyn Capture>, CaptureError>;

    /// Human-readable name for logging (e.g. "ffmpeg").
    fn backend_name(&self) -> &str;
}

/// One open camera connection.
#[async_trait]
pub trait Capture: Send + 'static {
    /// Read the next decoded frame.
    async fn read_frame(&mut self) -> Result<Frame, CaptureError>;

    /// Release the underlying device or stream handle. Must be safe to call
    /// more than once.
    async fn release(&mut self);
}

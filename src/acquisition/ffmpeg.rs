//! ffmpeg subprocess capture backend.
//!
//! Spawns `ffmpeg` per connection and reads raw RGB24 frames from its stdout.
//! Network sources are opened low-latency (RTSP over TCP, no input
//! buffering); local devices prefer MJPEG input and fall back to the
//! device's default format. A source counts as open once the first frame
//! arrives within the probe timeout.

use async_trait::async_trait;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::process::{Child, ChildStdout, Command};

use super::backend::{Capture, CaptureBackend};
use super::{CaptureError, SourceDescriptor, SourceSpec};
use crate::config::CaptureConfig;
use crate::types::Frame;

/// Capture backend driving an external ffmpeg binary.
#[derive(Debug, Clone)]
pub struct FfmpegBackend {
    ffmpeg_path: String,
    probe_timeout: Duration,
}

impl FfmpegBackend {
    pub fn new(ffmpeg_path: impl Into<String>, probe_timeout: Duration) -> Self {
        Self {
            ffmpeg_path: ffmpeg_path.into(),
            probe_timeout,
        }
    }

    pub fn from_config(config: &CaptureConfig) -> Self {
        Self::new(config.ffmpeg_path.clone(), config.probe_timeout())
    }

    fn input_args(descriptor: &SourceDescriptor, prefer_mjpeg: bool) -> Vec<String> {
        let mut args: Vec<String> = Vec::new();
        match descriptor {
            SourceDescriptor::Url(url) => {
                if url.starts_with("rtsp://") || url.starts_with("rtsps://") {
                    args.extend(["-rtsp_transport", "tcp"].map(String::from));
                }
                args.extend(
                    ["-fflags", "nobuffer", "-flags", "low_delay", "-probesize", "32768"].map(String::from),
                );
                args.push("-i".to_string());
                args.push(url.clone());
            }
            SourceDescriptor::Device(index) => {
                #[cfg(target_os = "macos")]
                {
                    let _ = prefer_mjpeg;
                    args.extend(["-f", "avfoundation", "-framerate", "30"].map(String::from));
                    args.push("-i".to_string());
                    args.push(index.to_string());
                }
                #[cfg(not(target_os = "macos"))]
                {
                    args.extend(["-f", "v4l2"].map(String::from));
                    if prefer_mjpeg {
                        args.extend(["-input_format", "mjpeg"].map(String::from));
                    }
                    args.push("-i".to_string());
                    args.push(format!("/dev/video{index}"));
                }
            }
        }
        args
    }

    fn output_args(spec: &SourceSpec) -> Vec<String> {
        vec![
            "-an".to_string(),
            "-vf".to_string(),
            format!("scale={}:{}", spec.width, spec.height),
            "-pix_fmt".to_string(),
            "rgb24".to_string(),
            "-f".to_string(),
            "rawvideo".to_string(),
            "pipe:1".to_string(),
        ]
    }

    /// Spawn ffmpeg and wait for the first frame.
    async fn spawn_and_probe(
        &self,
        spec: &SourceSpec,
        prefer_mjpeg: bool,
    ) -> Result<FfmpegCapture, CaptureError> {
        let mut cmd = Command::new(&self.ffmpeg_path);
        cmd.args(["-hide_banner", "-loglevel", "error", "-nostdin"])
            .args(Self::input_args(&spec.descriptor, prefer_mjpeg))
            .args(Self::output_args(spec));

        let mut child = cmd
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                CaptureError::Open(format!(
                    "failed to spawn '{}': {}. Is ffmpeg installed?",
                    self.ffmpeg_path, e
                ))
            })?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| CaptureError::Open("failed to capture ffmpeg stdout".to_string()))?;

        let mut capture = FfmpegCapture {
            child: Some(child),
            stdout,
            width: spec.width,
            height: spec.height,
            pending: None,
        };

        match tokio::time::timeout(self.probe_timeout, capture.read_raw()).await {
            Ok(Ok(frame)) => {
                capture.pending = Some(frame);
                Ok(capture)
            }
            Ok(Err(e)) => {
                capture.release().await;
                Err(CaptureError::Open(format!("{}: {}", spec.descriptor, e)))
            }
            Err(_) => {
                capture.release().await;
                Err(CaptureError::Timeout)
            }
        }
    }
}

#[async_trait]
impl CaptureBackend for FfmpegBackend {
    async fn open(&self, spec: &SourceSpec) -> Result<Box<dyn Capture>, CaptureError> {
        tracing::debug!(source = %spec.descriptor, width = spec.width, height = spec.height, "Opening source via ffmpeg");

        match &spec.descriptor {
            SourceDescriptor::Device(_) => match self.spawn_and_probe(spec, true).await {
                Ok(capture) => Ok(Box::new(capture)),
                Err(e) => {
                    tracing::debug!(source = %spec.descriptor, error = %e, "MJPEG input unavailable, retrying with device default format");
                    let capture = self.spawn_and_probe(spec, false).await?;
                    Ok(Box::new(capture))
                }
            },
            SourceDescriptor::Url(_) => {
                let capture = self.spawn_and_probe(spec, false).await?;
                Ok(Box::new(capture))
            }
        }
    }

    fn backend_name(&self) -> &str {
        "ffmpeg"
    }
}

/// One running ffmpeg process.
struct FfmpegCapture {
    child: Option<Child>,
    stdout: ChildStdout,
    width: u32,
    height: u32,
    /// First frame, read while probing.
    pending: Option<Frame>,
}

impl FfmpegCapture {
    async fn read_raw(&mut self) -> Result<Frame, CaptureError> {
        let mut buf = vec![0u8; Frame::byte_len(self.width, self.height)];
        self.stdout.read_exact(&mut buf).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::UnexpectedEof {
                CaptureError::Closed
            } else {
                CaptureError::Io(e)
            }
        })?;
        Frame::from_rgb(self.width, self.height, buf)
            .ok_or_else(|| CaptureError::Decode("short frame".to_string()))
    }
}

#[async_trait]
impl Capture for FfmpegCapture {
    async fn read_frame(&mut self) -> Result<Frame, CaptureError> {
        if self.child.is_none() {
            return Err(CaptureError::Closed);
        }
        if let Some(frame) = self.pending.take() {
            return Ok(frame);
        }
        self.read_raw().await
    }

    async fn release(&mut self) {
        if let Some(mut child) = self.child.take() {
            let _ = child.kill().await;
        }
        self.pending = None;
    }
}

//! Per-episode evidence recording.
//!
//! A recording is opened on the first alert of an episode and fed every
//! subsequent frame for that camera. Frames cross to a blocking writer thread
//! through a bounded queue; a full queue drops the frame rather than stalling
//! the frame path. Dropping the [`ActiveRecording`] closes the queue, which
//! finalizes the file.

use chrono::Utc;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::types::{CameraId, Frame};

#[derive(Debug, thiserror::Error)]
pub enum RecordingError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Frame encode failed: {0}")]
    Encode(#[from] image::ImageError),
    #[error("Frame is {got:?}, recording is {expected:?}")]
    SizeMismatch { expected: (u32, u32), got: (u32, u32) },
    #[error("Writer thread failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Sink for one evidence file. Runs on a blocking thread.
pub trait EvidenceWriter: Send + 'static {
    fn write_frame(&mut self, frame: &Frame) -> Result<(), RecordingError>;
    fn finish(self: Box<Self>) -> Result<(), RecordingError>;
}

pub trait EvidenceWriterFactory: Send + Sync + 'static {
    fn create(&self, path: &Path, width: u32, height: u32) -> Result<Box<dyn EvidenceWriter>, RecordingError>;

    /// File extension, without the dot.
    fn extension(&self) -> &str;
}

// ============================================================================
// Motion-JPEG writer
// ============================================================================

/// Concatenated JPEG frames, playable by ffmpeg/VLC as `.mjpeg`.
pub struct MjpegWriter {
    out: BufWriter<File>,
    size: (u32, u32),
    quality: u8,
}

impl EvidenceWriter for MjpegWriter {
    fn write_frame(&mut self, frame: &Frame) -> Result<(), RecordingError> {
        if frame.dimensions() != self.size {
            return Err(RecordingError::SizeMismatch {
                expected: self.size,
                got: frame.dimensions(),
            });
        }
        let jpeg = frame.encode_jpeg(self.quality)?;
        self.out.write_all(&jpeg)?;
        Ok(())
    }

    fn finish(mut self: Box<Self>) -> Result<(), RecordingError> {
        self.out.flush()?;
        self.out.get_ref().sync_all()?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
pub struct MjpegWriterFactory {
    pub quality: u8,
}

impl EvidenceWriterFactory for MjpegWriterFactory {
    fn create(&self, path: &Path, width: u32, height: u32) -> Result<Box<dyn EvidenceWriter>, RecordingError> {
        // Never truncate an earlier episode's evidence
        let file = OpenOptions::new().write(true).create_new(true).open(path)?;
        Ok(Box::new(MjpegWriter {
            out: BufWriter::new(file),
            size: (width, height),
            quality: self.quality,
        }))
    }

    fn extension(&self) -> &str {
        "mjpeg"
    }
}

// ============================================================================
// Recorder
// ============================================================================

/// Outcome of a finalized recording.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordingSummary {
    pub path: PathBuf,
    pub frames: u64,
    pub skipped: u64,
    pub duration: Duration,
}

/// Opens evidence files for cameras.
#[derive(Clone)]
pub struct EvidenceRecorder {
    factory: Arc<dyn EvidenceWriterFactory>,
    dir: PathBuf,
    queue_depth: usize,
    sequence: Arc<AtomicU64>,
}

impl EvidenceRecorder {
    pub fn new(factory: Arc<dyn EvidenceWriterFactory>, dir: impl Into<PathBuf>, queue_depth: usize) -> Self {
        Self {
            factory,
            dir: dir.into(),
            queue_depth: queue_depth.max(1),
            sequence: Arc::new(AtomicU64::new(0)),
        }
    }

    /// `<camera>_<YYYYmmdd_HHMMSS_mmm>_<n>.<ext>` inside the evidence
    /// directory. `n` counts recordings started by this recorder, so two
    /// episodes inside the same millisecond still get distinct files.
    pub fn path_for(&self, camera: &CameraId) -> PathBuf {
        let stamp = Utc::now().format("%Y%m%d_%H%M%S_%3f");
        let n = self.sequence.fetch_add(1, Ordering::Relaxed);
        self.dir.join(format!(
            "{}_{}_{}.{}",
            file_safe(camera.as_str()),
            stamp,
            n,
            self.factory.extension()
        ))
    }

    /// Open a writer sized to `first` and queue `first` as its first frame.
    ///
    /// Returns the hot-path handle and the job that drains the queue; the
    /// caller runs the job off the frame path.
    pub fn start(&self, camera: &CameraId, first: &Frame) -> Result<(ActiveRecording, RecordingJob), RecordingError> {
        std::fs::create_dir_all(&self.dir)?;
        let path = self.path_for(camera);
        let (width, height) = first.dimensions();
        let writer = self.factory.create(&path, width, height)?;

        let (sender, receiver) = mpsc::channel(self.queue_depth);
        let started_at = Instant::now();
        let mut active = ActiveRecording {
            camera: camera.clone(),
            sender,
            path: path.clone(),
            started_at,
            frames_queued: 0,
            frames_dropped: 0,
        };
        active.push(first);

        info!(camera = %camera, path = %path.display(), width, height, "Evidence recording started");
        let job = RecordingJob {
            writer,
            receiver,
            path,
            started_at,
        };
        Ok((active, job))
    }
}

/// Hot-path side of a recording. Dropping it finalizes the file.
#[derive(Debug)]
pub struct ActiveRecording {
    camera: CameraId,
    sender: mpsc::Sender<Frame>,
    path: PathBuf,
    started_at: Instant,
    frames_queued: u64,
    frames_dropped: u64,
}

impl ActiveRecording {
    /// Queue a frame without blocking. Dropped if the writer is behind.
    pub fn push(&mut self, frame: &Frame) {
        match self.sender.try_send(frame.clone()) {
            Ok(()) => self.frames_queued += 1,
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.frames_dropped += 1;
                if self.frames_dropped == 1 || self.frames_dropped % 100 == 0 {
                    debug!(camera = %self.camera, dropped = self.frames_dropped, "Evidence writer behind, dropping frames");
                }
            }
            Err(mpsc::error::TrySendError::Closed(_)) => self.frames_dropped += 1,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn started_at(&self) -> Instant {
        self.started_at
    }

    pub fn frames_queued(&self) -> u64 {
        self.frames_queued
    }

    /// Close the queue. The writer finishes whatever is already queued.
    pub fn stop(self, reason: &str) {
        info!(
            camera = %self.camera,
            path = %self.path.display(),
            queued = self.frames_queued,
            dropped = self.frames_dropped,
            reason,
            "Evidence recording stopped"
        );
    }
}

/// Writer side of a recording: drains the queue on a blocking thread.
pub struct RecordingJob {
    writer: Box<dyn EvidenceWriter>,
    receiver: mpsc::Receiver<Frame>,
    path: PathBuf,
    started_at: Instant,
}

impl RecordingJob {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write frames until the queue closes, then finalize the file.
    pub async fn run(self) -> Result<RecordingSummary, RecordingError> {
        tokio::task::spawn_blocking(move || self.drain()).await?
    }

    fn drain(self) -> Result<RecordingSummary, RecordingError> {
        let RecordingJob {
            mut writer,
            mut receiver,
            path,
            started_at,
        } = self;
        let mut frames = 0u64;
        let mut skipped = 0u64;

        while let Some(frame) = receiver.blocking_recv() {
            match writer.write_frame(&frame) {
                Ok(()) => frames += 1,
                Err(RecordingError::SizeMismatch { expected, got }) => {
                    skipped += 1;
                    debug!(path = %path.display(), ?expected, ?got, "Skipping frame with mismatched size");
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Evidence write failed, closing recording");
                    receiver.close();
                    break;
                }
            }
        }

        writer.finish()?;
        Ok(RecordingSummary {
            path,
            frames,
            skipped,
            duration: started_at.elapsed(),
        })
    }
}

/// Replace anything outside `[A-Za-z0-9_-]` so ids are safe in file names.
pub(crate) fn file_safe(id: &str) -> String {
    id.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recorder(dir: &Path, depth: usize) -> EvidenceRecorder {
        EvidenceRecorder::new(Arc::new(MjpegWriterFactory { quality: 70 }), dir, depth)
    }

    #[tokio::test]
    async fn test_recording_writes_frames_until_stopped() {
        let dir = tempfile::tempdir().expect("tempdir");
        let rec = recorder(dir.path(), 16);
        let cam = CameraId::new("hall way");
        let (mut active, job) = rec.start(&cam, &Frame::blank(16, 16)).expect("start");

        let name = active.path().file_name().and_then(|n| n.to_str()).unwrap_or_default().to_string();
        assert!(name.starts_with("hall_way_") && name.ends_with(".mjpeg"), "{name}");

        let handle = tokio::spawn(job.run());
        active.push(&Frame::blank(16, 16));
        active.push(&Frame::blank(8, 8));
        active.stop("test");

        let summary = handle.await.expect("join").expect("finalized");
        assert_eq!(summary.frames, 2);
        assert_eq!(summary.skipped, 1);

        let bytes = std::fs::read(&summary.path).expect("file exists");
        assert_eq!(&bytes[..2], &[0xFF, 0xD8]);
    }

    #[tokio::test]
    async fn test_full_queue_drops_instead_of_blocking() {
        let dir = tempfile::tempdir().expect("tempdir");
        let rec = recorder(dir.path(), 2);
        let (mut active, job) = rec.start(&CameraId::new("c"), &Frame::blank(4, 4)).expect("start");

        // Writer not running yet: the queue holds the first frame plus one more
        for _ in 0..5 {
            active.push(&Frame::blank(4, 4));
        }
        assert_eq!(active.frames_queued(), 2);
        active.stop("test");

        let summary = job.run().await.expect("finalized");
        assert_eq!(summary.frames, 2);
    }

    #[tokio::test]
    async fn test_back_to_back_episodes_get_separate_files() {
        let dir = tempfile::tempdir().expect("tempdir");
        let rec = recorder(dir.path(), 4);
        let cam = CameraId::new("kitchen");

        let (first, first_job) = rec.start(&cam, &Frame::blank(4, 4)).expect("first start");
        let (second, second_job) = rec.clone().start(&cam, &Frame::blank(4, 4)).expect("second start");
        assert_ne!(first.path(), second.path());

        first.stop("test");
        second.stop("test");
        let a = first_job.run().await.expect("first finalized");
        let b = second_job.run().await.expect("second finalized");
        assert_eq!((a.frames, b.frames), (1, 1));
        assert!(std::fs::metadata(&a.path).expect("first kept").len() > 0);
        assert!(std::fs::metadata(&b.path).expect("second kept").len() > 0);
    }

    #[test]
    fn test_mjpeg_writer_refuses_to_overwrite() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("taken.mjpeg");
        std::fs::write(&path, b"earlier evidence").expect("write");
        assert!(MjpegWriterFactory { quality: 70 }.create(&path, 4, 4).is_err());
        assert_eq!(std::fs::read(&path).expect("read"), b"earlier evidence");
    }

    #[test]
    fn test_open_failure_is_reported() {
        let dir = tempfile::tempdir().expect("tempdir");
        let blocker = dir.path().join("not-a-dir");
        std::fs::write(&blocker, b"x").expect("write");
        let rec = recorder(&blocker, 4);
        assert!(rec.start(&CameraId::new("c"), &Frame::blank(4, 4)).is_err());
    }
}

//! Per-camera consumer loop.
//!
//! Polls the camera's latest frame at the configured rate, skips frames it
//! has already processed, and pushes new ones through
//! [`Monitor::process_frame_at`]. Runs until cancelled or the camera is
//! removed from the monitor.

use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::monitor::{Monitor, MonitorError};
use crate::alerts::AlertOutcome;
use crate::config::defaults::STATS_LOG_INTERVAL_SECS;
use crate::types::CameraId;

/// Counters for one consumer loop run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoopStats {
    pub frames_processed: u64,
    /// Ticks where no frame was available (source disconnected).
    pub idle_ticks: u64,
    /// Ticks where the latest frame had already been processed.
    pub repeated_frames: u64,
    pub fall_events: u64,
    pub alerts_fired: u64,
}

pub struct ProcessingLoop {
    monitor: Arc<Monitor>,
    camera: CameraId,
    period: Duration,
    cancel: CancellationToken,
}

impl ProcessingLoop {
    pub fn new(monitor: Arc<Monitor>, camera: CameraId, fps: u32, cancel: CancellationToken) -> Self {
        Self {
            monitor,
            camera,
            period: Duration::from_secs_f64(1.0 / fps.max(1) as f64),
            cancel,
        }
    }

    pub async fn run(self) -> LoopStats {
        let mut stats = LoopStats::default();
        let mut ticker = tokio::time::interval(self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut last_sequence: Option<u64> = None;
        let mut window_start = Instant::now();
        let mut window_frames = 0u64;
        let report_every = Duration::from_secs(STATS_LOG_INTERVAL_SECS);

        info!(camera = %self.camera, period_ms = self.period.as_millis() as u64, "Consumer loop starting");

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    debug!(camera = %self.camera, "Consumer loop cancelled");
                    break;
                }
                _ = ticker.tick() => {}
            }

            let Some(timed) = self.monitor.read_frame(&self.camera) else {
                if !self.monitor.has_camera(&self.camera) {
                    info!(camera = %self.camera, "Camera removed, consumer loop exiting");
                    break;
                }
                stats.idle_ticks += 1;
                continue;
            };

            if last_sequence == Some(timed.sequence) {
                stats.repeated_frames += 1;
                continue;
            }
            last_sequence = Some(timed.sequence);

            let result = tokio::select! {
                _ = self.cancel.cancelled() => {
                    debug!(camera = %self.camera, "Consumer loop cancelled mid-frame");
                    break;
                }
                result = self.monitor.process_frame_at(&self.camera, &timed.frame, Instant::now()) => result,
            };

            match result {
                Ok(processed) => {
                    stats.frames_processed += 1;
                    window_frames += 1;
                    if processed.event.is_some() {
                        stats.fall_events += 1;
                    }
                    if processed.outcome == AlertOutcome::Fired {
                        stats.alerts_fired += 1;
                    }
                }
                Err(MonitorError::UnknownCamera(_)) => {
                    info!(camera = %self.camera, "Camera removed, consumer loop exiting");
                    break;
                }
                Err(e) => warn!(camera = %self.camera, error = %e, "Frame processing failed"),
            }

            let elapsed = window_start.elapsed();
            if elapsed >= report_every {
                let connection = self
                    .monitor
                    .status()
                    .into_iter()
                    .find(|s| s.id == self.camera)
                    .map(|s| s.connection);
                info!(
                    camera = %self.camera,
                    fps = window_frames as f64 / elapsed.as_secs_f64(),
                    processed = stats.frames_processed,
                    idle_ticks = stats.idle_ticks,
                    alerts = stats.alerts_fired,
                    reconnects = connection.as_ref().map_or(0, |c| c.reconnects),
                    "Camera throughput"
                );
                window_start = Instant::now();
                window_frames = 0;
            }
        }

        info!(
            camera = %self.camera,
            processed = stats.frames_processed,
            fall_events = stats.fall_events,
            alerts = stats.alerts_fired,
            "Consumer loop stopped"
        );
        stats
    }
}

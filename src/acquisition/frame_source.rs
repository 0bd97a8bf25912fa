//! Resilient per-camera frame source.
//!
//! One background task per camera owns the connection. It reconnects with
//! capped exponential backoff, tears the connection down when no frame has
//! arrived within the stall timeout, and publishes each decoded frame into a
//! single-slot buffer. Consumers never block on I/O: [`FrameSource::read`]
//! returns a snapshot of the latest frame, or `None` while disconnected.

use arc_swap::{ArcSwap, ArcSwapOption};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::backend::{Capture, CaptureBackend};
use super::{CaptureError, SourceSpec};
use crate::config::CaptureConfig;
use crate::types::{CameraId, TimedFrame};

// ============================================================================
// Backoff
// ============================================================================

/// Reconnect delay schedule: starts at `floor`, doubles per failure, capped.
#[derive(Debug, Clone)]
pub struct Backoff {
    floor: Duration,
    cap: Duration,
    current: Duration,
}

impl Backoff {
    pub fn new(floor: Duration, cap: Duration) -> Self {
        Self {
            floor,
            cap: cap.max(floor),
            current: floor,
        }
    }

    /// Delay to wait before the next attempt. Advances the schedule.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = self.current.saturating_mul(2).min(self.cap);
        delay
    }

    pub fn current(&self) -> Duration {
        self.current
    }

    pub fn reset(&mut self) {
        self.current = self.floor;
    }
}

// ============================================================================
// Connection status
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

/// Snapshot of a source's connection health.
#[derive(Debug, Clone, Default)]
pub struct ConnectionStatus {
    pub state: ConnectionState,
    /// Arrival time of the most recent frame on the current connection.
    pub last_frame_at: Option<Instant>,
    /// Delay the loop will wait (or is waiting) before the next open attempt.
    pub backoff: Duration,
    /// Successful opens after the first one.
    pub reconnects: u64,
    /// Frames published since start.
    pub frames: u64,
}

impl ConnectionStatus {
    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }
}

// ============================================================================
// Frame source
// ============================================================================

/// State shared between the [`FrameSource`] handle and its capture loop.
struct Shared {
    camera: CameraId,
    latest: ArcSwapOption<TimedFrame>,
    status: ArcSwap<ConnectionStatus>,
    /// Open connection, if any. Held by the loop across reads; `stop()` takes
    /// it after the loop has exited (or been aborted) and releases it.
    capture: tokio::sync::Mutex<Option<Box<dyn Capture>>>,
}

impl Shared {
    async fn release_capture(&self) {
        if let Some(mut capture) = self.capture.lock().await.take() {
            capture.release().await;
        }
    }
}

struct Worker {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Latest-frame view of one camera with a background reconnecting reader.
pub struct FrameSource {
    shared: Arc<Shared>,
    spec: SourceSpec,
    backend: Arc<dyn CaptureBackend>,
    config: CaptureConfig,
    worker: Mutex<Option<Worker>>,
}

impl FrameSource {
    pub fn new(
        camera: CameraId,
        spec: SourceSpec,
        backend: Arc<dyn CaptureBackend>,
        config: CaptureConfig,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                camera,
                latest: ArcSwapOption::empty(),
                status: ArcSwap::from_pointee(ConnectionStatus::default()),
                capture: tokio::sync::Mutex::new(None),
            }),
            spec,
            backend,
            config,
            worker: Mutex::new(None),
        }
    }

    pub fn camera(&self) -> &CameraId {
        &self.shared.camera
    }

    pub fn spec(&self) -> &SourceSpec {
        &self.spec
    }

    fn lock_worker(&self) -> MutexGuard<'_, Option<Worker>> {
        self.worker.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Spawn the capture loop. Calling this while the loop runs is a no-op.
    /// Must be called from within a Tokio runtime.
    pub fn start(&self) {
        let mut worker = self.lock_worker();
        if worker.as_ref().is_some_and(|w| !w.handle.is_finished()) {
            debug!(camera = %self.shared.camera, "Frame source already running");
            return;
        }

        let cancel = CancellationToken::new();
        let capture_loop = CaptureLoop {
            shared: Arc::clone(&self.shared),
            spec: self.spec.clone(),
            backend: Arc::clone(&self.backend),
            config: self.config.clone(),
            cancel: cancel.clone(),
        };
        let handle = tokio::spawn(capture_loop.run());
        *worker = Some(Worker { cancel, handle });
    }

    pub fn is_running(&self) -> bool {
        self.lock_worker()
            .as_ref()
            .is_some_and(|w| !w.handle.is_finished())
    }

    /// Latest frame, or `None` while disconnected. Never blocks on I/O.
    pub fn read(&self) -> Option<TimedFrame> {
        self.shared.latest.load_full().map(|f| (*f).clone())
    }

    pub fn status(&self) -> ConnectionStatus {
        (**self.shared.status.load()).clone()
    }

    /// Signal the loop, wait up to the stop timeout, then release the
    /// connection whether or not the loop acknowledged.
    pub async fn stop(&self) {
        let worker = self.lock_worker().take();

        if let Some(Worker { cancel, mut handle }) = worker {
            cancel.cancel();
            match tokio::time::timeout(self.config.stop_timeout(), &mut handle).await {
                Ok(_) => debug!(camera = %self.shared.camera, "Capture loop stopped"),
                Err(_) => {
                    warn!(
                        camera = %self.shared.camera,
                        timeout_ms = self.config.stop_timeout().as_millis() as u64,
                        "Capture loop did not stop in time, aborting"
                    );
                    handle.abort();
                    let _ = handle.await;
                }
            }
        }

        self.shared.release_capture().await;
        self.shared.latest.store(None);
        let previous = self.status();
        self.shared.status.store(Arc::new(ConnectionStatus {
            state: ConnectionState::Disconnected,
            last_frame_at: None,
            ..previous
        }));
    }

    /// One-shot probe: open the source, read a frame, release.
    pub async fn test_connection(
        backend: &dyn CaptureBackend,
        spec: &SourceSpec,
        timeout: Duration,
    ) -> bool {
        let attempt = async {
            let mut capture = backend.open(spec).await?;
            let read = capture.read_frame().await;
            capture.release().await;
            read?;
            Ok::<(), CaptureError>(())
        };

        match tokio::time::timeout(timeout, attempt).await {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                info!(source = %spec.descriptor, error = %e, "Connection test failed");
                false
            }
            Err(_) => {
                info!(source = %spec.descriptor, timeout_secs = timeout.as_secs_f64(), "Connection test timed out");
                false
            }
        }
    }
}

impl Drop for FrameSource {
    fn drop(&mut self) {
        if let Some(worker) = self.lock_worker().take() {
            worker.cancel.cancel();
        }
    }
}

// ============================================================================
// Capture loop
// ============================================================================

struct CaptureLoop {
    shared: Arc<Shared>,
    spec: SourceSpec,
    backend: Arc<dyn CaptureBackend>,
    config: CaptureConfig,
    cancel: CancellationToken,
}

impl CaptureLoop {
    async fn run(self) {
        let mut backoff = Backoff::new(self.config.initial_backoff(), self.config.max_backoff());
        let mut status = ConnectionStatus::default();
        let mut sequence: u64 = 0;
        let mut ever_connected = false;
        let stall = self.config.stall_timeout();

        info!(
            camera = %self.shared.camera,
            source = %self.spec.descriptor,
            backend = self.backend.backend_name(),
            "Capture loop starting"
        );

        while !self.cancel.is_cancelled() {
            let connected = self.shared.capture.lock().await.is_some();

            if !connected {
                status.state = ConnectionState::Connecting;
                self.publish(&status);

                let opened = tokio::select! {
                    _ = self.cancel.cancelled() => break,
                    result = self.backend.open(&self.spec) => result,
                };

                match opened {
                    Ok(capture) => {
                        *self.shared.capture.lock().await = Some(capture);
                        backoff.reset();
                        if ever_connected {
                            status.reconnects += 1;
                        }
                        ever_connected = true;
                        status.state = ConnectionState::Connected;
                        status.last_frame_at = Some(Instant::now());
                        status.backoff = backoff.current();
                        self.publish(&status);
                        info!(
                            camera = %self.shared.camera,
                            reconnects = status.reconnects,
                            "Source connected"
                        );
                    }
                    Err(e) => {
                        let delay = backoff.next_delay();
                        status.state = ConnectionState::Disconnected;
                        status.backoff = delay;
                        self.publish(&status);
                        warn!(
                            camera = %self.shared.camera,
                            error = %e,
                            retry_in_secs = delay.as_secs_f64(),
                            "Source open failed, backing off"
                        );
                        if self.sleep_or_cancel(delay).await {
                            break;
                        }
                        continue;
                    }
                }
            }

            // Watchdog: a connected source that went quiet is torn down.
            let idle = status.last_frame_at.map(|t| t.elapsed()).unwrap_or_default();
            if idle >= stall {
                warn!(
                    camera = %self.shared.camera,
                    idle_secs = idle.as_secs_f64(),
                    threshold_secs = stall.as_secs_f64(),
                    "No frames received, forcing reconnect"
                );
                self.disconnect(&mut status).await;
                continue;
            }
            let budget = stall - idle;

            let read = {
                let mut guard = self.shared.capture.lock().await;
                let Some(capture) = guard.as_mut() else {
                    continue;
                };
                tokio::select! {
                    _ = self.cancel.cancelled() => break,
                    result = tokio::time::timeout(budget, capture.read_frame()) => result,
                }
            };

            match read {
                Ok(Ok(frame)) => {
                    sequence += 1;
                    let now = Instant::now();
                    self.shared.latest.store(Some(Arc::new(TimedFrame {
                        frame,
                        captured_at: now,
                        sequence,
                    })));
                    status.last_frame_at = Some(now);
                    status.frames += 1;
                    self.publish(&status);
                }
                Ok(Err(e)) => {
                    warn!(camera = %self.shared.camera, error = %e, "Frame read failed, reconnecting");
                    self.disconnect(&mut status).await;
                    if self.sleep_or_cancel(self.config.read_failure_pause()).await {
                        break;
                    }
                }
                // Budget exhausted; the watchdog handles it on the next pass.
                Err(_) => {}
            }
        }

        self.disconnect(&mut status).await;
        info!(camera = %self.shared.camera, frames = status.frames, "Capture loop exited");
    }

    /// Release the connection and clear the frame buffer.
    async fn disconnect(&self, status: &mut ConnectionStatus) {
        self.shared.release_capture().await;
        self.shared.latest.store(None);
        status.state = ConnectionState::Disconnected;
        status.last_frame_at = None;
        self.publish(status);
    }

    fn publish(&self, status: &ConnectionStatus) {
        self.shared.status.store(Arc::new(status.clone()));
    }

    /// Returns true if cancelled while sleeping.
    async fn sleep_or_cancel(&self, delay: Duration) -> bool {
        tokio::select! {
            _ = self.cancel.cancelled() => true,
            _ = tokio::time::sleep(delay) => false,
        }
    }
}

//! The monitor: owns every camera's source, classifier and coordinator.
//!
//! One [`Monitor`] is constructed per process and passed around explicitly.
//! Per-camera state lives in a [`CameraRegistry`]; the consumer path for a
//! camera (throttle, classifier, coordinator) sits behind that camera's own
//! async mutex, so cameras proceed in parallel while each stays single-writer.

use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

use super::registry::CameraRegistry;
use crate::acquisition::{
    CaptureBackend, ConnectionStatus, FfmpegBackend, FrameSource, SourceDescriptor, SourceSpec,
};
use crate::alerts::{
    AlertCoordinator, AlertOutcome, AlertPolicy, AlertServices, CoordinatorState, EvidenceRecorder,
    EvidenceWriterFactory, LogChannel, MessagingChannel, MjpegWriterFactory, NotificationDispatcher,
    SideEffects, TelegramChannel,
};
use crate::config::{CameraConfig, MonitorConfig};
use crate::storage::{AlertHistory, StorageError};
use crate::types::{AlertRecord, CameraId, FallEvent, Frame, PostureLabel, TimedFrame};
use crate::vision::{annotate, HttpPoseOracle, Inference, InferenceThrottle, NullOracle, PoseOracle, PostureClassifier};

#[derive(Debug, thiserror::Error)]
pub enum MonitorError {
    #[error("Unknown camera: {0}")]
    UnknownCamera(CameraId),
    #[error("Camera already running: {0}")]
    DuplicateCamera(CameraId),
    #[error("Invalid source for camera {0}: {1}")]
    InvalidSource(CameraId, String),
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("HTTP client error: {0}")]
    HttpClient(#[from] reqwest::Error),
}

/// External collaborators the monitor drives.
pub struct MonitorDeps {
    pub backend: Arc<dyn CaptureBackend>,
    pub oracle: Arc<dyn PoseOracle>,
    pub channel: Arc<dyn MessagingChannel>,
    pub writer_factory: Arc<dyn EvidenceWriterFactory>,
    pub history: AlertHistory,
}

impl MonitorDeps {
    /// Production collaborators: ffmpeg capture, HTTP oracle (if configured),
    /// Telegram (if a token is set) and the on-disk history.
    pub fn from_config(config: &MonitorConfig) -> Result<Self, MonitorError> {
        let oracle: Arc<dyn PoseOracle> = match config.inference.oracle_url.as_deref() {
            Some(url) if !url.trim().is_empty() => {
                info!(url = %url, "Using HTTP pose oracle");
                Arc::new(HttpPoseOracle::new(url, config.alerts.jpeg_quality)?)
            }
            _ => {
                warn!("No pose oracle configured, cameras will stream without fall detection");
                Arc::new(NullOracle)
            }
        };

        let channel: Arc<dyn MessagingChannel> = if config.telegram.token.is_empty() {
            info!("No Telegram token configured, notifications are logged only");
            Arc::new(LogChannel)
        } else {
            Arc::new(TelegramChannel::new(&config.telegram.token)?)
        };

        if let Some(parent) = config.alerts.history_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            if let Err(e) = std::fs::create_dir_all(parent) {
                warn!(path = %parent.display(), error = %e, "Could not create history directory");
            }
        }
        let history = AlertHistory::open(&config.alerts.history_path, config.alerts.history_capacity)?;

        Ok(Self {
            backend: Arc::new(FfmpegBackend::from_config(&config.capture)),
            oracle,
            channel,
            writer_factory: Arc::new(MjpegWriterFactory {
                quality: config.alerts.jpeg_quality,
            }),
            history,
        })
    }
}

/// Result of processing one frame.
#[derive(Debug, Clone)]
pub struct ProcessedFrame {
    pub annotated: Frame,
    pub label: PostureLabel,
    pub event: Option<FallEvent>,
    pub outcome: AlertOutcome,
    /// Whether the oracle ran for this frame.
    pub inferred: bool,
}

/// Per-camera snapshot for status reporting.
#[derive(Debug, Clone)]
pub struct CameraStatus {
    pub id: CameraId,
    pub name: String,
    pub connection: ConnectionStatus,
    /// `None` while the camera's pipeline is busy processing a frame.
    pub alert_state: Option<CoordinatorState>,
}

struct CameraPipeline {
    throttle: InferenceThrottle,
    classifier: PostureClassifier,
    coordinator: AlertCoordinator,
    last_label: PostureLabel,
}

struct CameraEntry {
    name: String,
    source: FrameSource,
    pipeline: tokio::sync::Mutex<CameraPipeline>,
}

pub struct Monitor {
    config: MonitorConfig,
    backend: Arc<dyn CaptureBackend>,
    oracle: Arc<dyn PoseOracle>,
    services: AlertServices,
    history: AlertHistory,
    cameras: CameraRegistry<CameraEntry>,
}

impl Monitor {
    pub fn new(config: MonitorConfig, deps: MonitorDeps) -> Self {
        let dispatcher = NotificationDispatcher::new(
            deps.channel,
            config.alerts.recipients.clone(),
            deps.history.clone(),
        );
        let recorder = EvidenceRecorder::new(
            deps.writer_factory,
            config.alerts.evidence_dir.clone(),
            config.alerts.recording_queue_depth,
        );
        let services = AlertServices {
            policy: Arc::new(AlertPolicy::from(&config.alerts)),
            dispatcher,
            recorder,
            effects: SideEffects::new(),
        };

        Self {
            backend: deps.backend,
            oracle: deps.oracle,
            history: deps.history,
            services,
            cameras: CameraRegistry::new(),
            config,
        }
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    /// Register a camera and start its capture loop.
    pub fn start_camera(&self, id: CameraId, name: impl Into<String>, spec: SourceSpec) -> Result<(), MonitorError> {
        let name = name.into();
        let entry = CameraEntry {
            source: FrameSource::new(id.clone(), spec, Arc::clone(&self.backend), self.config.capture.clone()),
            pipeline: tokio::sync::Mutex::new(CameraPipeline {
                throttle: InferenceThrottle::new(self.config.inference.interval()),
                classifier: PostureClassifier::new(self.config.posture.clone()),
                coordinator: AlertCoordinator::new(id.clone(), name.clone(), self.services.clone()),
                last_label: PostureLabel::Unknown,
            }),
            name,
        };

        let entry = self
            .cameras
            .insert(id.clone(), entry)
            .map_err(|_| MonitorError::DuplicateCamera(id.clone()))?;
        entry.source.start();
        info!(camera = %id, name = %entry.name, source = %entry.source.spec().descriptor, "Camera started");
        Ok(())
    }

    /// Start a camera from its config entry.
    pub fn start_configured(&self, camera: &CameraConfig) -> Result<(), MonitorError> {
        let id = CameraId::new(camera.id.clone());
        let descriptor: SourceDescriptor = camera
            .source
            .parse()
            .map_err(|e: crate::acquisition::CaptureError| MonitorError::InvalidSource(id.clone(), e.to_string()))?;
        let spec = SourceSpec::new(descriptor, camera.width, camera.height);
        self.start_camera(id, camera.display_name(), spec)
    }

    /// Stop the capture loop and evict every piece of per-camera state,
    /// finalizing any active recording. Returns false for unknown cameras.
    ///
    /// Bounded by the capture stop timeout. If a frame is still in flight
    /// (a slow oracle call), the entry is already evicted and the recording
    /// is finalized when that call releases the pipeline.
    pub async fn stop_camera(&self, id: &CameraId) -> bool {
        let Some(entry) = self.cameras.remove(id) else {
            return false;
        };
        entry.source.stop().await;
        let stop_timeout = self.config.capture.stop_timeout();
        match tokio::time::timeout(stop_timeout, entry.pipeline.lock()).await {
            Ok(mut pipeline) => pipeline.coordinator.teardown(),
            Err(_) => warn!(
                camera = %id,
                timeout_ms = stop_timeout.as_millis() as u64,
                "Camera pipeline busy with an in-flight frame, leaving it to finalize on release"
            ),
        }
        info!(camera = %id, "Camera stopped");
        true
    }

    /// Latest frame for a camera; `None` while disconnected or unknown.
    pub fn read_frame(&self, id: &CameraId) -> Option<TimedFrame> {
        self.cameras.get(id).and_then(|entry| entry.source.read())
    }

    pub fn has_camera(&self, id: &CameraId) -> bool {
        self.cameras.contains(id)
    }

    pub fn camera_ids(&self) -> Vec<CameraId> {
        self.cameras.ids()
    }

    /// Run one frame through throttle, classifier and coordinator and
    /// return the annotated frame.
    pub async fn process_frame(&self, id: &CameraId, frame: &Frame) -> Result<Frame, MonitorError> {
        Ok(self.process_frame_at(id, frame, Instant::now()).await?.annotated)
    }

    /// [`process_frame`](Self::process_frame) with an explicit clock.
    pub async fn process_frame_at(&self, id: &CameraId, frame: &Frame, now: Instant) -> Result<ProcessedFrame, MonitorError> {
        let entry = self
            .cameras
            .get(id)
            .ok_or_else(|| MonitorError::UnknownCamera(id.clone()))?;
        let mut guard = entry.pipeline.lock().await;
        let pipeline = &mut *guard;

        let inference = pipeline.throttle.run(id, self.oracle.as_ref(), frame, now).await;
        let (label, event) = match &inference {
            Inference::Fresh(keypoints) => pipeline.classifier.update(keypoints.as_ref(), now),
            Inference::Reused(_) => (pipeline.last_label, None),
        };
        pipeline.last_label = label;

        if let Some(event) = event {
            info!(camera = %id, event = %event, posture = %label, "Fall event");
        }

        let score = inference.keypoints().map(|kp| kp.score);
        let outcome = pipeline.coordinator.observe(label, event, frame, score, now);

        Ok(ProcessedFrame {
            annotated: annotate(frame, label, inference.keypoints()),
            label,
            event,
            outcome,
            inferred: inference.is_fresh(),
        })
    }

    /// Alert history, newest first.
    pub fn alert_history(&self) -> Vec<AlertRecord> {
        self.history.list()
    }

    pub fn delete_alert(&self, id: &str) -> Result<bool, MonitorError> {
        let deleted = self.history.delete(id)?;
        if deleted {
            info!(id = %id, "Alert deleted from history");
        }
        Ok(deleted)
    }

    /// One-shot probe that leaves running cameras untouched.
    pub async fn test_connection(&self, spec: &SourceSpec) -> bool {
        let timeout = self.config.capture.probe_timeout() + self.config.capture.stall_timeout();
        FrameSource::test_connection(self.backend.as_ref(), spec, timeout).await
    }

    pub fn status(&self) -> Vec<CameraStatus> {
        self.cameras
            .ids()
            .into_iter()
            .filter_map(|id| {
                let entry = self.cameras.get(&id)?;
                let alert_state = entry.pipeline.try_lock().ok().map(|p| p.coordinator.state());
                Some(CameraStatus {
                    name: entry.name.clone(),
                    connection: entry.source.status(),
                    alert_state,
                    id,
                })
            })
            .collect()
    }

    /// Tracked side effects (dispatch, evidence upload).
    pub fn side_effects(&self) -> &SideEffects {
        &self.services.effects
    }

    /// Stop every camera, then give pending side effects up to `grace`.
    pub async fn shutdown(&self, grace: Duration) {
        info!(cameras = self.cameras.len(), "Monitor shutting down");
        for id in self.cameras.ids() {
            self.stop_camera(&id).await;
        }
        let drained = self.services.effects.shutdown(grace).await;
        if let Err(e) = self.history.flush() {
            warn!(error = %e, "Failed to flush alert history");
        }
        info!(drained, "Monitor stopped");
    }
}

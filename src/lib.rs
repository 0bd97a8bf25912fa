//! fallwatch: Unattended Multi-Camera Fall Detection
//!
//! Watches camera streams, classifies the posture of the person in view and
//! raises debounced, evidence-backed alerts when someone stays down.
//!
//! ## Architecture
//!
//! - **Acquisition**: Resilient per-camera capture loops (backoff, watchdog, latest-frame buffer)
//! - **Vision**: Inference throttling, posture smoothing and two-stage fall confirmation
//! - **Alerts**: Duration/cooldown gating, notification fan-out, evidence recording
//! - **Storage**: Bounded alert history
//! - **Pipeline**: The [`Monitor`] that ties one camera's pieces together

pub mod acquisition;
pub mod alerts;
pub mod config;
pub mod pipeline;
pub mod storage;
pub mod types;
pub mod vision;

// Re-export configuration
pub use config::MonitorConfig;

// Re-export commonly used types
pub use types::{
    AlertKind, AlertRecord, CameraId, DispatchStatus, FallEvent, Frame, Keypoints, Point,
    PostureLabel, TimedFrame,
};

// Re-export the pipeline entry points
pub use pipeline::{Monitor, MonitorDeps, MonitorError, ProcessingLoop};

// Re-export storage
pub use storage::{AlertHistory, StorageError};

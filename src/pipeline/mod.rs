//! Monitoring Pipeline
//!
//! ```text
//! FrameSource (capture loop, per camera)
//!      │ latest frame
//!      ▼
//! ProcessingLoop (consumer, per camera, fps-paced)
//!      │
//!      ▼
//! Monitor::process_frame ─► InferenceThrottle ─► PostureClassifier ─► AlertCoordinator
//!                                                                        │
//!                                                      side effects ◄────┘
//!                                               (dispatch, evidence recording)
//! ```

pub mod monitor;
pub mod processing_loop;
pub mod registry;

pub use monitor::{CameraStatus, Monitor, MonitorDeps, MonitorError, ProcessedFrame};
pub use processing_loop::{LoopStats, ProcessingLoop};
pub use registry::CameraRegistry;

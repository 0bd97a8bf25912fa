//! Vision: throttled pose estimation and the posture/fall state machine.
//!
//! ```text
//! frame ──► InferenceThrottle ──► PoseOracle (at most once per interval)
//!                 │
//!                 ▼ fresh keypoints
//!          PostureClassifier ──► (stable label, Option<FallEvent>)
//! ```

pub mod annotate;
pub mod oracle;
pub mod posture;
pub mod throttle;

pub use annotate::annotate;
pub use oracle::{HttpPoseOracle, NullOracle, OracleError, PoseOracle};
pub use posture::{FallStage, MovingAverage, PostureClassifier, PostureMetrics};
pub use throttle::{Inference, InferenceThrottle};

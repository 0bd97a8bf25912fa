//! Per-camera oracle rate limiting.
//!
//! Frames can arrive far faster than pose estimation should run. The throttle
//! invokes the oracle at most once per interval and otherwise hands back the
//! previous result so overlays stay continuous.

use std::time::{Duration, Instant};
use tracing::warn;

use super::oracle::PoseOracle;
use crate::types::{CameraId, Frame, Keypoints};

/// Result of one throttled cycle.
#[derive(Debug, Clone, PartialEq)]
pub enum Inference {
    /// The oracle ran this cycle; feed the result to the classifier.
    Fresh(Option<Keypoints>),
    /// Not due, or the oracle failed. Carries the last good result for display.
    Reused(Option<Keypoints>),
}

impl Inference {
    pub fn keypoints(&self) -> Option<&Keypoints> {
        match self {
            Inference::Fresh(kp) | Inference::Reused(kp) => kp.as_ref(),
        }
    }

    pub fn is_fresh(&self) -> bool {
        matches!(self, Inference::Fresh(_))
    }
}

#[derive(Debug)]
pub struct InferenceThrottle {
    interval: Duration,
    last_invocation: Option<Instant>,
    last_result: Option<Keypoints>,
    failures: u64,
}

impl InferenceThrottle {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_invocation: None,
            last_result: None,
            failures: 0,
        }
    }

    pub fn is_due(&self, now: Instant) -> bool {
        self.last_invocation
            .map_or(true, |last| now.saturating_duration_since(last) >= self.interval)
    }

    /// Run the oracle if due. Failures never propagate.
    pub async fn run(
        &mut self,
        camera: &CameraId,
        oracle: &dyn PoseOracle,
        frame: &Frame,
        now: Instant,
    ) -> Inference {
        if !self.is_due(now) {
            return Inference::Reused(self.last_result.clone());
        }
        self.last_invocation = Some(now);

        match oracle.estimate(frame).await {
            Ok(keypoints) => {
                self.last_result = keypoints.clone();
                Inference::Fresh(keypoints)
            }
            Err(e) => {
                self.failures += 1;
                warn!(camera = %camera, error = %e, failures = self.failures, "Pose oracle failed, reusing last result");
                Inference::Reused(self.last_result.clone())
            }
        }
    }

    pub fn failures(&self) -> u64 {
        self.failures
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Point;
    use crate::vision::oracle::OracleError;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    struct CountingOracle {
        calls: AtomicUsize,
        fail: AtomicBool,
    }

    impl CountingOracle {
        fn new() -> Self {
            Self {
                calls: AtomicUsize::new(0),
                fail: AtomicBool::new(false),
            }
        }
    }

    fn keypoints() -> Keypoints {
        let p = Point::new(0.5, 0.5);
        Keypoints {
            left_shoulder: p,
            right_shoulder: p,
            left_hip: p,
            right_hip: p,
            left_knee: p,
            right_knee: p,
            left_ankle: p,
            right_ankle: p,
            score: 0.8,
        }
    }

    #[async_trait]
    impl PoseOracle for CountingOracle {
        async fn estimate(&self, _frame: &Frame) -> Result<Option<Keypoints>, OracleError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail.load(Ordering::SeqCst) {
                return Err(OracleError::Other("model crashed".to_string()));
            }
            Ok(Some(keypoints()))
        }
    }

    #[tokio::test]
    async fn test_invokes_at_most_once_per_interval() {
        let oracle = CountingOracle::new();
        let mut throttle = InferenceThrottle::new(Duration::from_millis(100));
        let cam = CameraId::new("cam");
        let frame = Frame::blank(2, 2);
        let t0 = Instant::now();

        for i in 0..10u64 {
            throttle
                .run(&cam, &oracle, &frame, t0 + Duration::from_millis(i * 30))
                .await;
        }
        // t = 0, 120, 240 fall on or past an interval boundary
        assert_eq!(oracle.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_skipped_cycle_reuses_last_result() {
        let oracle = CountingOracle::new();
        let mut throttle = InferenceThrottle::new(Duration::from_millis(100));
        let cam = CameraId::new("cam");
        let frame = Frame::blank(2, 2);
        let t0 = Instant::now();

        let first = throttle.run(&cam, &oracle, &frame, t0).await;
        assert!(first.is_fresh());
        let second = throttle
            .run(&cam, &oracle, &frame, t0 + Duration::from_millis(10))
            .await;
        assert_eq!(second, Inference::Reused(Some(keypoints())));
    }

    #[tokio::test]
    async fn test_failure_is_absorbed() {
        let oracle = CountingOracle::new();
        let mut throttle = InferenceThrottle::new(Duration::from_millis(100));
        let cam = CameraId::new("cam");
        let frame = Frame::blank(2, 2);
        let t0 = Instant::now();

        throttle.run(&cam, &oracle, &frame, t0).await;
        oracle.fail.store(true, Ordering::SeqCst);
        let result = throttle
            .run(&cam, &oracle, &frame, t0 + Duration::from_millis(200))
            .await;

        assert!(!result.is_fresh());
        assert!(result.keypoints().is_some());
        assert_eq!(throttle.failures(), 1);
        // A failed call still counts as an invocation for pacing
        assert!(!throttle.is_due(t0 + Duration::from_millis(250)));
    }
}

//! Posture classification and two-stage fall confirmation.
//!
//! Per-frame keypoints are reduced to three vertical separations, each
//! smoothed over a trailing window. The smoothed metrics give a raw label,
//! which is debounced into a stable label. Fall episodes are keyed off the
//! stable label only:
//!
//! ```text
//!   stable == fallen, no episode       -> episode(Possible), emit PossibleFall
//!   Possible and held >= confirm time  -> Confirmed, emit ConfirmedFall (once)
//!   stable != fallen, episode exists   -> emit Recovery if Confirmed, drop episode
//! ```
//!
//! All timing is driven by the `now` passed to [`PostureClassifier::update`].

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use crate::config::PostureConfig;
use crate::types::{FallEvent, Keypoints, PostureLabel};

// ============================================================================
// Smoothing
// ============================================================================

/// Fixed-length trailing moving average.
#[derive(Debug, Clone)]
pub struct MovingAverage {
    window: usize,
    samples: VecDeque<f32>,
}

impl MovingAverage {
    pub fn new(window: usize) -> Self {
        let window = window.max(1);
        Self {
            window,
            samples: VecDeque::with_capacity(window),
        }
    }

    /// Push a sample and return the mean of the retained window.
    pub fn push(&mut self, value: f32) -> f32 {
        if self.samples.len() == self.window {
            self.samples.pop_front();
        }
        self.samples.push_back(value);
        self.samples.iter().sum::<f32>() / self.samples.len() as f32
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

// ============================================================================
// Metrics
// ============================================================================

/// Vertical separations derived from one set of keypoints.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PostureMetrics {
    /// Shoulder to hip.
    pub body_height: f32,
    /// Knee to hip.
    pub knee_hip: f32,
    /// Shoulder to ankle.
    pub shoulder_ankle: f32,
}

impl PostureMetrics {
    /// Shoulders and hips are averaged; knees and ankles take the lower joint
    /// in the image (larger y).
    pub fn from_keypoints(kp: &Keypoints) -> Self {
        let shoulder_y = (kp.left_shoulder.y + kp.right_shoulder.y) / 2.0;
        let hip_y = (kp.left_hip.y + kp.right_hip.y) / 2.0;
        let knee_y = kp.left_knee.y.max(kp.right_knee.y);
        let ankle_y = kp.left_ankle.y.max(kp.right_ankle.y);

        Self {
            body_height: (shoulder_y - hip_y).abs(),
            knee_hip: (knee_y - hip_y).abs(),
            shoulder_ankle: (shoulder_y - ankle_y).abs(),
        }
    }

    /// Raw label by fixed priority: crouching, fallen, sitting, standing.
    pub fn label(&self, config: &PostureConfig) -> PostureLabel {
        if self.shoulder_ankle < config.crouch_shoulder_ankle {
            PostureLabel::Crouching
        } else if self.body_height < config.fallen_body_height {
            PostureLabel::Fallen
        } else if self.knee_hip < config.sitting_knee_hip {
            PostureLabel::Sitting
        } else {
            PostureLabel::Standing
        }
    }
}

// ============================================================================
// Classifier
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FallStage {
    Possible,
    Confirmed,
}

#[derive(Debug, Clone, Copy)]
struct FallEpisode {
    started_at: Instant,
    stage: FallStage,
}

/// Stateful per-camera posture classifier.
#[derive(Debug, Clone)]
pub struct PostureClassifier {
    config: PostureConfig,
    hold_time: Duration,
    confirm_duration: Duration,
    body_height: MovingAverage,
    knee_hip: MovingAverage,
    shoulder_ankle: MovingAverage,
    stable: Option<PostureLabel>,
    pending: Option<(PostureLabel, Instant)>,
    episode: Option<FallEpisode>,
}

impl PostureClassifier {
    pub fn new(config: PostureConfig) -> Self {
        let window = config.smoothing_window;
        Self {
            hold_time: config.hold_time(),
            confirm_duration: config.confirm_duration(),
            body_height: MovingAverage::new(window),
            knee_hip: MovingAverage::new(window),
            shoulder_ankle: MovingAverage::new(window),
            stable: None,
            pending: None,
            episode: None,
            config,
        }
    }

    /// Feed one classification cycle.
    ///
    /// `None` means no subject was detected: smoothing is skipped, any
    /// pending candidate is dropped and the episode is left untouched.
    /// Returns the stable label (or the raw label before the first
    /// promotion) and at most one fall event.
    pub fn update(
        &mut self,
        keypoints: Option<&Keypoints>,
        now: Instant,
    ) -> (PostureLabel, Option<FallEvent>) {
        let Some(kp) = keypoints else {
            self.pending = None;
            return (self.stable.unwrap_or(PostureLabel::Unknown), None);
        };

        let raw = self.smooth(kp).label(&self.config);
        self.debounce(raw, now);
        let event = self.advance_episode(now);

        (self.stable.unwrap_or(raw), event)
    }

    fn smooth(&mut self, kp: &Keypoints) -> PostureMetrics {
        let m = PostureMetrics::from_keypoints(kp);
        PostureMetrics {
            body_height: self.body_height.push(m.body_height),
            knee_hip: self.knee_hip.push(m.knee_hip),
            shoulder_ankle: self.shoulder_ankle.push(m.shoulder_ankle),
        }
    }

    fn debounce(&mut self, raw: PostureLabel, now: Instant) {
        if self.stable == Some(raw) {
            self.pending = None;
            return;
        }

        match self.pending {
            Some((label, since)) if label == raw => {
                if now.saturating_duration_since(since) >= self.hold_time {
                    tracing::debug!(from = ?self.stable, to = %raw, "Posture promoted");
                    self.stable = Some(raw);
                    self.pending = None;
                }
            }
            _ => self.pending = Some((raw, now)),
        }
    }

    fn advance_episode(&mut self, now: Instant) -> Option<FallEvent> {
        if self.stable != Some(PostureLabel::Fallen) {
            let confirmed = self
                .episode
                .take()
                .is_some_and(|e| e.stage == FallStage::Confirmed);
            return confirmed.then_some(FallEvent::Recovery);
        }

        if self.episode.is_none() {
            self.episode = Some(FallEpisode {
                started_at: now,
                stage: FallStage::Possible,
            });
            return Some(FallEvent::PossibleFall);
        }

        let confirm_duration = self.confirm_duration;
        let episode = self.episode.as_mut()?;
        if episode.stage == FallStage::Possible
            && now.saturating_duration_since(episode.started_at) >= confirm_duration
        {
            episode.stage = FallStage::Confirmed;
            return Some(FallEvent::ConfirmedFall);
        }
        None
    }

    pub fn stable_label(&self) -> Option<PostureLabel> {
        self.stable
    }

    /// Label to show when the oracle was not consulted this cycle.
    pub fn current_label(&self) -> PostureLabel {
        self.stable.unwrap_or(PostureLabel::Unknown)
    }

    pub fn fall_stage(&self) -> Option<FallStage> {
        self.episode.map(|e| e.stage)
    }

    pub fn episode_started_at(&self) -> Option<Instant> {
        self.episode.map(|e| e.started_at)
    }
}

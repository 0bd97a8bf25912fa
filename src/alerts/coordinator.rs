//! Per-camera alert coordinator.
//!
//! Sits on top of the classifier's fall events and decides when an episode
//! turns into a notification:
//!
//! ```text
//!            PossibleFall                 fallen >= min_duration
//!   Idle ─────────────────► Pending ──────────────────────────────► Alerted
//!    ▲                         │        (cooldown clear: dispatch,     │
//!    │                         │         start evidence recording)     │
//!    └──── recovery / normal ──┴───────────────────────────────────────┘
//!                        (stop recording, drop episode)
//! ```
//!
//! Episode duration is tracked independently of the cooldown. The cooldown
//! only decides whether a qualifying episode may dispatch; a suppressed
//! episode keeps being re-evaluated and alerts once the cooldown expires if
//! it is still fallen.

use chrono::Utc;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

use super::dispatcher::{Media, Notification, NotificationDispatcher};
use super::recorder::{file_safe, ActiveRecording, EvidenceRecorder, RecordingJob};
use super::tasks::SideEffects;
use super::telegram::escape_html;
use crate::config::AlertsConfig;
use crate::types::{AlertKind, CameraId, FallEvent, Frame, PostureLabel};

/// Gating policy, resolved from [`AlertsConfig`].
#[derive(Debug, Clone)]
pub struct AlertPolicy {
    pub enabled: bool,
    pub min_duration: Duration,
    pub cooldown: Duration,
    pub attach_image: bool,
    pub save_snapshot: bool,
    pub snapshot_dir: PathBuf,
    pub jpeg_quality: u8,
}

impl From<&AlertsConfig> for AlertPolicy {
    fn from(config: &AlertsConfig) -> Self {
        Self {
            enabled: config.enabled,
            min_duration: config.min_duration(),
            cooldown: config.cooldown(),
            attach_image: config.attach_image,
            save_snapshot: config.save_snapshot,
            snapshot_dir: config.snapshot_dir.clone(),
            jpeg_quality: config.jpeg_quality,
        }
    }
}

/// Collaborators shared by every camera's coordinator.
#[derive(Clone)]
pub struct AlertServices {
    pub policy: Arc<AlertPolicy>,
    pub dispatcher: NotificationDispatcher,
    pub recorder: EvidenceRecorder,
    pub effects: SideEffects,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoordinatorState {
    Idle,
    PendingConfirmation,
    Alerted,
}

/// What one observation did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertOutcome {
    /// No episode open.
    Idle,
    /// Episode open, not yet long enough.
    Waiting,
    /// Qualified but inside the cooldown window.
    Suppressed,
    /// Alert dispatched this cycle.
    Fired,
    /// Already alerted for this episode.
    Holding,
    /// Episode closed by recovery.
    Closed,
}

#[derive(Debug, Clone, Copy)]
struct Episode {
    started_at: Instant,
    alerted: bool,
    suppression_logged: bool,
}

pub struct AlertCoordinator {
    camera: CameraId,
    camera_name: String,
    services: AlertServices,
    episode: Option<Episode>,
    last_alert: Option<Instant>,
    recording: Option<ActiveRecording>,
}

impl AlertCoordinator {
    pub fn new(camera: CameraId, camera_name: impl Into<String>, services: AlertServices) -> Self {
        Self {
            camera,
            camera_name: camera_name.into(),
            services,
            episode: None,
            last_alert: None,
            recording: None,
        }
    }

    /// Feed one processed frame with the classifier's output.
    ///
    /// `score` is the detection confidence of the keypoints behind `stable`,
    /// when known. Side effects are submitted to the executor; this never
    /// waits on I/O.
    pub fn observe(
        &mut self,
        stable: PostureLabel,
        event: Option<FallEvent>,
        frame: &Frame,
        score: Option<f32>,
        now: Instant,
    ) -> AlertOutcome {
        if let Some(recording) = self.recording.as_mut() {
            recording.push(frame);
        }

        let normal = stable != PostureLabel::Fallen && stable != PostureLabel::Unknown;
        if event == Some(FallEvent::Recovery) || normal {
            return self.close_episode(event, now);
        }

        if !self.services.policy.enabled {
            return AlertOutcome::Idle;
        }

        if matches!(event, Some(FallEvent::PossibleFall | FallEvent::ConfirmedFall)) && self.episode.is_none() {
            info!(camera = %self.camera, event = %event.map(|e| e.to_string()).unwrap_or_default(), "Fall episode opened");
            self.episode = Some(Episode {
                started_at: now,
                alerted: false,
                suppression_logged: false,
            });
        }

        let policy = Arc::clone(&self.services.policy);
        let last_alert = self.last_alert;
        let Some(episode) = self.episode.as_mut() else {
            return AlertOutcome::Idle;
        };

        if stable != PostureLabel::Fallen {
            return AlertOutcome::Waiting;
        }
        if episode.alerted {
            return AlertOutcome::Holding;
        }

        let fallen_for = now.saturating_duration_since(episode.started_at);
        if fallen_for < policy.min_duration {
            return AlertOutcome::Waiting;
        }

        if let Some(last) = last_alert {
            let since = now.saturating_duration_since(last);
            if since < policy.cooldown {
                if !episode.suppression_logged {
                    episode.suppression_logged = true;
                    info!(
                        camera = %self.camera,
                        fallen_secs = fallen_for.as_secs_f64(),
                        cooldown_remaining_secs = (policy.cooldown - since).as_secs_f64(),
                        "Fall alert suppressed by cooldown"
                    );
                }
                return AlertOutcome::Suppressed;
            }
        }

        episode.alerted = true;
        self.last_alert = Some(now);
        self.fire(frame, score, fallen_for);
        AlertOutcome::Fired
    }

    fn close_episode(&mut self, event: Option<FallEvent>, now: Instant) -> AlertOutcome {
        let episode = self.episode.take();
        let had_recording = self.recording.is_some();
        self.stop_recording("recovery");

        match episode {
            Some(ep) => {
                info!(
                    camera = %self.camera,
                    fallen_secs = now.saturating_duration_since(ep.started_at).as_secs_f64(),
                    alerted = ep.alerted,
                    recovery_event = event == Some(FallEvent::Recovery),
                    "Fall episode closed"
                );
                AlertOutcome::Closed
            }
            None if had_recording => AlertOutcome::Closed,
            None => AlertOutcome::Idle,
        }
    }

    fn fire(&mut self, frame: &Frame, score: Option<f32>, fallen_for: Duration) {
        warn!(
            camera = %self.camera,
            fallen_secs = fallen_for.as_secs_f64(),
            score = score.unwrap_or_default(),
            "FALL ALERT"
        );

        let policy = &self.services.policy;
        let text = format!(
            "<b>FALL DETECTED</b>\nCamera: {}\nOn the ground for {:.1}s\nConfidence: {}\nTime: {}",
            escape_html(&self.camera_name),
            fallen_for.as_secs_f64(),
            score.map_or_else(|| "n/a".to_string(), |s| format!("{:.0}%", s * 100.0)),
            Utc::now().format("%Y-%m-%d %H:%M:%S UTC"),
        );

        let photo = policy.attach_image.then(|| frame.clone());
        let snapshot_dir = (policy.attach_image && policy.save_snapshot).then(|| policy.snapshot_dir.clone());
        let quality = policy.jpeg_quality;
        let dispatcher = self.services.dispatcher.clone();
        let camera = self.camera.clone();
        let camera_name = self.camera_name.clone();

        self.services.effects.spawn("fall-alert", async move {
            let mut notification = Notification::text(text);
            let mut evidence = None;

            if let Some(frame) = photo {
                match tokio::task::spawn_blocking(move || frame.encode_jpeg(quality)).await {
                    Ok(Ok(jpeg)) => {
                        if let Some(dir) = snapshot_dir {
                            match save_snapshot(&dir, &camera, &jpeg).await {
                                Ok(path) => evidence = Some(path),
                                Err(e) => warn!(camera = %camera, error = %e, "Snapshot save failed"),
                            }
                        }
                        notification = notification.with_media(Media::Photo(Arc::new(jpeg)));
                    }
                    Ok(Err(e)) => warn!(camera = %camera, error = %e, "Snapshot encode failed, sending text only"),
                    Err(e) => warn!(camera = %camera, error = %e, "Snapshot encoder task failed"),
                }
            }

            dispatcher
                .dispatch(&camera, &camera_name, AlertKind::Fall, notification, evidence)
                .await;
        });

        if self.recording.is_none() {
            match self.services.recorder.start(&self.camera, frame) {
                Ok((active, job)) => {
                    self.spawn_evidence_upload(job);
                    self.recording = Some(active);
                }
                Err(e) => {
                    warn!(camera = %self.camera, error = %e, "Evidence recording unavailable for this episode");
                }
            }
        }
    }

    fn spawn_evidence_upload(&self, job: RecordingJob) {
        let dispatcher = self.services.dispatcher.clone();
        let camera = self.camera.clone();
        let camera_name = self.camera_name.clone();

        self.services.effects.spawn("fall-evidence", async move {
            let summary = match job.run().await {
                Ok(summary) => summary,
                Err(e) => {
                    warn!(camera = %camera, error = %e, "Evidence recording failed to finalize");
                    return;
                }
            };
            info!(
                camera = %camera,
                path = %summary.path.display(),
                frames = summary.frames,
                skipped = summary.skipped,
                duration_secs = summary.duration.as_secs_f64(),
                "Evidence recording finalized"
            );
            if summary.frames == 0 {
                return;
            }

            let text = format!(
                "<b>Fall evidence</b>\nCamera: {}\nDuration: {:.1}s ({} frames)",
                escape_html(&camera_name),
                summary.duration.as_secs_f64(),
                summary.frames,
            );
            let media = Media::Video {
                path: summary.path.clone(),
            };
            dispatcher
                .dispatch(
                    &camera,
                    &camera_name,
                    AlertKind::VideoEvidence,
                    Notification::text(text).with_media(media),
                    Some(summary.path),
                )
                .await;
        });
    }

    fn stop_recording(&mut self, reason: &str) {
        if let Some(recording) = self.recording.take() {
            recording.stop(reason);
        }
    }

    /// Camera is going away: finalize any recording and forget the episode.
    pub fn teardown(&mut self) {
        self.stop_recording("camera stopped");
        self.episode = None;
    }

    pub fn state(&self) -> CoordinatorState {
        match self.episode {
            None => CoordinatorState::Idle,
            Some(ep) if ep.alerted => CoordinatorState::Alerted,
            Some(_) => CoordinatorState::PendingConfirmation,
        }
    }

    pub fn is_recording(&self) -> bool {
        self.recording.is_some()
    }

    pub fn last_alert(&self) -> Option<Instant> {
        self.last_alert
    }

    pub fn camera(&self) -> &CameraId {
        &self.camera
    }
}

impl Drop for AlertCoordinator {
    fn drop(&mut self) {
        self.stop_recording("coordinator dropped");
    }
}

async fn save_snapshot(dir: &Path, camera: &CameraId, jpeg: &[u8]) -> std::io::Result<PathBuf> {
    tokio::fs::create_dir_all(dir).await?;
    let path = dir.join(format!("alert_{}_{}.jpg", file_safe(camera.as_str()), Utc::now().timestamp()));
    tokio::fs::write(&path, jpeg).await?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerts::dispatcher::{DispatchError, MessagingChannel};
    use crate::alerts::recorder::{EvidenceWriter, EvidenceWriterFactory, MjpegWriterFactory, RecordingError};
    use crate::storage::AlertHistory;
    use crate::types::DispatchStatus;
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[derive(Default)]
    struct CapturingChannel {
        sent: Mutex<Vec<Notification>>,
    }

    #[async_trait]
    impl MessagingChannel for CapturingChannel {
        async fn send(&self, _recipient: &str, n: &Notification) -> Result<String, DispatchError> {
            self.sent.lock().expect("lock").push(n.clone());
            Ok("sent".to_string())
        }

        fn channel_name(&self) -> &str {
            "capture"
        }
    }

    struct BrokenFactory;

    impl EvidenceWriterFactory for BrokenFactory {
        fn create(&self, _path: &Path, _w: u32, _h: u32) -> Result<Box<dyn EvidenceWriter>, RecordingError> {
            Err(RecordingError::Io(std::io::Error::new(std::io::ErrorKind::PermissionDenied, "read-only")))
        }

        fn extension(&self) -> &str {
            "bin"
        }
    }

    struct Harness {
        coordinator: AlertCoordinator,
        effects: SideEffects,
        history: AlertHistory,
        channel: Arc<CapturingChannel>,
        _dir: tempfile::TempDir,
    }

    fn harness(policy: impl FnOnce(&mut AlertPolicy), factory: Option<Arc<dyn EvidenceWriterFactory>>) -> Harness {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut p = AlertPolicy::from(&AlertsConfig::default());
        p.attach_image = false;
        p.snapshot_dir = dir.path().join("snapshots");
        policy(&mut p);

        let channel = Arc::new(CapturingChannel::default());
        let history = AlertHistory::temporary(100).expect("history");
        let dispatcher = NotificationDispatcher::new(channel.clone(), vec!["ops".to_string()], history.clone());
        let factory = factory.unwrap_or_else(|| Arc::new(MjpegWriterFactory { quality: 60 }));
        let effects = SideEffects::new();
        let services = AlertServices {
            policy: Arc::new(p),
            dispatcher,
            recorder: EvidenceRecorder::new(factory, dir.path().join("recordings"), 16),
            effects: effects.clone(),
        };
        Harness {
            coordinator: AlertCoordinator::new(CameraId::new("hall"), "Hallway", services),
            effects,
            history,
            channel,
            _dir: dir,
        }
    }

    fn secs(s: f64) -> Duration {
        Duration::from_secs_f64(s)
    }

    /// Possible fall at `start`, then fallen observations every 100ms for `span`.
    fn fall(h: &mut Harness, start: Instant, span: f64) -> Vec<AlertOutcome> {
        let frame = Frame::blank(8, 8);
        let mut outcomes = vec![h.coordinator.observe(
            PostureLabel::Fallen,
            Some(FallEvent::PossibleFall),
            &frame,
            Some(0.9),
            start,
        )];
        let steps = (span * 10.0) as u32;
        for i in 1..=steps {
            let now = start + secs(i as f64 / 10.0);
            outcomes.push(h.coordinator.observe(PostureLabel::Fallen, None, &frame, Some(0.9), now));
        }
        outcomes
    }

    fn recover(h: &mut Harness, now: Instant) -> AlertOutcome {
        h.coordinator.observe(PostureLabel::Standing, None, &Frame::blank(8, 8), None, now)
    }

    #[tokio::test]
    async fn test_alert_waits_for_min_duration() {
        let mut h = harness(|_| {}, None);
        let t0 = Instant::now();
        let outcomes = fall(&mut h, t0, 3.0);

        let fired_at = outcomes.iter().position(|o| *o == AlertOutcome::Fired);
        // 100ms steps: index 20 is the first observation at >= 2.0s
        assert_eq!(fired_at, Some(20));
        assert!(outcomes[..20].iter().all(|o| *o == AlertOutcome::Waiting));
        assert!(outcomes[21..].iter().all(|o| *o == AlertOutcome::Holding));
        assert_eq!(h.coordinator.state(), CoordinatorState::Alerted);
        assert!(h.coordinator.is_recording());

        assert_eq!(recover(&mut h, t0 + secs(3.5)), AlertOutcome::Closed);
        assert!(!h.coordinator.is_recording());
        h.effects.flush().await;

        let records = h.history.list();
        assert_eq!(records.len(), 2, "fall alert plus video evidence");
        assert!(records.iter().any(|r| r.event_type == AlertKind::Fall && r.status == DispatchStatus::Sent));
        let video = records
            .iter()
            .find(|r| r.event_type == AlertKind::VideoEvidence)
            .expect("video evidence record");
        assert!(video.evidence_path.as_ref().is_some_and(|p| p.exists()));
    }

    #[tokio::test]
    async fn test_cooldown_suppresses_second_episode() {
        let mut h = harness(|_| {}, None);
        let t0 = Instant::now();

        fall(&mut h, t0, 3.0);
        recover(&mut h, t0 + secs(4.0));
        let second = fall(&mut h, t0 + secs(10.0), 5.0);
        assert!(second.contains(&AlertOutcome::Suppressed));
        assert!(!second.contains(&AlertOutcome::Fired));
        recover(&mut h, t0 + secs(16.0));

        h.effects.flush().await;
        let falls = h.history.list().into_iter().filter(|r| r.event_type == AlertKind::Fall).count();
        assert_eq!(falls, 1);
    }

    #[tokio::test]
    async fn test_suppressed_episode_alerts_once_cooldown_expires() {
        let mut h = harness(|p| p.cooldown = Duration::from_secs(5), None);
        let t0 = Instant::now();

        fall(&mut h, t0, 2.0);
        recover(&mut h, t0 + secs(2.5));
        // Second fall qualifies at t=5.0 but cooldown runs until t=7.0
        let second = fall(&mut h, t0 + secs(3.0), 6.0);
        let first_fire = second.iter().position(|o| *o == AlertOutcome::Fired).expect("fires");
        assert_eq!(first_fire, 40);
        assert_eq!(second.iter().filter(|o| **o == AlertOutcome::Fired).count(), 1);
        h.coordinator.teardown();
    }

    #[tokio::test]
    async fn test_recording_failure_does_not_block_alert() {
        let mut h = harness(|_| {}, Some(Arc::new(BrokenFactory)));
        let t0 = Instant::now();
        let outcomes = fall(&mut h, t0, 2.5);
        assert!(outcomes.contains(&AlertOutcome::Fired));
        assert!(!h.coordinator.is_recording());

        h.effects.flush().await;
        assert_eq!(h.history.len(), 1);
        assert_eq!(h.channel.sent.lock().expect("lock").len(), 1);
    }

    #[tokio::test]
    async fn test_disabled_alerts_do_nothing() {
        let mut h = harness(|p| p.enabled = false, None);
        let t0 = Instant::now();
        let outcomes = fall(&mut h, t0, 3.0);
        assert!(outcomes.iter().all(|o| *o == AlertOutcome::Idle));
        h.effects.flush().await;
        assert!(h.history.is_empty());
    }

    #[tokio::test]
    async fn test_photo_attached_and_snapshot_saved() {
        let mut h = harness(
            |p| {
                p.attach_image = true;
                p.save_snapshot = true;
            },
            None,
        );
        let t0 = Instant::now();
        fall(&mut h, t0, 2.0);
        h.coordinator.teardown();
        h.effects.flush().await;

        let sent = h.channel.sent.lock().expect("lock").clone();
        assert!(sent.iter().any(|n| matches!(n.media, Some(Media::Photo(_)))));

        let fall_record = h
            .history
            .list()
            .into_iter()
            .find(|r| r.event_type == AlertKind::Fall)
            .expect("fall record");
        let snapshot = fall_record.evidence_path.expect("snapshot path");
        let name = snapshot.file_name().and_then(|n| n.to_str()).unwrap_or_default().to_string();
        assert!(name.starts_with("alert_hall_") && name.ends_with(".jpg"), "{name}");
        assert!(snapshot.exists());
    }

    #[tokio::test]
    async fn test_unknown_label_keeps_episode_open() {
        let mut h = harness(|_| {}, None);
        let t0 = Instant::now();
        let frame = Frame::blank(8, 8);
        h.coordinator.observe(PostureLabel::Fallen, Some(FallEvent::PossibleFall), &frame, None, t0);
        let outcome = h.coordinator.observe(PostureLabel::Unknown, None, &frame, None, t0 + secs(0.5));
        assert_eq!(outcome, AlertOutcome::Waiting);
        assert_eq!(h.coordinator.state(), CoordinatorState::PendingConfirmation);
    }
}

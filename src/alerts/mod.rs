//! Alerting: gating, notification fan-out and evidence recording.
//!
//! Everything that touches the network or disk runs as a tracked side effect
//! (see [`SideEffects`]), so a slow channel only delays its own alert.

pub mod coordinator;
pub mod dispatcher;
pub mod recorder;
pub mod tasks;
pub mod telegram;

pub use coordinator::{AlertCoordinator, AlertOutcome, AlertPolicy, AlertServices, CoordinatorState};
pub use dispatcher::{DispatchError, Media, MessagingChannel, Notification, NotificationDispatcher};
pub use recorder::{
    ActiveRecording, EvidenceRecorder, EvidenceWriter, EvidenceWriterFactory, MjpegWriterFactory,
    RecordingError, RecordingSummary,
};
pub use tasks::SideEffects;
pub use telegram::{LogChannel, TelegramChannel};

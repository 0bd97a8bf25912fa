//! Multi-recipient notification fan-out.
//!
//! Every configured recipient is tried concurrently. The dispatch counts as
//! sent if at least one recipient accepted it. Every attempt, including a
//! total failure, appends exactly one [`AlertRecord`] to the history.

use async_trait::async_trait;
use chrono::Utc;
use futures::future::join_all;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::storage::AlertHistory;
use crate::types::{AlertKind, AlertRecord, CameraId, DispatchStatus};

/// Delivery failure for one recipient.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Channel rejected message: {0}")]
    Rejected(String),
    #[error("Media unavailable: {0}")]
    Media(#[from] std::io::Error),
}

/// Payload attached to a notification.
#[derive(Debug, Clone, PartialEq)]
pub enum Media {
    /// JPEG bytes.
    Photo(Arc<Vec<u8>>),
    /// Finalized evidence file on disk.
    Video { path: PathBuf },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    /// HTML-formatted message body (or caption when media is attached).
    pub text: String,
    pub media: Option<Media>,
}

impl Notification {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            media: None,
        }
    }

    pub fn with_media(mut self, media: Media) -> Self {
        self.media = Some(media);
        self
    }
}

/// Outbound messaging channel (bot API, log sink, ...).
#[async_trait]
pub trait MessagingChannel: Send + Sync + 'static {
    /// Deliver to one recipient. Returns a short outcome description.
    async fn send(&self, recipient: &str, notification: &Notification) -> Result<String, DispatchError>;

    fn channel_name(&self) -> &str;
}

/// Fans notifications out to every recipient and records the attempt.
#[derive(Clone)]
pub struct NotificationDispatcher {
    channel: Arc<dyn MessagingChannel>,
    recipients: Arc<[String]>,
    history: AlertHistory,
}

impl NotificationDispatcher {
    pub fn new(channel: Arc<dyn MessagingChannel>, recipients: Vec<String>, history: AlertHistory) -> Self {
        Self {
            channel,
            recipients: recipients.into(),
            history,
        }
    }

    pub fn history(&self) -> &AlertHistory {
        &self.history
    }

    pub fn recipients(&self) -> &[String] {
        &self.recipients
    }

    pub async fn dispatch(
        &self,
        camera: &CameraId,
        camera_name: &str,
        kind: AlertKind,
        notification: Notification,
        evidence_path: Option<PathBuf>,
    ) -> AlertRecord {
        let (status, detail) = if self.recipients.is_empty() {
            warn!(camera = %camera, kind = %kind, "No recipients configured, alert not delivered");
            (DispatchStatus::Failed, "no recipients configured".to_string())
        } else {
            self.fan_out(camera, &notification).await
        };

        let record = AlertRecord {
            id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            camera: camera.clone(),
            camera_name: camera_name.to_string(),
            event_type: kind,
            status,
            detail,
            evidence_path,
        };

        if let Err(e) = self.history.append(&record) {
            error!(camera = %camera, id = %record.id, error = %e, "Failed to append alert history");
        }

        info!(
            camera = %camera,
            kind = %kind,
            status = ?record.status,
            channel = self.channel.channel_name(),
            "Alert dispatched"
        );
        record
    }

    async fn fan_out(&self, camera: &CameraId, notification: &Notification) -> (DispatchStatus, String) {
        let sends = self.recipients.iter().map(|recipient| async move {
            (recipient, self.channel.send(recipient, notification).await)
        });

        let mut any_sent = false;
        let mut parts = Vec::with_capacity(self.recipients.len());
        for (recipient, result) in join_all(sends).await {
            match result {
                Ok(outcome) => {
                    any_sent = true;
                    parts.push(format!("{recipient}: {outcome}"));
                }
                Err(e) => {
                    warn!(camera = %camera, recipient = %recipient, error = %e, "Notification delivery failed");
                    parts.push(format!("{recipient}: failed ({e})"));
                }
            }
        }

        let status = if any_sent {
            DispatchStatus::Sent
        } else {
            DispatchStatus::Failed
        };
        (status, parts.join("; "))
    }
}

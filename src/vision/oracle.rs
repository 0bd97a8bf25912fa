//! Pose oracle - opaque keypoint estimation consumed by the classifier.

use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

use crate::config::defaults::ORACLE_TIMEOUT_SECS;
use crate::types::{Frame, Keypoints};

/// Oracle errors. Callers treat every variant as "no detection this cycle".
#[derive(Debug, thiserror::Error)]
pub enum OracleError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Oracle returned status {0}")]
    ServerError(reqwest::StatusCode),
    #[error("Frame encode failed: {0}")]
    Encode(#[from] image::ImageError),
    #[error("Oracle failure: {0}")]
    Other(String),
}

/// Keypoint estimator for a single frame.
#[async_trait]
pub trait PoseOracle: Send + Sync + 'static {
    /// Keypoints for the most prominent subject, or `None` if nobody was found.
    async fn estimate(&self, frame: &Frame) -> Result<Option<Keypoints>, OracleError>;
}

/// Oracle that never detects anyone. Used when no endpoint is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullOracle;

#[async_trait]
impl PoseOracle for NullOracle {
    async fn estimate(&self, _frame: &Frame) -> Result<Option<Keypoints>, OracleError> {
        Ok(None)
    }
}

#[derive(Debug, Deserialize)]
struct PoseResponse {
    keypoints: Option<Keypoints>,
    #[serde(default)]
    score: Option<f32>,
}

/// Pose estimation served over HTTP.
///
/// POSTs the frame as `image/jpeg` and expects
/// `{"keypoints": {...} | null, "score": 0.87}` back.
#[derive(Clone)]
pub struct HttpPoseOracle {
    http: reqwest::Client,
    url: String,
    jpeg_quality: u8,
}

impl HttpPoseOracle {
    pub fn new(url: &str, jpeg_quality: u8) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(ORACLE_TIMEOUT_SECS))
            .build()?;
        Ok(Self {
            http,
            url: url.trim_end_matches('/').to_string(),
            jpeg_quality,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl PoseOracle for HttpPoseOracle {
    async fn estimate(&self, frame: &Frame) -> Result<Option<Keypoints>, OracleError> {
        let jpeg = frame.encode_jpeg(self.jpeg_quality)?;

        let resp = self
            .http
            .post(&self.url)
            .header("Content-Type", "image/jpeg")
            .body(jpeg)
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(OracleError::ServerError(resp.status()));
        }

        let body: PoseResponse = resp.json().await?;
        Ok(body.keypoints.map(|mut kp| {
            if let Some(score) = body.score {
                kp.score = score;
            }
            kp
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_response_without_detection() {
        let body: PoseResponse =
            serde_json::from_str(r#"{"keypoints": null, "score": 0.0}"#).expect("parses");
        assert!(body.keypoints.is_none());
    }

    #[test]
    fn test_response_with_detection() {
        let json = r#"{
            "keypoints": {
                "left_shoulder": [0.4, 0.2], "right_shoulder": [0.6, 0.2],
                "left_hip": [0.4, 0.5], "right_hip": [0.6, 0.5],
                "left_knee": [0.4, 0.7], "right_knee": [0.6, 0.7],
                "left_ankle": [0.4, 0.9], "right_ankle": [0.6, 0.9]
            },
            "score": 0.87
        }"#;
        let body: PoseResponse = serde_json::from_str(json).expect("parses");
        assert_eq!(body.score, Some(0.87));
        assert!(body.keypoints.is_some());
    }

    #[tokio::test]
    async fn test_null_oracle_detects_nothing() {
        let result = NullOracle.estimate(&Frame::blank(2, 2)).await;
        assert!(matches!(result, Ok(None)));
    }
}

//! Monitor Configuration - cameras, capture resilience, posture tuning and alert policy
//!
//! Each section implements `Default` with the values from [`super::defaults`],
//! so an empty or missing file yields a working (camera-less) configuration.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

use super::defaults::*;

/// Environment variable pointing at a config file.
pub const CONFIG_ENV_VAR: &str = "FALLWATCH_CONFIG";

/// Config file looked up in the working directory.
pub const LOCAL_CONFIG_FILE: &str = "fallwatch.toml";

/// Environment variable overriding `telegram.token`.
pub const TELEGRAM_TOKEN_ENV_VAR: &str = "TELEGRAM_BOT_TOKEN";

// ============================================================================
// Top-Level Config
// ============================================================================

/// Root configuration for one monitoring deployment.
///
/// Load with `MonitorConfig::load()` which searches:
/// 1. `$FALLWATCH_CONFIG`
/// 2. `./fallwatch.toml`
/// 3. Built-in defaults
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// Cameras started by `fallwatch run`
    #[serde(default)]
    pub cameras: Vec<CameraConfig>,

    /// Reconnect, watchdog and shutdown timing for frame sources
    #[serde(default)]
    pub capture: CaptureConfig,

    /// Posture classifier smoothing, debounce and cutoffs
    #[serde(default)]
    pub posture: PostureConfig,

    /// Pose oracle cadence and endpoint
    #[serde(default)]
    pub inference: InferenceConfig,

    /// Alert gating, recipients and evidence locations
    #[serde(default)]
    pub alerts: AlertsConfig,

    /// Messaging channel credentials
    #[serde(default)]
    pub telegram: TelegramConfig,
}

impl MonitorConfig {
    /// Load configuration using the standard search order:
    /// 1. `$FALLWATCH_CONFIG` environment variable
    /// 2. `./fallwatch.toml` in the current working directory
    /// 3. Built-in defaults
    pub fn load() -> Self {
        let mut config = Self::search();
        config.apply_env_overrides();
        config
    }

    fn search() -> Self {
        if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
            let p = PathBuf::from(&path);
            if p.exists() {
                match Self::load_from_file(&p) {
                    Ok(config) => {
                        info!(path = %p.display(), cameras = config.cameras.len(), "Loaded config from {}", CONFIG_ENV_VAR);
                        return config;
                    }
                    Err(e) => {
                        warn!(path = %p.display(), error = %e, "Failed to load config from {}, falling back", CONFIG_ENV_VAR);
                    }
                }
            } else {
                warn!(path = %path, "{} points to non-existent file, falling back", CONFIG_ENV_VAR);
            }
        }

        let local = PathBuf::from(LOCAL_CONFIG_FILE);
        if local.exists() {
            match Self::load_from_file(&local) {
                Ok(config) => {
                    info!(cameras = config.cameras.len(), "Loaded config from ./{}", LOCAL_CONFIG_FILE);
                    return config;
                }
                Err(e) => {
                    warn!(error = %e, "Failed to load ./{}, using defaults", LOCAL_CONFIG_FILE);
                }
            }
        }

        info!("No {} found, using built-in defaults", LOCAL_CONFIG_FILE);
        Self::default()
    }

    /// Load from a specific TOML file path and validate it.
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(path.to_path_buf(), e))?;
        let config: Self = toml::from_str(&contents)
            .map_err(|e| ConfigError::Parse(path.to_path_buf(), e))?;
        config.validate()?;
        Ok(config)
    }

    /// Secrets may come from the environment (or a `.env` file) instead of the TOML.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(token) = std::env::var(TELEGRAM_TOKEN_ENV_VAR) {
            if !token.trim().is_empty() {
                self.telegram.token = token.trim().to_string();
            }
        }
    }

    /// Serialize the current config to a TOML string.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(ConfigError::Serialize)
    }

    /// Save config to a file (settings updates from an outer layer).
    pub fn save_to_file(&self, path: &Path) -> Result<(), ConfigError> {
        let contents = self.to_toml()?;
        std::fs::write(path, contents).map_err(|e| ConfigError::Io(path.to_path_buf(), e))?;
        info!(path = %path.display(), "Monitor config saved");
        Ok(())
    }

    /// Validate every section, collecting all problems before failing.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors: Vec<String> = Vec::new();

        let mut seen = HashSet::new();
        for cam in &self.cameras {
            if cam.id.trim().is_empty() {
                errors.push("cameras: id must not be empty".to_string());
            } else if !seen.insert(cam.id.as_str()) {
                errors.push(format!("cameras: duplicate id '{}'", cam.id));
            }
            if cam.source.trim().is_empty() {
                errors.push(format!("cameras.{}: source must not be empty", cam.id));
            }
            if cam.width == 0 || cam.height == 0 {
                errors.push(format!("cameras.{}: width and height must be > 0", cam.id));
            }
            if cam.fps == 0 {
                errors.push(format!("cameras.{}: fps must be > 0", cam.id));
            }
        }

        let c = &self.capture;
        Self::check_positive(c.initial_backoff_secs, "capture.initial_backoff_secs", &mut errors);
        Self::check_positive(c.max_backoff_secs, "capture.max_backoff_secs", &mut errors);
        Self::check_positive(c.stall_timeout_secs, "capture.stall_timeout_secs", &mut errors);
        Self::check_positive(c.probe_timeout_secs, "capture.probe_timeout_secs", &mut errors);
        if c.max_backoff_secs < c.initial_backoff_secs {
            errors.push(format!(
                "capture.max_backoff_secs ({:.1}) must be >= initial_backoff_secs ({:.1})",
                c.max_backoff_secs, c.initial_backoff_secs
            ));
        }

        let p = &self.posture;
        if p.smoothing_window == 0 {
            errors.push("posture.smoothing_window must be > 0".to_string());
        }
        Self::check_non_negative(p.hold_time_secs, "posture.hold_time_secs", &mut errors);
        Self::check_non_negative(p.confirm_duration_secs, "posture.confirm_duration_secs", &mut errors);
        for (value, name) in [
            (p.crouch_shoulder_ankle, "posture.crouch_shoulder_ankle"),
            (p.fallen_body_height, "posture.fallen_body_height"),
            (p.sitting_knee_hip, "posture.sitting_knee_hip"),
        ] {
            if !(0.0..=1.0).contains(&value) {
                errors.push(format!("{name} ({value:.3}) must be within 0.0..=1.0"));
            }
        }

        let a = &self.alerts;
        Self::check_non_negative(a.min_duration_secs, "alerts.min_duration_secs", &mut errors);
        Self::check_non_negative(a.cooldown_secs, "alerts.cooldown_secs", &mut errors);
        if a.history_capacity == 0 {
            errors.push("alerts.history_capacity must be > 0".to_string());
        }
        if a.recording_queue_depth == 0 {
            errors.push("alerts.recording_queue_depth must be > 0".to_string());
        }
        if !(1..=100).contains(&a.jpeg_quality) {
            errors.push(format!("alerts.jpeg_quality ({}) must be within 1..=100", a.jpeg_quality));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(errors))
        }
    }

    fn check_positive(value: f64, name: &str, errors: &mut Vec<String>) {
        if !(value > 0.0) {
            errors.push(format!("{name} ({value:.3}) must be > 0"));
        } else if Duration::try_from_secs_f64(value).is_err() {
            errors.push(format!("{name} ({value}) is not a representable duration"));
        }
    }

    fn check_non_negative(value: f64, name: &str, errors: &mut Vec<String>) {
        if !(value >= 0.0) {
            errors.push(format!("{name} ({value:.3}) must be >= 0"));
        } else if Duration::try_from_secs_f64(value).is_err() {
            errors.push(format!("{name} ({value}) is not a representable duration"));
        }
    }
}

// ============================================================================
// Error Type
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Config I/O error ({}): {}", .0.display(), .1)]
    Io(PathBuf, std::io::Error),

    #[error("Config parse error ({}): {}", .0.display(), .1)]
    Parse(PathBuf, toml::de::Error),

    #[error("Config serialization error: {0}")]
    Serialize(toml::ser::Error),

    #[error("Config validation failed: {}", .0.join("; "))]
    Validation(Vec<String>),
}

// ============================================================================
// Cameras
// ============================================================================

/// One monitored camera.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CameraConfig {
    pub id: String,

    /// Display name used in alert messages; defaults to the id.
    #[serde(default)]
    pub name: Option<String>,

    /// Device index (`"0"`) or stream URL (`"rtsp://..."`).
    pub source: String,

    #[serde(default = "default_frame_width")]
    pub width: u32,

    #[serde(default = "default_frame_height")]
    pub height: u32,

    /// Consumer polling rate.
    #[serde(default = "default_consumer_fps")]
    pub fps: u32,
}

impl CameraConfig {
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.id)
    }
}

fn default_frame_width() -> u32 {
    DEFAULT_FRAME_WIDTH
}

fn default_frame_height() -> u32 {
    DEFAULT_FRAME_HEIGHT
}

fn default_consumer_fps() -> u32 {
    DEFAULT_CONSUMER_FPS
}

// ============================================================================
// Capture
// ============================================================================

/// Reconnect, watchdog and shutdown timing shared by every frame source.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    pub initial_backoff_secs: f64,
    pub max_backoff_secs: f64,
    pub stall_timeout_secs: f64,
    pub read_failure_pause_ms: u64,
    pub stop_timeout_ms: u64,
    pub probe_timeout_secs: f64,
    /// ffmpeg executable used by the default capture backend.
    pub ffmpeg_path: String,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            initial_backoff_secs: INITIAL_BACKOFF_SECS,
            max_backoff_secs: MAX_BACKOFF_SECS,
            stall_timeout_secs: STALL_TIMEOUT_SECS,
            read_failure_pause_ms: READ_FAILURE_PAUSE_MS,
            stop_timeout_ms: STOP_TIMEOUT_MS,
            probe_timeout_secs: PROBE_TIMEOUT_SECS,
            ffmpeg_path: "ffmpeg".to_string(),
        }
    }
}

impl CaptureConfig {
    pub fn initial_backoff(&self) -> Duration {
        Duration::from_secs_f64(self.initial_backoff_secs)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_secs_f64(self.max_backoff_secs)
    }

    pub fn stall_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.stall_timeout_secs)
    }

    pub fn read_failure_pause(&self) -> Duration {
        Duration::from_millis(self.read_failure_pause_ms)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.probe_timeout_secs)
    }
}

// ============================================================================
// Posture
// ============================================================================

/// Posture classifier tuning. Cutoffs are in normalized image-height units.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PostureConfig {
    pub smoothing_window: usize,
    pub hold_time_secs: f64,
    pub confirm_duration_secs: f64,
    pub crouch_shoulder_ankle: f32,
    pub fallen_body_height: f32,
    pub sitting_knee_hip: f32,
}

impl Default for PostureConfig {
    fn default() -> Self {
        Self {
            smoothing_window: SMOOTHING_WINDOW,
            hold_time_secs: HOLD_TIME_SECS,
            confirm_duration_secs: CONFIRM_DURATION_SECS,
            crouch_shoulder_ankle: CROUCH_SHOULDER_ANKLE,
            fallen_body_height: FALLEN_BODY_HEIGHT,
            sitting_knee_hip: SITTING_KNEE_HIP,
        }
    }
}

impl PostureConfig {
    pub fn hold_time(&self) -> Duration {
        Duration::from_secs_f64(self.hold_time_secs)
    }

    pub fn confirm_duration(&self) -> Duration {
        Duration::from_secs_f64(self.confirm_duration_secs)
    }
}

// ============================================================================
// Inference
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InferenceConfig {
    pub interval_ms: u64,
    /// HTTP pose endpoint; when unset the monitor runs capture-only.
    pub oracle_url: Option<String>,
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            interval_ms: INFERENCE_INTERVAL_MS,
            oracle_url: None,
        }
    }
}

impl InferenceConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

// ============================================================================
// Alerts
// ============================================================================

/// Alert gating policy and evidence locations.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertsConfig {
    pub enabled: bool,
    pub min_duration_secs: f64,
    pub cooldown_secs: f64,
    /// Messaging channel recipients (chat ids).
    pub recipients: Vec<String>,
    /// Attach the current frame as a photo to fall alerts.
    pub attach_image: bool,
    /// Keep the attached photo on disk as the record's evidence.
    pub save_snapshot: bool,
    pub evidence_dir: PathBuf,
    pub snapshot_dir: PathBuf,
    pub history_path: PathBuf,
    pub history_capacity: usize,
    pub recording_queue_depth: usize,
    pub jpeg_quality: u8,
}

impl Default for AlertsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_duration_secs: MIN_FALL_DURATION_SECS,
            cooldown_secs: ALERT_COOLDOWN_SECS,
            recipients: Vec::new(),
            attach_image: true,
            save_snapshot: true,
            evidence_dir: PathBuf::from("./data/recordings"),
            snapshot_dir: PathBuf::from("./data/snapshots"),
            history_path: PathBuf::from("./data/alert_history.db"),
            history_capacity: HISTORY_CAPACITY,
            recording_queue_depth: RECORDING_QUEUE_DEPTH,
            jpeg_quality: JPEG_QUALITY,
        }
    }
}

impl AlertsConfig {
    pub fn min_duration(&self) -> Duration {
        Duration::from_secs_f64(self.min_duration_secs)
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_secs_f64(self.cooldown_secs)
    }
}

// ============================================================================
// Telegram
// ============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TelegramConfig {
    /// Bot token; empty means notifications are only logged.
    pub token: String,
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_validates() {
        let config = MonitorConfig::default();
        assert!(config.validate().is_ok(), "Default config must always validate");
    }

    #[test]
    fn test_empty_toml_produces_defaults() {
        let config: MonitorConfig = toml::from_str("").expect("empty TOML should parse");
        assert!(config.cameras.is_empty());
        assert_eq!(config.capture.initial_backoff(), Duration::from_secs(1));
        assert_eq!(config.capture.max_backoff(), Duration::from_secs(30));
        assert_eq!(config.capture.stall_timeout(), Duration::from_secs(5));
        assert_eq!(config.posture.smoothing_window, 9);
        assert_eq!(config.inference.interval(), Duration::from_millis(100));
        assert_eq!(config.alerts.min_duration(), Duration::from_secs(2));
        assert_eq!(config.alerts.cooldown(), Duration::from_secs(60));
        assert_eq!(config.alerts.history_capacity, 100);
    }

    #[test]
    fn test_partial_toml_override() {
        let toml_str = r#"
            [[cameras]]
            id = "hall"
            name = "Hallway"
            source = "rtsp://10.0.0.5:554/stream1"

            [[cameras]]
            id = "usb"
            source = "0"
            fps = 10

            [alerts]
            cooldown_secs = 120.0
            recipients = ["1111", "2222"]
        "#;
        let config: MonitorConfig = toml::from_str(toml_str).expect("valid TOML");
        assert_eq!(config.cameras.len(), 2);
        assert_eq!(config.cameras[0].display_name(), "Hallway");
        assert_eq!(config.cameras[1].display_name(), "usb");
        assert_eq!(config.cameras[1].width, DEFAULT_FRAME_WIDTH);
        assert_eq!(config.cameras[1].fps, 10);
        assert_eq!(config.alerts.cooldown(), Duration::from_secs(120));
        assert_eq!(config.alerts.recipients, vec!["1111", "2222"]);
        // Untouched keys keep their defaults
        assert_eq!(config.alerts.min_duration_secs, MIN_FALL_DURATION_SECS);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation_collects_all_errors() {
        let mut config = MonitorConfig::default();
        config.capture.max_backoff_secs = 0.5;
        config.posture.smoothing_window = 0;
        config.alerts.history_capacity = 0;
        match config.validate() {
            Err(ConfigError::Validation(errors)) => assert_eq!(errors.len(), 3, "{errors:?}"),
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn test_infinite_durations_rejected() {
        let toml_str = r#"
            [capture]
            max_backoff_secs = inf
            [posture]
            hold_time_secs = inf
            [alerts]
            cooldown_secs = inf
            min_duration_secs = nan
        "#;
        let config: MonitorConfig = toml::from_str(toml_str).expect("valid TOML");
        match config.validate() {
            Err(ConfigError::Validation(errors)) => {
                assert_eq!(errors.len(), 4, "{errors:?}");
                assert!(errors.iter().any(|e| e.starts_with("alerts.cooldown_secs")));
                assert!(errors.iter().any(|e| e.starts_with("capture.max_backoff_secs")));
            }
            other => panic!("expected validation error, got {other:?}"),
        }

        let mut config = MonitorConfig::default();
        config.posture.confirm_duration_secs = 1e300;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_duplicate_camera_ids_rejected() {
        let toml_str = r#"
            [[cameras]]
            id = "a"
            source = "0"
            [[cameras]]
            id = "a"
            source = "1"
        "#;
        let config: MonitorConfig = toml::from_str(toml_str).expect("valid TOML");
        let err = config.validate().expect_err("duplicate ids");
        assert!(err.to_string().contains("duplicate id 'a'"));
    }

    #[test]
    fn test_save_and_reload_roundtrip() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("fallwatch.toml");
        let mut config = MonitorConfig::default();
        config.alerts.recipients = vec!["42".to_string()];
        config.save_to_file(&path).expect("save");
        let loaded = MonitorConfig::load_from_file(&path).expect("reload");
        assert_eq!(loaded.alerts.recipients, vec!["42"]);
    }
}

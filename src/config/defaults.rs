//! System-wide default constants.
//!
//! Grouped by subsystem. Every `MonitorConfig` default resolves to one of these.

// ============================================================================
// Capture
// ============================================================================

/// First reconnect delay after an open failure (seconds).
pub const INITIAL_BACKOFF_SECS: f64 = 1.0;

/// Reconnect delay cap (seconds). Delays double until they reach this.
pub const MAX_BACKOFF_SECS: f64 = 30.0;

/// Watchdog: a connected source with no frame for this long is torn down (seconds).
pub const STALL_TIMEOUT_SECS: f64 = 5.0;

/// Pause after a failed read before the reconnect loop takes over (ms).
pub const READ_FAILURE_PAUSE_MS: u64 = 1_000;

/// How long `stop()` waits for the capture loop to acknowledge (ms).
pub const STOP_TIMEOUT_MS: u64 = 1_000;

/// Time allowed for a freshly spawned source to deliver its first frame (seconds).
pub const PROBE_TIMEOUT_SECS: f64 = 10.0;

/// Default decode resolution for camera streams.
pub const DEFAULT_FRAME_WIDTH: u32 = 640;
pub const DEFAULT_FRAME_HEIGHT: u32 = 480;

/// Default consumer polling rate (frames per second).
pub const DEFAULT_CONSUMER_FPS: u32 = 15;

/// Default RTSP port used when building URLs from parts.
pub const DEFAULT_RTSP_PORT: u16 = 554;

// ============================================================================
// Posture
// ============================================================================

/// Trailing moving-average window for the posture metrics (samples).
pub const SMOOTHING_WINDOW: usize = 9;

/// Debounce: a new raw label must persist this long to become stable (seconds).
pub const HOLD_TIME_SECS: f64 = 1.0;

/// Time on the ground before a possible fall is confirmed (seconds).
pub const CONFIRM_DURATION_SECS: f64 = 5.0;

/// Shoulder-to-ankle vertical separation below which the subject is crouching.
pub const CROUCH_SHOULDER_ANKLE: f32 = 0.15;

/// Shoulder-to-hip vertical separation below which the subject is fallen.
pub const FALLEN_BODY_HEIGHT: f32 = 0.09;

/// Knee-to-hip vertical separation below which the subject is sitting.
pub const SITTING_KNEE_HIP: f32 = 0.075;

// ============================================================================
// Inference
// ============================================================================

/// Minimum spacing between pose oracle invocations per camera (ms).
pub const INFERENCE_INTERVAL_MS: u64 = 100;

/// Request timeout for the HTTP pose oracle (seconds).
pub const ORACLE_TIMEOUT_SECS: u64 = 5;

// ============================================================================
// Alerts
// ============================================================================

/// A fall episode must last this long before it may alert (seconds).
pub const MIN_FALL_DURATION_SECS: f64 = 2.0;

/// Minimum spacing between two alerts for the same camera (seconds).
pub const ALERT_COOLDOWN_SECS: f64 = 60.0;

/// Maximum number of alert history entries retained.
pub const HISTORY_CAPACITY: usize = 100;

/// Frames buffered between the hot path and the evidence writer thread.
pub const RECORDING_QUEUE_DEPTH: usize = 64;

/// JPEG quality for snapshots and evidence frames.
pub const JPEG_QUALITY: u8 = 80;

/// Request timeout for messaging channel text and photo sends (seconds).
pub const SEND_TIMEOUT_SECS: u64 = 10;

/// Request timeout for evidence video uploads (seconds).
pub const VIDEO_UPLOAD_TIMEOUT_SECS: u64 = 120;

/// Grace period for pending side effects at shutdown (seconds).
pub const SHUTDOWN_GRACE_SECS: u64 = 10;

// ============================================================================
// Pipeline
// ============================================================================

/// Interval between per-camera throughput log lines (seconds).
pub const STATS_LOG_INTERVAL_SECS: u64 = 60;

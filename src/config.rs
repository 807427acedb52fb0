use crate::error::{PlayerError, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Combined byte ceiling of both packet queues (15 MiB)
pub const MAX_QUEUE_BYTES: usize = 15 * 1024 * 1024;
/// Decoded pictures kept ready ahead of the display
pub const PICTURE_QUEUE_SIZE: usize = 3;
/// A/V drift tolerated before the frame delay is corrected
pub const SYNC_THRESHOLD: f64 = 0.1;
/// Drift beyond this is a discontinuity, never corrected
pub const NOSYNC_THRESHOLD: f64 = 10.0;
pub const MAX_FRAME_DELAY: f64 = 1.0;
pub const MIN_REFRESH_DELAY: f64 = 0.010;
pub const DISPLAY_TICK_MS: u64 = 40;
pub const DISPATCH_BACKOFF_MS: u64 = 10;
pub const AUDIO_BUFFER_FRAMES: u32 = 1024;

/// Playback engine tunables
///
/// Every field has a default so a partial JSON file is enough to override a
/// single value.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct PlayerConfig {
    /// Dispatch pauses once both packet queues together hold this many bytes
    pub max_queue_bytes: usize,
    pub picture_queue_capacity: usize,
    /// Seconds
    pub sync_threshold: f64,
    /// Seconds
    pub nosync_threshold: f64,
    /// Frame-to-frame delays above this are treated as corrupt timestamps
    pub max_frame_delay: f64,
    /// Lower bound of the wall-clock wait between two refreshes
    pub min_refresh_delay: f64,
    /// Retry period while no picture is ready
    pub display_tick_ms: u64,
    /// Sleep of the dispatch loop when the queues are full or the source is dry
    pub dispatch_backoff_ms: u64,
    pub audio_buffer_frames: u32,
    pub audio_enabled: bool,
    pub video_enabled: bool,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        PlayerConfig {
            max_queue_bytes: MAX_QUEUE_BYTES,
            picture_queue_capacity: PICTURE_QUEUE_SIZE,
            sync_threshold: SYNC_THRESHOLD,
            nosync_threshold: NOSYNC_THRESHOLD,
            max_frame_delay: MAX_FRAME_DELAY,
            min_refresh_delay: MIN_REFRESH_DELAY,
            display_tick_ms: DISPLAY_TICK_MS,
            dispatch_backoff_ms: DISPATCH_BACKOFF_MS,
            audio_buffer_frames: AUDIO_BUFFER_FRAMES,
            audio_enabled: true,
            video_enabled: true,
        }
    }
}

impl PlayerConfig {
    /// Load a JSON config file, missing fields fall back to defaults
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let config: PlayerConfig = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.picture_queue_capacity == 0 {
            return Err(PlayerError::Config(
                "picture_queue_capacity must be at least 1".into(),
            ));
        }
        if self.max_queue_bytes == 0 {
            return Err(PlayerError::Config("max_queue_bytes must be positive".into()));
        }
        if self.sync_threshold <= 0.0 || self.nosync_threshold <= self.sync_threshold {
            return Err(PlayerError::Config(format!(
                "thresholds out of range (sync {}, nosync {})",
                self.sync_threshold, self.nosync_threshold
            )));
        }
        if self.max_frame_delay <= 0.0 || self.min_refresh_delay < 0.0 {
            return Err(PlayerError::Config("frame delay bounds out of range".into()));
        }
        if self.display_tick_ms == 0 || self.audio_buffer_frames == 0 {
            return Err(PlayerError::Config(
                "display_tick_ms and audio_buffer_frames must be positive".into(),
            ));
        }
        if !self.audio_enabled && !self.video_enabled {
            return Err(PlayerError::Config("both audio and video are disabled".into()));
        }
        Ok(())
    }

    pub fn display_tick(&self) -> Duration {
        Duration::from_millis(self.display_tick_ms)
    }

    pub fn dispatch_backoff(&self) -> Duration {
        Duration::from_millis(self.dispatch_backoff_ms)
    }
}

/// Returns a version as specified in Cargo.toml
pub fn app_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

pub fn app_name() -> &'static str {
    env!("CARGO_PKG_NAME")
}

//! Playback pipeline
//!
//! The playback flow:
//! ```text
//! Source → Demux ─┬→ audio queue → AudioRenderer (device callback) → AudioClock
//!                 └→ video queue → VideoStage → PictureQueue → RefreshStage → Presenter
//! ```
//!
//! Demux and video decode run on their own threads, the renderer on the
//! audio device's thread, the refresh stage on the thread that owns the
//! [`Player`] and consumes [`PlayerEvent`]s.

pub mod audio_stage;
pub mod coordinator;
pub mod demux_stage;
pub mod refresh_stage;
pub mod video_stage;

pub use audio_stage::{AudioFill, AudioRenderer};
pub use coordinator::{PlaybackReport, Player};
pub use demux_stage::DemuxStage;
pub use refresh_stage::{RefreshOutcome, RefreshStage, compute_target_delay};
pub use video_stage::VideoStage;

/// Messages consumed by the controlling loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayerEvent {
    /// Timer fired: run the refresh scheduler
    Refresh,
    /// The demuxer reached the end of the input
    SourceExhausted,
    TogglePause,
    Quit,
}

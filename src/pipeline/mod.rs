//! Playback pipeline for syncplay
//!
//! Shared building blocks live at this level:
//! - Bounded packet queues between the demuxer and the decoders
//! - The picture queue between video decode and display
//! - Audio and video clocks, the frame timer
//! - Session state, lifecycle phases and health counters
//!
//! The stages themselves and the coordinator that wires them are in
//! [`playback`].

pub mod clock;
pub mod health;
pub mod packet_queue;
pub mod picture_queue;
pub mod playback;
pub mod stage;
pub mod state;
pub mod types;

pub use clock::{AudioClock, FrameTimer, VideoClock};
pub use health::{HealthSnapshot, PlaybackHealth};
pub use packet_queue::{BoundedPacketQueue, QueueGet};
pub use picture_queue::{DecodedVideoFrame, PictureQueue};
pub use playback::{PlaybackReport, Player, PlayerEvent};
pub use stage::{PlaybackStage, spawn_stage};
pub use state::{PlaybackPhase, PlaybackState};
pub use types::{MediaKind, Packet, TimeBase};

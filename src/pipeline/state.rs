//! Playback session state shared by every stage

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Instant;

use super::clock::{AudioClock, VideoClock};
use super::health::PlaybackHealth;
use super::packet_queue::BoundedPacketQueue;
use super::picture_queue::PictureQueue;
use crate::config::PlayerConfig;
use crate::utils::sos::SignalOfStop;

/// Playback lifecycle
///
/// State transitions are validated so every stage observes a consistent
/// sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackPhase {
    /// Session created, no thread started
    Idle,

    /// Output devices are being opened and threads spawned
    Initializing,

    /// Frames are being presented
    Running {
        /// When playback started
        started_at: Instant,
    },

    /// Presentation suspended (can resume to Running)
    Paused {
        /// When playback was paused
        paused_at: Instant,
    },

    /// Quit requested, threads are winding down
    Stopping,

    /// Every thread has joined
    Stopped,
}

impl PlaybackPhase {
    /// Check if this state transition is valid
    pub fn can_transition_to(&self, target: &PlaybackPhase) -> bool {
        use PlaybackPhase::*;

        match (self, target) {
            (Idle, Initializing) => true,
            (Idle, Stopping) => true,

            (Initializing, Running { .. }) => true,
            (Initializing, Stopping) => true, // Can abort initialization

            (Running { .. }, Paused { .. }) => true,
            (Running { .. }, Stopping) => true,

            (Paused { .. }, Running { .. }) => true,
            (Paused { .. }, Stopping) => true,

            (Stopping, Stopped) => true,

            // From Stopped - no transitions allowed
            (Stopped, _) => false,

            (a, b) if a == b => true,

            _ => false,
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            PlaybackPhase::Idle => "Idle",
            PlaybackPhase::Initializing => "Initializing",
            PlaybackPhase::Running { .. } => "Running",
            PlaybackPhase::Paused { .. } => "Paused",
            PlaybackPhase::Stopping => "Stopping",
            PlaybackPhase::Stopped => "Stopped",
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(self, PlaybackPhase::Running { .. })
    }

    pub fn is_paused(&self) -> bool {
        matches!(self, PlaybackPhase::Paused { .. })
    }

    pub fn is_stopped(&self) -> bool {
        matches!(self, PlaybackPhase::Stopped | PlaybackPhase::Stopping)
    }
}

impl std::fmt::Display for PlaybackPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.description())
    }
}

/// Context of one playback session
///
/// Created when the source is opened and handed by `Arc` to every thread
/// entry point. Each queue owns its own lock; clocks and flags are atomics.
pub struct PlaybackState {
    pub config: PlayerConfig,
    pub audio_queue: BoundedPacketQueue,
    pub video_queue: BoundedPacketQueue,
    pub pictures: PictureQueue,
    pub audio_clock: AudioClock,
    pub video_clock: VideoClock,
    pub health: PlaybackHealth,
    quit: SignalOfStop,
    phase: Mutex<PlaybackPhase>,
    has_audio: bool,
    has_video: bool,
    source_exhausted: AtomicBool,
    audio_finished: AtomicBool,
    video_finished: AtomicBool,
}

impl PlaybackState {
    pub fn new(config: PlayerConfig, has_audio: bool, has_video: bool) -> Self {
        let pictures = PictureQueue::new(config.picture_queue_capacity);
        Self {
            config,
            audio_queue: BoundedPacketQueue::new("audio"),
            video_queue: BoundedPacketQueue::new("video"),
            pictures,
            audio_clock: AudioClock::new(),
            video_clock: VideoClock::new(),
            health: PlaybackHealth::new(),
            quit: SignalOfStop::new(),
            phase: Mutex::new(PlaybackPhase::Idle),
            has_audio,
            has_video,
            source_exhausted: AtomicBool::new(false),
            audio_finished: AtomicBool::new(false),
            video_finished: AtomicBool::new(false),
        }
    }

    /// Request shutdown of every thread
    ///
    /// Only the first call wakes the waiters; it returns `true`.
    pub fn request_quit(&self) -> bool {
        if !self.quit.cancel() {
            return false;
        }
        self.audio_queue.abort();
        self.video_queue.abort();
        self.pictures.abort();
        self.transition(PlaybackPhase::Stopping);
        true
    }

    pub fn quit_requested(&self) -> bool {
        self.quit.cancelled()
    }

    /// Handle on the quit flag for waits outside the queues
    pub fn quit_signal(&self) -> SignalOfStop {
        self.quit.clone()
    }

    pub fn phase(&self) -> PlaybackPhase {
        *self.phase.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Move to `target` if the lifecycle allows it
    pub fn transition(&self, target: PlaybackPhase) -> bool {
        let mut phase = self.phase.lock().unwrap_or_else(PoisonError::into_inner);
        if !phase.can_transition_to(&target) {
            log::debug!("PlaybackState: ignoring transition {} -> {}", *phase, target);
            return false;
        }
        *phase = target;
        true
    }

    pub fn is_paused(&self) -> bool {
        self.phase().is_paused()
    }

    /// Flip between running and paused, returns whether playback is now paused
    pub fn toggle_pause(&self) -> bool {
        let mut phase = self.phase.lock().unwrap_or_else(PoisonError::into_inner);
        match *phase {
            PlaybackPhase::Running { .. } => {
                *phase = PlaybackPhase::Paused {
                    paused_at: Instant::now(),
                };
                true
            }
            PlaybackPhase::Paused { .. } => {
                *phase = PlaybackPhase::Running {
                    started_at: Instant::now(),
                };
                false
            }
            _ => false,
        }
    }

    /// Combined size of both packet queues, polled by the dispatch loop
    pub fn queued_bytes(&self) -> usize {
        self.audio_queue.size_bytes() + self.video_queue.size_bytes()
    }

    pub fn mark_source_exhausted(&self) {
        self.source_exhausted.store(true, Ordering::Release);
    }

    pub fn source_exhausted(&self) -> bool {
        self.source_exhausted.load(Ordering::Acquire)
    }

    pub fn mark_audio_finished(&self) {
        self.audio_finished.store(true, Ordering::Release);
    }

    pub fn audio_finished(&self) -> bool {
        self.audio_finished.load(Ordering::Acquire)
    }

    pub fn mark_video_finished(&self) {
        self.video_finished.store(true, Ordering::Release);
    }

    pub fn video_finished(&self) -> bool {
        self.video_finished.load(Ordering::Acquire)
    }

    /// Source exhausted and every tracked stream fully played out
    pub fn is_drained(&self) -> bool {
        if !self.source_exhausted() {
            return false;
        }
        let video_done = !self.has_video || (self.video_finished() && self.pictures.is_empty());
        let audio_done = !self.has_audio || self.audio_finished();
        video_done && audio_done
    }
}

impl std::fmt::Debug for PlaybackState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlaybackState")
            .field("phase", &self.phase())
            .field("quit", &self.quit_requested())
            .field("audio_queue", &self.audio_queue)
            .field("video_queue", &self.video_queue)
            .field("pictures", &self.pictures)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::packet_queue::QueueGet;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_valid_transitions() {
        let idle = PlaybackPhase::Idle;
        let initializing = PlaybackPhase::Initializing;
        let running = PlaybackPhase::Running {
            started_at: Instant::now(),
        };
        let paused = PlaybackPhase::Paused {
            paused_at: Instant::now(),
        };
        let stopping = PlaybackPhase::Stopping;
        let stopped = PlaybackPhase::Stopped;

        assert!(idle.can_transition_to(&initializing));
        assert!(initializing.can_transition_to(&running));
        assert!(running.can_transition_to(&paused));
        assert!(paused.can_transition_to(&running));
        assert!(running.can_transition_to(&stopping));
        assert!(paused.can_transition_to(&stopping));
        assert!(stopping.can_transition_to(&stopped));

        assert!(!idle.can_transition_to(&running)); // Must go through Initializing
        assert!(!stopped.can_transition_to(&running));
        assert!(!stopped.can_transition_to(&idle));
    }

    #[test]
    fn test_toggle_pause() {
        let state = PlaybackState::new(PlayerConfig::default(), true, true);
        // Nothing to pause before playback starts
        assert!(!state.toggle_pause());

        state.transition(PlaybackPhase::Initializing);
        state.transition(PlaybackPhase::Running {
            started_at: Instant::now(),
        });
        assert!(state.toggle_pause());
        assert!(state.is_paused());
        assert!(!state.toggle_pause());
        assert!(state.phase().is_running());
    }

    #[test]
    fn test_concurrent_quit_is_idempotent() {
        let state = Arc::new(PlaybackState::new(PlayerConfig::default(), true, true));

        let waiters: Vec<_> = [true, false]
            .into_iter()
            .map(|audio| {
                let state = Arc::clone(&state);
                thread::spawn(move || {
                    let queue = if audio { &state.audio_queue } else { &state.video_queue };
                    matches!(queue.get(true), QueueGet::Closing)
                })
            })
            .collect();

        thread::sleep(Duration::from_millis(20));
        let quitters: Vec<_> = (0..2)
            .map(|_| {
                let state = Arc::clone(&state);
                thread::spawn(move || state.request_quit())
            })
            .collect();

        let transitions = quitters
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|&flipped| flipped)
            .count();
        assert_eq!(transitions, 1);

        for waiter in waiters {
            assert!(waiter.join().unwrap());
        }
        assert!(state.quit_requested());
        assert!(state.pictures.is_aborted());
        assert_eq!(state.phase(), PlaybackPhase::Stopping);
    }

    #[test]
    fn test_drained_requires_every_stream() {
        let state = PlaybackState::new(PlayerConfig::default(), true, true);
        state.mark_video_finished();
        state.mark_audio_finished();
        assert!(!state.is_drained(), "source still producing");

        state.mark_source_exhausted();
        assert!(state.is_drained());

        let video_only = PlaybackState::new(PlayerConfig::default(), false, true);
        video_only.mark_source_exhausted();
        assert!(!video_only.is_drained());
        video_only.mark_video_finished();
        assert!(video_only.is_drained());

        video_only
            .pictures
            .push_with(0.0, |_| {})
            .unwrap();
        assert!(!video_only.is_drained(), "a picture is still waiting");
    }
}

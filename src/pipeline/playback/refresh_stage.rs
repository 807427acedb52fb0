//! Refresh scheduler and A/V sync controller
//!
//! Runs on the controlling thread, driven by timer events. Each refresh shows
//! the head picture and computes when the next refresh is due, stretching or
//! shrinking the nominal frame delay so video follows the audio clock.
//!
//! # Algorithm
//!
//! 1. `delay = pts - previous pts`, falling back to the previous delay when
//!    that is non-positive or above `max_frame_delay`
//! 2. `diff = pts - audio clock`
//! 3. Within `nosync_threshold`: a head frame stamped `sync_threshold` or
//!    more past the audio clock shows at once (`delay = 0`), one stamped as
//!    far before it waits twice as long
//! 4. The frame timer accumulates `delay`; the wait until the next refresh is
//!    the timer minus now, never below `min_refresh_delay`

use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{debug, info, warn};

use crate::config::PlayerConfig;
use crate::display::{SurfaceHandle, VideoPresenter};
use crate::pipeline::clock::FrameTimer;
use crate::pipeline::state::PlaybackState;

/// What the controlling loop should do after a refresh
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// Refresh again after this delay: the frame timer's wall-clock wait,
    /// not a fixed display tick
    Reschedule(Duration),
    /// Every stream has played out
    Finished,
    /// Quit was requested
    Stopped,
}

/// Frame-to-frame delay with corrupt timestamps rejected
///
/// Returns the delay and whether the raw value was rejected.
pub fn frame_delay(pts: f64, last_pts: f64, last_delay: f64, max_frame_delay: f64) -> (f64, bool) {
    let delay = pts - last_pts;
    if delay <= 0.0 || delay > max_frame_delay {
        (last_delay, true)
    } else {
        (delay, false)
    }
}

/// Correct `delay` for the distance between video and the audio clock
///
/// Without an audio clock the delay is returned unchanged.
pub fn compute_target_delay(delay: f64, pts: f64, audio_clock: Option<f64>, config: &PlayerConfig) -> f64 {
    let Some(audio) = audio_clock else {
        return delay;
    };

    let diff = pts - audio;
    if diff.abs() >= config.nosync_threshold {
        // Discontinuity, not drift
        return delay;
    }
    if diff >= config.sync_threshold {
        0.0
    } else if diff <= -config.sync_threshold {
        2.0 * delay
    } else {
        delay
    }
}

pub struct RefreshStage {
    state: Arc<PlaybackState>,
    presenter: Box<dyn VideoPresenter>,
    surface: Option<(SurfaceHandle, u32, u32)>,
    timer: FrameTimer,
    started: bool,
    was_paused: bool,
    frames_presented: u64,
}

impl RefreshStage {
    pub fn new(state: Arc<PlaybackState>, presenter: Box<dyn VideoPresenter>) -> Self {
        let initial_delay = state.config.display_tick().as_secs_f64();
        Self {
            state,
            presenter,
            surface: None,
            timer: FrameTimer::new(initial_delay),
            started: false,
            was_paused: false,
            frames_presented: 0,
        }
    }

    pub fn frames_presented(&self) -> u64 {
        self.frames_presented
    }

    fn idle(&self) -> RefreshOutcome {
        if self.state.is_drained() {
            info!("RefreshStage: playback finished ({} frames)", self.frames_presented);
            RefreshOutcome::Finished
        } else {
            RefreshOutcome::Reschedule(self.state.config.display_tick())
        }
    }

    /// Handle one timer event
    pub fn refresh(&mut self, now: Instant) -> RefreshOutcome {
        let state = Arc::clone(&self.state);
        let config = &state.config;

        if state.quit_requested() {
            return RefreshOutcome::Stopped;
        }
        if state.is_paused() {
            self.was_paused = true;
            return RefreshOutcome::Reschedule(config.display_tick());
        }
        if self.was_paused {
            // The paused interval is not drift
            self.was_paused = false;
            self.timer.reanchor(now);
        }

        let Some(pts) = state.pictures.peek_pts() else {
            return self.idle();
        };

        if !self.started || self.timer.lag(now) > config.max_frame_delay {
            self.started = true;
            self.timer.reanchor(now);
        }

        let (delay, anomaly) = frame_delay(
            pts,
            self.timer.last_frame_pts(),
            self.timer.last_frame_delay(),
            config.max_frame_delay,
        );
        if anomaly && self.frames_presented > 0 {
            warn!(
                "RefreshStage: timestamp anomaly at pts {:.3} (previous {:.3}), keeping {:.3}s",
                pts,
                self.timer.last_frame_pts(),
                delay
            );
            state.health.record_timestamp_anomaly();
        }
        self.timer.record_frame(pts, delay);

        let target = compute_target_delay(delay, pts, state.audio_clock.current(), config);
        let actual = self.timer.advance(target, now, config.min_refresh_delay);
        debug!(
            "RefreshStage: pts {:.3} delay {:.3} target {:.3} wait {:?}",
            pts, delay, target, actual
        );

        self.present();
        RefreshOutcome::Reschedule(actual)
    }

    fn present(&mut self) {
        let presenter = &mut self.presenter;
        let surface = &mut self.surface;

        let shown = self.state.pictures.pop_with(|frame| {
            let handle = match *surface {
                Some((handle, w, h)) if w == frame.width && h == frame.height => handle,
                _ => {
                    let handle = presenter.create_output_surface(frame.width, frame.height)?;
                    *surface = Some((handle, frame.width, frame.height));
                    handle
                }
            };
            presenter.present_video_frame(handle, frame)
        });

        match shown {
            Some(Ok(())) => {
                self.frames_presented += 1;
                self.state.health.record_frame_presented();
            }
            Some(Err(e)) => warn!("RefreshStage: couldn't present frame: {}", e),
            None => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::display::HeadlessPresenter;
    use crate::pipeline::state::PlaybackPhase;

    fn config() -> PlayerConfig {
        PlayerConfig::default()
    }

    #[test]
    fn test_head_past_audio_clock_presents_immediately() {
        let delay = compute_target_delay(0.04, 10.6, Some(10.0), &config());
        assert_eq!(delay, 0.0);
    }

    #[test]
    fn test_head_before_audio_clock_doubles_delay() {
        let delay = compute_target_delay(0.04, 10.0, Some(10.6), &config());
        assert!((delay - 0.08).abs() < 1e-12);
    }

    #[test]
    fn test_small_drift_leaves_delay_unchanged() {
        assert_eq!(compute_target_delay(0.04, 9.99, Some(10.0), &config()), 0.04);
        assert_eq!(compute_target_delay(0.04, 10.05, Some(10.0), &config()), 0.04);
    }

    #[test]
    fn test_discontinuity_and_missing_audio_are_ignored() {
        assert_eq!(compute_target_delay(0.04, 30.0, Some(10.0), &config()), 0.04);
        assert_eq!(compute_target_delay(0.04, 0.0, Some(10.5), &config()), 0.04);
        assert_eq!(compute_target_delay(0.04, 10.6, None, &config()), 0.04);
    }

    #[test]
    fn test_frame_delay_rejects_corrupt_timestamps() {
        assert_eq!(frame_delay(1.04, 1.0, 0.05, 1.0).1, false);
        assert!((frame_delay(1.04, 1.0, 0.05, 1.0).0 - 0.04).abs() < 1e-9);
        assert_eq!(frame_delay(0.9, 1.0, 0.05, 1.0), (0.05, true));
        assert_eq!(frame_delay(1.0, 1.0, 0.05, 1.0), (0.05, true));
        assert_eq!(frame_delay(5.0, 1.0, 0.05, 1.0), (0.05, true));
    }

    fn running_state(has_audio: bool) -> Arc<PlaybackState> {
        let config = PlayerConfig {
            picture_queue_capacity: 8,
            ..Default::default()
        };
        let state = Arc::new(PlaybackState::new(config, has_audio, true));
        state.transition(PlaybackPhase::Initializing);
        state.transition(PlaybackPhase::Running {
            started_at: Instant::now(),
        });
        state
    }

    fn wait_secs(outcome: RefreshOutcome) -> f64 {
        match outcome {
            RefreshOutcome::Reschedule(wait) => wait.as_secs_f64(),
            other => panic!("expected a reschedule, got {:?}", other),
        }
    }

    fn push(state: &PlaybackState, pts: f64) {
        state
            .pictures
            .push_with(pts, |f| {
                f.width = 4;
                f.height = 2;
                f.planes = vec![vec![0u8; 8]];
            })
            .unwrap();
    }

    #[test]
    fn test_refresh_presents_in_order_and_paces_by_pts() {
        let state = running_state(false);
        let presenter = HeadlessPresenter::new();
        let log = presenter.presented();
        let mut stage = RefreshStage::new(Arc::clone(&state), Box::new(presenter));

        for i in 0..3 {
            push(&state, i as f64 * 0.1);
        }

        let t0 = Instant::now();
        // First frame: previous delay (one display tick)
        assert!((wait_secs(stage.refresh(t0)) - 0.04).abs() < 1e-6);
        // Second frame, on time: 0.1s after the first anchor step
        let wait = wait_secs(stage.refresh(t0 + Duration::from_millis(40)));
        assert!((wait - 0.1).abs() < 1e-6, "{}", wait);
        stage.refresh(t0 + Duration::from_millis(140));

        let shown: Vec<f64> = log.lock().unwrap().iter().map(|p| p.pts).collect();
        assert_eq!(shown, vec![0.0, 0.1, 0.2]);
        assert_eq!(state.health.snapshot().frames_presented, 3);
        assert_eq!(state.health.snapshot().timestamp_anomalies, 0);
    }

    #[test]
    fn test_refresh_clamps_late_schedule_to_minimum() {
        let state = running_state(false);
        let mut stage = RefreshStage::new(Arc::clone(&state), Box::new(HeadlessPresenter::new()));
        push(&state, 0.0);
        push(&state, 0.04);

        let t0 = Instant::now();
        stage.refresh(t0);
        // 300ms late: nothing left to wait for
        let wait = wait_secs(stage.refresh(t0 + Duration::from_millis(340)));
        assert!((wait - 0.010).abs() < 1e-6, "{}", wait);
    }

    #[test]
    fn test_refresh_counts_backwards_timestamps() {
        let state = running_state(false);
        let mut stage = RefreshStage::new(Arc::clone(&state), Box::new(HeadlessPresenter::new()));
        push(&state, 1.0);
        push(&state, 0.5);

        let t0 = Instant::now();
        stage.refresh(t0);
        stage.refresh(t0 + Duration::from_millis(40));
        assert_eq!(state.health.snapshot().timestamp_anomalies, 1);
        assert_eq!(stage.frames_presented(), 2);
    }

    #[test]
    fn test_refresh_waits_while_paused_and_empty() {
        let state = running_state(false);
        let mut stage = RefreshStage::new(Arc::clone(&state), Box::new(HeadlessPresenter::new()));
        let tick = RefreshOutcome::Reschedule(Duration::from_millis(40));

        assert_eq!(stage.refresh(Instant::now()), tick);

        push(&state, 0.0);
        state.toggle_pause();
        assert_eq!(stage.refresh(Instant::now()), tick);
        assert_eq!(state.pictures.len(), 1, "nothing shown while paused");

        state.toggle_pause();
        stage.refresh(Instant::now());
        assert!(state.pictures.is_empty());
    }

    #[test]
    fn test_refresh_finishes_when_drained() {
        let state = running_state(false);
        let mut stage = RefreshStage::new(Arc::clone(&state), Box::new(HeadlessPresenter::new()));
        push(&state, 0.0);
        state.mark_source_exhausted();
        state.mark_video_finished();

        assert!(matches!(stage.refresh(Instant::now()), RefreshOutcome::Reschedule(_)));
        assert_eq!(stage.refresh(Instant::now()), RefreshOutcome::Finished);

        state.request_quit();
        assert_eq!(stage.refresh(Instant::now()), RefreshOutcome::Stopped);
    }

    #[test]
    fn test_refresh_follows_audio_clock() {
        let state = running_state(true);
        let mut stage = RefreshStage::new(Arc::clone(&state), Box::new(HeadlessPresenter::new()));
        state.audio_clock.set_bytes_per_second(176_400);
        state.audio_clock.set_last_known_pts(0.0);

        push(&state, 0.0);
        push(&state, 0.04);
        push(&state, 0.5);

        let t0 = Instant::now();
        stage.refresh(t0);
        // Head 0.26s before the audio clock: the 0.04s delay doubles
        state.audio_clock.set_last_known_pts(0.3);
        let wait = wait_secs(stage.refresh(t0 + Duration::from_millis(40)));
        assert!((wait - 0.08).abs() < 1e-6, "{}", wait);

        // Head 0.2s past the audio clock: shown at once, only the minimum wait
        let wait = wait_secs(stage.refresh(t0 + Duration::from_millis(120)));
        assert!((wait - 0.010).abs() < 1e-6, "{}", wait);
        assert_eq!(stage.frames_presented(), 3);
    }
}

//! Playback clocks for audio-video synchronization
//!
//! - [`AudioClock`]: position of the audio currently heard, the master clock
//! - [`VideoClock`]: predicted timestamp of the next decoded video frame
//! - [`FrameTimer`]: wall-clock anchor of the refresh scheduler
//!
//! The two stream clocks have a single writer each (audio callback, video
//! stage) and are read lock-free by the refresh stage. Values are stored as
//! `f64` bit patterns in atomics; readers accept slightly stale values.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

#[inline]
fn load_f64(cell: &AtomicU64) -> f64 {
    f64::from_bits(cell.load(Ordering::Relaxed))
}

#[inline]
fn store_f64(cell: &AtomicU64, value: f64) {
    cell.store(value.to_bits(), Ordering::Relaxed);
}

/// Audio master clock
///
/// `last_known_pts` is the timestamp at the end of the most recently decoded
/// audio buffer; the part of that buffer not yet handed to the device is
/// subtracted to get the position being played.
#[derive(Debug, Default)]
pub struct AudioClock {
    last_known_pts: AtomicU64,
    bytes_per_second: AtomicU64,
    unplayed_buffered_bytes: AtomicUsize,
    started: AtomicBool,
}

impl AudioClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the output byte rate (`sample_rate * channels * bytes_per_sample`)
    pub fn set_bytes_per_second(&self, bytes_per_second: u64) {
        self.bytes_per_second
            .store(bytes_per_second, Ordering::Relaxed);
    }

    pub fn bytes_per_second(&self) -> u64 {
        self.bytes_per_second.load(Ordering::Relaxed)
    }

    /// Record the timestamp reached by the decoded audio
    pub fn set_last_known_pts(&self, pts: f64) {
        store_f64(&self.last_known_pts, pts);
        self.started.store(true, Ordering::Release);
    }

    pub fn last_known_pts(&self) -> f64 {
        load_f64(&self.last_known_pts)
    }

    /// Record how much decoded audio is still waiting to reach the device
    pub fn set_unplayed_buffered_bytes(&self, bytes: usize) {
        self.unplayed_buffered_bytes.store(bytes, Ordering::Relaxed);
    }

    pub fn unplayed_buffered_bytes(&self) -> usize {
        self.unplayed_buffered_bytes.load(Ordering::Relaxed)
    }

    /// Whether any decoded audio has been accounted yet
    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::Acquire)
    }

    /// Position of the audio being played, in seconds
    ///
    /// `None` until the first decoded audio frame updated the clock.
    pub fn current(&self) -> Option<f64> {
        if !self.is_started() {
            return None;
        }
        let pts = self.last_known_pts();
        let bps = self.bytes_per_second();
        if bps == 0 {
            return Some(pts);
        }
        Some(pts - self.unplayed_buffered_bytes() as f64 / bps as f64)
    }
}

/// Predicted presentation time of the next video frame
#[derive(Debug, Default)]
pub struct VideoClock {
    predicted_pts: AtomicU64,
}

impl VideoClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn predicted_pts(&self) -> f64 {
        load_f64(&self.predicted_pts)
    }

    /// Resolve the timestamp of a decoded frame and advance the prediction
    ///
    /// A usable decoder timestamp resynchronizes the clock, otherwise the
    /// prediction is used. The clock then advances by one frame duration,
    /// plus half a duration per repeated field.
    pub fn synchronize(&self, pts: Option<f64>, frame_duration: f64, repeat_count: u32) -> f64 {
        let pts = match pts {
            Some(pts) => pts,
            None => self.predicted_pts(),
        };
        let frame_delay = frame_duration * (1.0 + 0.5 * repeat_count as f64);
        store_f64(&self.predicted_pts, pts + frame_delay);
        pts
    }
}

/// Wall-clock bookkeeping of the refresh scheduler
///
/// Single owner (the refresh stage), no atomics needed.
#[derive(Debug, Clone)]
pub struct FrameTimer {
    base: Instant,
    /// Target presentation time of the last scheduled frame, seconds since `base`
    wall_clock_anchor: f64,
    last_frame_delay: f64,
    last_frame_pts: f64,
}

impl FrameTimer {
    pub fn new(initial_delay: f64) -> Self {
        Self::starting_at(Instant::now(), initial_delay)
    }

    pub fn starting_at(base: Instant, initial_delay: f64) -> Self {
        Self {
            base,
            wall_clock_anchor: 0.0,
            last_frame_delay: initial_delay,
            last_frame_pts: 0.0,
        }
    }

    pub fn last_frame_delay(&self) -> f64 {
        self.last_frame_delay
    }

    pub fn last_frame_pts(&self) -> f64 {
        self.last_frame_pts
    }

    /// Remember the frame just scheduled for the next delay computation
    pub fn record_frame(&mut self, pts: f64, delay: f64) {
        self.last_frame_pts = pts;
        self.last_frame_delay = delay;
    }

    fn seconds_since_base(&self, now: Instant) -> f64 {
        now.saturating_duration_since(self.base).as_secs_f64()
    }

    /// Accumulate `delay` into the anchor and return the wall-clock wait left
    /// until the anchor, never below `min_delay` seconds
    pub fn advance(&mut self, delay: f64, now: Instant, min_delay: f64) -> Duration {
        self.wall_clock_anchor += delay;
        let remaining = self.wall_clock_anchor - self.seconds_since_base(now);
        Duration::from_secs_f64(remaining.max(min_delay))
    }

    /// Move the anchor to `now`, forgetting any accumulated lateness
    pub fn reanchor(&mut self, now: Instant) {
        self.wall_clock_anchor = self.seconds_since_base(now);
    }

    /// How far `now` is past the anchor, seconds (negative when ahead)
    pub fn lag(&self, now: Instant) -> f64 {
        self.seconds_since_base(now) - self.wall_clock_anchor
    }

    pub fn anchor(&self) -> Duration {
        Duration::from_secs_f64(self.wall_clock_anchor.max(0.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_audio_clock_unstarted() {
        let clock = AudioClock::new();
        assert_eq!(clock.current(), None);
        clock.set_bytes_per_second(176_400);
        clock.set_unplayed_buffered_bytes(1000);
        assert_eq!(clock.current(), None);
    }

    #[test]
    fn test_audio_clock_subtracts_unplayed_bytes() {
        let clock = AudioClock::new();
        // 44.1kHz stereo s16
        clock.set_bytes_per_second(176_400);
        clock.set_last_known_pts(10.0);
        clock.set_unplayed_buffered_bytes(17_640);

        let current = clock.current().unwrap();
        assert!((current - 9.9).abs() < 1e-9, "current = {}", current);

        clock.set_unplayed_buffered_bytes(0);
        assert!((clock.current().unwrap() - 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_video_clock_uses_decoder_pts() {
        let clock = VideoClock::new();
        let pts = clock.synchronize(Some(5.0), 0.04, 0);
        assert_eq!(pts, 5.0);
        assert!((clock.predicted_pts() - 5.04).abs() < 1e-9);
    }

    #[test]
    fn test_video_clock_predicts_missing_pts() {
        let clock = VideoClock::new();
        clock.synchronize(Some(1.0), 0.04, 0);
        let pts = clock.synchronize(None, 0.04, 0);
        assert!((pts - 1.04).abs() < 1e-9);
        let pts = clock.synchronize(None, 0.04, 0);
        assert!((pts - 1.08).abs() < 1e-9);
    }

    #[test]
    fn test_video_clock_repeat_field_extends_duration() {
        let clock = VideoClock::new();
        let start = clock.synchronize(None, 0.0333, 1);
        assert_eq!(start, 0.0);
        let advanced = clock.predicted_pts() - start;
        assert!((advanced - 0.0333 * 1.5).abs() < 1e-9);
        assert!((advanced - 0.05).abs() < 1e-3);
        assert!(advanced > 0.0333 + 1e-3);
    }

    #[test]
    fn test_frame_timer_accumulates_delay() {
        let base = Instant::now();
        let mut timer = FrameTimer::starting_at(base, 0.04);

        let wait = timer.advance(0.04, base, 0.01);
        assert!((wait.as_secs_f64() - 0.04).abs() < 1e-9);

        let wait = timer.advance(0.04, base + Duration::from_millis(40), 0.01);
        assert!((wait.as_secs_f64() - 0.04).abs() < 1e-6);
        assert!((timer.anchor().as_secs_f64() - 0.08).abs() < 1e-9);
    }

    #[test]
    fn test_frame_timer_clamps_to_minimum() {
        let base = Instant::now();
        let mut timer = FrameTimer::starting_at(base, 0.04);

        // Already 200ms late: wait the minimum instead of going negative
        let wait = timer.advance(0.04, base + Duration::from_millis(200), 0.01);
        assert!((wait.as_secs_f64() - 0.01).abs() < 1e-9);

        timer.reanchor(base + Duration::from_millis(200));
        let wait = timer.advance(0.04, base + Duration::from_millis(200), 0.01);
        assert!((wait.as_secs_f64() - 0.04).abs() < 1e-6);
    }
}

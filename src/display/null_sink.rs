//! Audio output that consumes samples in real time and discards them
//!
//! A dedicated thread invokes the pull callback once per buffer period, paced
//! against the wall clock, so the audio clock advances exactly as it would
//! with a sound card.

use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use super::{AudioDevice, AudioOutput, AudioSpec, PullCallback};
use crate::error::{PlayerError, Result};
use crate::utils::sos::SignalOfStop;
use crate::workers::WorkerClose;

#[derive(Debug, Default)]
pub struct NullAudioOutput;

impl NullAudioOutput {
    pub fn new() -> Self {
        Self
    }
}

impl AudioOutput for NullAudioOutput {
    fn open_audio_output(&mut self, spec: AudioSpec, callback: PullCallback) -> Result<AudioDevice> {
        if spec.sample_rate == 0 || spec.channels == 0 || spec.buffer_frames == 0 {
            return Err(PlayerError::Device(format!("unusable audio spec {:?}", spec)));
        }

        let stop = SignalOfStop::new();
        let period = Duration::from_secs_f64(spec.buffer_frames as f64 / spec.sample_rate as f64);
        let handle = std::thread::Builder::new()
            .name("audio-null-sink".into())
            .spawn({
                let stop = stop.clone();
                move || pump(callback, spec.buffer_bytes(), period, stop)
            })?;

        log::info!(
            "NullAudioOutput: {} Hz, {} channels, {:?} per callback",
            spec.sample_rate,
            spec.channels,
            period
        );
        Ok(Box::new(NullAudioDevice {
            stop,
            handle: Some(handle),
        }))
    }
}

fn pump(mut callback: PullCallback, buffer_bytes: usize, period: Duration, stop: SignalOfStop) {
    let mut buffer = vec![0u8; buffer_bytes];
    let start = Instant::now();
    let mut calls: u32 = 0;

    loop {
        callback(&mut buffer);
        calls += 1;

        // Pace against the start instant so sleep overshoot doesn't accumulate
        let deadline = start + period * calls;
        let wait = deadline.saturating_duration_since(Instant::now());
        if stop.wait_timeout(wait) {
            break;
        }
    }
    log::debug!("NullAudioOutput: stopped after {} callbacks", calls);
}

struct NullAudioDevice {
    stop: SignalOfStop,
    handle: Option<JoinHandle<()>>,
}

impl WorkerClose for NullAudioDevice {
    fn close(&mut self) {
        self.stop.cancel();
        if let Some(handle) = self.handle.take()
            && handle.join().is_err()
        {
            log::error!("NullAudioOutput: pump thread panicked");
        }
    }
}

impl Drop for NullAudioDevice {
    fn drop(&mut self) {
        self.close();
    }
}

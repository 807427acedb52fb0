//! Audio decode-and-render path
//!
//! The renderer lives inside the device pull callback. It decodes packets on
//! demand, copies samples into the device buffer and keeps the audio clock
//! current. It never blocks: an empty packet queue is an underrun and is
//! answered with silence.

use std::sync::Arc;

use log::{debug, info, warn};

use crate::decoder::{AudioDecoder, decode_packet, drain_decoder};
use crate::display::{AudioSpec, PullCallback};
use crate::pipeline::packet_queue::QueueGet;
use crate::pipeline::state::PlaybackState;
use crate::pipeline::types::{Packet, TimeBase};

/// Outcome of one [`AudioRenderer::audio_decode_frame`] call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioFill {
    /// Bytes copied into the output
    Decoded(usize),
    /// No packet available yet
    Underrun,
    /// End of stream or shutdown, nothing more will come
    Finished,
}

pub struct AudioRenderer {
    state: Arc<PlaybackState>,
    decoder: AudioDecoder,
    time_base: TimeBase,
    bytes_per_second: u64,
    /// Decoded samples not yet handed to the device
    buffer: Vec<u8>,
    position: usize,
    /// Stream time at the end of `buffer`, seconds
    buffer_end_pts: f64,
    /// A frame has been decoded since the stream started
    clock_valid: bool,
    finished: bool,
    underruns_in_a_row: u32,
}

impl AudioRenderer {
    pub fn new(
        state: Arc<PlaybackState>,
        decoder: AudioDecoder,
        time_base: TimeBase,
        spec: &AudioSpec,
    ) -> Self {
        let bytes_per_second = spec.bytes_per_second();
        state.audio_clock.set_bytes_per_second(bytes_per_second);
        Self {
            state,
            decoder,
            time_base,
            bytes_per_second,
            buffer: Vec::new(),
            position: 0,
            buffer_end_pts: 0.0,
            clock_valid: false,
            finished: false,
            underruns_in_a_row: 0,
        }
    }

    /// Wrap the renderer into a device callback
    pub fn into_callback(mut self) -> PullCallback {
        Box::new(move |out: &mut [u8]| self.fill(out))
    }

    fn remaining(&self) -> usize {
        self.buffer.len() - self.position
    }

    fn append(&mut self, pts: Option<i64>, data: &[u8]) {
        let start = match pts {
            Some(ticks) => self.time_base.to_secs(ticks),
            None => self.buffer_end_pts,
        };
        self.buffer.extend_from_slice(data);
        self.buffer_end_pts = start + data.len() as f64 / self.bytes_per_second as f64;
        self.clock_valid = true;
    }

    fn decode(&mut self, packet: Packet) {
        self.buffer.clear();
        self.position = 0;

        let frames = match decode_packet(self.decoder.as_mut(), packet) {
            Ok(frames) => frames.collect::<Vec<_>>(),
            Err(e) => {
                warn!("AudioStage: dropping packet: {}", e);
                self.state.health.record_decode_failure();
                return;
            }
        };
        for frame in frames {
            match frame {
                Ok(frame) => self.append(frame.pts, &frame.data),
                Err(e) => {
                    warn!("AudioStage: decode error: {}", e);
                    self.state.health.record_decode_failure();
                }
            }
        }
    }

    fn drain(&mut self) {
        self.buffer.clear();
        self.position = 0;

        let frames = match drain_decoder(self.decoder.as_mut()) {
            Ok(frames) => frames.collect::<Vec<_>>(),
            Err(e) => {
                warn!("AudioStage: flush failed: {}", e);
                return;
            }
        };
        for frame in frames.into_iter().flatten() {
            self.append(frame.pts, &frame.data);
        }
    }

    /// Copy decoded samples into `out`, decoding the next packet when the
    /// current buffer is used up
    pub fn audio_decode_frame(&mut self, out: &mut [u8]) -> AudioFill {
        loop {
            if self.remaining() > 0 {
                let n = self.remaining().min(out.len());
                out[..n].copy_from_slice(&self.buffer[self.position..self.position + n]);
                self.position += n;
                return AudioFill::Decoded(n);
            }
            if self.finished {
                return AudioFill::Finished;
            }

            match self.state.audio_queue.get(false) {
                QueueGet::Packet(packet) => self.decode(packet),
                QueueGet::Empty => return AudioFill::Underrun,
                QueueGet::Closing => {
                    self.finished = true;
                    if !self.state.quit_requested() {
                        self.drain();
                    }
                }
            }
        }
    }

    /// Device callback body: fill `out` completely
    pub fn fill(&mut self, out: &mut [u8]) {
        if self.state.is_paused() || self.state.quit_requested() {
            out.fill(0);
            return;
        }

        let mut filled = 0;
        while filled < out.len() {
            match self.audio_decode_frame(&mut out[filled..]) {
                AudioFill::Decoded(n) => filled += n,
                AudioFill::Underrun => {
                    self.underruns_in_a_row += 1;
                    self.state.health.record_audio_underrun();
                    if self.underruns_in_a_row == 1 {
                        debug!("AudioStage: underrun, {} bytes of silence", out.len() - filled);
                    }
                    break;
                }
                AudioFill::Finished => {
                    if !self.state.audio_finished() {
                        info!("AudioStage: end of audio stream");
                        self.state.mark_audio_finished();
                    }
                    break;
                }
            }
        }
        if filled == out.len() {
            self.underruns_in_a_row = 0;
        }
        out[filled..].fill(0);

        self.state.health.record_audio_bytes(filled);
        if self.clock_valid {
            let clock = &self.state.audio_clock;
            clock.set_unplayed_buffered_bytes(self.remaining());
            clock.set_last_known_pts(self.buffer_end_pts);
        }
    }
}

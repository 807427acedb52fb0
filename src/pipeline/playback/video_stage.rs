//! Video decode stage
//!
//! Pulls video packets, decodes them, resolves presentation timestamps
//! against the video clock and hands rescaled pictures to the picture queue.

use std::sync::Arc;

use anyhow::Result;
use log::{debug, info, warn};

use crate::decoder::{FrameRescaler, VideoDecoder, VideoFrame, decode_packet, drain_decoder};
use crate::pipeline::packet_queue::QueueGet;
use crate::pipeline::stage::PlaybackStage;
use crate::pipeline::state::PlaybackState;
use crate::pipeline::types::TimeBase;

pub struct VideoStage {
    state: Arc<PlaybackState>,
    decoder: VideoDecoder,
    rescaler: Box<dyn FrameRescaler>,
    time_base: TimeBase,
    /// Nominal duration of one frame, seconds
    frame_duration: f64,
    /// Decoder timestamp of the previous frame, if it had one
    last_decoder_pts: Option<f64>,
    frames_queued: u64,
}

impl VideoStage {
    pub fn new(
        state: Arc<PlaybackState>,
        decoder: VideoDecoder,
        rescaler: Box<dyn FrameRescaler>,
        time_base: TimeBase,
        frame_duration: f64,
    ) -> Self {
        Self {
            state,
            decoder,
            rescaler,
            time_base,
            frame_duration,
            last_decoder_pts: None,
            frames_queued: 0,
        }
    }

    /// Presentation time of `frame` in seconds
    ///
    /// Frames without a timestamp get the predicted one. Consecutive decoder
    /// timestamps refine the frame duration used for that prediction.
    fn synchronize_video(&mut self, frame: &VideoFrame) -> f64 {
        let pts = frame.pts.map(|ticks| self.time_base.to_secs(ticks));
        match (self.last_decoder_pts, pts) {
            (Some(last), Some(pts)) => {
                let step = (pts - last) / (1.0 + 0.5 * frame.repeat_count as f64);
                if step > 0.0 && step <= self.state.config.max_frame_delay {
                    if (step - self.frame_duration).abs() > 1e-6 {
                        debug!("VideoStage: frame duration {:.4}s", step);
                    }
                    self.frame_duration = step;
                }
            }
            (_, None) => debug!("VideoStage: frame without timestamp, using prediction"),
            _ => {}
        }
        self.last_decoder_pts = pts;
        self.state
            .video_clock
            .synchronize(pts, self.frame_duration, frame.repeat_count)
    }

    /// Returns `false` once the picture queue was aborted
    fn queue_picture(&mut self, frame: VideoFrame) -> bool {
        let pts = self.synchronize_video(&frame);
        let rescaler = &mut self.rescaler;
        match self
            .state
            .pictures
            .push_with(pts, |slot| rescaler.rescale(&frame, slot))
        {
            Ok(()) => {
                self.frames_queued += 1;
                self.state.health.record_frame_decoded();
                true
            }
            Err(_) => false,
        }
    }

    fn queue_all(&mut self, frames: Vec<crate::error::Result<VideoFrame>>) -> bool {
        for frame in frames {
            match frame {
                Ok(frame) => {
                    if !self.queue_picture(frame) {
                        return false;
                    }
                }
                Err(e) => {
                    warn!("VideoStage: decode error: {}", e);
                    self.state.health.record_decode_failure();
                }
            }
        }
        true
    }

    fn flush(&mut self) {
        let frames = match drain_decoder(self.decoder.as_mut()) {
            Ok(frames) => frames.collect::<Vec<_>>(),
            Err(e) => {
                warn!("VideoStage: flush failed: {}", e);
                return;
            }
        };
        self.queue_all(frames);
    }
}

impl PlaybackStage for VideoStage {
    fn run(&mut self) -> Result<()> {
        info!("VideoStage: started (frame duration {:.4}s)", self.frame_duration);

        loop {
            match self.state.video_queue.get(true) {
                QueueGet::Packet(packet) => {
                    let frames = match decode_packet(self.decoder.as_mut(), packet) {
                        Ok(frames) => frames.collect::<Vec<_>>(),
                        Err(e) => {
                            warn!("VideoStage: dropping packet: {}", e);
                            self.state.health.record_decode_failure();
                            continue;
                        }
                    };
                    if !self.queue_all(frames) {
                        break;
                    }
                }
                QueueGet::Closing => {
                    if !self.state.quit_requested() {
                        self.flush();
                    }
                    break;
                }
                QueueGet::Empty => continue,
            }
        }

        self.state.mark_video_finished();
        info!("VideoStage: finished ({} frames queued)", self.frames_queued);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "VideoStage"
    }
}

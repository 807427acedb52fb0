//! Presentation layer seam
//!
//! The engine never blits pixels or mixes audio itself. A [`VideoPresenter`]
//! shows finished pictures, an [`AudioOutput`] opens a device that pulls
//! samples through a callback, and [`EventTimer`] delivers delayed events
//! back to the controlling thread.

#[cfg(feature = "audio-device")]
pub mod cpal_output;
pub mod headless;
pub mod null_sink;
pub mod timer;

use crate::error::Result;
use crate::pipeline::picture_queue::DecodedVideoFrame;
use crate::workers::WorkerClose;

pub use headless::HeadlessPresenter;
pub use null_sink::NullAudioOutput;
pub use timer::EventTimer;

/// Identifier of an output surface created by a presenter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SurfaceHandle(pub u32);

/// Shows decoded pictures
///
/// Lives on the thread running the refresh scheduler.
pub trait VideoPresenter: Send {
    /// Create (or recreate) a surface able to show `width`x`height` pictures
    fn create_output_surface(&mut self, width: u32, height: u32) -> Result<SurfaceHandle>;

    fn present_video_frame(
        &mut self,
        surface: SurfaceHandle,
        frame: &DecodedVideoFrame,
    ) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleFormat {
    /// Signed 16-bit little endian, interleaved
    S16,
}

impl SampleFormat {
    pub fn bytes_per_sample(&self) -> usize {
        match self {
            SampleFormat::S16 => 2,
        }
    }
}

/// Audio device parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioSpec {
    pub sample_rate: u32,
    pub channels: u16,
    pub sample_format: SampleFormat,
    /// Frames requested per callback
    pub buffer_frames: u32,
}

impl AudioSpec {
    pub fn bytes_per_frame(&self) -> usize {
        self.channels as usize * self.sample_format.bytes_per_sample()
    }

    pub fn bytes_per_second(&self) -> u64 {
        self.sample_rate as u64 * self.bytes_per_frame() as u64
    }

    /// Size of the buffer handed to each callback invocation
    pub fn buffer_bytes(&self) -> usize {
        self.buffer_frames as usize * self.bytes_per_frame()
    }
}

/// Callback the device invokes whenever it needs more samples
///
/// Must fill the whole buffer and return within the device deadline.
pub type PullCallback = Box<dyn FnMut(&mut [u8]) + Send>;

/// Opened audio device; closing it stops the callback
pub type AudioDevice = Box<dyn WorkerClose + Send>;

/// Factory of audio devices
pub trait AudioOutput {
    fn open_audio_output(&mut self, spec: AudioSpec, callback: PullCallback) -> Result<AudioDevice>;
}

//! Demuxing and decoding seam
//!
//! The engine never parses containers or decodes codecs itself. A
//! [`MediaSource`] yields compressed packets and builds one [`Decoder`] per
//! stream; [`open_source`] picks the implementation from the source string.
//!
//! Implementations:
//! - `synthetic:` sources, generated in process (always available)
//! - everything else through FFmpeg, with the `ffmpeg` feature

#[cfg(feature = "ffmpeg")]
mod ffmpeg;
mod scale;

pub mod synthetic;

use crate::error::{PlayerError, Result};
use crate::pipeline::types::{MediaKind, Packet, TimeBase};

pub use scale::{FrameRescaler, PlanePacker};
pub use synthetic::{SyntheticConfig, SyntheticSource, SyntheticVideoDecoder};

/// Frame length assumed when neither frame rate nor time base tell (25 fps)
pub const DEFAULT_FRAME_DURATION: f64 = 0.04;

/// Time-base ticks shorter than this are not frame lengths (90 kHz, 1 kHz clocks)
const MIN_FRAME_DURATION: f64 = 0.002;

/// Kind-specific stream parameters
#[derive(Debug, Clone, PartialEq)]
pub enum StreamParams {
    Video {
        width: u32,
        height: u32,
        /// Nominal frames per second, if the container declares one
        frame_rate: Option<f64>,
    },
    Audio {
        sample_rate: u32,
        channels: u16,
    },
    Other,
}

/// Description of one elementary stream of a source
#[derive(Debug, Clone, PartialEq)]
pub struct StreamInfo {
    pub index: usize,
    pub kind: MediaKind,
    pub codec: String,
    pub time_base: TimeBase,
    pub params: StreamParams,
}

impl StreamInfo {
    /// Nominal duration of one video frame in seconds
    ///
    /// Without a declared frame rate, one tick of the time base when that is
    /// a plausible frame length (raw streams use 1/fps), otherwise
    /// [`DEFAULT_FRAME_DURATION`]. The video stage refines it from pts deltas.
    pub fn frame_duration(&self) -> f64 {
        match self.params {
            StreamParams::Video {
                frame_rate: Some(fps),
                ..
            } if fps > 0.0 => 1.0 / fps,
            _ => {
                let tick = self.time_base.as_secs_f64();
                if tick >= MIN_FRAME_DURATION && tick.is_finite() {
                    tick
                } else {
                    DEFAULT_FRAME_DURATION
                }
            }
        }
    }
}

/// Decoded picture as produced by a video decoder, planes still strided
#[derive(Debug, Clone, Default)]
pub struct VideoFrame {
    pub planes: Vec<FramePlane>,
    pub width: u32,
    pub height: u32,
    /// Timestamp in the stream time base, `None` when the decoder had none
    pub pts: Option<i64>,
    /// Extra fields the picture must be displayed for (soft telecine)
    pub repeat_count: u32,
}

/// One plane of a [`VideoFrame`]
#[derive(Debug, Clone, Default)]
pub struct FramePlane {
    pub data: Vec<u8>,
    /// Bytes between the starts of two consecutive rows
    pub stride: usize,
    /// Meaningful bytes per row
    pub row_bytes: usize,
    pub rows: usize,
}

/// Decoded audio, interleaved signed 16-bit little endian
#[derive(Debug, Clone, Default)]
pub struct AudioFrame {
    pub data: Vec<u8>,
    /// Timestamp in the stream time base
    pub pts: Option<i64>,
    pub sample_rate: u32,
    pub channels: u16,
}

/// Result of reading the next packet from a source
#[derive(Debug)]
pub enum ReadOutcome {
    Packet(Packet),
    /// Nothing available right now, try again later
    Again,
    /// End of stream
    Eof,
}

/// Stream decoder with FFmpeg-style push/take semantics
///
/// One packet may produce zero or more frames because of internal
/// buffering; callers drain `take` until it returns `None`.
pub trait Decoder: Send {
    type Frame;

    /// Feed one compressed packet
    fn push(&mut self, packet: Packet) -> Result<()>;

    /// Take the next decoded frame, `None` when more data is needed
    fn take(&mut self) -> Result<Option<Self::Frame>>;

    /// Signal end of stream so buffered frames become available to `take`
    fn flush(&mut self) -> Result<()>;
}

/// Lazy sequence of the frames produced for one packet
///
/// Ends when the decoder needs more data or reports an error. Consumers
/// must exhaust it before the next push: decoders like FFmpeg's refuse new
/// input while decoded frames are still waiting.
pub struct DecodedFrames<'a, D: Decoder + ?Sized> {
    decoder: &'a mut D,
    done: bool,
}

impl<D: Decoder + ?Sized> Iterator for DecodedFrames<'_, D> {
    type Item = Result<D::Frame>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.decoder.take() {
            Ok(Some(frame)) => Some(Ok(frame)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

/// Push `packet` and return the frames it yields
pub fn decode_packet<D: Decoder + ?Sized>(
    decoder: &mut D,
    packet: Packet,
) -> Result<DecodedFrames<'_, D>> {
    decoder.push(packet)?;
    Ok(DecodedFrames {
        decoder,
        done: false,
    })
}

/// Flush the decoder and return the frames it was still holding
pub fn drain_decoder<D: Decoder + ?Sized>(decoder: &mut D) -> Result<DecodedFrames<'_, D>> {
    decoder.flush()?;
    Ok(DecodedFrames {
        decoder,
        done: false,
    })
}

pub type VideoDecoder = Box<dyn Decoder<Frame = VideoFrame>>;
pub type AudioDecoder = Box<dyn Decoder<Frame = AudioFrame>>;

/// Opened container: packet reader plus decoder factory
pub trait MediaSource: Send {
    fn streams(&self) -> &[StreamInfo];

    fn read_packet(&mut self) -> Result<ReadOutcome>;

    /// Build a decoder for a video stream
    fn video_decoder(&self, stream: &StreamInfo) -> Result<VideoDecoder>;

    /// Build a decoder for an audio stream, producing s16 interleaved samples
    fn audio_decoder(&self, stream: &StreamInfo) -> Result<AudioDecoder>;

    /// First stream of the given kind
    fn best_stream(&self, kind: MediaKind) -> Option<StreamInfo> {
        self.streams().iter().find(|s| s.kind == kind).cloned()
    }
}

/// Open a media source by name
pub fn open_source(source: &str) -> Result<Box<dyn MediaSource>> {
    if let Some(spec) = source.strip_prefix(synthetic::SCHEME) {
        let config = SyntheticConfig::parse(spec)
            .map_err(|reason| PlayerError::source_open(source, reason))?;
        return Ok(Box::new(SyntheticSource::new(config)));
    }

    open_container(source)
}

#[cfg(feature = "ffmpeg")]
fn open_container(source: &str) -> Result<Box<dyn MediaSource>> {
    Ok(Box::new(ffmpeg::FfmpegSource::open(source)?))
}

#[cfg(not(feature = "ffmpeg"))]
fn open_container(source: &str) -> Result<Box<dyn MediaSource>> {
    Err(PlayerError::source_open(
        source,
        "container support not compiled in (enable the `ffmpeg` feature)",
    ))
}

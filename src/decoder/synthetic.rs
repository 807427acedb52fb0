//! In-process test source
//!
//! Generates a two-stream source (plus an untracked data stream) without any
//! codec library. Selected with `synthetic:key=value,...`, for example
//! `synthetic:frames=100,fps=25,rate=44100`.
//!
//! Keys: `frames`, `fps`, `width`, `height`, `rate`, `channels`, `delay`
//! (decoder reorder depth), `stall` (report "no data yet" every N reads),
//! `missing_pts` (drop the timestamp of every Nth video packet), `video`,
//! `audio`, `data` (0 disables the stream), `unsupported` (`audio` or
//! `video`: fail codec negotiation for that stream).

use std::collections::VecDeque;

use super::scale::yuv420p_plane_dims;
use super::{
    AudioDecoder, AudioFrame, Decoder, FramePlane, MediaSource, ReadOutcome, StreamInfo,
    StreamParams, VideoDecoder, VideoFrame,
};
use crate::error::{PlayerError, Result};
use crate::pipeline::types::{MediaKind, Packet, TimeBase};

pub const SCHEME: &str = "synthetic:";

const VIDEO_CODEC: &str = "synthetic-video";
const AUDIO_CODEC: &str = "synthetic-pcm";
const SAMPLES_PER_PACKET: u64 = 1024;
const VIDEO_PACKET_BYTES: usize = 2048;
const AUDIO_PACKET_BYTES: usize = 256;
const DATA_PACKET_BYTES: usize = 64;
/// Row padding of generated planes, exercises stride stripping
const ROW_PADDING: usize = 16;

#[derive(Debug, Clone, PartialEq)]
pub struct SyntheticConfig {
    pub frames: u32,
    pub fps: u32,
    pub width: u32,
    pub height: u32,
    pub sample_rate: u32,
    pub channels: u16,
    pub decoder_delay: usize,
    pub stall_every: u32,
    pub missing_pts_every: u32,
    pub video: bool,
    pub audio: bool,
    pub data: bool,
    pub unsupported: Option<MediaKind>,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            frames: 100,
            fps: 25,
            width: 64,
            height: 36,
            sample_rate: 44_100,
            channels: 2,
            decoder_delay: 1,
            stall_every: 0,
            missing_pts_every: 0,
            video: true,
            audio: true,
            data: true,
            unsupported: None,
        }
    }
}

impl SyntheticConfig {
    /// Parse the part after `synthetic:`
    pub fn parse(spec: &str) -> std::result::Result<Self, String> {
        let mut config = SyntheticConfig::default();

        for pair in spec.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let (key, value) = pair
                .split_once('=')
                .ok_or_else(|| format!("expected key=value, got `{}`", pair))?;
            let number = || {
                value
                    .parse::<u32>()
                    .map_err(|_| format!("`{}` is not a number for `{}`", value, key))
            };

            match key {
                "frames" => config.frames = number()?,
                "fps" => config.fps = number()?,
                "width" => config.width = number()?,
                "height" => config.height = number()?,
                "rate" => config.sample_rate = number()?,
                "channels" => config.channels = number()? as u16,
                "delay" => config.decoder_delay = number()? as usize,
                "stall" => config.stall_every = number()?,
                "missing_pts" => config.missing_pts_every = number()?,
                "video" => config.video = number()? != 0,
                "audio" => config.audio = number()? != 0,
                "data" => config.data = number()? != 0,
                "unsupported" => {
                    config.unsupported = match value {
                        "audio" => Some(MediaKind::Audio),
                        "video" => Some(MediaKind::Video),
                        _ => return Err(format!("unknown stream kind `{}`", value)),
                    }
                }
                _ => return Err(format!("unknown key `{}`", key)),
            }
        }

        if config.fps == 0 || config.sample_rate == 0 || config.channels == 0 {
            return Err("fps, rate and channels must be positive".into());
        }
        if config.width < 2 || config.height < 2 {
            return Err("width and height must be at least 2".into());
        }
        if !config.video && !config.audio {
            return Err("at least one of video or audio is required".into());
        }
        Ok(config)
    }

    /// Nominal duration in seconds
    pub fn duration(&self) -> f64 {
        self.frames as f64 / self.fps as f64
    }

    fn total_samples(&self) -> u64 {
        self.frames as u64 * self.sample_rate as u64 / self.fps as u64
    }
}

/// Generated media source
pub struct SyntheticSource {
    config: SyntheticConfig,
    streams: Vec<StreamInfo>,
    video_index: Option<usize>,
    audio_index: Option<usize>,
    data_index: Option<usize>,
    next_frame: u32,
    next_sample: u64,
    next_data: u32,
    reads: u64,
}

impl SyntheticSource {
    pub fn new(config: SyntheticConfig) -> Self {
        let mut streams = Vec::new();
        let mut video_index = None;
        let mut audio_index = None;
        let mut data_index = None;

        if config.video {
            video_index = Some(streams.len());
            streams.push(StreamInfo {
                index: streams.len(),
                kind: MediaKind::Video,
                codec: VIDEO_CODEC.into(),
                time_base: TimeBase::new(1, config.fps as i32),
                params: StreamParams::Video {
                    width: config.width,
                    height: config.height,
                    frame_rate: Some(config.fps as f64),
                },
            });
        }
        if config.audio {
            audio_index = Some(streams.len());
            streams.push(StreamInfo {
                index: streams.len(),
                kind: MediaKind::Audio,
                codec: AUDIO_CODEC.into(),
                time_base: TimeBase::new(1, config.sample_rate as i32),
                params: StreamParams::Audio {
                    sample_rate: config.sample_rate,
                    channels: config.channels,
                },
            });
        }
        if config.data {
            data_index = Some(streams.len());
            streams.push(StreamInfo {
                index: streams.len(),
                kind: MediaKind::Other,
                codec: "synthetic-data".into(),
                time_base: TimeBase::new(1, 1000),
                params: StreamParams::Other,
            });
        }

        Self {
            config,
            streams,
            video_index,
            audio_index,
            data_index,
            next_frame: 0,
            next_sample: 0,
            next_data: 0,
            reads: 0,
        }
    }

    fn next_video_time(&self) -> Option<f64> {
        self.video_index?;
        (self.next_frame < self.config.frames)
            .then(|| self.next_frame as f64 / self.config.fps as f64)
    }

    fn next_audio_time(&self) -> Option<f64> {
        self.audio_index?;
        (self.next_sample < self.config.total_samples())
            .then(|| self.next_sample as f64 / self.config.sample_rate as f64)
    }

    fn next_data_time(&self) -> Option<f64> {
        self.data_index?;
        // One data packet every ten frames
        let at = self.next_data as f64 * 10.0 / self.config.fps as f64;
        (at < self.config.duration()).then_some(at)
    }

    fn video_packet(&mut self, stream_id: usize) -> Packet {
        let index = self.next_frame;
        self.next_frame += 1;

        let mut payload = vec![0u8; VIDEO_PACKET_BYTES];
        payload[..4].copy_from_slice(&index.to_le_bytes());
        let missing = self.config.missing_pts_every > 0
            && (index + 1) % self.config.missing_pts_every == 0;
        let pts = (!missing).then_some(index as i64);
        Packet::new(stream_id, payload, pts)
    }

    fn audio_packet(&mut self, stream_id: usize) -> Packet {
        let first = self.next_sample;
        let count = SAMPLES_PER_PACKET.min(self.config.total_samples() - first);
        self.next_sample += count;

        let mut payload = vec![0u8; AUDIO_PACKET_BYTES];
        payload[..8].copy_from_slice(&first.to_le_bytes());
        payload[8..16].copy_from_slice(&count.to_le_bytes());
        Packet::new(stream_id, payload, Some(first as i64))
    }

    fn data_packet(&mut self, stream_id: usize) -> Packet {
        let index = self.next_data;
        self.next_data += 1;
        Packet::new(stream_id, vec![0u8; DATA_PACKET_BYTES], Some(index as i64 * 10))
    }
}

impl MediaSource for SyntheticSource {
    fn streams(&self) -> &[StreamInfo] {
        &self.streams
    }

    fn read_packet(&mut self) -> Result<ReadOutcome> {
        self.reads += 1;
        if self.config.stall_every > 0 && self.reads % self.config.stall_every as u64 == 0 {
            return Ok(ReadOutcome::Again);
        }

        // Interleave in presentation order, the way a muxer would
        let candidates = [
            (self.next_video_time(), self.video_index),
            (self.next_audio_time(), self.audio_index),
            (self.next_data_time(), self.data_index),
        ];
        let next = candidates
            .iter()
            .filter_map(|(time, index)| Some(((*time)?, (*index)?)))
            .min_by(|a, b| a.0.total_cmp(&b.0));

        let Some((_, stream_id)) = next else {
            return Ok(ReadOutcome::Eof);
        };

        let packet = if Some(stream_id) == self.video_index {
            self.video_packet(stream_id)
        } else if Some(stream_id) == self.audio_index {
            self.audio_packet(stream_id)
        } else {
            self.data_packet(stream_id)
        };
        Ok(ReadOutcome::Packet(packet))
    }

    fn video_decoder(&self, stream: &StreamInfo) -> Result<VideoDecoder> {
        if stream.codec != VIDEO_CODEC || self.config.unsupported == Some(MediaKind::Video) {
            return Err(PlayerError::UnsupportedCodec {
                stream: stream.index,
                reason: format!("no video decoder for `{}`", stream.codec),
            });
        }
        Ok(Box::new(SyntheticVideoDecoder::new(
            self.config.width,
            self.config.height,
            self.config.decoder_delay,
        )))
    }

    fn audio_decoder(&self, stream: &StreamInfo) -> Result<AudioDecoder> {
        if stream.codec != AUDIO_CODEC || self.config.unsupported == Some(MediaKind::Audio) {
            return Err(PlayerError::UnsupportedCodec {
                stream: stream.index,
                reason: format!("no audio decoder for `{}`", stream.codec),
            });
        }
        Ok(Box::new(SyntheticAudioDecoder {
            sample_rate: self.config.sample_rate,
            channels: self.config.channels,
            pending: VecDeque::new(),
        }))
    }
}

fn read_u32(payload: &[u8], at: usize) -> Result<u32> {
    payload
        .get(at..at + 4)
        .and_then(|b| b.try_into().ok())
        .map(u32::from_le_bytes)
        .ok_or_else(|| PlayerError::Decode("truncated packet".into()))
}

fn read_u64(payload: &[u8], at: usize) -> Result<u64> {
    payload
        .get(at..at + 8)
        .and_then(|b| b.try_into().ok())
        .map(u64::from_le_bytes)
        .ok_or_else(|| PlayerError::Decode("truncated packet".into()))
}

/// YUV420p generator with a configurable reorder delay
///
/// Holds back `delay` frames like a decoder with B-frame reordering, so a
/// packet may yield no frame and `flush` releases the tail.
pub struct SyntheticVideoDecoder {
    width: u32,
    height: u32,
    delay: usize,
    pending: VecDeque<(u32, Option<i64>)>,
    flushing: bool,
}

impl SyntheticVideoDecoder {
    pub fn new(width: u32, height: u32, delay: usize) -> Self {
        Self {
            width,
            height,
            delay,
            pending: VecDeque::new(),
            flushing: false,
        }
    }

    fn render(&self, index: u32, pts: Option<i64>) -> VideoFrame {
        let luma = index as u8;
        let plane = |row_bytes: usize, rows: usize, value: u8| {
            let stride = row_bytes + ROW_PADDING;
            let mut data = vec![0u8; stride * rows];
            for row in data.chunks_mut(stride) {
                row[..row_bytes].fill(value);
            }
            FramePlane {
                data,
                stride,
                row_bytes,
                rows,
            }
        };

        let [(w, h), (cw, ch), _] = yuv420p_plane_dims(self.width as usize, self.height as usize);
        VideoFrame {
            planes: vec![plane(w, h, luma), plane(cw, ch, 128), plane(cw, ch, 128)],
            width: self.width,
            height: self.height,
            pts,
            repeat_count: 0,
        }
    }
}

impl Decoder for SyntheticVideoDecoder {
    type Frame = VideoFrame;

    fn push(&mut self, packet: Packet) -> Result<()> {
        let index = read_u32(&packet.data, 0)?;
        self.pending.push_back((index, packet.pts));
        Ok(())
    }

    fn take(&mut self) -> Result<Option<VideoFrame>> {
        if self.pending.len() <= self.delay && !self.flushing {
            return Ok(None);
        }
        Ok(self
            .pending
            .pop_front()
            .map(|(index, pts)| self.render(index, pts)))
    }

    fn flush(&mut self) -> Result<()> {
        self.flushing = true;
        Ok(())
    }
}

/// Triangle-wave PCM generator
pub struct SyntheticAudioDecoder {
    sample_rate: u32,
    channels: u16,
    pending: VecDeque<AudioFrame>,
}

impl Decoder for SyntheticAudioDecoder {
    type Frame = AudioFrame;

    fn push(&mut self, packet: Packet) -> Result<()> {
        let first = read_u64(&packet.data, 0)?;
        let count = read_u64(&packet.data, 8)?;

        let mut data = Vec::with_capacity(count as usize * self.channels as usize * 2);
        for n in first..first + count {
            let value = ((n % 200) as i16 - 100) * 64;
            for _ in 0..self.channels {
                data.extend_from_slice(&value.to_le_bytes());
            }
        }

        self.pending.push_back(AudioFrame {
            data,
            pts: packet.pts,
            sample_rate: self.sample_rate,
            channels: self.channels,
        });
        Ok(())
    }

    fn take(&mut self) -> Result<Option<AudioFrame>> {
        Ok(self.pending.pop_front())
    }

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::{decode_packet, drain_decoder};

    fn read_all(source: &mut SyntheticSource) -> Vec<Packet> {
        let mut packets = Vec::new();
        loop {
            match source.read_packet().unwrap() {
                ReadOutcome::Packet(p) => packets.push(p),
                ReadOutcome::Again => continue,
                ReadOutcome::Eof => break,
            }
        }
        packets
    }

    #[test]
    fn test_parse() {
        let config = SyntheticConfig::parse("frames=10, fps=30,rate=48000,unsupported=audio").unwrap();
        assert_eq!(config.frames, 10);
        assert_eq!(config.fps, 30);
        assert_eq!(config.sample_rate, 48_000);
        assert_eq!(config.unsupported, Some(MediaKind::Audio));

        assert_eq!(SyntheticConfig::parse("").unwrap(), SyntheticConfig::default());
        assert!(SyntheticConfig::parse("frames").is_err());
        assert!(SyntheticConfig::parse("fps=0").is_err());
        assert!(SyntheticConfig::parse("colour=blue").is_err());
        assert!(SyntheticConfig::parse("video=0,audio=0").is_err());
    }

    #[test]
    fn test_streams_and_packet_counts() {
        let mut source = SyntheticSource::new(SyntheticConfig::default());
        assert_eq!(source.streams().len(), 3);
        let video = source.best_stream(MediaKind::Video).unwrap();
        let audio = source.best_stream(MediaKind::Audio).unwrap();

        let packets = read_all(&mut source);
        let video_packets: Vec<_> = packets.iter().filter(|p| p.stream_id == video.index).collect();
        let audio_samples: u64 = packets
            .iter()
            .filter(|p| p.stream_id == audio.index)
            .map(|p| read_u64(&p.data, 8).unwrap())
            .sum();

        assert_eq!(video_packets.len(), 100);
        // 4 seconds at 44.1kHz
        assert_eq!(audio_samples, 176_400);
        assert!(packets.iter().any(|p| p.stream_id == 2));

        let pts: Vec<i64> = video_packets.iter().map(|p| p.pts.unwrap()).collect();
        assert!(pts.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_stall_reports_again() {
        let mut source =
            SyntheticSource::new(SyntheticConfig::parse("frames=2,stall=2,audio=0,data=0").unwrap());
        assert!(matches!(source.read_packet().unwrap(), ReadOutcome::Packet(_)));
        assert!(matches!(source.read_packet().unwrap(), ReadOutcome::Again));
        assert!(matches!(source.read_packet().unwrap(), ReadOutcome::Packet(_)));
        assert!(matches!(source.read_packet().unwrap(), ReadOutcome::Again));
        assert!(matches!(source.read_packet().unwrap(), ReadOutcome::Eof));
    }

    #[test]
    fn test_video_decoder_delay_and_flush() {
        let mut decoder = SyntheticVideoDecoder::new(8, 4, 1);
        let packet = |i: u32| {
            let mut payload = vec![0u8; 8];
            payload[..4].copy_from_slice(&i.to_le_bytes());
            Packet::new(0, payload, Some(i as i64))
        };

        assert_eq!(decode_packet(&mut decoder, packet(0)).unwrap().count(), 0);
        let frames: Vec<_> = decode_packet(&mut decoder, packet(1))
            .unwrap()
            .map(|f| f.unwrap())
            .collect();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].pts, Some(0));
        assert_eq!(frames[0].planes[0].stride, 8 + ROW_PADDING);

        let tail: Vec<_> = drain_decoder(&mut decoder)
            .unwrap()
            .map(|f| f.unwrap())
            .collect();
        assert_eq!(tail.len(), 1);
        assert_eq!(tail[0].pts, Some(1));
    }

    #[test]
    fn test_unsupported_codec() {
        let source =
            SyntheticSource::new(SyntheticConfig::parse("unsupported=video").unwrap());
        let video = source.best_stream(MediaKind::Video).unwrap();
        let audio = source.best_stream(MediaKind::Audio).unwrap();
        assert!(matches!(
            source.video_decoder(&video),
            Err(PlayerError::UnsupportedCodec { .. })
        ));
        assert!(source.audio_decoder(&audio).is_ok());
    }

    #[test]
    fn test_audio_decoder_output_size() {
        let mut source = SyntheticSource::new(SyntheticConfig::parse("video=0,data=0").unwrap());
        let audio = source.best_stream(MediaKind::Audio).unwrap();
        let mut decoder = source.audio_decoder(&audio).unwrap();

        let ReadOutcome::Packet(packet) = source.read_packet().unwrap() else {
            panic!("expected a packet");
        };
        let frames: Vec<_> = decode_packet(decoder.as_mut(), packet)
            .unwrap()
            .map(|f| f.unwrap())
            .collect();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].data.len(), 1024 * 2 * 2);
        assert_eq!(frames[0].pts, Some(0));
    }
}

//! Container and codec support through FFmpeg

use std::collections::VecDeque;
use std::fs::File;
use std::str::FromStr;

use ac_ffmpeg::codec::Decoder as _;
use ac_ffmpeg::codec::audio::{self, AudioResampler, ChannelLayout, SampleFormat};
use ac_ffmpeg::codec::video::{self, VideoFrameScaler, frame::get_pixel_format};
use ac_ffmpeg::format::demuxer::{Demuxer, DemuxerWithStreamInfo};
use ac_ffmpeg::format::io::IO;
use ac_ffmpeg::packet::PacketMut;
use ac_ffmpeg::time::{TimeBase as FfTimeBase, Timestamp};

use super::scale::yuv420p_plane_dims;
use super::{
    AudioDecoder, AudioFrame, Decoder, FramePlane, MediaSource, ReadOutcome, StreamInfo,
    StreamParams, VideoDecoder, VideoFrame,
};
use crate::error::{PlayerError, Result};
use crate::pipeline::types::{MediaKind, Packet, TimeBase};

/// Demuxer over a local file
pub struct FfmpegSource {
    demuxer: DemuxerWithStreamInfo<File>,
    streams: Vec<StreamInfo>,
}

unsafe impl Send for FfmpegSource {}

impl FfmpegSource {
    pub fn open(path: &str) -> Result<Self> {
        let file = File::open(path).map_err(|e| PlayerError::source_open(path, e))?;
        let io = IO::from_seekable_read_stream(file);

        let demuxer = Demuxer::builder()
            .build(io)
            .map_err(|e| PlayerError::source_open(path, e))?
            .find_stream_info(None)
            .map_err(|(_, e)| PlayerError::source_open(path, e))?;

        let streams = demuxer
            .streams()
            .iter()
            .enumerate()
            .map(|(index, stream)| {
                let tb = stream.time_base();
                let time_base = TimeBase::new(tb.num() as i32, tb.den() as i32);
                let params = stream.codec_parameters();
                let codec = params.decoder_name().unwrap_or("unknown").to_string();

                let (kind, params) = if let Some(v) = params.as_video_codec_parameters() {
                    (
                        MediaKind::Video,
                        StreamParams::Video {
                            width: v.width() as u32,
                            height: v.height() as u32,
                            frame_rate: None,
                        },
                    )
                } else if let Some(a) = params.as_audio_codec_parameters() {
                    (
                        MediaKind::Audio,
                        StreamParams::Audio {
                            sample_rate: a.sample_rate(),
                            channels: a.channel_layout().channels() as u16,
                        },
                    )
                } else {
                    (MediaKind::Other, StreamParams::Other)
                };

                StreamInfo {
                    index,
                    kind,
                    codec,
                    time_base,
                    params,
                }
            })
            .collect::<Vec<_>>();

        log::info!("FfmpegSource: opened {} with {} streams", path, streams.len());
        for s in &streams {
            log::debug!("FfmpegSource: stream {} {:?} codec={}", s.index, s.kind, s.codec);
        }

        Ok(Self { demuxer, streams })
    }

    fn ff_time_base(info: &StreamInfo) -> FfTimeBase {
        FfTimeBase::new(info.time_base.num, info.time_base.den)
    }
}

impl MediaSource for FfmpegSource {
    fn streams(&self) -> &[StreamInfo] {
        &self.streams
    }

    fn read_packet(&mut self) -> Result<ReadOutcome> {
        match self.demuxer.take() {
            Ok(Some(packet)) => {
                let pts = packet.pts();
                let pts = (!pts.is_null()).then(|| pts.timestamp());
                Ok(ReadOutcome::Packet(Packet::new(
                    packet.stream_index(),
                    packet.data().to_vec(),
                    pts,
                )))
            }
            Ok(None) => Ok(ReadOutcome::Eof),
            Err(e) if e.is_again() => Ok(ReadOutcome::Again),
            Err(e) => Err(PlayerError::Decode(format!("read error: {}", e))),
        }
    }

    fn video_decoder(&self, info: &StreamInfo) -> Result<VideoDecoder> {
        let unsupported = |e: ac_ffmpeg::Error| PlayerError::UnsupportedCodec {
            stream: info.index,
            reason: e.to_string(),
        };
        let stream = &self.demuxer.streams()[info.index];
        let decoder = video::VideoDecoder::from_stream(stream)
            .map_err(unsupported)?
            .build()
            .map_err(unsupported)?;

        Ok(Box::new(FfmpegVideoDecoder {
            decoder,
            time_base: Self::ff_time_base(info),
            scaler: None,
        }))
    }

    fn audio_decoder(&self, info: &StreamInfo) -> Result<AudioDecoder> {
        let unsupported = |e: ac_ffmpeg::Error| PlayerError::UnsupportedCodec {
            stream: info.index,
            reason: e.to_string(),
        };
        let stream = &self.demuxer.streams()[info.index];
        let decoder = audio::AudioDecoder::from_stream(stream)
            .map_err(unsupported)?
            .build()
            .map_err(unsupported)?;

        Ok(Box::new(FfmpegAudioDecoder {
            decoder,
            time_base: Self::ff_time_base(info),
            resampler: None,
            pending: VecDeque::new(),
        }))
    }
}

fn decode_error(context: &str, e: ac_ffmpeg::Error) -> PlayerError {
    PlayerError::Decode(format!("{}: {}", context, e))
}

fn to_ff_packet(packet: &Packet, time_base: FfTimeBase) -> ac_ffmpeg::packet::Packet {
    let ff = PacketMut::from(&packet.data[..]);
    match packet.pts {
        Some(pts) => ff.with_pts(Timestamp::new(pts, time_base)).freeze(),
        None => ff.freeze(),
    }
}

/// Video decoder producing YUV420p frames
struct FfmpegVideoDecoder {
    decoder: video::VideoDecoder,
    time_base: FfTimeBase,
    /// Lazily built when the codec outputs anything other than yuv420p
    scaler: Option<VideoFrameScaler>,
}

unsafe impl Send for FfmpegVideoDecoder {}

impl FfmpegVideoDecoder {
    fn convert(&mut self, frame: video::VideoFrame) -> Result<VideoFrame> {
        let yuv420p = get_pixel_format("yuv420p");
        let (w, h) = (frame.width(), frame.height());
        let pts = frame.pts();
        let pts = (!pts.is_null()).then(|| pts.timestamp());

        let frame = if frame.pixel_format() == yuv420p {
            frame
        } else {
            if self.scaler.is_none() {
                let scaler = VideoFrameScaler::builder()
                    .source_pixel_format(frame.pixel_format())
                    .source_width(w)
                    .source_height(h)
                    .target_pixel_format(yuv420p)
                    .target_width(w)
                    .target_height(h)
                    .build()
                    .map_err(|e| decode_error("scaler", e))?;
                self.scaler = Some(scaler);
            }
            match self.scaler.as_mut() {
                Some(scaler) => scaler.scale(&frame).map_err(|e| decode_error("scale", e))?,
                None => frame,
            }
        };

        let dims = yuv420p_plane_dims(w, h);
        let planes = frame
            .planes()
            .iter()
            .zip(dims)
            .map(|(plane, (row_bytes, rows))| FramePlane {
                data: plane.data().to_vec(),
                stride: plane.line_size(),
                row_bytes,
                rows,
            })
            .collect();

        Ok(VideoFrame {
            planes,
            width: w as u32,
            height: h as u32,
            pts,
            repeat_count: 0,
        })
    }
}

impl Decoder for FfmpegVideoDecoder {
    type Frame = VideoFrame;

    fn push(&mut self, packet: Packet) -> Result<()> {
        self.decoder
            .push(to_ff_packet(&packet, self.time_base))
            .map_err(|e| decode_error("video push", e))
    }

    fn take(&mut self) -> Result<Option<VideoFrame>> {
        match self.decoder.take() {
            Ok(Some(frame)) => self.convert(frame).map(Some),
            Ok(None) => Ok(None),
            Err(e) if e.is_again() => Ok(None),
            Err(e) => Err(decode_error("video take", e)),
        }
    }

    fn flush(&mut self) -> Result<()> {
        self.decoder
            .flush()
            .map_err(|e| decode_error("video flush", e))
    }
}

/// Audio decoder resampling to interleaved s16 at the source rate
struct FfmpegAudioDecoder {
    decoder: audio::AudioDecoder,
    time_base: FfTimeBase,
    resampler: Option<AudioResampler>,
    pending: VecDeque<AudioFrame>,
}

unsafe impl Send for FfmpegAudioDecoder {}

impl FfmpegAudioDecoder {
    fn resample(&mut self, frame: audio::AudioFrame) -> Result<()> {
        let pts = frame.pts();
        let pts = (!pts.is_null()).then(|| pts.timestamp());
        let sample_rate = frame.sample_rate();
        let channels = frame.channel_layout().channels();

        if self.resampler.is_none() {
            let s16 = SampleFormat::from_str("s16")
                .map_err(|_| PlayerError::Decode("s16 sample format unavailable".into()))?;
            let layout = ChannelLayout::from_channels(channels)
                .ok_or_else(|| PlayerError::Decode(format!("no layout for {} channels", channels)))?;
            let resampler = AudioResampler::builder()
                .source_channel_layout(frame.channel_layout().to_owned())
                .source_sample_format(frame.sample_format())
                .source_sample_rate(sample_rate)
                .target_channel_layout(layout)
                .target_sample_format(s16)
                .target_sample_rate(sample_rate)
                .build()
                .map_err(|e| decode_error("resampler", e))?;
            self.resampler = Some(resampler);
        }

        let Some(resampler) = self.resampler.as_mut() else {
            return Ok(());
        };
        resampler
            .push(frame)
            .map_err(|e| decode_error("resample push", e))?;

        let mut first = true;
        while let Some(resampled) = resampler
            .take()
            .map_err(|e| decode_error("resample take", e))?
        {
            let len = resampled.samples() * channels as usize * 2;
            let planes = resampled.planes();
            let Some(plane) = planes.first() else {
                continue;
            };
            let data = plane.data();
            self.pending.push_back(AudioFrame {
                data: data[..len.min(data.len())].to_vec(),
                pts: if first { pts } else { None },
                sample_rate,
                channels: channels as u16,
            });
            first = false;
        }
        Ok(())
    }
}

impl Decoder for FfmpegAudioDecoder {
    type Frame = AudioFrame;

    fn push(&mut self, packet: Packet) -> Result<()> {
        self.decoder
            .push(to_ff_packet(&packet, self.time_base))
            .map_err(|e| decode_error("audio push", e))?;

        while let Some(frame) = self
            .decoder
            .take()
            .map_err(|e| decode_error("audio take", e))?
        {
            self.resample(frame)?;
        }
        Ok(())
    }

    fn take(&mut self) -> Result<Option<AudioFrame>> {
        Ok(self.pending.pop_front())
    }

    fn flush(&mut self) -> Result<()> {
        self.decoder
            .flush()
            .map_err(|e| decode_error("audio flush", e))?;
        while let Some(frame) = self
            .decoder
            .take()
            .map_err(|e| decode_error("audio take", e))?
        {
            self.resample(frame)?;
        }
        Ok(())
    }
}

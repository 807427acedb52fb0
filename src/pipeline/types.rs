//! Core types for the playback pipeline

use bytes::Bytes;

/// Rational time base of a stream (seconds per tick = num / den)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeBase {
    pub num: i32,
    pub den: i32,
}

impl TimeBase {
    pub const fn new(num: i32, den: i32) -> Self {
        Self { num, den }
    }

    /// Seconds represented by one tick
    pub fn as_secs_f64(&self) -> f64 {
        if self.den == 0 {
            return 0.0;
        }
        self.num as f64 / self.den as f64
    }

    /// Convert a timestamp expressed in this time base to seconds
    pub fn to_secs(&self, ticks: i64) -> f64 {
        ticks as f64 * self.as_secs_f64()
    }
}

impl std::fmt::Display for TimeBase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.num, self.den)
    }
}

/// Kind of media data
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaKind {
    /// Video frame data
    Video,
    /// Audio sample data
    Audio,
    /// Anything the player does not track (subtitles, data, attachments)
    Other,
}

impl std::fmt::Display for MediaKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MediaKind::Video => write!(f, "Video"),
            MediaKind::Audio => write!(f, "Audio"),
            MediaKind::Other => write!(f, "Other"),
        }
    }
}

/// Compressed unit of media data tagged to one stream
///
/// The payload is reference counted, so moving a packet between queues never
/// copies the bytes.
#[derive(Clone)]
pub struct Packet {
    /// Index of the stream inside the source
    pub stream_id: usize,
    pub data: Bytes,
    /// Presentation timestamp in the stream time base, if the container had one
    pub pts: Option<i64>,
}

impl Packet {
    pub fn new(stream_id: usize, data: impl Into<Bytes>, pts: Option<i64>) -> Self {
        Self {
            stream_id,
            data: data.into(),
            pts,
        }
    }

    /// Size accounted by the packet queues
    pub fn size(&self) -> usize {
        self.data.len()
    }
}

impl std::fmt::Debug for Packet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Packet")
            .field("stream_id", &self.stream_id)
            .field("pts", &self.pts)
            .field("size", &self.size())
            .finish()
    }
}

//! Health counters for a playback session

use std::sync::atomic::{AtomicU64, Ordering};

/// Health metrics for a playback session
///
/// Every stage records into the same instance. All fields use relaxed
/// atomics, they are statistics and never drive control flow.
#[derive(Debug, Default)]
pub struct PlaybackHealth {
    /// Packets routed to a packet queue
    pub packets_queued: AtomicU64,

    /// Packets of untracked streams dropped by the dispatch loop
    pub packets_dropped: AtomicU64,

    /// Video frames pushed into the picture queue
    pub frames_decoded: AtomicU64,

    /// Video frames handed to the presentation layer
    pub frames_presented: AtomicU64,

    /// Packets the decoders rejected
    pub decode_failures: AtomicU64,

    /// Audio callbacks that had to pad with silence
    pub audio_underruns: AtomicU64,

    /// Frame delays rejected as corrupt timestamps
    pub timestamp_anomalies: AtomicU64,

    /// Bytes of audio delivered to the device
    pub audio_bytes_played: AtomicU64,
}

impl PlaybackHealth {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_packet_queued(&self) {
        self.packets_queued.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_packet_dropped(&self) {
        self.packets_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_frame_decoded(&self) {
        self.frames_decoded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_frame_presented(&self) {
        self.frames_presented.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_decode_failure(&self) {
        self.decode_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_audio_underrun(&self) {
        self.audio_underruns.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_timestamp_anomaly(&self) {
        self.timestamp_anomalies.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_audio_bytes(&self, bytes: usize) {
        self.audio_bytes_played
            .fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> HealthSnapshot {
        HealthSnapshot {
            packets_queued: self.packets_queued.load(Ordering::Relaxed),
            packets_dropped: self.packets_dropped.load(Ordering::Relaxed),
            frames_decoded: self.frames_decoded.load(Ordering::Relaxed),
            frames_presented: self.frames_presented.load(Ordering::Relaxed),
            decode_failures: self.decode_failures.load(Ordering::Relaxed),
            audio_underruns: self.audio_underruns.load(Ordering::Relaxed),
            timestamp_anomalies: self.timestamp_anomalies.load(Ordering::Relaxed),
            audio_bytes_played: self.audio_bytes_played.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`PlaybackHealth`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HealthSnapshot {
    pub packets_queued: u64,
    pub packets_dropped: u64,
    pub frames_decoded: u64,
    pub frames_presented: u64,
    pub decode_failures: u64,
    pub audio_underruns: u64,
    pub timestamp_anomalies: u64,
    pub audio_bytes_played: u64,
}

impl std::fmt::Display for HealthSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} packets queued ({} dropped), {} frames decoded, {} presented, {} decode failures, {} audio underruns, {} timestamp anomalies",
            self.packets_queued,
            self.packets_dropped,
            self.frames_decoded,
            self.frames_presented,
            self.decode_failures,
            self.audio_underruns,
            self.timestamp_anomalies,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters() {
        let health = PlaybackHealth::new();
        health.record_packet_queued();
        health.record_packet_queued();
        health.record_packet_dropped();
        health.record_frame_presented();
        health.record_audio_bytes(4096);

        let snapshot = health.snapshot();
        assert_eq!(snapshot.packets_queued, 2);
        assert_eq!(snapshot.packets_dropped, 1);
        assert_eq!(snapshot.frames_presented, 1);
        assert_eq!(snapshot.audio_bytes_played, 4096);
        assert_eq!(snapshot.audio_underruns, 0);
    }
}

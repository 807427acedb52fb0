//! Demux/dispatch stage
//!
//! Reads packets from the source and routes them to the audio or video
//! packet queue. Backpressure is by polling: while the combined queue size is
//! above the ceiling the stage sleeps instead of reading.

use std::sync::Arc;
use std::sync::mpsc::Sender;

use anyhow::Result;
use log::{info, trace, warn};

use super::PlayerEvent;
use crate::decoder::{MediaSource, ReadOutcome};
use crate::pipeline::stage::PlaybackStage;
use crate::pipeline::state::PlaybackState;
use crate::pipeline::types::Packet;

pub struct DemuxStage {
    state: Arc<PlaybackState>,
    source: Box<dyn MediaSource>,
    audio_stream: Option<usize>,
    video_stream: Option<usize>,
    events: Sender<PlayerEvent>,
    packets_read: u64,
}

impl DemuxStage {
    pub fn new(
        state: Arc<PlaybackState>,
        source: Box<dyn MediaSource>,
        audio_stream: Option<usize>,
        video_stream: Option<usize>,
        events: Sender<PlayerEvent>,
    ) -> Self {
        Self {
            state,
            source,
            audio_stream,
            video_stream,
            events,
            packets_read: 0,
        }
    }

    fn dispatch(&self, packet: Packet) {
        let state = &self.state;
        let queue = if Some(packet.stream_id) == self.video_stream {
            &state.video_queue
        } else if Some(packet.stream_id) == self.audio_stream {
            &state.audio_queue
        } else {
            trace!("DemuxStage: dropping packet of stream {}", packet.stream_id);
            state.health.record_packet_dropped();
            return;
        };
        queue.put(packet);
        state.health.record_packet_queued();
    }

    /// Read until end of input; returns `false` if quit interrupted reading
    fn read_loop(&mut self) -> bool {
        let quit = self.state.quit_signal();
        let backoff = self.state.config.dispatch_backoff();
        let ceiling = self.state.config.max_queue_bytes;

        loop {
            if quit.cancelled() {
                return false;
            }

            if self.state.queued_bytes() > ceiling {
                if quit.wait_timeout(backoff) {
                    return false;
                }
                continue;
            }

            match self.source.read_packet() {
                Ok(ReadOutcome::Packet(packet)) => {
                    self.packets_read += 1;
                    self.dispatch(packet);
                }
                Ok(ReadOutcome::Again) => {
                    if quit.wait_timeout(backoff) {
                        return false;
                    }
                }
                Ok(ReadOutcome::Eof) => {
                    info!("DemuxStage: end of input after {} packets", self.packets_read);
                    return true;
                }
                Err(e) => {
                    warn!("DemuxStage: read error, treating as end of input: {}", e);
                    return true;
                }
            }
        }
    }
}

impl PlaybackStage for DemuxStage {
    fn run(&mut self) -> Result<()> {
        info!(
            "DemuxStage: started (audio: {:?}, video: {:?})",
            self.audio_stream, self.video_stream
        );

        if self.read_loop() {
            // Consumers drain what is queued, then see the queues closing
            self.state.audio_queue.close();
            self.state.video_queue.close();
            self.state.mark_source_exhausted();
            let _ = self.events.send(PlayerEvent::SourceExhausted);

            // Nothing left to read: idle until the session ends
            self.state.quit_signal().wait_cancellation();
        }

        info!("DemuxStage: finished ({} packets read)", self.packets_read);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "DemuxStage"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PlayerConfig;
    use crate::decoder::{
        AudioDecoder, StreamInfo, SyntheticConfig, SyntheticSource, VideoDecoder,
    };
    use crate::error::PlayerError;
    use crate::pipeline::packet_queue::QueueGet;
    use crate::pipeline::stage::spawn_stage;
    use std::sync::mpsc;
    use std::time::Duration;

    fn synthetic(spec: &str) -> Box<dyn MediaSource> {
        Box::new(SyntheticSource::new(SyntheticConfig::parse(spec).unwrap()))
    }

    fn drain(state: &PlaybackState, audio: bool) -> usize {
        let queue = if audio { &state.audio_queue } else { &state.video_queue };
        let mut count = 0;
        while let QueueGet::Packet(_) = queue.get(true) {
            count += 1;
        }
        count
    }

    #[test]
    fn test_routes_packets_and_signals_end_of_input() {
        let state = Arc::new(PlaybackState::new(PlayerConfig::default(), true, true));
        let (tx, rx) = mpsc::channel();
        let stage = DemuxStage::new(
            Arc::clone(&state),
            synthetic("frames=25,stall=7"),
            Some(1),
            Some(0),
            tx,
        );
        let handle = spawn_stage(stage).unwrap();

        assert!(matches!(
            rx.recv_timeout(Duration::from_secs(5)).unwrap(),
            PlayerEvent::SourceExhausted
        ));
        assert!(state.source_exhausted());
        assert_eq!(drain(&state, false), 25);
        // 1s at 44.1kHz in 1024-sample packets
        assert_eq!(drain(&state, true), 44);
        assert!(state.health.snapshot().packets_dropped > 0, "data stream is dropped");

        // Still alive until quit
        assert!(!handle.is_finished());
        state.request_quit();
        handle.join().unwrap();
    }

    #[test]
    fn test_backs_off_above_byte_ceiling() {
        let config = PlayerConfig {
            max_queue_bytes: 8 * 1024,
            ..Default::default()
        };
        let state = Arc::new(PlaybackState::new(config, true, true));
        let (tx, _rx) = mpsc::channel();
        let handle = spawn_stage(DemuxStage::new(
            Arc::clone(&state),
            synthetic("frames=1000"),
            Some(1),
            Some(0),
            tx,
        ))
        .unwrap();

        std::thread::sleep(Duration::from_millis(100));
        // At most one packet past the ceiling
        let queued = state.queued_bytes();
        assert!(queued > 8 * 1024 && queued <= 8 * 1024 + 2048, "{}", queued);
        assert!(!state.source_exhausted());

        state.request_quit();
        handle.join().unwrap();
    }

    struct Broken;

    impl MediaSource for Broken {
        fn streams(&self) -> &[StreamInfo] {
            &[]
        }

        fn read_packet(&mut self) -> crate::error::Result<ReadOutcome> {
            Err(PlayerError::Decode("disk on fire".into()))
        }

        fn video_decoder(&self, _: &StreamInfo) -> crate::error::Result<VideoDecoder> {
            Err(PlayerError::NoPlayableStream)
        }

        fn audio_decoder(&self, _: &StreamInfo) -> crate::error::Result<AudioDecoder> {
            Err(PlayerError::NoPlayableStream)
        }
    }

    #[test]
    fn test_read_error_ends_input() {
        let state = Arc::new(PlaybackState::new(PlayerConfig::default(), true, true));
        let (tx, rx) = mpsc::channel();
        let handle =
            spawn_stage(DemuxStage::new(Arc::clone(&state), Box::new(Broken), Some(1), Some(0), tx))
                .unwrap();

        assert!(matches!(
            rx.recv_timeout(Duration::from_secs(5)).unwrap(),
            PlayerEvent::SourceExhausted
        ));
        assert!(state.video_queue.is_closed());
        assert!(matches!(state.audio_queue.get(true), QueueGet::Closing));

        state.request_quit();
        handle.join().unwrap();
    }
}

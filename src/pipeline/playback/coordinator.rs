//! Playback coordinator
//!
//! Opens the decoders and output devices, wires demux → decode → refresh and
//! runs the event loop until the input has played out or quit is requested.

use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread::JoinHandle;
use std::time::Instant;

use log::{error, info, warn};

use super::audio_stage::AudioRenderer;
use super::demux_stage::DemuxStage;
use super::refresh_stage::{RefreshOutcome, RefreshStage};
use super::video_stage::VideoStage;
use super::PlayerEvent;
use crate::config::PlayerConfig;
use crate::decoder::{
    AudioDecoder, MediaSource, PlanePacker, StreamInfo, StreamParams, VideoDecoder,
};
use crate::display::{AudioDevice, AudioOutput, AudioSpec, EventTimer, SampleFormat, VideoPresenter};
use crate::error::{PlayerError, Result};
use crate::pipeline::health::HealthSnapshot;
use crate::pipeline::stage::spawn_stage;
use crate::pipeline::state::{PlaybackPhase, PlaybackState};
use crate::pipeline::types::MediaKind;
use crate::workers::WorkerClose;

/// How a session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlaybackReport {
    pub health: HealthSnapshot,
    /// Every stream played to its end, as opposed to an explicit quit
    pub reached_end: bool,
}

/// Owns the output side of a session and drives it
pub struct Player {
    config: PlayerConfig,
    presenter: Box<dyn VideoPresenter>,
    audio_output: Box<dyn AudioOutput>,
    events_tx: Sender<PlayerEvent>,
    events_rx: Receiver<PlayerEvent>,
}

struct SelectedStreams {
    video: Option<(StreamInfo, VideoDecoder)>,
    audio: Option<(StreamInfo, AudioSpec, AudioDecoder)>,
}

impl Player {
    pub fn new(
        config: PlayerConfig,
        presenter: Box<dyn VideoPresenter>,
        audio_output: Box<dyn AudioOutput>,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::channel();
        Self {
            config,
            presenter,
            audio_output,
            events_tx,
            events_rx,
        }
    }

    /// Channel for controls from other threads (pause, quit)
    pub fn event_sender(&self) -> Sender<PlayerEvent> {
        self.events_tx.clone()
    }

    fn select_streams(&self, source: &dyn MediaSource) -> Result<SelectedStreams> {
        let video = if self.config.video_enabled {
            source.best_stream(MediaKind::Video)
        } else {
            None
        };
        let video = match video {
            Some(info) => match source.video_decoder(&info) {
                Ok(decoder) => {
                    info!("Player: video stream {} ({})", info.index, info.codec);
                    Some((info, decoder))
                }
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    warn!("Player: skipping video: {}", e);
                    None
                }
            },
            None => None,
        };

        let audio = if self.config.audio_enabled {
            source.best_stream(MediaKind::Audio)
        } else {
            None
        };
        let audio = match audio.map(|info| (info.params.clone(), info)) {
            Some((
                StreamParams::Audio {
                    sample_rate,
                    channels,
                },
                info,
            )) => {
                let spec = AudioSpec {
                    sample_rate,
                    channels,
                    sample_format: SampleFormat::S16,
                    buffer_frames: self.config.audio_buffer_frames,
                };
                match source.audio_decoder(&info) {
                    Ok(decoder) => {
                        info!(
                            "Player: audio stream {} ({}, {} Hz, {} channels)",
                            info.index, info.codec, sample_rate, channels
                        );
                        Some((info, spec, decoder))
                    }
                    Err(e) if e.is_fatal() => return Err(e),
                    Err(e) => {
                        warn!("Player: skipping audio: {}", e);
                        None
                    }
                }
            }
            Some((_, info)) => {
                warn!("Player: audio stream {} has no audio parameters", info.index);
                None
            }
            None => None,
        };

        if video.is_none() && audio.is_none() {
            return Err(PlayerError::NoPlayableStream);
        }
        Ok(SelectedStreams { video, audio })
    }

    /// Play `source` to the end or until quit
    pub fn play(mut self, source: Box<dyn MediaSource>) -> Result<PlaybackReport> {
        self.config.validate()?;
        let streams = self.select_streams(source.as_ref())?;

        let state = Arc::new(PlaybackState::new(
            self.config.clone(),
            streams.audio.is_some(),
            streams.video.is_some(),
        ));
        state.transition(PlaybackPhase::Initializing);

        let audio_stream = streams.audio.as_ref().map(|(info, _, _)| info.index);
        let video_stream = streams.video.as_ref().map(|(info, _)| info.index);

        let mut device: Option<AudioDevice> = None;
        if let Some((info, spec, decoder)) = streams.audio {
            let renderer = AudioRenderer::new(Arc::clone(&state), decoder, info.time_base, &spec);
            match self.audio_output.open_audio_output(spec, renderer.into_callback()) {
                Ok(opened) => device = Some(opened),
                Err(e) => {
                    state.request_quit();
                    return Err(e);
                }
            }
        }

        let mut threads: Vec<JoinHandle<()>> = Vec::new();
        let demux = DemuxStage::new(
            Arc::clone(&state),
            source,
            audio_stream,
            video_stream,
            self.events_tx.clone(),
        );
        let spawned = spawn_stage(demux).and_then(|handle| {
            threads.push(handle);
            match streams.video {
                Some((info, decoder)) => {
                    let stage = VideoStage::new(
                        Arc::clone(&state),
                        decoder,
                        Box::new(PlanePacker::new()),
                        info.time_base,
                        info.frame_duration(),
                    );
                    spawn_stage(stage).map(|handle| threads.push(handle))
                }
                None => Ok(()),
            }
        });

        let mut timer = match spawned.and_then(|()| EventTimer::new(self.events_tx.clone())) {
            Ok(timer) => timer,
            Err(e) => {
                shutdown(&state, device, threads);
                return Err(e.into());
            }
        };

        let started_at = Instant::now();
        state.transition(PlaybackPhase::Running { started_at });
        info!("Player: playback started");

        let mut refresh = RefreshStage::new(Arc::clone(&state), self.presenter);
        timer.push_timer_event(self.config.display_tick(), PlayerEvent::Refresh);
        let reached_end = event_loop(&state, &self.events_rx, &mut refresh, &timer);

        timer.close();
        shutdown(&state, device, threads);

        let health = state.health.snapshot();
        info!(
            "Player: {} after {:.2}s, {}",
            if reached_end { "finished" } else { "stopped" },
            started_at.elapsed().as_secs_f64(),
            health
        );
        Ok(PlaybackReport {
            health,
            reached_end,
        })
    }
}

/// Returns `true` when playback ended because everything was played
fn event_loop(
    state: &PlaybackState,
    events: &Receiver<PlayerEvent>,
    refresh: &mut RefreshStage,
    timer: &EventTimer<PlayerEvent>,
) -> bool {
    let tick = state.config.display_tick();
    loop {
        match events.recv_timeout(tick) {
            Ok(PlayerEvent::Refresh) => match refresh.refresh(Instant::now()) {
                RefreshOutcome::Reschedule(delay) => {
                    timer.push_timer_event(delay, PlayerEvent::Refresh)
                }
                RefreshOutcome::Finished => {
                    state.request_quit();
                    return true;
                }
                RefreshOutcome::Stopped => return false,
            },
            Ok(PlayerEvent::SourceExhausted) => {
                info!("Player: input exhausted, draining queues");
            }
            Ok(PlayerEvent::TogglePause) => {
                let paused = state.toggle_pause();
                info!("Player: {}", if paused { "paused" } else { "resumed" });
            }
            Ok(PlayerEvent::Quit) => {
                info!("Player: quit requested");
                state.request_quit();
                return false;
            }
            Err(RecvTimeoutError::Timeout) => {
                if state.quit_requested() {
                    return false;
                }
            }
            Err(RecvTimeoutError::Disconnected) => {
                state.request_quit();
                return false;
            }
        }
    }
}

/// Stop every thread and release the audio device
fn shutdown(state: &PlaybackState, device: Option<AudioDevice>, threads: Vec<JoinHandle<()>>) {
    state.request_quit();
    if let Some(mut device) = device {
        device.close();
    }
    for handle in threads {
        if handle.join().is_err() {
            error!("Player: a playback thread panicked");
        }
    }
    state.transition(PlaybackPhase::Stopped);
}

//! Sound card output through cpal

use std::sync::mpsc;
use std::thread::JoinHandle;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};

use super::{AudioDevice, AudioOutput, AudioSpec, PullCallback};
use crate::error::{PlayerError, Result};
use crate::utils::sos::SignalOfStop;
use crate::workers::WorkerClose;

#[derive(Debug, Default)]
pub struct CpalAudioOutput;

impl CpalAudioOutput {
    pub fn new() -> Self {
        Self
    }
}

impl AudioOutput for CpalAudioOutput {
    fn open_audio_output(&mut self, spec: AudioSpec, callback: PullCallback) -> Result<AudioDevice> {
        let stop = SignalOfStop::new();
        let (ready_tx, ready_rx) = mpsc::channel::<std::result::Result<(), String>>();

        // cpal streams are not Send on every host: keep it on its own thread
        let handle = std::thread::Builder::new()
            .name("audio-device".into())
            .spawn({
                let stop = stop.clone();
                move || {
                    let stream = match build_stream(spec, callback) {
                        Ok(stream) => stream,
                        Err(e) => {
                            let _ = ready_tx.send(Err(e));
                            return;
                        }
                    };
                    if let Err(e) = stream.play() {
                        let _ = ready_tx.send(Err(e.to_string()));
                        return;
                    }
                    let _ = ready_tx.send(Ok(()));

                    stop.wait_cancellation();
                    if let Err(e) = stream.pause() {
                        log::warn!("CpalAudioOutput: pause failed: {}", e);
                    }
                }
            })?;

        match ready_rx.recv() {
            Ok(Ok(())) => {
                log::info!(
                    "CpalAudioOutput: playing {} Hz, {} channels",
                    spec.sample_rate,
                    spec.channels
                );
                Ok(Box::new(CpalAudioDevice {
                    stop,
                    handle: Some(handle),
                }))
            }
            Ok(Err(reason)) => {
                let _ = handle.join();
                Err(PlayerError::Device(reason))
            }
            Err(_) => {
                let _ = handle.join();
                Err(PlayerError::Device("audio thread exited early".into()))
            }
        }
    }
}

fn build_stream(spec: AudioSpec, mut callback: PullCallback) -> std::result::Result<cpal::Stream, String> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or_else(|| "No output audio device".to_string())?;
    let config = cpal::StreamConfig {
        channels: spec.channels,
        sample_rate: spec.sample_rate,
        buffer_size: cpal::BufferSize::Default,
    };

    let mut scratch: Vec<u8> = Vec::new();
    device
        .build_output_stream(
            &config,
            move |output: &mut [i16], _| {
                let needed = output.len() * 2;
                if scratch.len() < needed {
                    scratch.resize(needed, 0);
                }
                callback(&mut scratch[..needed]);
                for (sample, bytes) in output.iter_mut().zip(scratch.chunks_exact(2)) {
                    *sample = i16::from_le_bytes([bytes[0], bytes[1]]);
                }
            },
            |err| log::error!("Audio output error: {}", err),
            None,
        )
        .map_err(|e| e.to_string())
}

struct CpalAudioDevice {
    stop: SignalOfStop,
    handle: Option<JoinHandle<()>>,
}

impl WorkerClose for CpalAudioDevice {
    fn close(&mut self) {
        self.stop.cancel();
        if let Some(handle) = self.handle.take()
            && handle.join().is_err()
        {
            log::error!("CpalAudioOutput: device thread panicked");
        }
    }
}

impl Drop for CpalAudioDevice {
    fn drop(&mut self) {
        self.close();
    }
}

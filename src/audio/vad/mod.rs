//! Toggle listening with voice activity detection.
//!
//! While listening, the capture callback pushes samples through a ring
//! buffer and scores 512-sample frames with Silero. A segment opens when
//! the speech probability clears the configured threshold and closes after
//! the configured run of trailing silence, at which point the samples are
//! handed over for transcription in memory.

use anyhow::{Context, Result, anyhow};
use cpal::SupportedStreamConfig;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use hf_hub::api::tokio::ApiBuilder;
use log::{debug, error, info, warn};
use ringbuf::traits::Observer;
use ringbuf::{
    HeapRb,
    traits::{Consumer, Producer},
};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc::UnboundedSender;

use crate::config::Config;

mod silero;
use silero::Silero;

use super::Audio;

pub const N_SAMPLES: usize = 512;

/// VAD-gated recorder.
pub struct AudioRecorder {
    stream: Arc<Mutex<cpal::Stream>>,
}

impl AudioRecorder {
    /// Creates a new AudioRecorder instance.
    ///
    /// Downloads the Silero VAD model on first use and wires it into the
    /// capture callback. The stream starts paused; `start_recording` opens
    /// the microphone.
    pub async fn new(
        config: &Config,
        tx_audio: UnboundedSender<Audio>,
        threshold: f32,
        silence_duration: f32,
    ) -> Result<Self> {
        let host = cpal::default_host();
        debug!("Available hosts: {:?}", cpal::available_hosts());
        debug!("Default host: {:?}", host.id());

        let devices = host.input_devices()?;
        let names: HashSet<_> = devices.into_iter().flat_map(|d| d.name()).collect();
        debug!("Available input devices: {names:?}");

        let mut devices = host.input_devices()?;
        // Find the requested device or use default
        let device = if let Some(device_name) = &config.audio.device {
            devices
                .find(|d| {
                    if let Ok(name) = d.name() {
                        name == *device_name
                    } else {
                        false
                    }
                })
                .ok_or_else(|| {
                    anyhow!(
                        "Requested audio device '{}' not found, available: {:?}",
                        device_name,
                        names
                    )
                })?
        } else {
            host.default_input_device()
                .ok_or_else(|| anyhow!("No default input device found"))?
        };

        info!("Using input device: {}", device.name()?);

        // Try to find a supported configuration that matches what we want
        let stream_config = if let Ok(supported_configs) = device.supported_input_configs() {
            let mut stream_config = None;

            for config_range in supported_configs {
                let sample_rate = cpal::SampleRate(config.audio.sample_rate);
                if config_range.min_sample_rate() <= sample_rate
                    && config_range.max_sample_rate() >= sample_rate
                    && config_range.sample_format() == cpal::SampleFormat::I16
                {
                    stream_config = Some(config_range.with_sample_rate(sample_rate));
                    break;
                }
            }
            stream_config
        } else {
            None
        };
        let stream_config = if let Some(stream_config) = stream_config {
            Some(stream_config)
        } else {
            debug!("Could not find supported configs");
            if let Ok(default_config) = device.default_input_config() {
                debug!("Device default config: {:?}", default_config);
                Some(default_config)
            } else {
                warn!("Could not default_config");
                None
            }
        };

        // If we can't find an exact match, use the default config
        let stream_config = stream_config.unwrap_or_else(|| {
            warn!("Falling back to config defined configuration, It might not work");
            SupportedStreamConfig::new(
                config.audio.channels,
                cpal::SampleRate(config.audio.sample_rate),
                cpal::SupportedBufferSize::Unknown,
                cpal::SampleFormat::I16,
            )
        });

        debug!("Using stream config: {:?}", stream_config);

        let err_fn = move |err| {
            error!("Audio stream error: {}", err);
        };

        let mut buffer = HeapRb::new(config.audio.sample_rate as usize * 2); // 2 seconds buffer
        let mut temp_chunk = [0.0; N_SAMPLES];
        let sample_rate = config.audio.sample_rate as i64;
        // Frames are ~32ms at 16kHz, so this is how many silent frames in a
        // row close a segment
        let silence_frames = ((silence_duration * config.audio.sample_rate as f32)
            / N_SAMPLES as f32)
            .ceil()
            .max(1.0) as usize;

        let api = ApiBuilder::from_env().build()?;
        let model = api.model("Narsil/silero".to_string());
        let model_path = model.get("silero_vad.onnx").await?;
        let mut silero = Silero::new(sample_rate, model_path)?;

        let mut is_talking = false;
        let mut silent_run = 0usize;
        let mut audio_chunk: Vec<f32> = vec![];
        let stream = Arc::new(Mutex::new(
            device
                .build_input_stream(
                    &stream_config.into(),
                    move |data: &[i16], _: &cpal::InputCallbackInfo| {
                        let buf = &mut buffer;
                        for &sample in data {
                            if buf.try_push(sample).is_err() {
                                warn!("Buffer full, dropping samples");
                            }
                        }
                        // Score frames while we have enough data
                        while buf.occupied_len() >= N_SAMPLES {
                            for chunk_sample in temp_chunk.iter_mut() {
                                let sample = buf.try_pop().expect("Sample to exist");
                                *chunk_sample = sample as f32 / i16::MAX as f32;
                            }

                            let speech_prob = match silero.calc_level(&temp_chunk) {
                                Ok(level) => level,
                                Err(err) => {
                                    warn!("VAD scoring failed: {err}");
                                    0.0
                                }
                            };
                            let voiced = speech_prob > threshold;

                            if voiced && !is_talking {
                                is_talking = true;
                                silent_run = 0;
                                info!("Speech detected");
                                if tx_audio.send(Audio::Warm).is_err() {
                                    error!("Transcription task gone");
                                }
                            }

                            if is_talking {
                                audio_chunk.extend(temp_chunk);
                                if voiced {
                                    silent_run = 0;
                                } else {
                                    silent_run += 1;
                                    if silent_run >= silence_frames {
                                        is_talking = false;
                                        silent_run = 0;
                                        let chunk: Vec<f32> = audio_chunk.drain(..).collect();
                                        info!("Speech finished");
                                        if tx_audio.send(Audio::Sample(chunk)).is_err() {
                                            error!("Transcription task gone");
                                        }
                                    }
                                }
                            }
                        }
                    },
                    err_fn,
                    None,
                )
                .context("Failed to create audio stream")?,
        ));

        stream
            .lock()
            .map_err(|e| anyhow!("Failed to lock stream: {}", e))?
            .pause()
            .context("Cannot pause")?;

        Ok(Self { stream })
    }

    /// Opens the microphone and starts segmenting speech.
    pub fn start_recording(&self) -> Result<()> {
        self.stream
            .lock()
            .map_err(|e| anyhow!("Failed to lock stream: {}", e))?
            .play()?;
        Ok(())
    }

    /// Closes the microphone.
    pub fn stop_recording(&self) -> Result<()> {
        self.stream
            .lock()
            .map_err(|e| anyhow!("Failed to lock stream: {}", e))?
            .pause()?;
        Ok(())
    }
}

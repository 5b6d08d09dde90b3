use std::path::PathBuf;

use anyhow::Result;
use tokio::sync::mpsc::UnboundedSender;

use crate::config::{Config, Trigger};

mod push_to_talk;
pub(crate) mod resample;
mod vad;

/// Messages from the capture side to the transcription task.
pub enum Audio {
    /// Preload the model, speech is coming
    Warm,
    /// A finished in-memory speech segment
    Sample(Vec<f32>),
    /// A finished recording on disk
    Path(PathBuf),
}

pub enum AudioRecorder {
    Push(push_to_talk::AudioRecorder),
    Vad(vad::AudioRecorder),
}

impl AudioRecorder {
    pub async fn new(config: &Config, tx_audio: UnboundedSender<Audio>) -> Result<Self> {
        match &config.activation.trigger {
            Trigger::PushToTalk => Ok(Self::Push(push_to_talk::AudioRecorder::new(
                config, tx_audio,
            )?)),
            Trigger::ToggleVad {
                threshold,
                silence_duration,
            } => Ok(Self::Vad(
                vad::AudioRecorder::new(config, tx_audio, *threshold, *silence_duration).await?,
            )),
        }
    }

    pub fn start_recording(&self) -> Result<()> {
        match self {
            Self::Push(p) => p.start_recording(),
            Self::Vad(v) => v.start_recording(),
        }
    }

    pub fn stop_recording(&self) -> Result<()> {
        match self {
            Self::Push(p) => p.stop_recording(),
            Self::Vad(v) => v.stop_recording(),
        }
    }
}

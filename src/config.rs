//! Configuration management for the CaddyMate kiosk.
//!
//! This module provides functionality for loading and managing application
//! configuration, including audio capture settings, model parameters, the
//! store catalog location and the map layout.

use anyhow::{Context, Result};
use log::error;
use notify_rust::Notification;
use rdev::Key;
use serde::{Deserialize, Serialize};
use std::{
    collections::{HashMap, HashSet},
    path::{Path, PathBuf},
};

/// Audio capture configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(test, derive(PartialEq))]
pub struct AudioConfig {
    /// Number of audio channels (1 for mono, 2 for stereo)
    pub channels: u16,
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Sample format of the capture stream
    pub sample_format: SampleFormat,
    /// Audio input device name (e.g., "sysdefault:CARD=C920")
    /// If not specified, the default device will be used
    pub device: Option<String>,
}

impl From<SampleFormat> for cpal::SampleFormat {
    fn from(value: SampleFormat) -> Self {
        match value {
            SampleFormat::I16 => cpal::SampleFormat::I16,
            SampleFormat::F32 => cpal::SampleFormat::F32,
        }
    }
}

/// Sample format for audio capture.
///
/// Only the formats the WAV writer knows how to persist are accepted here.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[cfg_attr(test, derive(PartialEq))]
#[serde(rename_all = "lowercase")]
pub enum SampleFormat {
    /// `i16` with a valid range of `i16::MIN..=i16::MAX` with `0` being the origin
    I16,
    /// `f32` with a valid range of `-1.0..1.0` with `0.0` being the origin
    F32,
}

impl SampleFormat {
    pub fn bits_per_sample(&self) -> u16 {
        match self {
            Self::F32 => 32,
            Self::I16 => 16,
        }
    }
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            channels: 1,
            sample_rate: 16000,
            sample_format: SampleFormat::F32,
            device: None,
        }
    }
}

/// Path configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(test, derive(PartialEq))]
pub struct PathConfig {
    /// Cache directory for storing temporary files
    pub cache_dir: PathBuf,
    /// Path to the recorded audio file
    pub recording_path: PathBuf,
    /// Path to the store catalog database
    pub store_db: PathBuf,
}

/// Main application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(test, derive(PartialEq))]
pub struct Config {
    /// Audio capture settings
    pub audio: AudioConfig,
    /// Path configuration
    pub paths: PathConfig,
    /// Model configuration
    pub model: ModelConfig,
    /// Keyboard activation configuration
    pub activation: ActivationConfig,
    /// Store map layout
    pub map: MapConfig,
    /// Robot pose ingestion
    pub pose: PoseConfig,
}

/// Type of prompt to use for the model
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(test, derive(PartialEq))]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum PromptType {
    /// Use a list of vocabulary words joined by commas
    Vocabulary { vocabulary: Vec<String> },
    /// Use a custom initial prompt
    Raw { prompt: String },
    /// No prompt. The kiosk fills this in with the catalog item names so
    /// the model is biased towards things that are actually on the shelves.
    None,
}

impl Default for PromptType {
    fn default() -> Self {
        Self::None
    }
}

/// Whisper model configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(test, derive(PartialEq))]
pub struct ModelConfig {
    /// Model repository on Hugging Face
    pub repo: String,
    /// Model filename
    pub filename: String,
    /// Type of prompt to use for the model
    pub prompt: PromptType,
    /// Map of text to replace with their replacements
    pub replacements: HashMap<String, String>,
}

/// How voice capture is started and stopped.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(test, derive(PartialEq))]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Trigger {
    /// Hold the activation chord to record, release to transcribe
    PushToTalk,
    /// Tap the chord to toggle listening, segments are cut by the VAD
    ToggleVad {
        /// Speech probability above which a frame counts as voice
        threshold: f32,
        /// Seconds of silence that close a speech segment
        silence_duration: f32,
    },
}

impl Default for Trigger {
    fn default() -> Self {
        Self::PushToTalk
    }
}

/// Keyboard activation configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(test, derive(PartialEq))]
pub struct ActivationConfig {
    /// Keys that need to be pressed together to activate the microphone
    pub keys: HashSet<Key>,
    /// Key that toggles the kiosk fullscreen state
    pub fullscreen_key: Key,
    /// Show desktop notifications for state changes and results
    pub notify: bool,
    /// Capture trigger mode
    pub trigger: Trigger,
}

impl Default for ActivationConfig {
    fn default() -> Self {
        Self {
            keys: HashSet::from([Key::ControlLeft, Key::Space]),
            fullscreen_key: Key::KeyF,
            notify: true,
            trigger: Trigger::default(),
        }
    }
}

/// Store map layout configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(test, derive(PartialEq))]
pub struct MapConfig {
    /// Number of aisle rows on the generated map
    pub aisle_rows: usize,
    /// Aisle count to assume when the catalog is empty
    pub default_max_aisle: u32,
}

impl Default for MapConfig {
    fn default() -> Self {
        Self {
            aisle_rows: 2,
            default_max_aisle: 16,
        }
    }
}

/// Robot pose ingestion configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(test, derive(PartialEq))]
pub struct PoseConfig {
    /// Listen for pose datagrams at all
    pub enabled: bool,
    /// UDP bind address for pose datagrams
    pub bind: String,
}

impl Default for PoseConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind: "0.0.0.0:5005".to_string(),
        }
    }
}

impl PromptType {
    /// Gets the prompt text to use with the model
    pub fn get_prompt_text(&self) -> Option<String> {
        match self {
            PromptType::Vocabulary { vocabulary } if !vocabulary.is_empty() => {
                Some(vocabulary.join(", "))
            }
            PromptType::Raw { prompt } => Some(prompt.clone()),
            _ => None,
        }
    }
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            repo: "ggerganov/whisper.cpp".to_string(),
            filename: "ggml-base.en.bin".to_string(),
            prompt: PromptType::None,
            replacements: HashMap::new(),
        }
    }
}

impl Default for PathConfig {
    fn default() -> Self {
        let cache_dir = dirs::cache_dir()
            .unwrap_or_else(|| PathBuf::from("~/.cache"))
            .join("caddymate");
        let data_dir = dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("~/.local/share"))
            .join("caddymate");

        Self {
            recording_path: cache_dir.join("recorded.wav"),
            cache_dir,
            store_db: data_dir.join("caddymate_store.db"),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            audio: AudioConfig::default(),
            paths: PathConfig::default(),
            model: ModelConfig::default(),
            activation: ActivationConfig::default(),
            map: MapConfig::default(),
            pose: PoseConfig::default(),
        }
    }
}

impl Config {
    /// Gets the default configuration file path.
    fn default_config_path() -> PathBuf {
        let config_dir = dirs::config_dir().unwrap_or_else(|| PathBuf::from("~/.config"));
        config_dir.join("caddymate").join("config.toml")
    }

    /// Loads configuration from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path.as_ref())?;
        let config: Self = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Saves configuration to a TOML file.
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        let contents = toml::to_string(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Loads configuration from the default location, creating it if it doesn't exist.
    pub fn load_or_write_default(path: Option<&Path>) -> Result<Self> {
        let default_path = Self::default_config_path();
        let path = path.unwrap_or(&default_path);
        // If config exists, use it
        if path.exists() {
            return Self::from_file(path)
                .context(format!("Reading default config from {}", path.display()));
        }

        // If no config exists, create default config
        let config = Self::default();
        // Create config directory if it doesn't exist
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        config.save_to_file(path)?;
        Ok(config)
    }

    /// Shows a desktop notification when notifications are enabled.
    pub fn notify(&self, summary: &str, content: &str) {
        if self.activation.notify {
            if let Err(err) = Notification::new()
                .summary(summary)
                .body(content)
                .icon("audio-input-microphone")
                .show()
            {
                error!("Cannot show notification: {err} , content was : {summary} {content}")
            };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.audio.channels, 1);
        assert_eq!(config.audio.sample_rate, 16000);
        assert!(matches!(config.audio.sample_format, SampleFormat::F32));
        assert_eq!(config.model.repo, "ggerganov/whisper.cpp");
        assert_eq!(config.model.filename, "ggml-base.en.bin");
        assert!(matches!(config.model.prompt, PromptType::None));
        assert!(config.model.replacements.is_empty());
        assert_eq!(config.activation.fullscreen_key, Key::KeyF);
        assert_eq!(config.map.aisle_rows, 2);
        assert_eq!(config.map.default_max_aisle, 16);
        assert!(config.pose.enabled);
        assert_eq!(config.pose.bind, "0.0.0.0:5005");
    }

    #[test]
    fn test_config_serialization() {
        let config = Config::default();
        let toml = toml::to_string(&config).unwrap();
        assert!(toml.contains("channels = 1"));
        assert!(toml.contains("sample_rate = 16000"));
        assert!(toml.contains("sample_format = \"f32\""));
        assert!(toml.contains("repo = \"ggerganov/whisper.cpp\""));
        assert!(toml.contains("filename = \"ggml-base.en.bin\""));
        assert!(toml.contains("fullscreen_key = \"KeyF\""));
        assert!(toml.contains("bind = \"0.0.0.0:5005\""));
    }

    #[test]
    fn test_config_deserialization() {
        let toml = r#"
            [audio]
            channels = 2
            sample_rate = 48000
            sample_format = "i16"

            [paths]
            cache_dir = "/tmp/test"
            recording_path = "/tmp/test/recorded.wav"
            store_db = "/tmp/test/store.db"

            [model]
            repo = "test/repo"
            filename = "test.bin"
            prompt = { type = "vocabulary", vocabulary = ["milk", "bread"] }
            replacements = { "breads" = "bread" }

            [activation]
            keys = ["ControlLeft", "Space"]
            fullscreen_key = "KeyF"
            notify = false
            trigger = { type = "toggle-vad", threshold = 0.6, silence_duration = 1.5 }

            [map]
            aisle_rows = 3
            default_max_aisle = 12

            [pose]
            enabled = false
            bind = "127.0.0.1:6000"
        "#;

        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.audio.channels, 2);
        assert_eq!(config.audio.sample_rate, 48000);
        assert!(matches!(config.audio.sample_format, SampleFormat::I16));
        assert_eq!(config.model.repo, "test/repo");
        assert_eq!(config.paths.store_db, PathBuf::from("/tmp/test/store.db"));
        assert_eq!(
            config.model.prompt.get_prompt_text(),
            Some("milk, bread".to_string())
        );
        assert_eq!(
            config.model.replacements.get("breads"),
            Some(&"bread".to_string())
        );
        assert!(!config.activation.notify);
        assert!(matches!(
            config.activation.trigger,
            Trigger::ToggleVad { threshold, silence_duration }
                if threshold == 0.6 && silence_duration == 1.5
        ));
        assert_eq!(config.map.aisle_rows, 3);
        assert!(!config.pose.enabled);
        assert_eq!(config.pose.bind, "127.0.0.1:6000");
    }

    #[test]
    fn test_prompt_type() {
        // Test Vocabulary variant
        let prompt = PromptType::Vocabulary {
            vocabulary: vec!["milk".to_string(), "oat bran".to_string()],
        };
        assert_eq!(prompt.get_prompt_text(), Some("milk, oat bran".to_string()));

        // Test Raw variant
        let prompt = PromptType::Raw {
            prompt: "custom prompt".to_string(),
        };
        assert_eq!(prompt.get_prompt_text(), Some("custom prompt".to_string()));

        // Test None variant
        let prompt = PromptType::None;
        assert_eq!(prompt.get_prompt_text(), None);

        // Test empty Vocabulary
        let prompt = PromptType::Vocabulary { vocabulary: vec![] };
        assert_eq!(prompt.get_prompt_text(), None);
    }

    #[test]
    fn test_config_file_io() {
        let temp_dir = tempdir().unwrap();
        let config_path = temp_dir.path().join("config.toml");

        let mut config = Config::default();
        config.audio.channels = 2;
        config.audio.sample_rate = 48000;
        config.audio.sample_format = SampleFormat::I16;
        config.model.prompt = PromptType::Vocabulary {
            vocabulary: vec!["milk".to_string(), "bread".to_string()],
        };
        config.paths.store_db = PathBuf::from("/tmp/test/store.db");
        config.activation.keys = HashSet::from([Key::ControlLeft, Key::Alt, Key::Space]);
        config.pose.bind = "127.0.0.1:6000".to_string();

        config.save_to_file(&config_path).unwrap();
        let loaded_config = Config::from_file(&config_path).unwrap();

        assert_eq!(loaded_config, config);
    }

    #[test]
    fn test_default_config_round_trip() {
        let default = Config::default();
        let serialized = toml::to_string(&default).unwrap();
        let deserialized: Config = toml::from_str(&serialized).unwrap();
        assert_eq!(default, deserialized);
    }

    #[test]
    fn test_invalid_config() {
        let toml = r#"
            [audio]
            channels = "invalid"  # Should be a number
            sample_rate = 48000
            sample_format = "i16"
        "#;

        let result: Result<Config, _> = toml::from_str(toml);
        assert!(result.is_err());
    }

    #[test]
    fn test_config_creation() {
        let temp_dir = tempdir().unwrap();
        let config_path = temp_dir.path().join("caddymate").join("config.toml");

        // Load config (should create default config)
        let config = Config::load_or_write_default(Some(&config_path)).unwrap();

        // Verify config was created
        assert!(config_path.exists());

        // Verify default values
        assert_eq!(config.audio.channels, 1);
        assert_eq!(config.audio.sample_rate, 16000);
        assert!(matches!(config.audio.sample_format, SampleFormat::F32));
        assert_eq!(config.model.repo, "ggerganov/whisper.cpp");
        assert_eq!(config.model.filename, "ggml-base.en.bin");
    }
}

use std::path::PathBuf;

use anyhow::{Result, bail};
use clap::{Parser, Subcommand};

use caddymate::accuracy::{self, Target};
use caddymate::app::App;
use caddymate::config::Config;
use caddymate::logging::init_logging;

/// Voice-search store kiosk.
#[derive(Parser)]
#[command(name = "caddymate", version, about)]
struct Cli {
    /// Path to the configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Measure recognition accuracy over WAV fixtures
    Accuracy {
        /// Recognize a single WAV file and print the result
        file: Option<PathBuf>,

        /// Batch over every WAV in this directory; file stems are the
        /// expected transcripts
        #[arg(long)]
        audio_dir: Option<PathBuf>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn test_config_flag_before_subcommand() {
        let cli = Cli::try_parse_from(["caddymate", "--config", "kiosk.toml", "accuracy"]).unwrap();
        assert_eq!(cli.config.as_deref(), Some(Path::new("kiosk.toml")));
        assert!(matches!(cli.command, Some(Command::Accuracy { .. })));
    }

    #[test]
    fn test_config_flag_after_subcommand() {
        let cli = Cli::try_parse_from([
            "caddymate",
            "accuracy",
            "--config",
            "kiosk.toml",
            "fixtures/milk.wav",
        ])
        .unwrap();
        assert_eq!(cli.config.as_deref(), Some(Path::new("kiosk.toml")));
        let Some(Command::Accuracy { file, audio_dir }) = cli.command else {
            panic!("expected accuracy subcommand");
        };
        assert_eq!(file.as_deref(), Some(Path::new("fixtures/milk.wav")));
        assert!(audio_dir.is_none());
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => Config::from_file(path)?,
        None => Config::load_or_write_default(None)?,
    };

    match cli.command {
        None => {
            let mut app = App::new(config).await?;
            app.run().await
        }
        Some(Command::Accuracy { file, audio_dir }) => {
            let target = match (file, audio_dir) {
                (Some(file), None) => Target::File(file),
                (None, Some(dir)) => Target::Dir(dir),
                _ => bail!("pass either a WAV file or --audio-dir, not both"),
            };
            let all_passed = accuracy::run(&config, target).await?;
            if !all_passed {
                std::process::exit(1);
            }
            Ok(())
        }
    }
}

//! Recognition accuracy harness.
//!
//! Runs the kiosk's transcription over a directory of WAV fixtures where
//! each file stem is the expected utterance, and reports how many came back
//! right. The same catalog vocabulary prompt as the live kiosk is used, so
//! the numbers reflect what a shopper would actually get.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use hound::WavReader;
use log::info;

use crate::asr::{Asr, download_model, prompt_with_vocabulary};
use crate::audio::resample::audio_resample;
use crate::config::Config;
use crate::store::StoreDb;

const RESULTS_FILE: &str = "accuracy-results.txt";

/// What to run the harness over.
pub enum Target {
    /// Recognize a single WAV and print the result
    File(PathBuf),
    /// Batch over every WAV in a directory
    Dir(PathBuf),
}

/// Outcome for one fixture.
#[derive(Debug, Clone, PartialEq)]
pub struct FileOutcome {
    pub expected: String,
    pub heard: String,
    pub error: Option<String>,
}

impl FileOutcome {
    pub fn passed(&self) -> bool {
        self.error.is_none() && self.heard == self.expected
    }
}

/// Batch results.
#[derive(Debug, Default)]
pub struct Report {
    pub outcomes: Vec<FileOutcome>,
}

impl Report {
    pub fn total(&self) -> usize {
        self.outcomes.len()
    }

    pub fn passed(&self) -> usize {
        self.outcomes.iter().filter(|o| o.passed()).count()
    }

    pub fn failed(&self) -> usize {
        self.total() - self.passed()
    }

    pub fn all_passed(&self) -> bool {
        self.failed() == 0
    }

    /// Renders the report in the results-file format.
    pub fn render(&self) -> String {
        let total = self.total();
        let passed = self.passed();
        let failed = self.failed();
        let pct = |count: usize| {
            if total == 0 {
                0.0
            } else {
                count as f64 / total as f64 * 100.0
            }
        };

        let mut lines = Vec::new();
        lines.push(format!(
            "RESULTS: {passed} passed, {failed} failed out of {total} files"
        ));

        if passed > 0 {
            lines.push(format!("\nCorrectly identified ({passed}):"));
            for outcome in self.outcomes.iter().filter(|o| o.passed()) {
                lines.push(format!("  + {}", outcome.expected));
            }
        }

        if failed > 0 {
            lines.push(format!("\nFailed to identify ({failed}):"));
            for outcome in self.outcomes.iter().filter(|o| !o.passed()) {
                let heard = match &outcome.error {
                    Some(err) => format!("[error] {err}"),
                    None if outcome.heard.is_empty() => "(silence)".to_string(),
                    None => outcome.heard.clone(),
                };
                lines.push(format!("  - {}  (heard: {heard})", outcome.expected));
            }
        }

        lines.push(String::new());
        lines.push("SUMMARY".to_string());
        lines.push(format!("  Total:  {total}"));
        lines.push(format!("  Passed: {passed} ({:.1}%)", pct(passed)));
        lines.push(format!("  Failed: {failed} ({:.1}%)", pct(failed)));
        lines.push(String::new());

        lines.join("\n")
    }
}

/// Lower-cases, strips punctuation and collapses whitespace so whisper's
/// "Oat bran." compares equal to the fixture stem "oat bran".
pub fn normalize(text: &str) -> String {
    text.to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Decodes a fixture into 16 kHz mono f32 samples.
///
/// Fixtures must be mono 16-bit PCM; other rates are resampled.
pub fn samples_from_wav(path: &Path, target_rate: u32) -> Result<Vec<f32>> {
    let reader = WavReader::open(path)
        .with_context(|| format!("Opening fixture {}", path.display()))?;
    let spec = reader.spec();

    if spec.channels != 1 {
        bail!("unsupported format (need mono WAV, got {} channels)", spec.channels);
    }
    if spec.sample_format != hound::SampleFormat::Int || spec.bits_per_sample != 16 {
        bail!(
            "unsupported format (need 16-bit PCM, got {}-bit {:?})",
            spec.bits_per_sample,
            spec.sample_format
        );
    }

    let samples: Vec<f32> = reader
        .into_samples::<i16>()
        .map(|s| s.unwrap_or(0) as f32 / 32768.0)
        .collect();

    if spec.sample_rate != target_rate {
        Ok(audio_resample(&samples, spec.sample_rate, target_rate, 1))
    } else {
        Ok(samples)
    }
}

fn collect_fixtures(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut fixtures: Vec<PathBuf> = std::fs::read_dir(dir)
        .with_context(|| format!("Reading audio directory {}", dir.display()))?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| {
            path.extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| ext.eq_ignore_ascii_case("wav"))
        })
        .collect();
    fixtures.sort();
    Ok(fixtures)
}

/// Runs the harness. Returns `true` when every fixture passed.
pub async fn run(config: &Config, target: Target) -> Result<bool> {
    let store = StoreDb::open(&config.paths.store_db)?;
    let vocabulary = store.item_names()?;
    let prompt = prompt_with_vocabulary(config, &vocabulary);

    let model_path = download_model(config)
        .await
        .context("Failed to download model")?;
    let mut asr = Asr::new(&model_path)?;

    match target {
        Target::File(path) => {
            asr.load()?;
            let samples = samples_from_wav(&path, config.audio.sample_rate)?;
            let heard = normalize(&asr.run(samples, config, &prompt)?);
            if heard.is_empty() {
                println!("(silence)");
            } else {
                println!("{heard}");
            }
            Ok(true)
        }
        Target::Dir(dir) => {
            let fixtures = collect_fixtures(&dir)?;
            if fixtures.is_empty() {
                bail!("No .wav files found in {}", dir.display());
            }

            let total = fixtures.len();
            let mut report = Report::default();
            for (i, path) in fixtures.iter().enumerate() {
                let expected = normalize(
                    path.file_stem()
                        .and_then(|stem| stem.to_str())
                        .unwrap_or_default(),
                );
                print!("[{}/{total}] {expected} ... ", i + 1);

                let outcome = match recognize(&mut asr, config, &prompt, path) {
                    Ok(heard) => FileOutcome {
                        expected,
                        heard,
                        error: None,
                    },
                    Err(err) => FileOutcome {
                        expected,
                        heard: String::new(),
                        error: Some(format!("{err:#}")),
                    },
                };

                match (&outcome.error, outcome.passed()) {
                    (Some(err), _) => println!("ERROR: {err}"),
                    (None, true) => println!("OK"),
                    (None, false) if outcome.heard.is_empty() => println!("FAIL (heard: (silence))"),
                    (None, false) => println!("FAIL (heard: {})", outcome.heard),
                }
                report.outcomes.push(outcome);
            }

            let rendered = report.render();
            println!("{rendered}");

            let results_path = dir.join(RESULTS_FILE);
            std::fs::write(&results_path, &rendered)
                .with_context(|| format!("Writing {}", results_path.display()))?;
            info!("Results saved to {}", results_path.display());

            Ok(report.all_passed())
        }
    }
}

fn recognize(
    asr: &mut Asr,
    config: &Config,
    prompt: &crate::config::PromptType,
    path: &Path,
) -> Result<String> {
    // The context is consumed by each run, so reload per fixture
    asr.load()?;
    let samples = samples_from_wav(path, config.audio.sample_rate)?;
    Ok(normalize(&asr.run(samples, config, prompt)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn outcome(expected: &str, heard: &str, error: Option<&str>) -> FileOutcome {
        FileOutcome {
            expected: expected.to_string(),
            heard: heard.to_string(),
            error: error.map(|e| e.to_string()),
        }
    }

    #[test]
    fn test_normalize() {
        assert_eq!(normalize(" Oat Bran. "), "oat bran");
        assert_eq!(normalize("MILK!"), "milk");
        assert_eq!(normalize("peanut  butter"), "peanut butter");
        assert_eq!(normalize("..."), "");
    }

    #[test]
    fn test_outcome_passed() {
        assert!(outcome("milk", "milk", None).passed());
        assert!(!outcome("milk", "silk", None).passed());
        assert!(!outcome("milk", "milk", Some("boom")).passed());
    }

    #[test]
    fn test_report_counts_and_render() {
        let report = Report {
            outcomes: vec![
                outcome("milk", "milk", None),
                outcome("bread", "", None),
                outcome("eggs", "", Some("bad wav")),
            ],
        };
        assert_eq!(report.total(), 3);
        assert_eq!(report.passed(), 1);
        assert_eq!(report.failed(), 2);
        assert!(!report.all_passed());

        let rendered = report.render();
        assert!(rendered.contains("RESULTS: 1 passed, 2 failed out of 3 files"));
        assert!(rendered.contains("  + milk"));
        assert!(rendered.contains("  - bread  (heard: (silence))"));
        assert!(rendered.contains("  - eggs  (heard: [error] bad wav)"));
        assert!(rendered.contains("Passed: 1 (33.3%)"));
        assert!(rendered.contains("Failed: 2 (66.7%)"));
    }

    #[test]
    fn test_empty_report() {
        let report = Report::default();
        assert!(report.all_passed());
        assert!(report.render().contains("Passed: 0 (0.0%)"));
    }

    fn write_wav(path: &Path, spec: hound::WavSpec, samples: &[i16]) {
        let mut writer = hound::WavWriter::create(path, spec).unwrap();
        for &sample in samples {
            writer.write_sample(sample).unwrap();
        }
        writer.finalize().unwrap();
    }

    #[test]
    fn test_samples_from_wav_passthrough() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("milk.wav");
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 16000,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        write_wav(&path, spec, &[0, 16384, -16384]);

        let samples = samples_from_wav(&path, 16000).unwrap();
        assert_eq!(samples.len(), 3);
        assert!((samples[1] - 0.5).abs() < 1e-3);
        assert!((samples[2] + 0.5).abs() < 1e-3);
    }

    #[test]
    fn test_samples_from_wav_rejects_stereo() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("stereo.wav");
        let spec = hound::WavSpec {
            channels: 2,
            sample_rate: 16000,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        write_wav(&path, spec, &[0, 0, 1, 1]);

        let err = samples_from_wav(&path, 16000).unwrap_err();
        assert!(err.to_string().contains("mono"));
    }

    #[test]
    fn test_collect_fixtures_sorted_wav_only() {
        let dir = tempdir().unwrap();
        for name in ["b.wav", "a.WAV", "notes.txt"] {
            std::fs::write(dir.path().join(name), b"").unwrap();
        }
        let fixtures = collect_fixtures(dir.path()).unwrap();
        let names: Vec<_> = fixtures
            .iter()
            .map(|p| p.file_name().unwrap().to_str().unwrap())
            .collect();
        assert_eq!(names, vec!["a.WAV", "b.wav"]);
    }
}

//! Speech input and output for the assistant.
//!
//! Recognition is an energy segmenter over a batch transcriber: local
//! Parakeet TDT (ONNX Runtime, `parakeet` feature) or the Groq Whisper API.
//! Synthesis shells out to the platform text-to-speech command.

pub mod audio;
pub mod capture;
pub mod groq;
pub mod input;
pub mod local;
pub mod recognizer;
pub mod segmenter;
pub mod synth;

use std::path::{Path, PathBuf};

use anyhow::Result;
use tracing::{info, warn};

use alexi_config::{RecognizerBackend, SpeechConfig};

pub use capture::{CaptureError, CaptureSession};
pub use input::SpeechInput;
pub use recognizer::{Recognizer, SegmentingRecognizer};
pub use synth::CommandSpeaker;

/// Environment variable naming the local model directory.
pub const MODEL_ENV: &str = "ALEXI_SPEECH_MODEL";

/// Batch transcription of a recorded audio file.
#[async_trait::async_trait]
pub trait Transcriber: Send + Sync {
    async fn transcribe_file(&self, path: &Path) -> Result<String>;
}

/// Groq API access for cloud transcription.
#[derive(Debug, Clone)]
pub struct GroqAccess {
    pub api_key: String,
    pub api_base: Option<String>,
}

/// Tries the local model first, then the cloud fallback.
struct AutoTranscriber {
    local: Option<Box<dyn Transcriber>>,
    fallback: Option<Box<dyn Transcriber>>,
}

#[async_trait::async_trait]
impl Transcriber for AutoTranscriber {
    async fn transcribe_file(&self, path: &Path) -> Result<String> {
        if let Some(ref local) = self.local {
            match local.transcribe_file(path).await {
                Ok(text) => return Ok(text),
                Err(e) => warn!("Local transcription failed, trying fallback: {e}"),
            }
        }
        if let Some(ref fallback) = self.fallback {
            return fallback.transcribe_file(path).await;
        }
        Err(anyhow::anyhow!("No transcription backend available"))
    }
}

/// Model directory: command line, then config, then `ALEXI_SPEECH_MODEL`,
/// then `~/.alexi/models/parakeet-tdt`.
pub fn resolve_model_path(config: &SpeechConfig, cli_override: Option<&str>) -> PathBuf {
    pick_model_path(
        cli_override,
        config.model_path.as_deref(),
        std::env::var(MODEL_ENV).ok(),
    )
}

fn pick_model_path(cli: Option<&str>, config: Option<&str>, env: Option<String>) -> PathBuf {
    let chosen = cli
        .map(str::to_string)
        .or_else(|| config.map(str::to_string))
        .or(env)
        .filter(|p| !p.trim().is_empty());
    match chosen {
        Some(p) => alexi_config::resolve_path(p.trim()),
        None => alexi_config::state_dir().join("models").join("parakeet-tdt"),
    }
}

/// Check if model files exist at the given path.
pub fn model_files_exist(model_path: &Path) -> bool {
    model_path.join("encoder-model.onnx").exists()
        && model_path.join("decoder_joint-model.onnx").exists()
        && model_path.join("vocab.txt").exists()
}

/// Build a transcriber for the configured backend.
///
/// - `local`: the Parakeet model must load
/// - `groq`: a Groq API key is required
/// - `auto`: local when possible, Groq as fallback; at least one must exist
pub fn create_transcriber(
    config: &SpeechConfig,
    model_path: &Path,
    groq: Option<GroqAccess>,
) -> Result<Box<dyn Transcriber>> {
    let ep = config.execution_provider.as_deref().unwrap_or("cpu");
    let groq = groq.filter(|g| !g.api_key.trim().is_empty());

    match config.backend {
        RecognizerBackend::Local => {
            if !model_files_exist(model_path) {
                anyhow::bail!("speech model files are missing at {}", model_path.display());
            }
            try_create_local(model_path, ep)
        }
        RecognizerBackend::Groq => {
            let g = groq.ok_or_else(|| {
                anyhow::anyhow!("speech backend is 'groq' but no Groq API key is configured")
            })?;
            Ok(Box::new(groq::GroqTranscriber::new(g.api_key, g.api_base)))
        }
        RecognizerBackend::Auto => {
            let mut local = None;
            if model_files_exist(model_path) {
                match try_create_local(model_path, ep) {
                    Ok(t) => {
                        info!("Local Parakeet transcription available");
                        local = Some(t);
                    }
                    Err(e) => warn!("Failed to initialize local transcription: {e}"),
                }
            } else {
                info!(
                    "Speech model not found at {}, local transcription unavailable",
                    model_path.display()
                );
            }

            let fallback: Option<Box<dyn Transcriber>> = groq
                .map(|g| Box::new(groq::GroqTranscriber::new(g.api_key, g.api_base)) as _);

            if local.is_none() && fallback.is_none() {
                anyhow::bail!(
                    "no speech recognition backend available (no model at {}, no Groq API key)",
                    model_path.display()
                );
            }
            Ok(Box::new(AutoTranscriber { local, fallback }))
        }
    }
}

fn try_create_local(model_path: &Path, execution_provider: &str) -> Result<Box<dyn Transcriber>> {
    #[cfg(feature = "parakeet")]
    {
        let t = local::LocalTranscriber::new(&model_path.to_string_lossy(), execution_provider)?;
        Ok(Box::new(t))
    }
    #[cfg(not(feature = "parakeet"))]
    {
        let _ = (model_path, execution_provider);
        Err(anyhow::anyhow!(
            "local speech recognition not available: built without the 'parakeet' feature"
        ))
    }
}

/// Try to load a speech recognizer. Never fails: problems are logged and
/// reported as `None` so the caller can decide how to degrade.
pub fn probe_recognizer(
    config: &SpeechConfig,
    model_path_override: Option<&str>,
    groq: Option<GroqAccess>,
) -> Option<Box<dyn Recognizer>> {
    if !capture::input_available() {
        warn!("Speech recognizer unavailable: no audio input device");
        return None;
    }
    let model_path = resolve_model_path(config, model_path_override);
    match create_transcriber(config, &model_path, groq) {
        Ok(transcriber) => {
            let recognizer = SegmentingRecognizer::new(transcriber, &config.into());
            Some(Box::new(recognizer))
        }
        Err(e) => {
            warn!("Speech recognizer unavailable: {e:#}");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(backend: RecognizerBackend) -> SpeechConfig {
        SpeechConfig {
            backend,
            ..SpeechConfig::default()
        }
    }

    #[test]
    fn model_path_precedence() {
        assert_eq!(
            pick_model_path(Some("/cli"), Some("/cfg"), Some("/env".into())),
            PathBuf::from("/cli")
        );
        assert_eq!(
            pick_model_path(None, Some("/cfg"), Some("/env".into())),
            PathBuf::from("/cfg")
        );
        assert_eq!(
            pick_model_path(None, None, Some("/env".into())),
            PathBuf::from("/env")
        );
        assert!(pick_model_path(None, None, None).ends_with(".alexi/models/parakeet-tdt"));
    }

    #[test]
    fn model_files_are_detected() {
        let dir = tempfile::tempdir().unwrap();
        assert!(!model_files_exist(dir.path()));
        for f in ["encoder-model.onnx", "decoder_joint-model.onnx", "vocab.txt"] {
            std::fs::write(dir.path().join(f), b"").unwrap();
        }
        assert!(model_files_exist(dir.path()));
    }

    #[test]
    fn local_backend_requires_model_files() {
        let dir = tempfile::tempdir().unwrap();
        let err = create_transcriber(&config(RecognizerBackend::Local), dir.path(), None)
            .err()
            .unwrap();
        assert!(err.to_string().contains("missing"));
    }

    #[test]
    fn groq_backend_requires_key() {
        let dir = tempfile::tempdir().unwrap();
        let blank = GroqAccess {
            api_key: " ".into(),
            api_base: None,
        };
        assert!(create_transcriber(&config(RecognizerBackend::Groq), dir.path(), Some(blank)).is_err());
        let key = GroqAccess {
            api_key: "gsk_test".into(),
            api_base: None,
        };
        assert!(create_transcriber(&config(RecognizerBackend::Groq), dir.path(), Some(key)).is_ok());
    }

    #[test]
    fn auto_backend_needs_at_least_one_source() {
        let dir = tempfile::tempdir().unwrap();
        assert!(create_transcriber(&config(RecognizerBackend::Auto), dir.path(), None).is_err());
        let key = GroqAccess {
            api_key: "gsk_test".into(),
            api_base: None,
        };
        assert!(create_transcriber(&config(RecognizerBackend::Auto), dir.path(), Some(key)).is_ok());
    }

    struct Fails;

    #[async_trait::async_trait]
    impl Transcriber for Fails {
        async fn transcribe_file(&self, _path: &Path) -> Result<String> {
            anyhow::bail!("local failed")
        }
    }

    struct Fixed;

    #[async_trait::async_trait]
    impl Transcriber for Fixed {
        async fn transcribe_file(&self, _path: &Path) -> Result<String> {
            Ok("from fallback".into())
        }
    }

    #[tokio::test]
    async fn auto_falls_back_after_local_error() {
        let auto = AutoTranscriber {
            local: Some(Box::new(Fails)),
            fallback: Some(Box::new(Fixed)),
        };
        assert_eq!(
            auto.transcribe_file(Path::new("x.wav")).await.unwrap(),
            "from fallback"
        );
        let none = AutoTranscriber {
            local: Some(Box::new(Fails)),
            fallback: None,
        };
        assert!(none.transcribe_file(Path::new("x.wav")).await.is_err());
    }
}

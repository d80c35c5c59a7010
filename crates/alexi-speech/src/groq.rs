//! Groq Whisper API transcription backend.

use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use tracing::error;

use crate::Transcriber;

const DEFAULT_API_BASE: &str = "https://api.groq.com/openai/v1";
const MODEL: &str = "whisper-large-v3";

/// Cloud transcription via Groq's OpenAI-compatible audio endpoint.
pub struct GroqTranscriber {
    api_key: String,
    api_base: String,
    client: reqwest::Client,
}

impl GroqTranscriber {
    pub fn new(api_key: String, api_base: Option<String>) -> Self {
        Self {
            api_key,
            api_base: api_base
                .unwrap_or_else(|| DEFAULT_API_BASE.to_string())
                .trim_end_matches('/')
                .to_string(),
            client: reqwest::Client::new(),
        }
    }

    fn endpoint(&self) -> String {
        format!("{}/audio/transcriptions", self.api_base)
    }
}

fn mime_for(path: &Path) -> &'static str {
    match path.extension().and_then(|e| e.to_str()) {
        Some("ogg") => "audio/ogg",
        Some("mp3") => "audio/mpeg",
        Some("m4a") => "audio/mp4",
        _ => "audio/wav",
    }
}

#[async_trait::async_trait]
impl Transcriber for GroqTranscriber {
    async fn transcribe_file(&self, path: &Path) -> Result<String> {
        let file_bytes = tokio::fs::read(path)
            .await
            .with_context(|| format!("audio file not readable: {}", path.display()))?;
        let file_name = path
            .file_name()
            .unwrap_or_default()
            .to_string_lossy()
            .to_string();

        let file_part = reqwest::multipart::Part::bytes(file_bytes)
            .file_name(file_name)
            .mime_str(mime_for(path))?;
        let form = reqwest::multipart::Form::new()
            .part("file", file_part)
            .text("model", MODEL)
            .text("response_format", "json");

        let resp = self
            .client
            .post(self.endpoint())
            .bearer_auth(&self.api_key)
            .multipart(form)
            .timeout(Duration::from_secs(60))
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            error!("Groq transcription failed ({status}): {body}");
            bail!("Groq transcription failed ({status})");
        }

        let data: serde_json::Value = resp.json().await?;
        data.get("text")
            .and_then(|t| t.as_str())
            .map(|t| t.trim().to_string())
            .ok_or_else(|| anyhow::anyhow!("No text field in Groq response"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_honors_custom_base() {
        let t = GroqTranscriber::new("k".into(), Some("http://localhost:9000/v1/".into()));
        assert_eq!(t.endpoint(), "http://localhost:9000/v1/audio/transcriptions");
        let t = GroqTranscriber::new("k".into(), None);
        assert_eq!(
            t.endpoint(),
            "https://api.groq.com/openai/v1/audio/transcriptions"
        );
    }

    #[test]
    fn mime_defaults_to_wav() {
        assert_eq!(mime_for(Path::new("a.wav")), "audio/wav");
        assert_eq!(mime_for(Path::new("a.mp3")), "audio/mpeg");
        assert_eq!(mime_for(Path::new("noext")), "audio/wav");
    }

    #[tokio::test]
    async fn missing_file_is_an_error() {
        let t = GroqTranscriber::new("k".into(), None);
        assert!(t
            .transcribe_file(Path::new("/nonexistent/clip.wav"))
            .await
            .is_err());
    }
}

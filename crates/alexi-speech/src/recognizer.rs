use std::path::PathBuf;

use anyhow::Result;
use async_trait::async_trait;
use tracing::debug;

use crate::audio::write_wav;
use crate::segmenter::{Segmenter, SegmenterConfig};
use crate::Transcriber;

/// Streaming speech recognizer fed with fixed-size blocks of 16-bit mono PCM.
#[async_trait]
pub trait Recognizer: Send {
    /// Feed one block. Returns true when an utterance boundary was reached;
    /// its text is then available from [`Recognizer::result`].
    async fn accept_waveform(&mut self, chunk: &[i16]) -> Result<bool>;

    /// Text of the most recently completed utterance.
    fn result(&mut self) -> String;

    /// Finalize whatever audio is buffered and return its text.
    async fn final_result(&mut self) -> Result<String>;

    /// Drop buffered audio and any pending result.
    fn reset(&mut self);
}

/// Recognizer built from an energy segmenter and a batch transcriber.
pub struct SegmentingRecognizer {
    transcriber: Box<dyn Transcriber>,
    segmenter: Segmenter,
    sample_rate: u32,
    scratch_dir: PathBuf,
    last: String,
    seq: u64,
}

impl SegmentingRecognizer {
    pub fn new(transcriber: Box<dyn Transcriber>, config: &SegmenterConfig) -> Self {
        Self {
            transcriber,
            segmenter: Segmenter::new(config),
            sample_rate: config.sample_rate,
            scratch_dir: std::env::temp_dir(),
            last: String::new(),
            seq: 0,
        }
    }

    pub fn with_scratch_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.scratch_dir = dir.into();
        self
    }

    async fn transcribe(&mut self, samples: &[i16]) -> Result<String> {
        self.seq += 1;
        let path = self
            .scratch_dir
            .join(format!("alexi-utterance-{}-{}.wav", std::process::id(), self.seq));
        write_wav(&path, samples, self.sample_rate)?;
        debug!(
            "Transcribing {:.1}s utterance",
            samples.len() as f64 / self.sample_rate.max(1) as f64
        );
        let text = self.transcriber.transcribe_file(&path).await;
        let _ = std::fs::remove_file(&path);
        Ok(text?.trim().to_string())
    }
}

#[async_trait]
impl Recognizer for SegmentingRecognizer {
    async fn accept_waveform(&mut self, chunk: &[i16]) -> Result<bool> {
        let Some(utterance) = self.segmenter.push(chunk) else {
            return Ok(false);
        };
        self.last = self.transcribe(&utterance).await?;
        Ok(true)
    }

    fn result(&mut self) -> String {
        std::mem::take(&mut self.last)
    }

    async fn final_result(&mut self) -> Result<String> {
        match self.segmenter.flush() {
            Some(utterance) => self.transcribe(&utterance).await,
            None => Ok(std::mem::take(&mut self.last)),
        }
    }

    fn reset(&mut self) {
        self.segmenter.reset();
        self.last.clear();
    }
}

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::{debug, info, warn};

use alexi_config::SpeechConfig;
use alexi_core::io::{Acquired, Console, InputChannel};
use alexi_core::Interrupt;

use crate::capture::{CaptureError, CaptureSession};
use crate::recognizer::Recognizer;

const LISTEN_PROMPT: &str = "Speak… Ctrl+C to stop.";

/// A stream of PCM blocks for one capture.
#[async_trait]
pub trait AudioSource: Send {
    async fn next_block(&mut self) -> Option<Vec<i16>>;
}

#[async_trait]
impl AudioSource for CaptureSession {
    async fn next_block(&mut self) -> Option<Vec<i16>> {
        CaptureSession::next_block(self).await
    }
}

type OpenSource = Box<dyn FnMut() -> Result<Box<dyn AudioSource>, CaptureError> + Send>;

/// Speech input channel: one microphone capture per utterance, fed
/// through the recognizer until it reports a boundary.
pub struct SpeechInput {
    recognizer: Box<dyn Recognizer>,
    open: OpenSource,
    console: Box<dyn Console>,
    timeout: Duration,
}

impl SpeechInput {
    /// Capture from the default microphone.
    pub fn new(
        recognizer: Box<dyn Recognizer>,
        config: &SpeechConfig,
        console: Box<dyn Console>,
    ) -> Self {
        let capture_config = config.clone();
        Self::with_source(
            recognizer,
            Box::new(move || {
                CaptureSession::start(&capture_config).map(|s| Box::new(s) as Box<dyn AudioSource>)
            }),
            console,
            Duration::from_secs(config.capture_timeout_secs.max(1)),
        )
    }

    pub fn with_source(
        recognizer: Box<dyn Recognizer>,
        open: OpenSource,
        console: Box<dyn Console>,
        timeout: Duration,
    ) -> Self {
        Self {
            recognizer,
            open,
            console,
            timeout,
        }
    }

    async fn finalize(&mut self) -> String {
        match self.recognizer.final_result().await {
            Ok(text) => text,
            Err(e) => {
                warn!("Could not finalize partial speech: {e:#}");
                String::new()
            }
        }
    }
}

#[async_trait]
impl InputChannel for SpeechInput {
    async fn acquire(&mut self, interrupt: &Interrupt) -> Result<Acquired> {
        if interrupt.is_triggered() {
            return Ok(Acquired::Interrupted {
                partial: String::new(),
            });
        }

        self.recognizer.reset();
        let mut source = (self.open)().context("could not start microphone capture")?;
        self.console.print(LISTEN_PROMPT);

        let deadline = tokio::time::sleep(self.timeout);
        tokio::pin!(deadline);

        // The capture stream is dropped (and stopped) when this scope ends.
        loop {
            tokio::select! {
                biased;
                _ = interrupt.triggered() => {
                    let partial = self.finalize().await;
                    return Ok(Acquired::Interrupted { partial });
                }
                _ = &mut deadline => {
                    info!("No audio for {}s, finalizing capture", self.timeout.as_secs());
                    let text = self.finalize().await;
                    return Ok(Acquired::Utterance(text));
                }
                block = source.next_block() => {
                    deadline.as_mut().reset(tokio::time::Instant::now() + self.timeout);
                    let Some(block) = block else {
                        debug!("Capture stream ended");
                        let text = self.finalize().await;
                        return Ok(Acquired::Utterance(text));
                    };
                    match self.recognizer.accept_waveform(&block).await {
                        Ok(true) => {
                            let text = self.recognizer.result();
                            if !text.trim().is_empty() {
                                debug!("Recognized: {text}");
                                return Ok(Acquired::Utterance(text));
                            }
                        }
                        Ok(false) => {}
                        Err(e) => {
                            warn!("Speech recognition failed: {e:#}");
                            return Ok(Acquired::Utterance(String::new()));
                        }
                    }
                }
            }
        }
    }
}

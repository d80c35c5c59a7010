//! Local transcription with NVIDIA Parakeet TDT via ONNX Runtime.
//!
//! `ParakeetTDT` is `!Send`, so the model lives on its own OS thread and
//! async callers talk to it over channels.

#[cfg(feature = "parakeet")]
pub use inner::LocalTranscriber;

#[cfg(feature = "parakeet")]
mod inner {
    use std::path::{Path, PathBuf};

    use anyhow::Result;
    use tokio::sync::{mpsc, oneshot};
    use tracing::{info, warn};

    use crate::audio::{convert_to_wav_16k, wav_sample_rate, MODEL_SAMPLE_RATE};

    struct Job {
        wav: PathBuf,
        cleanup: bool,
        reply: oneshot::Sender<Result<String>>,
    }

    pub struct LocalTranscriber {
        jobs: mpsc::Sender<Job>,
    }

    impl LocalTranscriber {
        /// Spawn the worker and wait for the model to load.
        pub fn new(model_path: &str, execution_provider: &str) -> Result<Self> {
            let (jobs, rx) = mpsc::channel::<Job>(8);
            let (init_tx, init_rx) = std::sync::mpsc::channel::<Result<()>>();
            let model_path = model_path.to_string();
            let ep = execution_provider.to_string();

            std::thread::Builder::new()
                .name("parakeet-worker".into())
                .spawn(move || worker(model_path, ep, rx, init_tx))?;

            match init_rx.recv() {
                Ok(Ok(())) => {
                    info!("Local Parakeet model loaded");
                    Ok(Self { jobs })
                }
                Ok(Err(e)) => Err(e),
                Err(_) => Err(anyhow::anyhow!("Parakeet worker died during initialization")),
            }
        }
    }

    fn worker(
        model_path: String,
        execution_provider: String,
        mut jobs: mpsc::Receiver<Job>,
        init_tx: std::sync::mpsc::Sender<Result<()>>,
    ) {
        #[allow(unused_imports)]
        use parakeet_rs::{ExecutionConfig, ExecutionProvider, ParakeetTDT, Transcriber};

        let config = match execution_provider.as_str() {
            #[cfg(feature = "cuda")]
            "cuda" => Some(ExecutionConfig::new().with_execution_provider(ExecutionProvider::Cuda)),
            #[cfg(feature = "migraphx")]
            "migraphx" => {
                Some(ExecutionConfig::new().with_execution_provider(ExecutionProvider::MiGraphX))
            }
            #[cfg(feature = "tensorrt")]
            "tensorrt" => {
                Some(ExecutionConfig::new().with_execution_provider(ExecutionProvider::TensorRt))
            }
            "cpu" | "" => None,
            other => {
                warn!("Unknown execution provider '{other}', using CPU");
                None
            }
        };

        let mut model = match ParakeetTDT::from_pretrained(&model_path, config) {
            Ok(m) => {
                let _ = init_tx.send(Ok(()));
                m
            }
            Err(e) => {
                let _ = init_tx.send(Err(anyhow::anyhow!(
                    "Failed to load Parakeet model from {model_path}: {e}"
                )));
                return;
            }
        };

        while let Some(job) = jobs.blocking_recv() {
            let result = model
                .transcribe_file(&*job.wav.to_string_lossy(), None)
                .map(|r| r.text.trim().to_string())
                .map_err(|e| anyhow::anyhow!("Transcription failed: {e}"));
            if job.cleanup {
                let _ = std::fs::remove_file(&job.wav);
            }
            let _ = job.reply.send(result);
        }
        info!("Parakeet worker shutting down");
    }

    #[async_trait::async_trait]
    impl crate::Transcriber for LocalTranscriber {
        async fn transcribe_file(&self, path: &Path) -> Result<String> {
            let (wav, cleanup) = if wav_sample_rate(path).ok() == Some(MODEL_SAMPLE_RATE) {
                (path.to_path_buf(), false)
            } else {
                (convert_to_wav_16k(path).await?, true)
            };

            let (reply, rx) = oneshot::channel();
            self.jobs
                .send(Job { wav, cleanup, reply })
                .await
                .map_err(|_| anyhow::anyhow!("Parakeet worker not running"))?;
            rx.await
                .map_err(|_| anyhow::anyhow!("Parakeet worker dropped the response"))?
        }
    }
}

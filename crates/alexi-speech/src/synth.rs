use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info};

use alexi_core::io::Speaker;

/// Speech engines tried in order.
const ENGINES: &[&str] = &["say", "espeak-ng", "espeak"];

/// Speaks through a system text-to-speech command, blocking until playback
/// finishes.
pub struct CommandSpeaker {
    program: PathBuf,
    rate: u32,
}

impl CommandSpeaker {
    pub fn new(program: impl Into<PathBuf>, rate: u32) -> Self {
        Self {
            program: program.into(),
            rate,
        }
    }

    /// First available engine on `PATH`.
    pub fn detect(rate: u32) -> Option<Self> {
        let found = ENGINES.iter().find_map(|name| which::which(name).ok());
        match found {
            Some(program) => {
                info!("Speech synthesis via {}", program.display());
                Some(Self::new(program, rate))
            }
            None => {
                info!("No speech synthesizer found (tried {})", ENGINES.join(", "));
                None
            }
        }
    }

    fn args(&self, text: &str) -> Vec<String> {
        let rate_flag = if self.is_say() { "-r" } else { "-s" };
        vec![rate_flag.to_string(), self.rate.to_string(), "--".to_string(), text.to_string()]
    }

    fn is_say(&self) -> bool {
        self.program.file_name().and_then(|n| n.to_str()) == Some("say")
    }
}

#[async_trait]
impl Speaker for CommandSpeaker {
    async fn speak(&self, text: &str) -> Result<()> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(());
        }
        debug!("Speaking {} chars", text.len());
        let status = Command::new(&self.program)
            .args(self.args(text))
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .kill_on_drop(true)
            .status()
            .await
            .with_context(|| format!("could not run {}", self.program.display()))?;
        if !status.success() {
            bail!("{} exited with {status}", self.program.display());
        }
        Ok(())
    }
}

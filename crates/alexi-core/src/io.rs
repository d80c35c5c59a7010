//! Input and output seams of the conversation run-loop.

use std::io::{BufRead, Write};
use std::sync::mpsc as std_mpsc;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::interrupt::Interrupt;

/// Result of waiting for one user utterance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Acquired {
    /// A complete utterance (may be empty; the loop discards empty ones).
    Utterance(String),
    /// The user interrupted while input was being acquired. Carries whatever
    /// could be finalized from the partial capture.
    Interrupted { partial: String },
    /// No more input will ever arrive.
    EndOfInput,
}

/// Source of user utterances (typed lines or recognized speech).
#[async_trait]
pub trait InputChannel: Send {
    async fn acquire(&mut self, interrupt: &Interrupt) -> Result<Acquired>;
}

/// Printed output. Always used, regardless of mode.
pub trait Console: Send + Sync {
    fn print(&self, text: &str);
}

/// Spoken output.
#[async_trait]
pub trait Speaker: Send + Sync {
    async fn speak(&self, text: &str) -> Result<()>;
}

/// Plain stdout console.
pub struct StdoutConsole;

impl Console for StdoutConsole {
    fn print(&self, text: &str) {
        println!("{text}");
    }
}

enum ReadEvent {
    Line(String),
    Eof,
    Failed(std::io::Error),
}

/// Line-oriented input from any reader, used when stdin is not a terminal.
///
/// Reads happen on a dedicated thread, one line per request, so a blocked
/// reader never holds up a runtime worker or an interrupt.
pub struct ReaderInput {
    requests: std_mpsc::Sender<()>,
    events: mpsc::UnboundedReceiver<ReadEvent>,
    prompt: Option<String>,
}

impl ReaderInput {
    pub fn new<R: BufRead + Send + 'static>(reader: R) -> Self {
        let (requests, request_rx) = std_mpsc::channel::<()>();
        let (event_tx, events) = mpsc::unbounded_channel();
        std::thread::spawn(move || reader_thread(reader, request_rx, event_tx));
        Self {
            requests,
            events,
            prompt: None,
        }
    }

    /// Print `prompt` to stdout before every read.
    pub fn with_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.prompt = Some(prompt.into());
        self
    }
}

fn reader_thread<R: BufRead>(
    mut reader: R,
    requests: std_mpsc::Receiver<()>,
    events: mpsc::UnboundedSender<ReadEvent>,
) {
    while requests.recv().is_ok() {
        let mut line = String::new();
        let event = match reader.read_line(&mut line) {
            Ok(0) => ReadEvent::Eof,
            Ok(_) => ReadEvent::Line(line.trim_end_matches(['\r', '\n']).to_string()),
            Err(e) => ReadEvent::Failed(e),
        };
        let done = !matches!(event, ReadEvent::Line(_));
        if events.send(event).is_err() || done {
            break;
        }
    }
}

#[async_trait]
impl InputChannel for ReaderInput {
    async fn acquire(&mut self, interrupt: &Interrupt) -> Result<Acquired> {
        if interrupt.is_triggered() {
            return Ok(Acquired::Interrupted {
                partial: String::new(),
            });
        }
        if let Some(ref prompt) = self.prompt {
            print!("{prompt}");
            std::io::stdout().flush()?;
        }
        // A send failure means the reader thread already reported EOF or an
        // error; the closed event channel then reads as end of input.
        let _ = self.requests.send(());
        tokio::select! {
            biased;
            _ = interrupt.triggered() => Ok(Acquired::Interrupted { partial: String::new() }),
            event = self.events.recv() => match event {
                Some(ReadEvent::Line(line)) => Ok(Acquired::Utterance(line)),
                Some(ReadEvent::Eof) | None => Ok(Acquired::EndOfInput),
                Some(ReadEvent::Failed(e)) => Err(e.into()),
            },
        }
    }
}

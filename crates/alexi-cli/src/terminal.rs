//! Interactive terminal input and rendered output.

use std::path::PathBuf;
use std::sync::mpsc as std_mpsc;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use tokio::sync::mpsc;
use tracing::debug;

use alexi_core::io::{Acquired, Console, InputChannel};
use alexi_core::Interrupt;

const PROMPT: &str = "you> ";

/// Render markdown text to the terminal using termimad.
pub struct MarkdownConsole {
    skin: termimad::MadSkin,
}

impl MarkdownConsole {
    pub fn new() -> Self {
        Self {
            skin: termimad::MadSkin::default(),
        }
    }
}

impl Default for MarkdownConsole {
    fn default() -> Self {
        Self::new()
    }
}

impl Console for MarkdownConsole {
    fn print(&self, text: &str) {
        self.skin.print_text(text);
    }
}

/// Save terminal attributes for later restoration.
#[cfg(unix)]
pub fn save_terminal_state() -> Option<nix::sys::termios::Termios> {
    nix::sys::termios::tcgetattr(std::io::stdin()).ok()
}

/// Restore previously saved terminal attributes.
#[cfg(unix)]
pub fn restore_terminal_state(saved: &nix::sys::termios::Termios) {
    let _ = nix::sys::termios::tcsetattr(
        std::io::stdin(),
        nix::sys::termios::SetArg::TCSADRAIN,
        saved,
    );
}

/// Flush any pending input from the terminal.
#[cfg(unix)]
fn flush_pending_input() {
    let _ = nix::sys::termios::tcflush(std::io::stdin(), nix::sys::termios::FlushArg::TCIFLUSH);
}

#[derive(Debug, PartialEq)]
enum ReadEvent {
    Line(String),
    Interrupted,
    Eof,
    Failed(String),
}

/// Typed input through rustyline.
///
/// The editor is owned by a dedicated thread; each `acquire` asks it for
/// one line. Ctrl-C at the prompt triggers the session interrupt.
pub struct TerminalInput {
    requests: std_mpsc::Sender<()>,
    events: mpsc::UnboundedReceiver<ReadEvent>,
}

impl TerminalInput {
    pub fn new(history: Option<PathBuf>) -> Result<Self> {
        let (requests, request_rx) = std_mpsc::channel::<()>();
        let (event_tx, events) = mpsc::unbounded_channel();
        std::thread::Builder::new()
            .name("alexi-readline".into())
            .spawn(move || editor_thread(history, request_rx, event_tx))?;
        Ok(Self { requests, events })
    }
}

fn editor_thread(
    history: Option<PathBuf>,
    requests: std_mpsc::Receiver<()>,
    events: mpsc::UnboundedSender<ReadEvent>,
) {
    let mut rl = match DefaultEditor::new() {
        Ok(rl) => rl,
        Err(e) => {
            let _ = events.send(ReadEvent::Failed(e.to_string()));
            return;
        }
    };
    if let Some(ref path) = history {
        let _ = rl.load_history(path);
    }

    while requests.recv().is_ok() {
        #[cfg(unix)]
        flush_pending_input();

        let event = match rl.readline(PROMPT) {
            Ok(line) => {
                let trimmed = line.trim();
                if !trimmed.is_empty() {
                    let _ = rl.add_history_entry(trimmed);
                    if let Some(ref path) = history {
                        let _ = rl.save_history(path);
                    }
                }
                ReadEvent::Line(line)
            }
            Err(ReadlineError::Interrupted) => ReadEvent::Interrupted,
            Err(ReadlineError::Eof) => ReadEvent::Eof,
            Err(e) => ReadEvent::Failed(e.to_string()),
        };
        if events.send(event).is_err() {
            break;
        }
    }
    debug!("Readline thread exiting");
}

fn to_acquired(event: Option<ReadEvent>, interrupt: &Interrupt) -> Result<Acquired> {
    match event {
        Some(ReadEvent::Line(line)) => {
            if matches!(line.trim(), "exit" | "quit" | "/exit" | "/quit" | ":q") {
                Ok(Acquired::EndOfInput)
            } else {
                Ok(Acquired::Utterance(line))
            }
        }
        Some(ReadEvent::Interrupted) => {
            interrupt.trigger();
            Ok(Acquired::Interrupted {
                partial: String::new(),
            })
        }
        Some(ReadEvent::Eof) | None => Ok(Acquired::EndOfInput),
        Some(ReadEvent::Failed(e)) => Err(anyhow!("terminal input failed: {e}")),
    }
}

#[async_trait]
impl InputChannel for TerminalInput {
    async fn acquire(&mut self, interrupt: &Interrupt) -> Result<Acquired> {
        if interrupt.is_triggered() {
            return Ok(Acquired::Interrupted {
                partial: String::new(),
            });
        }
        if self.requests.send(()).is_err() {
            // Editor thread is gone; its last event explains why.
            return to_acquired(self.events.recv().await, interrupt);
        }
        tokio::select! {
            biased;
            _ = interrupt.triggered() => Ok(Acquired::Interrupted { partial: String::new() }),
            event = self.events.recv() => to_acquired(event, interrupt),
        }
    }
}

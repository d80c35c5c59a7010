mod providers;
mod terminal;

use std::io::{IsTerminal, Write};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tracing::{info, warn};

use alexi_config::{find_config_path, load_config, state_dir, InputMode};
use alexi_core::agent::ContextBuilder;
use alexi_core::io::InputChannel;
use alexi_core::tools::email::EnvCredentials;
use alexi_core::{
    AgentLoop, Conversation, ModeResolver, ReaderInput, Resolution, ResolvedMode, Session,
    StdoutConsole, ToolRegistry,
};
use alexi_speech::{CommandSpeaker, SpeechInput};

use crate::terminal::{MarkdownConsole, TerminalInput};

#[derive(Parser)]
#[command(name = "alexi", about = "Voice and text assistant", version)]
struct Cli {
    /// Path to config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Interaction mode: text, speech or auto
    #[arg(long)]
    mode: Option<InputMode>,

    /// Speech model directory
    #[arg(long)]
    model_path: Option<String>,
}

/// Print the resolver's startup warning, if any, as a single line.
fn write_startup_warning<R>(out: &mut impl Write, resolution: &Resolution<R>) -> Result<()> {
    if let Some(ref warning) = resolution.warning {
        writeln!(out, "{warning}")?;
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let base_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    let filter = format!("{base_filter},ort=error,ort::logging=error,alexi_core::agent=debug");
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(filter))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config_path = cli.config.unwrap_or_else(find_config_path);
    let config = load_config(&config_path)?;
    let requested = cli.mode.unwrap_or(config.speech.mode);

    let resolution = ModeResolver::resolve(requested, || {
        alexi_speech::probe_recognizer(
            &config.speech,
            cli.model_path.as_deref(),
            providers::groq_access(&config),
        )
    })?;
    write_startup_warning(&mut std::io::stderr(), &resolution)?;
    let session = Session::new(
        requested,
        resolution.mode,
        resolution.recognizer_available(),
    );

    let model = providers::create_model(&config)?;
    let credentials = Arc::new(EnvCredentials::new(&config.tools.email));
    let tools = ToolRegistry::from_config(&config.tools, credentials)?;

    let agent = AgentLoop {
        model,
        model_name: config.agent.model.clone(),
        context: ContextBuilder::new(
            config.prompt.system.clone(),
            config.agent.history_window,
        ),
        tools,
        max_iterations: config.agent.max_tool_iterations as usize,
        temperature: config.agent.temperature as f64,
        max_tokens: config.agent.max_tokens as u64,
    };

    let input: Box<dyn InputChannel> = match (resolution.mode, resolution.recognizer) {
        (ResolvedMode::Speech, Some(recognizer)) => Box::new(SpeechInput::new(
            recognizer,
            &config.speech,
            Box::new(StdoutConsole),
        )),
        _ if std::io::stdin().is_terminal() => {
            let history_dir = state_dir().join("history");
            let history = match std::fs::create_dir_all(&history_dir) {
                Ok(()) => Some(history_dir.join("cli_history")),
                Err(e) => {
                    warn!("History disabled: {e}");
                    None
                }
            };
            Box::new(TerminalInput::new(history)?)
        }
        _ => Box::new(ReaderInput::new(std::io::BufReader::new(std::io::stdin()))),
    };

    let interrupt = alexi_core::Interrupt::new();
    let _ctrl_c = interrupt.listen_for_ctrl_c();

    let mut conversation = Conversation::new(
        session,
        Arc::new(agent),
        input,
        Box::new(MarkdownConsole::new()),
        interrupt,
        config.prompt.introduction.clone(),
    );
    if resolution.mode == ResolvedMode::Speech {
        if let Some(speaker) = CommandSpeaker::detect(config.speech.speaking_rate) {
            conversation = conversation.with_speaker(Box::new(speaker));
        } else {
            warn!("No speech synthesizer available; replies will only be printed");
        }
    }

    #[cfg(unix)]
    let saved_term = terminal::save_terminal_state();

    let result = conversation.run().await;

    #[cfg(unix)]
    if let Some(ref saved) = saved_term {
        terminal::restore_terminal_state(saved);
    }

    let finished = result?;
    info!(
        "Finished with {} message(s) in transcript",
        finished.session.transcript.len()
    );
    Ok(())
}

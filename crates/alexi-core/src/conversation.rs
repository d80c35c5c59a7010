//! Turn-taking driver: greet, then acquire → dispatch → respond until the
//! user interrupts or input runs out.

use std::sync::Arc;

use anyhow::Result;
use tracing::{debug, info, warn};

use crate::agent::ReasoningEngine;
use crate::interrupt::Interrupt;
use crate::io::{Acquired, Console, InputChannel, Speaker};
use crate::session::Session;

const EXIT_NOTICE: &str = "Exiting...";

/// Why the run-loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    Interrupted,
    EndOfInput,
}

/// A finished session, handed back to the caller.
#[derive(Debug)]
pub struct Finished {
    pub session: Session,
    pub reason: Termination,
}

enum State {
    Greeting,
    AwaitingInput,
    Dispatching(String),
    Responding { utterance: String, reply: String },
    Terminated(Termination),
}

pub struct Conversation {
    session: Session,
    engine: Arc<dyn ReasoningEngine>,
    input: Box<dyn InputChannel>,
    console: Box<dyn Console>,
    speaker: Option<Box<dyn Speaker>>,
    interrupt: Interrupt,
    introduction: String,
}

impl Conversation {
    pub fn new(
        session: Session,
        engine: Arc<dyn ReasoningEngine>,
        input: Box<dyn InputChannel>,
        console: Box<dyn Console>,
        interrupt: Interrupt,
        introduction: impl Into<String>,
    ) -> Self {
        Self {
            session,
            engine,
            input,
            console,
            speaker: None,
            interrupt,
            introduction: introduction.into(),
        }
    }

    /// Attach a synthesizer. It is only used when the session resolved to
    /// speech mode.
    pub fn with_speaker(mut self, speaker: Box<dyn Speaker>) -> Self {
        self.speaker = Some(speaker);
        self
    }

    /// Drive the session to completion.
    ///
    /// Reasoning-engine failures end the session with an error; everything
    /// else ends it with a [`Termination`] reason.
    pub async fn run(mut self) -> Result<Finished> {
        let mut state = State::Greeting;
        loop {
            state = match state {
                State::Greeting => {
                    let intro = self.introduction.clone();
                    self.emit(&intro).await;
                    State::AwaitingInput
                }
                State::AwaitingInput => self.await_input().await?,
                State::Dispatching(utterance) => self.dispatch(utterance).await?,
                State::Responding { utterance, reply } => {
                    self.session.transcript.commit(&utterance, &reply);
                    self.emit(&reply).await;
                    State::AwaitingInput
                }
                State::Terminated(reason) => {
                    self.console.print(EXIT_NOTICE);
                    info!(
                        "Session ended ({reason:?}) after {} turn(s)",
                        self.session.transcript.turns()
                    );
                    return Ok(Finished {
                        session: self.session,
                        reason,
                    });
                }
            };
        }
    }

    async fn await_input(&mut self) -> Result<State> {
        if self.interrupt.is_triggered() {
            return Ok(State::Terminated(Termination::Interrupted));
        }

        match self.input.acquire(&self.interrupt).await? {
            Acquired::Utterance(text) => {
                let text = text.trim();
                if text.is_empty() {
                    debug!("Empty utterance discarded");
                    Ok(State::AwaitingInput)
                } else {
                    Ok(State::Dispatching(text.to_string()))
                }
            }
            Acquired::Interrupted { partial } => {
                let partial = partial.trim();
                if !partial.is_empty() {
                    self.console.print(partial);
                    info!("Partial transcript at interrupt: {partial}");
                }
                Ok(State::Terminated(Termination::Interrupted))
            }
            Acquired::EndOfInput => Ok(State::Terminated(Termination::EndOfInput)),
        }
    }

    async fn dispatch(&mut self, utterance: String) -> Result<State> {
        let pending = self.session.transcript.with_pending(&utterance);
        debug!("Dispatching turn with {} message(s)", pending.len());

        tokio::select! {
            biased;
            _ = self.interrupt.triggered() => {
                info!("Interrupted while waiting for a reply; turn abandoned");
                Ok(State::Terminated(Termination::Interrupted))
            }
            reply = self.engine.invoke(&pending) => {
                Ok(State::Responding { utterance, reply: reply? })
            }
        }
    }

    /// Print unconditionally; speak too when the session is in speech mode.
    async fn emit(&self, text: &str) {
        self.console.print(text);
        if !self.session.speaks() {
            return;
        }
        if let Some(ref speaker) = self.speaker {
            if let Err(e) = speaker.speak(text).await {
                warn!("Speech synthesis failed: {e}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mode::ResolvedMode;
    use crate::session::{Message, Role};
    use alexi_config::InputMode;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct ScriptedInput(VecDeque<Acquired>);

    impl ScriptedInput {
        fn boxed(items: Vec<Acquired>) -> Box<Self> {
            Box::new(Self(items.into()))
        }
    }

    #[async_trait]
    impl InputChannel for ScriptedInput {
        async fn acquire(&mut self, _interrupt: &Interrupt) -> Result<Acquired> {
            Ok(self.0.pop_front().unwrap_or(Acquired::EndOfInput))
        }
    }

    #[derive(Default)]
    struct EchoEngine {
        calls: AtomicUsize,
        seen: Mutex<Vec<Vec<Message>>>,
    }

    #[async_trait]
    impl ReasoningEngine for EchoEngine {
        async fn invoke(&self, messages: &[Message]) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.seen.lock().unwrap().push(messages.to_vec());
            let last = messages.last().map(|m| m.content.clone()).unwrap_or_default();
            Ok(format!("reply to {last}"))
        }
    }

    struct FailingEngine;

    #[async_trait]
    impl ReasoningEngine for FailingEngine {
        async fn invoke(&self, _messages: &[Message]) -> Result<String> {
            anyhow::bail!("provider unreachable")
        }
    }

    /// Never answers; trips the interrupt as soon as it is called.
    struct HangingEngine(Interrupt);

    #[async_trait]
    impl ReasoningEngine for HangingEngine {
        async fn invoke(&self, _messages: &[Message]) -> Result<String> {
            self.0.trigger();
            futures::future::pending::<()>().await;
            unreachable!()
        }
    }

    #[derive(Clone, Default)]
    struct RecordingConsole(Arc<Mutex<Vec<String>>>);

    impl RecordingConsole {
        fn lines(&self) -> Vec<String> {
            self.0.lock().unwrap().clone()
        }
    }

    impl Console for RecordingConsole {
        fn print(&self, text: &str) {
            self.0.lock().unwrap().push(text.to_string());
        }
    }

    #[derive(Clone, Default)]
    struct RecordingSpeaker {
        spoken: Arc<Mutex<Vec<String>>>,
        fail: bool,
    }

    #[async_trait]
    impl Speaker for RecordingSpeaker {
        async fn speak(&self, text: &str) -> Result<()> {
            self.spoken.lock().unwrap().push(text.to_string());
            if self.fail {
                anyhow::bail!("audio device busy");
            }
            Ok(())
        }
    }

    fn text_session() -> Session {
        Session::new(InputMode::Text, ResolvedMode::Text, false)
    }

    fn speech_session() -> Session {
        Session::new(InputMode::Auto, ResolvedMode::Speech, true)
    }

    #[tokio::test]
    async fn text_turn_then_end_of_input() {
        let engine = Arc::new(EchoEngine::default());
        let console = RecordingConsole::default();
        let input = ScriptedInput::boxed(vec![
            Acquired::Utterance("What's the weather in Paris?".into()),
            Acquired::EndOfInput,
        ]);

        let finished = Conversation::new(
            text_session(),
            engine.clone(),
            input,
            Box::new(console.clone()),
            Interrupt::new(),
            "Hello",
        )
        .run()
        .await
        .unwrap();

        assert_eq!(finished.reason, Termination::EndOfInput);
        assert_eq!(engine.calls.load(Ordering::SeqCst), 1);
        let msgs = finished.session.transcript.messages();
        assert_eq!(msgs.len(), 2);
        assert_eq!(msgs[0].role, Role::User);
        assert_eq!(msgs[0].content, "What's the weather in Paris?");
        assert_eq!(msgs[1].role, Role::Assistant);
        assert_eq!(
            console.lines(),
            vec![
                "Hello".to_string(),
                "reply to What's the weather in Paris?".to_string(),
                EXIT_NOTICE.to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn blank_utterances_never_reach_engine() {
        let engine = Arc::new(EchoEngine::default());
        let input = ScriptedInput::boxed(vec![
            Acquired::Utterance(String::new()),
            Acquired::Utterance("   \t ".into()),
            Acquired::Utterance("\n".into()),
            Acquired::EndOfInput,
        ]);

        let finished = Conversation::new(
            text_session(),
            engine.clone(),
            input,
            Box::new(RecordingConsole::default()),
            Interrupt::new(),
            "Hello",
        )
        .run()
        .await
        .unwrap();

        assert_eq!(engine.calls.load(Ordering::SeqCst), 0);
        assert!(finished.session.transcript.is_empty());
    }

    #[tokio::test]
    async fn engine_sees_history_plus_pending_message() {
        let engine = Arc::new(EchoEngine::default());
        let input = ScriptedInput::boxed(vec![
            Acquired::Utterance("  one  ".into()),
            Acquired::Utterance("two".into()),
        ]);

        let finished = Conversation::new(
            text_session(),
            engine.clone(),
            input,
            Box::new(RecordingConsole::default()),
            Interrupt::new(),
            "Hello",
        )
        .run()
        .await
        .unwrap();

        let seen = engine.seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].len(), 1);
        assert_eq!(seen[0][0].content, "one");
        let second: Vec<&str> = seen[1].iter().map(|m| m.content.as_str()).collect();
        assert_eq!(second, vec!["one", "reply to one", "two"]);
        assert_eq!(finished.session.transcript.len(), 4);
    }

    #[tokio::test]
    async fn synthesis_failure_keeps_printing_and_running() {
        let engine = Arc::new(EchoEngine::default());
        let console = RecordingConsole::default();
        let speaker = RecordingSpeaker {
            fail: true,
            ..Default::default()
        };
        let input = ScriptedInput::boxed(vec![
            Acquired::Utterance("first".into()),
            Acquired::Utterance("second".into()),
            Acquired::EndOfInput,
        ]);

        let finished = Conversation::new(
            speech_session(),
            engine.clone(),
            input,
            Box::new(console.clone()),
            Interrupt::new(),
            "Hello",
        )
        .with_speaker(Box::new(speaker.clone()))
        .run()
        .await
        .unwrap();

        assert_eq!(finished.session.transcript.turns(), 2);
        let lines = console.lines();
        assert!(lines.contains(&"reply to first".to_string()));
        assert!(lines.contains(&"reply to second".to_string()));
        assert_eq!(speaker.spoken.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn text_mode_never_speaks() {
        let speaker = RecordingSpeaker::default();
        let input = ScriptedInput::boxed(vec![Acquired::Utterance("hi".into())]);

        Conversation::new(
            text_session(),
            Arc::new(EchoEngine::default()),
            input,
            Box::new(RecordingConsole::default()),
            Interrupt::new(),
            "Hello",
        )
        .with_speaker(Box::new(speaker.clone()))
        .run()
        .await
        .unwrap();

        assert!(speaker.spoken.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn speech_mode_speaks_greeting_and_replies() {
        let speaker = RecordingSpeaker::default();
        let input = ScriptedInput::boxed(vec![Acquired::Utterance("hi".into())]);

        Conversation::new(
            speech_session(),
            Arc::new(EchoEngine::default()),
            input,
            Box::new(RecordingConsole::default()),
            Interrupt::new(),
            "Hello",
        )
        .with_speaker(Box::new(speaker.clone()))
        .run()
        .await
        .unwrap();

        assert_eq!(
            *speaker.spoken.lock().unwrap(),
            vec!["Hello".to_string(), "reply to hi".to_string()]
        );
    }

    #[tokio::test]
    async fn interrupt_while_capturing_surfaces_partial_transcript() {
        let engine = Arc::new(EchoEngine::default());
        let console = RecordingConsole::default();
        let input = ScriptedInput::boxed(vec![Acquired::Interrupted {
            partial: "turn on the".into(),
        }]);

        let finished = Conversation::new(
            speech_session(),
            engine.clone(),
            input,
            Box::new(console.clone()),
            Interrupt::new(),
            "Hello",
        )
        .run()
        .await
        .unwrap();

        assert_eq!(finished.reason, Termination::Interrupted);
        assert_eq!(engine.calls.load(Ordering::SeqCst), 0);
        assert!(finished.session.transcript.is_empty());
        assert_eq!(
            console.lines(),
            vec![
                "Hello".to_string(),
                "turn on the".to_string(),
                EXIT_NOTICE.to_string()
            ]
        );
    }

    #[tokio::test]
    async fn interrupt_during_dispatch_commits_nothing() {
        let interrupt = Interrupt::new();
        let input = ScriptedInput::boxed(vec![
            Acquired::Utterance("long question".into()),
            Acquired::Utterance("never read".into()),
        ]);

        let finished = Conversation::new(
            text_session(),
            Arc::new(HangingEngine(interrupt.clone())),
            input,
            Box::new(RecordingConsole::default()),
            interrupt,
            "Hello",
        )
        .run()
        .await
        .unwrap();

        assert_eq!(finished.reason, Termination::Interrupted);
        assert!(finished.session.transcript.is_empty());
    }

    #[tokio::test]
    async fn pending_interrupt_stops_before_reading() {
        let interrupt = Interrupt::new();
        interrupt.trigger();
        let engine = Arc::new(EchoEngine::default());
        let input = ScriptedInput::boxed(vec![Acquired::Utterance("hi".into())]);

        let finished = Conversation::new(
            text_session(),
            engine.clone(),
            input,
            Box::new(RecordingConsole::default()),
            interrupt,
            "Hello",
        )
        .run()
        .await
        .unwrap();

        assert_eq!(finished.reason, Termination::Interrupted);
        assert_eq!(engine.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn engine_failure_ends_session_with_error() {
        let input = ScriptedInput::boxed(vec![Acquired::Utterance("hi".into())]);

        let err = Conversation::new(
            text_session(),
            Arc::new(FailingEngine),
            input,
            Box::new(RecordingConsole::default()),
            Interrupt::new(),
            "Hello",
        )
        .run()
        .await
        .unwrap_err();

        assert!(err.to_string().contains("provider unreachable"));
    }
}

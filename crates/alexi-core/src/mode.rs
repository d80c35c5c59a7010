//! Startup reconciliation of the requested interaction mode with the
//! availability of a speech recognizer.

use std::fmt;

use thiserror::Error;
use tracing::info;

use alexi_config::InputMode;

/// Effective input/output strategy for a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolvedMode {
    Text,
    Speech,
}

impl fmt::Display for ResolvedMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResolvedMode::Text => f.write_str("text"),
            ResolvedMode::Speech => f.write_str("speech"),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ModeError {
    #[error(
        "speech mode requested but no speech recognizer could be loaded; \
         provide a valid --model-path or install a model at the default path"
    )]
    RecognizerRequired,
}

/// Pure mode resolution.
pub fn resolve_mode(
    requested: InputMode,
    recognizer_available: bool,
) -> Result<ResolvedMode, ModeError> {
    match (requested, recognizer_available) {
        (InputMode::Text, _) => Ok(ResolvedMode::Text),
        (InputMode::Speech, true) => Ok(ResolvedMode::Speech),
        (InputMode::Speech, false) => Err(ModeError::RecognizerRequired),
        (InputMode::Auto, true) => Ok(ResolvedMode::Speech),
        (InputMode::Auto, false) => Ok(ResolvedMode::Text),
    }
}

/// Outcome of resolving a mode with a recognizer probe.
pub struct Resolution<R> {
    pub requested: InputMode,
    pub mode: ResolvedMode,
    /// The recognizer produced by the probe, if it was run and succeeded.
    pub recognizer: Option<R>,
    /// Warning to show the user once at startup. Not logged here; the caller
    /// owns the single line the user sees.
    pub warning: Option<String>,
}

impl<R> Resolution<R> {
    pub fn recognizer_available(&self) -> bool {
        self.recognizer.is_some()
    }
}

/// Runs the recognizer probe at most once and resolves the session mode.
pub struct ModeResolver;

impl ModeResolver {
    /// `probe` is only invoked when the requested mode could use speech.
    /// It reports failure as `None`; it is never allowed to abort startup.
    pub fn resolve<R, F>(requested: InputMode, probe: F) -> Result<Resolution<R>, ModeError>
    where
        F: FnOnce() -> Option<R>,
    {
        let recognizer = match requested {
            InputMode::Text => None,
            InputMode::Speech | InputMode::Auto => probe(),
        };

        let mode = resolve_mode(requested, recognizer.is_some())?;

        let warning = if requested == InputMode::Auto && mode == ResolvedMode::Text {
            Some("Auto mode: speech recognizer not available, falling back to text mode.".to_string())
        } else {
            None
        };

        info!("Interaction mode: requested={requested}, resolved={mode}");
        Ok(Resolution {
            requested,
            mode,
            recognizer,
            warning,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn text_is_text_regardless_of_recognizer() {
        assert_eq!(resolve_mode(InputMode::Text, false), Ok(ResolvedMode::Text));
        assert_eq!(resolve_mode(InputMode::Text, true), Ok(ResolvedMode::Text));
    }

    #[test]
    fn speech_requires_recognizer() {
        assert_eq!(
            resolve_mode(InputMode::Speech, false),
            Err(ModeError::RecognizerRequired)
        );
        assert_eq!(
            resolve_mode(InputMode::Speech, true),
            Ok(ResolvedMode::Speech)
        );
    }

    #[test]
    fn auto_degrades_to_text() {
        assert_eq!(resolve_mode(InputMode::Auto, false), Ok(ResolvedMode::Text));
        assert_eq!(resolve_mode(InputMode::Auto, true), Ok(ResolvedMode::Speech));
    }

    #[test]
    fn text_mode_never_probes() {
        let calls = Cell::new(0);
        let res = ModeResolver::resolve(InputMode::Text, || {
            calls.set(calls.get() + 1);
            Some(())
        })
        .unwrap();
        assert_eq!(calls.get(), 0);
        assert_eq!(res.mode, ResolvedMode::Text);
        assert!(!res.recognizer_available());
        assert!(res.warning.is_none());
    }

    #[test]
    fn auto_probes_once_and_warns_on_failure() {
        let calls = Cell::new(0);
        let res = ModeResolver::resolve::<(), _>(InputMode::Auto, || {
            calls.set(calls.get() + 1);
            None
        })
        .unwrap();
        assert_eq!(calls.get(), 1);
        assert_eq!(res.mode, ResolvedMode::Text);
        assert!(res.warning.unwrap().contains("falling back to text"));
    }

    #[test]
    fn auto_uses_recognizer_when_probe_succeeds() {
        let res = ModeResolver::resolve(InputMode::Auto, || Some("rec")).unwrap();
        assert_eq!(res.mode, ResolvedMode::Speech);
        assert_eq!(res.recognizer, Some("rec"));
        assert!(res.warning.is_none());
    }

    #[test]
    fn speech_without_recognizer_is_fatal() {
        let err = ModeResolver::resolve::<(), _>(InputMode::Speech, || None)
            .err()
            .unwrap();
        assert_eq!(err, ModeError::RecognizerRequired);
        assert!(err.to_string().contains("speech mode requested"));
    }
}

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use regex::Regex;
use schemars::JsonSchema;
use serde::Deserialize;
use tokio::process::Command;

use super::{parse_args, schema_for, Tool};

const MAX_OUTPUT_CHARS: usize = 10_000;
const MAX_TIMEOUT_SECS: u64 = 600;

/// Decides whether a command may run. Returns the refusal reason otherwise.
pub trait CommandPolicy: Send + Sync {
    fn check(&self, command: &str) -> Option<String>;
}

/// Regex allow/deny lists. With both lists empty every command is allowed.
pub struct PatternPolicy {
    allow: Vec<Regex>,
    deny: Vec<Regex>,
}

impl PatternPolicy {
    pub fn new(allow: &[String], deny: &[String]) -> Result<Self> {
        let compile = |patterns: &[String]| -> Result<Vec<Regex>> {
            patterns
                .iter()
                .map(|p| Regex::new(p).with_context(|| format!("invalid command pattern '{p}'")))
                .collect()
        };
        Ok(Self {
            allow: compile(allow)?,
            deny: compile(deny)?,
        })
    }

    pub fn unrestricted() -> Self {
        Self {
            allow: Vec::new(),
            deny: Vec::new(),
        }
    }

    pub fn is_unrestricted(&self) -> bool {
        self.allow.is_empty() && self.deny.is_empty()
    }
}

impl CommandPolicy for PatternPolicy {
    fn check(&self, command: &str) -> Option<String> {
        if let Some(re) = self.deny.iter().find(|re| re.is_match(command)) {
            return Some(format!(
                "Command blocked by policy (matches deny pattern '{}')",
                re.as_str()
            ));
        }
        if !self.allow.is_empty() && !self.allow.iter().any(|re| re.is_match(command)) {
            return Some("Command blocked by policy (not in allow list)".into());
        }
        None
    }
}

#[derive(Debug, Deserialize, JsonSchema)]
struct RunCommandArgs {
    /// Shell command line to execute
    command: String,
    /// Timeout in seconds (defaults to the configured timeout)
    timeout: Option<u64>,
}

/// Arbitrary shell execution through `sh -c`.
pub struct RunCommandTool {
    default_timeout: Duration,
    policy: Box<dyn CommandPolicy>,
}

impl RunCommandTool {
    pub fn new(timeout_secs: u64, policy: Box<dyn CommandPolicy>) -> Self {
        Self {
            default_timeout: Duration::from_secs(timeout_secs.max(1)),
            policy,
        }
    }

    async fn run(&self, command: &str, timeout: Duration) -> String {
        let result = tokio::time::timeout(
            timeout,
            Command::new("sh")
                .arg("-c")
                .arg(command)
                .kill_on_drop(true)
                .output(),
        )
        .await;

        match result {
            Ok(Ok(output)) => {
                let stdout = String::from_utf8_lossy(&output.stdout);
                let stderr = String::from_utf8_lossy(&output.stderr);
                let (stdout, stderr) = (stdout.trim(), stderr.trim());
                let combined = if stderr.is_empty() {
                    stdout.to_string()
                } else {
                    format!("{stdout}\n{stderr}").trim().to_string()
                };
                if combined.is_empty() {
                    "(no output)".to_string()
                } else {
                    truncate(combined)
                }
            }
            Ok(Err(e)) => format!("Failed to execute command: {e}"),
            Err(_) => "Command timed out".to_string(),
        }
    }
}

fn truncate(mut text: String) -> String {
    if text.len() <= MAX_OUTPUT_CHARS {
        return text;
    }
    let mut end = MAX_OUTPUT_CHARS;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    let dropped = text.len() - end;
    text.truncate(end);
    format!("{text}\n... (truncated, {dropped} more bytes)")
}

#[async_trait]
impl Tool for RunCommandTool {
    fn name(&self) -> &str {
        "run_command"
    }

    fn description(&self) -> &str {
        "Run a shell command on the user's machine and return its stdout and stderr."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        schema_for::<RunCommandArgs>()
    }

    async fn execute(&self, params: serde_json::Value) -> Result<String> {
        let args: RunCommandArgs = match parse_args(self.name(), params) {
            Ok(a) => a,
            Err(msg) => return Ok(msg),
        };
        let command = args.command.trim();
        if command.is_empty() {
            return Ok("Error: command is required".into());
        }
        if let Some(reason) = self.policy.check(command) {
            tracing::warn!("run_command refused: {reason}");
            return Ok(reason);
        }

        let timeout = args
            .timeout
            .filter(|t| *t > 0)
            .map(|t| Duration::from_secs(t.min(MAX_TIMEOUT_SECS)))
            .unwrap_or(self.default_timeout);
        Ok(self.run(command, timeout).await)
    }
}

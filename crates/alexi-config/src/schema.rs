use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    pub agent: AgentConfig,
    pub providers: ProvidersConfig,
    pub prompt: PromptConfig,
    pub speech: SpeechConfig,
    pub tools: ToolsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AgentConfig {
    pub provider: String,
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub max_tool_iterations: u32,
    /// Number of most recent transcript messages sent with each request.
    pub history_window: usize,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            provider: "openai".into(),
            model: "gpt-5-nano".into(),
            max_tokens: 4096,
            temperature: 0.7,
            max_tool_iterations: 10,
            history_window: 40,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct ProvidersConfig {
    pub openai: Option<ProviderConfig>,
    pub anthropic: Option<ProviderConfig>,
    pub groq: Option<ProviderConfig>,
    pub ollama: Option<ProviderConfig>,
    pub openrouter: Option<ProviderConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct ProviderConfig {
    pub api_key: Option<String>,
    pub api_base: Option<String>,
}

/// System instruction and spoken introduction, fixed for a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PromptConfig {
    pub system: String,
    pub introduction: String,
}

impl Default for PromptConfig {
    fn default() -> Self {
        Self {
            system: "You are a helpful assistant".into(),
            introduction: "Hello, this is Alexi. How may I help you?".into(),
        }
    }
}

/// Requested interaction mode.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum InputMode {
    Text,
    Speech,
    #[default]
    Auto,
}

impl fmt::Display for InputMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            InputMode::Text => "text",
            InputMode::Speech => "speech",
            InputMode::Auto => "auto",
        };
        f.write_str(s)
    }
}

impl FromStr for InputMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "text" => Ok(InputMode::Text),
            "speech" => Ok(InputMode::Speech),
            "auto" => Ok(InputMode::Auto),
            other => Err(format!(
                "unknown mode '{other}' (expected one of: text, speech, auto)"
            )),
        }
    }
}

/// Which transcription engine backs the speech recognizer.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RecognizerBackend {
    Local,
    Groq,
    #[default]
    Auto,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SpeechConfig {
    pub mode: InputMode,
    pub backend: RecognizerBackend,
    /// Local model directory. Falls back to $ALEXI_SPEECH_MODEL, then
    /// ~/.alexi/models/parakeet-tdt.
    #[serde(alias = "model")]
    pub model_path: Option<String>,
    /// GPU execution provider for the local model: "cpu", "cuda", ...
    pub execution_provider: Option<String>,
    pub sample_rate: u32,
    /// Samples per chunk handed from the capture callback to the recognizer.
    pub block_size: usize,
    pub channels: u16,
    /// RMS amplitude (i16 scale) above which a 30 ms frame counts as speech.
    pub energy_threshold: f32,
    /// Trailing silence that closes an utterance.
    pub silence_ms: u32,
    /// Upper bound on a single utterance.
    pub max_utterance_secs: u32,
    /// Longest wait for the next audio chunk before the capture is finalized.
    pub capture_timeout_secs: u64,
    /// Synthesizer speaking rate, in words per minute.
    pub speaking_rate: u32,
}

impl Default for SpeechConfig {
    fn default() -> Self {
        Self {
            mode: InputMode::Auto,
            backend: RecognizerBackend::Auto,
            model_path: None,
            execution_provider: None,
            sample_rate: 16_000,
            block_size: 8_000,
            channels: 1,
            energy_threshold: 500.0,
            silence_ms: 800,
            max_utterance_secs: 30,
            capture_timeout_secs: 30,
            speaking_rate: 180,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct ToolsConfig {
    pub weather: WeatherToolConfig,
    pub run_command: RunCommandToolConfig,
    pub web_search: WebSearchToolConfig,
    pub finance: FinanceToolConfig,
    pub email: EmailToolConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WeatherToolConfig {
    pub enabled: bool,
    pub endpoint: String,
}

impl Default for WeatherToolConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            endpoint: "https://wttr.in".into(),
        }
    }
}

/// Shell execution is unrestricted unless patterns are configured.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RunCommandToolConfig {
    pub enabled: bool,
    pub timeout_secs: u64,
    /// If non-empty, a command must match one of these regexes.
    pub allow_patterns: Vec<String>,
    /// A command matching any of these regexes is refused.
    pub deny_patterns: Vec<String>,
}

impl Default for RunCommandToolConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            timeout_secs: 30,
            allow_patterns: Vec::new(),
            deny_patterns: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WebSearchToolConfig {
    pub enabled: bool,
    pub endpoint: String,
    pub top_n: u32,
    pub snippet_len: usize,
    pub timeout_secs: u64,
}

impl Default for WebSearchToolConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            endpoint: "https://html.duckduckgo.com/html/".into(),
            top_n: 3,
            snippet_len: 500,
            timeout_secs: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FinanceToolConfig {
    pub enabled: bool,
    pub chart_endpoint: String,
    pub options_endpoint: String,
}

impl Default for FinanceToolConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            chart_endpoint: "https://query1.finance.yahoo.com/v8/finance/chart".into(),
            options_endpoint: "https://query2.finance.yahoo.com/v7/finance/options".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EmailToolConfig {
    pub enabled: bool,
    pub smtp_host: String,
    pub imap_host: String,
    pub imap_port: u16,
    /// Environment variable holding the account address.
    pub address_env: String,
    /// Environment variable holding the account (app) password.
    pub password_env: String,
}

impl Default for EmailToolConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            smtp_host: "smtp.gmail.com".into(),
            imap_host: "imap.gmail.com".into(),
            imap_port: 993,
            address_env: "EMAIL_ADDRESS".into(),
            password_env: "EMAIL_PASSWORD".into(),
        }
    }
}

pub mod loader;
pub mod schema;

pub use loader::{find_config_path, load_config, resolve_path, state_dir};
pub use schema::{
    AgentConfig, Config, EmailToolConfig, FinanceToolConfig, InputMode, PromptConfig,
    ProviderConfig, ProvidersConfig, RecognizerBackend, RunCommandToolConfig, SpeechConfig,
    ToolsConfig, WeatherToolConfig, WebSearchToolConfig,
};

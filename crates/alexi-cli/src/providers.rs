use std::sync::Arc;

use anyhow::{anyhow, bail, Result};
#[allow(deprecated)]
use rig::client::completion::CompletionModelHandle;
use rig::client::{CompletionClient, Nothing};
use rig::providers::{anthropic, groq, ollama, openai, openrouter};
use tracing::info;

use alexi_config::{Config, ProviderConfig};

pub const PROVIDERS: &[&str] = &["openai", "anthropic", "groq", "ollama", "openrouter"];

/// Resolve an API key from config, falling back to an environment variable.
pub fn resolve_api_key(provider_cfg: &Option<ProviderConfig>, env_var: &str) -> Option<String> {
    provider_cfg
        .as_ref()
        .and_then(|c| c.api_key.clone())
        .filter(|k| !k.trim().is_empty())
        .or_else(|| std::env::var(env_var).ok().filter(|k| !k.trim().is_empty()))
}

fn api_base(provider_cfg: &Option<ProviderConfig>) -> Option<String> {
    provider_cfg
        .as_ref()
        .and_then(|c| c.api_base.clone())
        .filter(|b| !b.trim().is_empty())
}

fn require_key(provider_cfg: &Option<ProviderConfig>, provider: &str, env_var: &str) -> Result<String> {
    resolve_api_key(provider_cfg, env_var).ok_or_else(|| {
        anyhow!(
            "{provider} provider selected but no API key found. \
             Set providers.{provider}.apiKey in config.json or {env_var}."
        )
    })
}

/// Completion model for the configured provider and model.
#[allow(deprecated)]
pub fn create_model(config: &Config) -> Result<CompletionModelHandle<'static>> {
    let provider = config.agent.provider.trim();
    let model_name = config.agent.model.trim();
    if model_name.is_empty() {
        bail!("No model configured for provider '{provider}'.");
    }
    let providers = &config.providers;

    let handle = match provider {
        "openai" => {
            let key = require_key(&providers.openai, provider, "OPENAI_API_KEY")?;
            let mut builder = openai::CompletionsClient::builder().api_key(&key);
            if let Some(ref base) = api_base(&providers.openai) {
                builder = builder.base_url(base);
                info!("Using OpenAI-compatible endpoint {base}");
            }
            let client: openai::CompletionsClient = builder
                .build()
                .map_err(|e| anyhow!("Failed to create OpenAI client: {e}"))?;
            CompletionModelHandle::new(Arc::new(client.completion_model(model_name)))
        }
        "anthropic" => {
            let key = require_key(&providers.anthropic, provider, "ANTHROPIC_API_KEY")?;
            let client: anthropic::Client = anthropic::Client::builder()
                .api_key(&key)
                .build()
                .map_err(|e| anyhow!("Failed to create Anthropic client: {e}"))?;
            CompletionModelHandle::new(Arc::new(client.completion_model(model_name)))
        }
        "groq" => {
            let key = require_key(&providers.groq, provider, "GROQ_API_KEY")?;
            let client: groq::Client =
                groq::Client::new(&key).map_err(|e| anyhow!("Failed to create Groq client: {e}"))?;
            CompletionModelHandle::new(Arc::new(client.completion_model(model_name)))
        }
        "ollama" => {
            let mut builder = ollama::Client::builder().api_key(Nothing);
            if let Some(ref base) = api_base(&providers.ollama) {
                builder = builder.base_url(base);
            }
            let client: ollama::Client = builder
                .build()
                .map_err(|e| anyhow!("Failed to create Ollama client: {e}"))?;
            CompletionModelHandle::new(Arc::new(client.completion_model(model_name)))
        }
        "openrouter" => {
            let key = require_key(&providers.openrouter, provider, "OPENROUTER_API_KEY")?;
            let client: openrouter::Client = openrouter::Client::new(&key)
                .map_err(|e| anyhow!("Failed to create OpenRouter client: {e}"))?;
            CompletionModelHandle::new(Arc::new(client.completion_model(model_name)))
        }
        other => bail!(
            "Unknown provider '{other}'. Valid providers: {}",
            PROVIDERS.join(", ")
        ),
    };

    info!("Using {provider} provider with model '{model_name}'");
    Ok(handle)
}

/// Groq credentials for cloud speech recognition.
pub fn groq_access(config: &Config) -> Option<alexi_speech::GroqAccess> {
    resolve_api_key(&config.providers.groq, "GROQ_API_KEY").map(|api_key| alexi_speech::GroqAccess {
        api_key,
        api_base: api_base(&config.providers.groq),
    })
}

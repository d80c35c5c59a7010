pub mod email;
pub mod finance;
pub mod shell;
pub mod weather;
pub mod web;

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use tracing::{info, warn};

use alexi_config::ToolsConfig;

/// A capability the reasoning engine may call.
///
/// Implementations report failures as text in the returned string; `Err` is
/// reserved for bugs in the adapter itself.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    fn parameters_schema(&self) -> serde_json::Value;
    async fn execute(&self, params: serde_json::Value) -> Result<String>;
}

/// Registry of available tools, keyed by name.
#[derive(Default)]
pub struct ToolRegistry {
    tools: BTreeMap<String, Box<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register every tool enabled in configuration.
    pub fn from_config(
        config: &ToolsConfig,
        credentials: Arc<dyn email::CredentialProvider>,
    ) -> Result<Self> {
        let mut registry = Self::new();

        if config.weather.enabled {
            registry.register(Box::new(weather::WeatherTool::new(&config.weather)));
        }
        if config.run_command.enabled {
            let policy = shell::PatternPolicy::new(
                &config.run_command.allow_patterns,
                &config.run_command.deny_patterns,
            )?;
            if policy.is_unrestricted() {
                warn!("run_command is enabled with no allow/deny patterns; any shell command may run");
            }
            registry.register(Box::new(shell::RunCommandTool::new(
                config.run_command.timeout_secs,
                Box::new(policy),
            )));
        }
        if config.web_search.enabled {
            registry.register(Box::new(web::WebSearchTool::new(&config.web_search)));
        }
        if config.finance.enabled {
            let client = Arc::new(finance::YahooClient::new(&config.finance));
            registry.register(Box::new(finance::StockQuoteTool::new(client.clone())));
            registry.register(Box::new(finance::StockHistoryTool::new(client.clone())));
            registry.register(Box::new(finance::StockOptionsTool::new(client)));
        }
        if config.email.enabled {
            registry.register(Box::new(email::SendEmailTool::new(
                &config.email,
                credentials.clone(),
            )));
            registry.register(Box::new(email::ReadEmailTool::new(
                &config.email,
                credentials,
            )));
        }

        info!("Registered tools: {}", registry.names().join(", "));
        Ok(registry)
    }

    pub fn register(&mut self, tool: Box<dyn Tool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    pub fn get(&self, name: &str) -> Option<&dyn Tool> {
        self.tools.get(name).map(|t| t.as_ref())
    }

    pub fn list(&self) -> Vec<&dyn Tool> {
        self.tools.values().map(|t| t.as_ref()).collect()
    }

    pub fn names(&self) -> Vec<&str> {
        self.tools.keys().map(|k| k.as_str()).collect()
    }

    /// Validate and run a tool call.
    pub async fn execute(&self, name: &str, params: serde_json::Value) -> Result<String> {
        let Some(tool) = self.tools.get(name) else {
            anyhow::bail!("unknown tool: {name}");
        };
        let errors = validate_params(&params, &tool.parameters_schema());
        if !errors.is_empty() {
            return Ok(format!(
                "Error: Invalid parameters for tool '{name}': {}",
                errors.join("; ")
            ));
        }
        tool.execute(params).await
    }
}

/// JSON schema for a tool's argument struct, minus the root metadata
/// (`$schema`, `title`) that function-calling APIs do not expect.
pub fn schema_for<T: JsonSchema>() -> serde_json::Value {
    let mut value = serde_json::to_value(schemars::schema_for!(T)).unwrap_or_default();
    if let Some(obj) = value.as_object_mut() {
        obj.remove("$schema");
        obj.remove("title");
    }
    value
}

/// Deserialize tool arguments; the error string is meant for the model.
pub fn parse_args<T: DeserializeOwned>(tool: &str, params: serde_json::Value) -> Result<T, String> {
    serde_json::from_value(params)
        .map_err(|e| format!("Error: Invalid arguments for tool '{tool}': {e}"))
}

/// Validate tool parameters against the subset of JSON schema that argument
/// structs produce. Returns a list of errors (empty if valid).
fn validate_params(params: &serde_json::Value, schema: &serde_json::Value) -> Vec<String> {
    let mut errors = Vec::new();
    validate_value(params, schema, "", &mut errors);
    errors
}

fn validate_value(
    val: &serde_json::Value,
    schema: &serde_json::Value,
    path: &str,
    errors: &mut Vec<String>,
) {
    let display_path = if path.is_empty() { "root" } else { path };

    // Nullable fields carry `"type": [T, "null"]`; only single types are checked.
    if let Some(expected) = schema.get("type").and_then(|t| t.as_str()) {
        let ok = match expected {
            "object" => val.is_object(),
            "array" => val.is_array(),
            "string" => val.is_string(),
            "integer" => val.is_i64() || val.is_u64(),
            "number" => val.is_number(),
            "boolean" => val.is_boolean(),
            _ => true,
        };
        if !ok {
            errors.push(format!("{display_path}: expected type '{expected}'"));
            return;
        }
    }

    if let Some(allowed) = schema.get("enum").and_then(|e| e.as_array()) {
        if !allowed.contains(val) {
            errors.push(format!("{display_path}: value not in allowed enum"));
        }
    }

    if let Some(n) = val.as_f64() {
        if let Some(min) = schema.get("minimum").and_then(|m| m.as_f64()) {
            if n < min {
                errors.push(format!("{display_path}: value {n} < minimum {min}"));
            }
        }
        if let Some(max) = schema.get("maximum").and_then(|m| m.as_f64()) {
            if n > max {
                errors.push(format!("{display_path}: value {n} > maximum {max}"));
            }
        }
    }

    if let Some(obj) = val.as_object() {
        if let Some(required) = schema.get("required").and_then(|r| r.as_array()) {
            for field in required.iter().filter_map(|f| f.as_str()) {
                if !obj.contains_key(field) {
                    errors.push(format!("{}: required field missing", join(path, field)));
                }
            }
        }
        if let Some(props) = schema.get("properties").and_then(|p| p.as_object()) {
            for (key, prop_schema) in props {
                if let Some(prop_val) = obj.get(key) {
                    validate_value(prop_val, prop_schema, &join(path, key), errors);
                }
            }
        }
    }
}

fn join(path: &str, field: &str) -> String {
    if path.is_empty() {
        field.to_string()
    } else {
        format!("{path}.{field}")
    }
}

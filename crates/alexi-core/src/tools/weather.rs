use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Deserialize;

use alexi_config::WeatherToolConfig;

use super::{parse_args, schema_for, Tool};

#[derive(Debug, Deserialize, JsonSchema)]
struct WeatherArgs {
    /// City to look up, e.g. "Paris"
    city: String,
}

/// Current conditions from a wttr.in-compatible service.
pub struct WeatherTool {
    endpoint: String,
    client: reqwest::Client,
}

impl WeatherTool {
    pub fn new(config: &WeatherToolConfig) -> Self {
        Self {
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        }
    }

    fn url_for(&self, city: &str) -> String {
        let encoded = url::form_urlencoded::byte_serialize(city.as_bytes()).collect::<String>();
        format!("{}/{encoded}?format=3", self.endpoint)
    }
}

#[async_trait]
impl Tool for WeatherTool {
    fn name(&self) -> &str {
        "weather"
    }

    fn description(&self) -> &str {
        "Get the current weather for a city."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        schema_for::<WeatherArgs>()
    }

    async fn execute(&self, params: serde_json::Value) -> Result<String> {
        let args: WeatherArgs = match parse_args(self.name(), params) {
            Ok(a) => a,
            Err(msg) => return Ok(msg),
        };
        let city = args.city.trim();
        if city.is_empty() {
            return Ok("Error: city is required".into());
        }

        let resp = match self
            .client
            .get(self.url_for(city))
            .header("User-Agent", "curl/8")
            .timeout(Duration::from_secs(10))
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) => return Ok(format!("Error: weather lookup for {city} failed: {e}")),
        };

        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        Ok(format_report(city, status.as_u16(), &body))
    }
}

fn format_report(city: &str, status: u16, body: &str) -> String {
    let body = body.trim();
    if !(200..300).contains(&status) {
        return format!("Error: weather service returned HTTP {status} for {city}");
    }
    if body.is_empty() || body.to_lowercase().contains("unknown location") {
        return format!("No weather data found for {city}");
    }
    body.to_string()
}

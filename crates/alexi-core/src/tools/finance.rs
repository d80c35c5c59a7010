use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::DateTime;
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde::Deserialize;

use alexi_config::FinanceToolConfig;

use super::{parse_args, schema_for, Tool};

const USER_AGENT: &str = "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36";
const HISTORY_ROWS: usize = 30;
const OPTION_ROWS: usize = 5;
const VALID_RANGES: &[&str] = &["1d", "5d", "1mo", "3mo", "6mo", "1y", "2y", "5y", "10y", "ytd", "max"];
const VALID_INTERVALS: &[&str] = &["1m", "5m", "15m", "30m", "60m", "1h", "1d", "1wk", "1mo"];

// Yahoo chart endpoint payload (only the fields read here).

#[derive(Debug, Deserialize)]
struct ChartEnvelope {
    chart: ChartBody,
}

#[derive(Debug, Deserialize)]
struct ChartBody {
    result: Option<Vec<ChartResult>>,
    error: Option<YahooError>,
}

#[derive(Debug, Deserialize)]
struct YahooError {
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChartResult {
    meta: ChartMeta,
    #[serde(default)]
    timestamp: Vec<i64>,
    indicators: Option<Indicators>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChartMeta {
    symbol: String,
    currency: Option<String>,
    exchange_name: Option<String>,
    regular_market_price: Option<f64>,
    chart_previous_close: Option<f64>,
    previous_close: Option<f64>,
    regular_market_day_high: Option<f64>,
    regular_market_day_low: Option<f64>,
    regular_market_volume: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct Indicators {
    #[serde(default)]
    quote: Vec<QuoteSeries>,
}

#[derive(Debug, Default, Deserialize)]
struct QuoteSeries {
    #[serde(default)]
    open: Vec<Option<f64>>,
    #[serde(default)]
    high: Vec<Option<f64>>,
    #[serde(default)]
    low: Vec<Option<f64>>,
    #[serde(default)]
    close: Vec<Option<f64>>,
    #[serde(default)]
    volume: Vec<Option<u64>>,
}

// Yahoo options endpoint payload.

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OptionsEnvelope {
    option_chain: OptionsBody,
}

#[derive(Debug, Deserialize)]
struct OptionsBody {
    result: Option<Vec<OptionsResult>>,
    error: Option<YahooError>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OptionsResult {
    underlying_symbol: String,
    #[serde(default)]
    expiration_dates: Vec<i64>,
    quote: Option<OptionsQuote>,
    #[serde(default)]
    options: Vec<OptionSet>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OptionsQuote {
    regular_market_price: Option<f64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OptionSet {
    expiration_date: i64,
    #[serde(default)]
    calls: Vec<OptionContract>,
    #[serde(default)]
    puts: Vec<OptionContract>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OptionContract {
    contract_symbol: String,
    strike: f64,
    last_price: Option<f64>,
    bid: Option<f64>,
    ask: Option<f64>,
    volume: Option<u64>,
    open_interest: Option<u64>,
    implied_volatility: Option<f64>,
}

/// Shared HTTP client for the Yahoo Finance endpoints.
pub struct YahooClient {
    chart_endpoint: String,
    options_endpoint: String,
    client: reqwest::Client,
}

impl YahooClient {
    pub fn new(config: &FinanceToolConfig) -> Self {
        Self {
            chart_endpoint: config.chart_endpoint.trim_end_matches('/').to_string(),
            options_endpoint: config.options_endpoint.trim_end_matches('/').to_string(),
            client: reqwest::Client::builder()
                .user_agent(USER_AGENT)
                .timeout(Duration::from_secs(15))
                .build()
                .unwrap_or_default(),
        }
    }

    fn chart_url(&self, symbol: &str) -> String {
        format!("{}/{}", self.chart_endpoint, encode(symbol))
    }

    fn options_url(&self, symbol: &str) -> String {
        format!("{}/{}", self.options_endpoint, encode(symbol))
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str, query: &[(&str, &str)]) -> Result<T> {
        let resp = self
            .client
            .get(url)
            .query(query)
            .send()
            .await
            .with_context(|| format!("request to {url} failed"))?;
        let status = resp.status();
        let body = resp.text().await?;
        // Yahoo reports unknown symbols with a 404 carrying a normal error envelope.
        serde_json::from_str(&body).with_context(|| format!("unexpected response (HTTP {status})"))
    }

    async fn chart(&self, symbol: &str, range: &str, interval: &str) -> Result<ChartEnvelope> {
        self.get_json(
            &self.chart_url(symbol),
            &[("range", range), ("interval", interval)],
        )
        .await
    }

    async fn options(&self, symbol: &str) -> Result<OptionsEnvelope> {
        self.get_json(&self.options_url(symbol), &[]).await
    }
}

fn encode(symbol: &str) -> String {
    url::form_urlencoded::byte_serialize(symbol.as_bytes()).collect()
}

fn normalize_symbol(raw: &str) -> Option<String> {
    let symbol = raw.trim().to_uppercase();
    if symbol.is_empty()
        || !symbol
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '^' | '='))
    {
        return None;
    }
    Some(symbol)
}

fn first_chart(body: ChartBody, symbol: &str) -> Result<ChartResult, String> {
    if let Some(err) = body.error {
        return Err(format!(
            "Error: no data for {symbol}: {}",
            err.description.unwrap_or_else(|| "unknown error".into())
        ));
    }
    body.result
        .and_then(|r| r.into_iter().next())
        .ok_or_else(|| format!("Error: no data for {symbol}"))
}

fn fmt_price(value: Option<f64>) -> String {
    value.map_or_else(|| "n/a".into(), |v| format!("{v:.2}"))
}

fn fmt_date(ts: i64, with_time: bool) -> String {
    match DateTime::from_timestamp(ts, 0) {
        Some(dt) if with_time => dt.format("%Y-%m-%d %H:%M UTC").to_string(),
        Some(dt) => dt.format("%Y-%m-%d").to_string(),
        None => ts.to_string(),
    }
}

fn format_quote(envelope: ChartEnvelope, symbol: &str) -> String {
    let result = match first_chart(envelope.chart, symbol) {
        Ok(r) => r,
        Err(msg) => return msg,
    };
    let meta = result.meta;
    let currency = meta.currency.unwrap_or_default();
    let Some(price) = meta.regular_market_price else {
        return format!("Error: no price available for {}", meta.symbol);
    };

    let mut out = format!("{}: {price:.2} {currency}", meta.symbol).trim_end().to_string();
    if let Some(exchange) = meta.exchange_name {
        out.push_str(&format!(" ({exchange})"));
    }
    if let Some(prev) = meta.previous_close.or(meta.chart_previous_close) {
        if prev != 0.0 {
            let change = price - prev;
            out.push_str(&format!(
                "\nChange: {change:+.2} ({:+.2}%) from previous close {prev:.2}",
                change / prev * 100.0
            ));
        }
    }
    if meta.regular_market_day_low.is_some() || meta.regular_market_day_high.is_some() {
        out.push_str(&format!(
            "\nDay range: {} - {}",
            fmt_price(meta.regular_market_day_low),
            fmt_price(meta.regular_market_day_high)
        ));
    }
    if let Some(volume) = meta.regular_market_volume {
        out.push_str(&format!("\nVolume: {volume}"));
    }
    out
}

fn format_history(envelope: ChartEnvelope, symbol: &str, interval: &str) -> String {
    let result = match first_chart(envelope.chart, symbol) {
        Ok(r) => r,
        Err(msg) => return msg,
    };
    let series = result
        .indicators
        .and_then(|i| i.quote.into_iter().next())
        .unwrap_or_default();
    if result.timestamp.is_empty() {
        return format!("No price history for {}", result.meta.symbol);
    }

    let intraday = (interval.ends_with('m') && !interval.ends_with("mo")) || interval.ends_with('h');
    let rows: Vec<String> = result
        .timestamp
        .iter()
        .enumerate()
        .filter_map(|(i, ts)| {
            let close = series.close.get(i).copied().flatten()?;
            let at = |v: &Vec<Option<f64>>| v.get(i).copied().flatten();
            let volume = series
                .volume
                .get(i)
                .copied()
                .flatten()
                .map_or_else(|| "n/a".into(), |v| v.to_string());
            Some(format!(
                "{}  O {}  H {}  L {}  C {close:.2}  V {volume}",
                fmt_date(*ts, intraday),
                fmt_price(at(&series.open)),
                fmt_price(at(&series.high)),
                fmt_price(at(&series.low)),
            ))
        })
        .collect();

    let total = rows.len();
    let skipped = total.saturating_sub(HISTORY_ROWS);
    let mut out = format!("{} price history ({total} bars, interval {interval})", result.meta.symbol);
    if skipped > 0 {
        out.push_str(&format!(", showing last {HISTORY_ROWS}"));
    }
    out.push(':');
    for row in &rows[skipped..] {
        out.push('\n');
        out.push_str(row);
    }
    out
}

fn format_contracts(label: &str, contracts: &[OptionContract], spot: Option<f64>) -> String {
    if contracts.is_empty() {
        return format!("{label}: none");
    }
    // Contracts nearest the money are the interesting ones.
    let mut sorted: Vec<&OptionContract> = contracts.iter().collect();
    if let Some(spot) = spot {
        sorted.sort_by(|a, b| {
            (a.strike - spot)
                .abs()
                .total_cmp(&(b.strike - spot).abs())
        });
    }
    let mut picked: Vec<&OptionContract> = sorted.into_iter().take(OPTION_ROWS).collect();
    picked.sort_by(|a, b| a.strike.total_cmp(&b.strike));

    let mut out = format!("{label}:");
    for c in picked {
        out.push_str(&format!(
            "\n  {} strike {:.2} last {} bid {} ask {} vol {} OI {} IV {}",
            c.contract_symbol,
            c.strike,
            fmt_price(c.last_price),
            fmt_price(c.bid),
            fmt_price(c.ask),
            c.volume.map_or_else(|| "n/a".into(), |v| v.to_string()),
            c.open_interest.map_or_else(|| "n/a".into(), |v| v.to_string()),
            c.implied_volatility
                .map_or_else(|| "n/a".into(), |v| format!("{:.1}%", v * 100.0)),
        ));
    }
    out
}

fn format_options(envelope: OptionsEnvelope, symbol: &str) -> String {
    let body = envelope.option_chain;
    if let Some(err) = body.error {
        return format!(
            "Error: no options data for {symbol}: {}",
            err.description.unwrap_or_else(|| "unknown error".into())
        );
    }
    let Some(result) = body.result.and_then(|r| r.into_iter().next()) else {
        return format!("Error: no options data for {symbol}");
    };
    let Some(chain) = result.options.first() else {
        return format!("No listed options for {}", result.underlying_symbol);
    };

    let spot = result.quote.and_then(|q| q.regular_market_price);
    let mut out = format!(
        "{} options expiring {} (underlying {}, {} expirations listed)",
        result.underlying_symbol,
        fmt_date(chain.expiration_date, false),
        fmt_price(spot),
        result.expiration_dates.len()
    );
    out.push('\n');
    out.push_str(&format_contracts("Calls", &chain.calls, spot));
    out.push('\n');
    out.push_str(&format_contracts("Puts", &chain.puts, spot));
    out
}

#[derive(Debug, Deserialize, JsonSchema)]
struct SymbolArgs {
    /// Ticker symbol, e.g. "AAPL"
    symbol: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct HistoryArgs {
    /// Ticker symbol, e.g. "AAPL"
    symbol: String,
    /// Range such as 5d, 1mo, 6mo, 1y (default 1mo)
    range: Option<String>,
    /// Bar interval such as 1d, 1wk, 1h (default 1d)
    interval: Option<String>,
}

pub struct StockQuoteTool {
    client: Arc<YahooClient>,
}

impl StockQuoteTool {
    pub fn new(client: Arc<YahooClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Tool for StockQuoteTool {
    fn name(&self) -> &str {
        "stock_quote"
    }

    fn description(&self) -> &str {
        "Get the latest market price and daily change for a stock ticker."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        schema_for::<SymbolArgs>()
    }

    async fn execute(&self, params: serde_json::Value) -> Result<String> {
        let args: SymbolArgs = match parse_args(self.name(), params) {
            Ok(a) => a,
            Err(msg) => return Ok(msg),
        };
        let Some(symbol) = normalize_symbol(&args.symbol) else {
            return Ok(format!("Error: invalid ticker symbol '{}'", args.symbol));
        };
        match self.client.chart(&symbol, "1d", "1d").await {
            Ok(envelope) => Ok(format_quote(envelope, &symbol)),
            Err(e) => Ok(format!("Error: quote lookup for {symbol} failed: {e:#}")),
        }
    }
}

pub struct StockHistoryTool {
    client: Arc<YahooClient>,
}

impl StockHistoryTool {
    pub fn new(client: Arc<YahooClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Tool for StockHistoryTool {
    fn name(&self) -> &str {
        "stock_history"
    }

    fn description(&self) -> &str {
        "Get historical OHLC prices for a stock ticker over a range."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        schema_for::<HistoryArgs>()
    }

    async fn execute(&self, params: serde_json::Value) -> Result<String> {
        let args: HistoryArgs = match parse_args(self.name(), params) {
            Ok(a) => a,
            Err(msg) => return Ok(msg),
        };
        let Some(symbol) = normalize_symbol(&args.symbol) else {
            return Ok(format!("Error: invalid ticker symbol '{}'", args.symbol));
        };
        let range = args.range.as_deref().unwrap_or("1mo");
        if !VALID_RANGES.contains(&range) {
            return Ok(format!(
                "Error: unsupported range '{range}' (use one of {})",
                VALID_RANGES.join(", ")
            ));
        }
        let interval = args.interval.as_deref().unwrap_or("1d");
        if !VALID_INTERVALS.contains(&interval) {
            return Ok(format!(
                "Error: unsupported interval '{interval}' (use one of {})",
                VALID_INTERVALS.join(", ")
            ));
        }
        match self.client.chart(&symbol, range, interval).await {
            Ok(envelope) => Ok(format_history(envelope, &symbol, interval)),
            Err(e) => Ok(format!("Error: history lookup for {symbol} failed: {e:#}")),
        }
    }
}

pub struct StockOptionsTool {
    client: Arc<YahooClient>,
}

impl StockOptionsTool {
    pub fn new(client: Arc<YahooClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Tool for StockOptionsTool {
    fn name(&self) -> &str {
        "stock_options"
    }

    fn description(&self) -> &str {
        "Get the nearest-expiry option chain (calls and puts near the money) for a stock ticker."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        schema_for::<SymbolArgs>()
    }

    async fn execute(&self, params: serde_json::Value) -> Result<String> {
        let args: SymbolArgs = match parse_args(self.name(), params) {
            Ok(a) => a,
            Err(msg) => return Ok(msg),
        };
        let Some(symbol) = normalize_symbol(&args.symbol) else {
            return Ok(format!("Error: invalid ticker symbol '{}'", args.symbol));
        };
        match self.client.options(&symbol).await {
            Ok(envelope) => Ok(format_options(envelope, &symbol)),
            Err(e) => Ok(format!("Error: options lookup for {symbol} failed: {e:#}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chart(json: serde_json::Value) -> ChartEnvelope {
        serde_json::from_value(json).unwrap()
    }

    fn quote_fixture() -> ChartEnvelope {
        chart(serde_json::json!({
            "chart": {
                "result": [{
                    "meta": {
                        "symbol": "AAPL",
                        "currency": "USD",
                        "exchangeName": "NMS",
                        "regularMarketPrice": 189.5,
                        "chartPreviousClose": 187.0,
                        "regularMarketDayHigh": 190.25,
                        "regularMarketDayLow": 186.75,
                        "regularMarketVolume": 51234567u64
                    },
                    "timestamp": [1700000000, 1700086400, 1700172800],
                    "indicators": {"quote": [{
                        "open": [185.0, 186.0, null],
                        "high": [186.5, 188.0, null],
                        "low": [184.0, 185.5, null],
                        "close": [186.0, 187.0, null],
                        "volume": [1000, 2000, null]
                    }]}
                }],
                "error": null
            }
        }))
    }

    #[test]
    fn quote_reports_price_and_change() {
        let out = format_quote(quote_fixture(), "AAPL");
        assert!(out.starts_with("AAPL: 189.50 USD (NMS)"));
        assert!(out.contains("Change: +2.50 (+1.34%) from previous close 187.00"));
        assert!(out.contains("Day range: 186.75 - 190.25"));
        assert!(out.contains("Volume: 51234567"));
    }

    #[test]
    fn unknown_symbol_is_text() {
        let envelope = chart(serde_json::json!({
            "chart": {
                "result": null,
                "error": {"code": "Not Found", "description": "No data found, symbol may be delisted"}
            }
        }));
        assert_eq!(
            format_quote(envelope, "ZZZZ"),
            "Error: no data for ZZZZ: No data found, symbol may be delisted"
        );
    }

    #[test]
    fn history_skips_null_bars() {
        let out = format_history(quote_fixture(), "AAPL", "1d");
        assert!(out.starts_with("AAPL price history (2 bars, interval 1d):"));
        assert!(out.contains("2023-11-14  O 185.00  H 186.50  L 184.00  C 186.00  V 1000"));
        assert_eq!(out.lines().count(), 3);
    }

    #[test]
    fn intraday_history_includes_time() {
        let out = format_history(quote_fixture(), "AAPL", "15m");
        assert!(out.contains("2023-11-14 22:13 UTC"));
    }

    #[test]
    fn options_pick_contracts_near_the_money() {
        let envelope: OptionsEnvelope = serde_json::from_value(serde_json::json!({
            "optionChain": {
                "result": [{
                    "underlyingSymbol": "AAPL",
                    "expirationDates": [1700179200, 1700784000],
                    "quote": {"regularMarketPrice": 100.0},
                    "options": [{
                        "expirationDate": 1700179200,
                        "calls": [
                            {"contractSymbol": "C80", "strike": 80.0, "lastPrice": 20.1},
                            {"contractSymbol": "C90", "strike": 90.0},
                            {"contractSymbol": "C95", "strike": 95.0},
                            {"contractSymbol": "C100", "strike": 100.0, "impliedVolatility": 0.25},
                            {"contractSymbol": "C105", "strike": 105.0},
                            {"contractSymbol": "C110", "strike": 110.0},
                            {"contractSymbol": "C150", "strike": 150.0}
                        ],
                        "puts": []
                    }]
                }],
                "error": null
            }
        }))
        .unwrap();
        let out = format_options(envelope, "AAPL");
        assert!(out.starts_with(
            "AAPL options expiring 2023-11-17 (underlying 100.00, 2 expirations listed)"
        ));
        assert!(out.contains("C100 strike 100.00 last n/a bid n/a ask n/a vol n/a OI n/a IV 25.0%"));
        assert!(!out.contains("C80 "));
        assert!(!out.contains("C150"));
        assert!(out.ends_with("Puts: none"));
    }

    #[test]
    fn symbols_are_validated() {
        assert_eq!(normalize_symbol(" aapl ").as_deref(), Some("AAPL"));
        assert_eq!(normalize_symbol("^GSPC").as_deref(), Some("^GSPC"));
        assert_eq!(normalize_symbol("BRK-B").as_deref(), Some("BRK-B"));
        assert!(normalize_symbol("").is_none());
        assert!(normalize_symbol("AAPL; rm").is_none());
    }

    #[test]
    fn urls_use_configured_endpoints() {
        let client = YahooClient::new(&FinanceToolConfig::default());
        assert_eq!(
            client.chart_url("^GSPC"),
            "https://query1.finance.yahoo.com/v8/finance/chart/%5EGSPC"
        );
        assert!(client.options_url("AAPL").ends_with("/v7/finance/options/AAPL"));
    }

    #[tokio::test]
    async fn bad_range_is_reported() {
        let tool = StockHistoryTool::new(Arc::new(YahooClient::new(&FinanceToolConfig::default())));
        let out = tool
            .execute(serde_json::json!({"symbol": "AAPL", "range": "forever"}))
            .await
            .unwrap();
        assert!(out.starts_with("Error: unsupported range 'forever'"));
    }
}

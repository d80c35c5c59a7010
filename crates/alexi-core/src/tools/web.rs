use std::sync::LazyLock;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use futures::future::join_all;
use regex::Regex;
use schemars::JsonSchema;
use serde::Deserialize;
use tracing::debug;

use alexi_config::WebSearchToolConfig;

use super::{parse_args, schema_for, Tool};

const USER_AGENT: &str = "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36";
const MAX_TOP_N: usize = 10;

static RESULT_ANCHOR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?is)<a\s([^>]*class="[^"]*result__a[^"]*"[^>]*)>(.*?)</a>"#).unwrap());
static HREF_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r#"href="([^"]+)""#).unwrap());
static SCRIPT_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?is)<script[\s\S]*?</script>").unwrap());
static STYLE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?is)<style[\s\S]*?</style>").unwrap());
static TAG_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^>]+>").unwrap());
static SPACES_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[ \t\r\n]+").unwrap());

#[derive(Debug, Deserialize, JsonSchema)]
struct WebSearchArgs {
    /// Search query
    query: String,
    /// Number of result pages to fetch (1-10)
    top_n: Option<usize>,
    /// Characters of page text to keep per result
    snippet_len: Option<usize>,
    /// Per-request timeout in seconds
    timeout: Option<u64>,
}

/// A search hit parsed from the results page.
#[derive(Debug, Clone, PartialEq)]
struct SearchHit {
    title: String,
    url: String,
}

/// Web search over the DuckDuckGo HTML endpoint, with the top result pages
/// fetched and reduced to readable text.
pub struct WebSearchTool {
    endpoint: String,
    top_n: usize,
    snippet_len: usize,
    timeout: Duration,
    client: reqwest::Client,
}

impl WebSearchTool {
    pub fn new(config: &WebSearchToolConfig) -> Self {
        Self {
            endpoint: config.endpoint.clone(),
            top_n: (config.top_n as usize).clamp(1, MAX_TOP_N),
            snippet_len: config.snippet_len.max(1),
            timeout: Duration::from_secs(config.timeout_secs.max(1)),
            client: reqwest::Client::builder()
                .user_agent(USER_AGENT)
                .build()
                .unwrap_or_default(),
        }
    }

    async fn search(&self, query: &str, timeout: Duration) -> Result<Vec<SearchHit>> {
        let body = self
            .client
            .post(&self.endpoint)
            .form(&[("q", query)])
            .timeout(timeout)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;
        Ok(parse_results(&body))
    }

    async fn fetch_text(&self, url: &str, timeout: Duration, limit: usize) -> String {
        let resp = match self.client.get(url).timeout(timeout).send().await {
            Ok(r) => r,
            Err(e) => return format!("(could not fetch page: {e})"),
        };
        if !resp.status().is_success() {
            return format!("(page returned HTTP {})", resp.status().as_u16());
        }
        let final_url = resp.url().clone();
        match resp.text().await {
            Ok(body) => truncate_chars(&extract_text(&body, &final_url), limit),
            Err(e) => format!("(could not read page: {e})"),
        }
    }
}

/// Pull result titles and target URLs out of a DuckDuckGo HTML page.
fn parse_results(html: &str) -> Vec<SearchHit> {
    let mut hits: Vec<SearchHit> = Vec::new();
    for cap in RESULT_ANCHOR_RE.captures_iter(html) {
        let Some(href) = HREF_RE.captures(&cap[1]).map(|h| h[1].to_string()) else {
            continue;
        };
        let Some(url) = resolve_redirect(&html_escape::decode_html_entities(&href)) else {
            continue;
        };
        if hits.iter().any(|h| h.url == url) {
            continue;
        }
        let title = collapse_whitespace(&html_escape::decode_html_entities(
            &TAG_RE.replace_all(&cap[2], ""),
        ));
        hits.push(SearchHit { title, url });
    }
    hits
}

/// Result links point at a `/l/?uddg=<target>` redirect; unwrap it.
fn resolve_redirect(href: &str) -> Option<String> {
    let absolute = if href.starts_with("//") {
        format!("https:{href}")
    } else {
        href.to_string()
    };
    let parsed = url::Url::parse(&absolute).ok()?;
    if let Some((_, target)) = parsed.query_pairs().find(|(k, _)| k == "uddg") {
        return Some(target.into_owned());
    }
    match parsed.scheme() {
        "http" | "https" => Some(absolute),
        _ => None,
    }
}

fn extract_text(html: &str, url: &url::Url) -> String {
    match readability::extractor::extract(&mut html.as_bytes(), url) {
        Ok(product) if !product.text.trim().is_empty() => collapse_whitespace(&product.text),
        _ => {
            debug!("readability found nothing in {url}, stripping tags");
            strip_tags(html)
        }
    }
}

fn strip_tags(html: &str) -> String {
    let text = SCRIPT_RE.replace_all(html, "");
    let text = STYLE_RE.replace_all(&text, "");
    let text = TAG_RE.replace_all(&text, " ");
    collapse_whitespace(&html_escape::decode_html_entities(&text))
}

fn collapse_whitespace(text: &str) -> String {
    SPACES_RE.replace_all(text, " ").trim().to_string()
}

fn truncate_chars(text: &str, limit: usize) -> String {
    match text.char_indices().nth(limit) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}

#[async_trait]
impl Tool for WebSearchTool {
    fn name(&self) -> &str {
        "web_search"
    }

    fn description(&self) -> &str {
        "Search the web and return the top results with an excerpt of each page."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        schema_for::<WebSearchArgs>()
    }

    async fn execute(&self, params: serde_json::Value) -> Result<String> {
        let args: WebSearchArgs = match parse_args(self.name(), params) {
            Ok(a) => a,
            Err(msg) => return Ok(msg),
        };
        let query = args.query.trim();
        if query.is_empty() {
            return Ok("Error: query is required".into());
        }
        let top_n = args.top_n.unwrap_or(self.top_n).clamp(1, MAX_TOP_N);
        let snippet_len = args.snippet_len.unwrap_or(self.snippet_len).max(1);
        let timeout = args
            .timeout
            .filter(|t| *t > 0)
            .map(Duration::from_secs)
            .unwrap_or(self.timeout);

        let hits = match self.search(query, timeout).await {
            Ok(hits) => hits,
            Err(e) => return Ok(format!("Error: web search failed: {e}")),
        };
        if hits.is_empty() {
            return Ok(format!("No results for: {query}"));
        }

        let hits: Vec<SearchHit> = hits.into_iter().take(top_n).collect();
        let pages = join_all(
            hits.iter()
                .map(|hit| self.fetch_text(&hit.url, timeout, snippet_len)),
        )
        .await;

        let mut output = format!("Results for: {query}\n");
        for (i, (hit, text)) in hits.iter().zip(pages).enumerate() {
            output.push_str(&format!("\n{}. {}\n   {}\n   {text}\n", i + 1, hit.title, hit.url));
        }
        Ok(output.trim_end().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RESULTS_PAGE: &str = r#"
<div class="result results_links">
  <h2 class="result__title">
    <a rel="nofollow" class="result__a" href="//duckduckgo.com/l/?uddg=https%3A%2F%2Fwww.rust-lang.org%2F&amp;rut=abc">The <b>Rust</b> Programming Language</a>
  </h2>
</div>
<div class="result results_links">
  <h2 class="result__title">
    <a rel="nofollow" class="result__a" href="https://doc.rust-lang.org/book/">The Book &amp; more</a>
  </h2>
</div>
<div class="result results_links">
  <a rel="nofollow" class="result__a" href="//duckduckgo.com/l/?uddg=https%3A%2F%2Fwww.rust-lang.org%2F&amp;rut=def">Duplicate</a>
</div>
"#;

    #[test]
    fn parses_titles_and_unwraps_redirects() {
        let hits = parse_results(RESULTS_PAGE);
        assert_eq!(
            hits,
            vec![
                SearchHit {
                    title: "The Rust Programming Language".into(),
                    url: "https://www.rust-lang.org/".into(),
                },
                SearchHit {
                    title: "The Book & more".into(),
                    url: "https://doc.rust-lang.org/book/".into(),
                },
            ]
        );
    }

    #[test]
    fn empty_page_has_no_results() {
        assert!(parse_results("<html><body>No results.</body></html>").is_empty());
    }

    #[test]
    fn non_http_links_are_skipped() {
        assert_eq!(resolve_redirect("javascript:void(0)"), None);
        assert_eq!(
            resolve_redirect("http://example.com/a").as_deref(),
            Some("http://example.com/a")
        );
    }

    #[test]
    fn strip_tags_drops_scripts_and_styles() {
        let html = "<html><head><style>p{}</style><script>var x=1;</script></head>\
                    <body><p>Hello&nbsp;<b>world</b></p>\n\n<p>again</p></body></html>";
        let text = strip_tags(html);
        assert!(text.contains("Hello"));
        assert!(text.contains("world again"));
        assert!(!text.contains("var x"));
        assert!(!text.contains("p{}"));
    }

    #[test]
    fn truncation_counts_characters() {
        assert_eq!(truncate_chars("héllo wörld", 5), "héllo...");
        assert_eq!(truncate_chars("short", 10), "short");
    }

    #[tokio::test]
    async fn blank_query_is_reported() {
        let tool = WebSearchTool::new(&WebSearchToolConfig::default());
        let out = tool
            .execute(serde_json::json!({"query": " "}))
            .await
            .unwrap();
        assert_eq!(out, "Error: query is required");
    }
}

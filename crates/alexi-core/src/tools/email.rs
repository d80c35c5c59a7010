use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message as MailMessage, Tokio1Executor};
use schemars::JsonSchema;
use serde::Deserialize;
use mailparse::MailHeaderMap;
use tracing::{info, warn};

use alexi_config::EmailToolConfig;

use super::{parse_args, schema_for, Tool};

const MAX_READ_COUNT: u32 = 20;

/// Account address and (app) password for the mail servers.
#[derive(Clone)]
pub struct EmailCredentials {
    pub address: String,
    pub password: String,
}

impl std::fmt::Debug for EmailCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmailCredentials")
            .field("address", &self.address)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Source of email credentials, consulted on every call.
pub trait CredentialProvider: Send + Sync {
    fn credentials(&self) -> Option<EmailCredentials>;
}

/// Reads credentials from the configured environment variables.
pub struct EnvCredentials {
    address_var: String,
    password_var: String,
}

impl EnvCredentials {
    pub fn new(config: &EmailToolConfig) -> Self {
        Self {
            address_var: config.address_env.clone(),
            password_var: config.password_env.clone(),
        }
    }
}

impl CredentialProvider for EnvCredentials {
    fn credentials(&self) -> Option<EmailCredentials> {
        let address = std::env::var(&self.address_var).ok().filter(|v| !v.trim().is_empty())?;
        let password = std::env::var(&self.password_var).ok().filter(|v| !v.is_empty())?;
        Some(EmailCredentials {
            address: address.trim().to_string(),
            password,
        })
    }
}

/// Fixed credentials, or none at all.
pub struct StaticCredentials(Option<EmailCredentials>);

impl StaticCredentials {
    pub fn new(address: impl Into<String>, password: impl Into<String>) -> Self {
        Self(Some(EmailCredentials {
            address: address.into(),
            password: password.into(),
        }))
    }

    pub fn none() -> Self {
        Self(None)
    }
}

impl CredentialProvider for StaticCredentials {
    fn credentials(&self) -> Option<EmailCredentials> {
        self.0.clone()
    }
}

fn missing_credentials(config: &EmailToolConfig) -> String {
    format!(
        "Error: email credentials missing (set {} and {})",
        config.address_env, config.password_env
    )
}

fn build_message(from: &str, to: &str, subject: &str, body: &str) -> Result<MailMessage, String> {
    let from: Mailbox = from
        .parse()
        .map_err(|e| format!("Error: invalid sender address '{from}': {e}"))?;
    let to: Mailbox = to
        .parse()
        .map_err(|e| format!("Error: invalid recipient address '{to}': {e}"))?;
    MailMessage::builder()
        .from(from)
        .to(to)
        .subject(subject)
        .body(body.to_string())
        .map_err(|e| format!("Error: could not build message: {e}"))
}

#[derive(Debug, Deserialize, JsonSchema)]
struct SendEmailArgs {
    /// Recipient address
    to: String,
    /// Subject line
    subject: String,
    /// Plain-text body
    body: String,
}

/// Sends mail over SMTP with STARTTLS.
pub struct SendEmailTool {
    config: EmailToolConfig,
    credentials: Arc<dyn CredentialProvider>,
}

impl SendEmailTool {
    pub fn new(config: &EmailToolConfig, credentials: Arc<dyn CredentialProvider>) -> Self {
        Self {
            config: config.clone(),
            credentials,
        }
    }

    async fn send(&self, creds: EmailCredentials, message: MailMessage) -> Result<()> {
        let transport = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&self.config.smtp_host)
            .with_context(|| format!("invalid SMTP host {}", self.config.smtp_host))?
            .credentials(Credentials::new(creds.address, creds.password))
            .build();
        transport.send(message).await.context("SMTP send failed")?;
        Ok(())
    }
}

#[async_trait]
impl Tool for SendEmailTool {
    fn name(&self) -> &str {
        "send_email"
    }

    fn description(&self) -> &str {
        "Send a plain-text email from the user's account."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        schema_for::<SendEmailArgs>()
    }

    async fn execute(&self, params: serde_json::Value) -> Result<String> {
        let args: SendEmailArgs = match parse_args(self.name(), params) {
            Ok(a) => a,
            Err(msg) => return Ok(msg),
        };
        let Some(creds) = self.credentials.credentials() else {
            return Ok(missing_credentials(&self.config));
        };
        let to = args.to.trim();
        let message = match build_message(&creds.address, to, &args.subject, &args.body) {
            Ok(m) => m,
            Err(msg) => return Ok(msg),
        };

        match self.send(creds, message).await {
            Ok(()) => {
                info!("Sent email to {to}");
                Ok(format!("Email sent to {to}"))
            }
            Err(e) => Ok(format!("Error: failed to send email: {e:#}")),
        }
    }
}

#[derive(Debug, Deserialize, JsonSchema)]
struct ReadEmailArgs {
    /// Number of most recent messages to list (default 5, max 20)
    count: Option<u32>,
    /// Mailbox to read (default INBOX)
    mailbox: Option<String>,
}

/// Header summary of one message.
#[derive(Debug, Default, PartialEq)]
struct Summary {
    from: String,
    subject: String,
    date: String,
}

/// Lists recent messages over IMAP (TLS).
pub struct ReadEmailTool {
    config: EmailToolConfig,
    credentials: Arc<dyn CredentialProvider>,
}

impl ReadEmailTool {
    pub fn new(config: &EmailToolConfig, credentials: Arc<dyn CredentialProvider>) -> Self {
        Self {
            config: config.clone(),
            credentials,
        }
    }
}

/// Blocking IMAP fetch of the newest `count` headers, newest first.
fn fetch_headers(
    host: &str,
    port: u16,
    creds: &EmailCredentials,
    mailbox: &str,
    count: u32,
) -> Result<Vec<Summary>> {
    let tls = native_tls::TlsConnector::builder().build()?;
    let client = imap::connect((host, port), host, &tls)
        .with_context(|| format!("could not connect to {host}:{port}"))?;
    let mut session = client
        .login(&creds.address, &creds.password)
        .map_err(|(e, _)| e)
        .context("IMAP login failed")?;

    let selected = session
        .select(mailbox)
        .with_context(|| format!("could not open mailbox {mailbox}"))?;
    let exists = selected.exists;
    let mut summaries = Vec::new();
    if exists > 0 {
        let start = exists.saturating_sub(count.saturating_sub(1)).max(1);
        let fetches = session.fetch(format!("{start}:{exists}"), "RFC822.HEADER")?;
        for fetch in fetches.iter() {
            if let Some(header) = fetch.header() {
                summaries.push(parse_headers(header));
            }
        }
    }
    let _ = session.logout();
    summaries.reverse();
    Ok(summaries)
}

/// Extract From, Subject and Date from a raw header block. Folded lines are
/// joined and RFC 2047 encoded words are decoded.
fn parse_headers(raw: &[u8]) -> Summary {
    let headers = match mailparse::parse_headers(raw) {
        Ok((headers, _)) => headers,
        Err(e) => {
            warn!("Unparseable message header: {e}");
            return Summary::default();
        }
    };
    let get = |name: &str| {
        headers
            .get_first_value(name)
            .map(|v| v.trim().to_string())
            .unwrap_or_default()
    };
    Summary {
        from: get("From"),
        subject: get("Subject"),
        date: get("Date"),
    }
}

fn format_summaries(mailbox: &str, summaries: &[Summary]) -> String {
    if summaries.is_empty() {
        return format!("No messages in {mailbox}");
    }
    let mut out = format!("{} most recent message(s) in {mailbox}:", summaries.len());
    for (i, s) in summaries.iter().enumerate() {
        let subject = if s.subject.is_empty() { "(no subject)" } else { &s.subject };
        out.push_str(&format!(
            "\n{}. {subject}\n   From: {}\n   Date: {}",
            i + 1,
            s.from,
            s.date
        ));
    }
    out
}

#[async_trait]
impl Tool for ReadEmailTool {
    fn name(&self) -> &str {
        "read_email"
    }

    fn description(&self) -> &str {
        "List the most recent emails (sender, subject, date) in the user's mailbox."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        schema_for::<ReadEmailArgs>()
    }

    async fn execute(&self, params: serde_json::Value) -> Result<String> {
        let args: ReadEmailArgs = match parse_args(self.name(), params) {
            Ok(a) => a,
            Err(msg) => return Ok(msg),
        };
        let Some(creds) = self.credentials.credentials() else {
            return Ok(missing_credentials(&self.config));
        };
        let count = args.count.unwrap_or(5).clamp(1, MAX_READ_COUNT);
        let mailbox = args
            .mailbox
            .filter(|m| !m.trim().is_empty())
            .unwrap_or_else(|| "INBOX".into());

        let host = self.config.imap_host.clone();
        let port = self.config.imap_port;
        let mb = mailbox.clone();
        let fetched = tokio::task::spawn_blocking(move || {
            fetch_headers(&host, port, &creds, &mb, count)
        })
        .await;

        match fetched {
            Ok(Ok(summaries)) => Ok(format_summaries(&mailbox, &summaries)),
            Ok(Err(e)) => Ok(format!("Error: failed to read email: {e:#}")),
            Err(e) => Ok(format!("Error: email reader task failed: {e}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_creds() -> Arc<dyn CredentialProvider> {
        Arc::new(StaticCredentials::none())
    }

    #[tokio::test]
    async fn send_without_credentials_is_text() {
        let tool = SendEmailTool::new(&EmailToolConfig::default(), no_creds());
        let out = tool
            .execute(serde_json::json!({"to": "a@example.com", "subject": "hi", "body": "x"}))
            .await
            .unwrap();
        assert_eq!(
            out,
            "Error: email credentials missing (set EMAIL_ADDRESS and EMAIL_PASSWORD)"
        );
    }

    #[tokio::test]
    async fn read_without_credentials_is_text() {
        let tool = ReadEmailTool::new(&EmailToolConfig::default(), no_creds());
        let out = tool.execute(serde_json::json!({})).await.unwrap();
        assert!(out.starts_with("Error: email credentials missing"));
    }

    #[tokio::test]
    async fn invalid_recipient_is_rejected_before_sending() {
        let tool = SendEmailTool::new(
            &EmailToolConfig::default(),
            Arc::new(StaticCredentials::new("me@example.com", "secret")),
        );
        let out = tool
            .execute(serde_json::json!({"to": "not an address", "subject": "s", "body": "b"}))
            .await
            .unwrap();
        assert!(out.starts_with("Error: invalid recipient address 'not an address'"));
    }

    #[test]
    fn message_carries_headers() {
        let msg = build_message("me@example.com", "you@example.com", "Lunch", "Noon?").unwrap();
        let raw = String::from_utf8(msg.formatted()).unwrap();
        assert!(raw.contains("From: me@example.com"));
        assert!(raw.contains("To: you@example.com"));
        assert!(raw.contains("Subject: Lunch"));
        assert!(raw.contains("Noon?"));
    }

    #[test]
    fn env_credentials_need_both_variables() {
        let config = EmailToolConfig {
            address_env: "ALEXI_TEST_MAIL_ADDR".into(),
            password_env: "ALEXI_TEST_MAIL_PASS".into(),
            ..EmailToolConfig::default()
        };
        let provider = EnvCredentials::new(&config);
        std::env::set_var("ALEXI_TEST_MAIL_ADDR", "me@example.com");
        std::env::remove_var("ALEXI_TEST_MAIL_PASS");
        assert!(provider.credentials().is_none());
        std::env::set_var("ALEXI_TEST_MAIL_PASS", "pw");
        let creds = provider.credentials().unwrap();
        assert_eq!(creds.address, "me@example.com");
        assert!(!format!("{creds:?}").contains("pw"));
    }

    #[test]
    fn headers_are_unfolded_and_parsed() {
        let raw = "Received: from mx\r\n\tby host\r\nFrom: Alice <alice@example.com>\r\n\
                   Subject: Quarterly\r\n report\r\nDate: Mon, 6 Oct 2025 09:00:00 +0000\r\n\r\n";
        assert_eq!(
            parse_headers(raw.as_bytes()),
            Summary {
                from: "Alice <alice@example.com>".into(),
                subject: "Quarterly report".into(),
                date: "Mon, 6 Oct 2025 09:00:00 +0000".into(),
            }
        );
    }

    #[test]
    fn encoded_words_are_decoded() {
        let raw = "From: =?UTF-8?Q?Ren=C3=A9e?= <renee@example.com>\r\n\
                   Subject: =?UTF-8?B?Y2Fmw6k=?= menu\r\n\r\n";
        let summary = parse_headers(raw.as_bytes());
        assert_eq!(summary.from, "Ren\u{e9}e <renee@example.com>");
        assert_eq!(summary.subject, "caf\u{e9} menu");
        assert_eq!(summary.date, "");
    }

    #[test]
    fn summaries_are_numbered() {
        let out = format_summaries(
            "INBOX",
            &[Summary {
                from: "bob@example.com".into(),
                subject: String::new(),
                date: "today".into(),
            }],
        );
        assert_eq!(
            out,
            "1 most recent message(s) in INBOX:\n1. (no subject)\n   From: bob@example.com\n   Date: today"
        );
        assert_eq!(format_summaries("Archive", &[]), "No messages in Archive");
    }
}

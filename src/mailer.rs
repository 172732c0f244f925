use anyhow::Context;
use axum::async_trait;
use serde::Serialize;
use tracing::{debug, info};

use crate::config::MailConfig;

/// Delivers one plain-text message to one address.
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, to: &str, subject: &str, text: &str) -> anyhow::Result<()>;
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct EmailAddress<'a> {
    email: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<&'a str>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SendEmailBody<'a> {
    sender: EmailAddress<'a>,
    to: Vec<EmailAddress<'a>>,
    subject: &'a str,
    text_content: &'a str,
}

/// Transactional email over a JSON HTTP API (Brevo compatible).
pub struct HttpMailer {
    http: reqwest::Client,
    api_url: String,
    api_key: String,
    sender_email: String,
    sender_name: Option<String>,
}

impl HttpMailer {
    pub fn new(http: reqwest::Client, cfg: &MailConfig, api_key: String) -> Self {
        Self {
            http,
            api_url: cfg.api_url.clone(),
            api_key,
            sender_email: cfg.sender_email.clone(),
            sender_name: cfg.sender_name.clone(),
        }
    }
}

#[async_trait]
impl Mailer for HttpMailer {
    async fn send(&self, to: &str, subject: &str, text: &str) -> anyhow::Result<()> {
        let body = SendEmailBody {
            sender: EmailAddress {
                email: &self.sender_email,
                name: self.sender_name.as_deref(),
            },
            to: vec![EmailAddress { email: to, name: None }],
            subject,
            text_content: text,
        };

        let resp = self
            .http
            .post(&self.api_url)
            .header("api-key", &self.api_key)
            .header("Accept", "application/json")
            .json(&body)
            .send()
            .await
            .context("mail api request")?;

        let status = resp.status();
        if !status.is_success() {
            let detail = resp.text().await.unwrap_or_default();
            anyhow::bail!("mail api returned {status}: {detail}");
        }
        debug!(%status, "mail accepted");
        Ok(())
    }
}

/// Writes messages to the log instead of sending them. Used when no mail API key is configured.
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, to: &str, subject: &str, text: &str) -> anyhow::Result<()> {
        info!(%to, %subject, body = %text, "mail not configured; message logged");
        Ok(())
    }
}

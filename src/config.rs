use std::time::Duration;

use anyhow::Context;
use serde::Deserialize;

const DEFAULT_MAIL_API_URL: &str = "https://api.brevo.com/v3/smtp/email";

#[derive(Debug, Clone, Deserialize)]
pub struct JwtConfig {
    pub secret: String,
    pub issuer: String,
    pub audience: String,
    pub ttl_hours: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    pub endpoint: String,
    pub bucket: String,
    pub access_key: String,
    pub secret_key: String,
    pub region: String,
    /// Prefix joined with an object key to form the URL handed to clients.
    pub public_base_url: String,
    pub key_prefix: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GoogleConfig {
    pub client_id: String,
    pub client_secret: String,
    pub redirect_url: String,
    /// Client ids whose ID tokens are accepted by the web login.
    pub accepted_audiences: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MailConfig {
    pub api_url: String,
    pub api_key: Option<String>,
    pub sender_email: String,
    pub sender_name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub database_url: String,
    pub db_max_connections: u32,
    pub public_base_url: String,
    pub dependency_timeout: Duration,
    pub jwt: JwtConfig,
    pub storage: StorageConfig,
    pub google: GoogleConfig,
    pub mail: MailConfig,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL is required")?;

        let jwt = JwtConfig {
            secret: std::env::var("JWT_SECRET").context("JWT_SECRET is required")?,
            issuer: env_or("JWT_ISSUER", "crowdmarket"),
            audience: env_or("JWT_AUDIENCE", "crowdmarket-users"),
            ttl_hours: env_parse("JWT_TTL_HOURS", 24),
        };

        let endpoint = env_or("S3_ENDPOINT", "http://localhost:9000");
        let bucket = env_or("S3_BUCKET", "crowdmarket");
        let public_base_url = std::env::var("S3_PUBLIC_BASE_URL")
            .unwrap_or_else(|_| format!("{}/{}", endpoint.trim_end_matches('/'), bucket));
        let storage = StorageConfig {
            access_key: env_or("S3_ACCESS_KEY", ""),
            secret_key: env_or("S3_SECRET_KEY", ""),
            region: env_or("S3_REGION", "us-east-1"),
            key_prefix: env_or("S3_KEY_PREFIX", "crowd_market/products"),
            public_base_url,
            endpoint,
            bucket,
        };

        let client_id = env_or("GOOGLE_CLIENT_ID", "");
        let google = GoogleConfig {
            accepted_audiences: accepted_audiences(
                &client_id,
                &std::env::var("GOOGLE_ACCEPTED_AUDIENCES").unwrap_or_default(),
            ),
            client_id,
            client_secret: env_or("GOOGLE_CLIENT_SECRET", ""),
            redirect_url: env_or(
                "GOOGLE_REDIRECT_URI",
                "http://localhost:8080/auth/google/callback",
            ),
        };
        if google.client_id.is_empty() || google.client_secret.is_empty() {
            tracing::warn!("GOOGLE_CLIENT_ID or GOOGLE_CLIENT_SECRET not set; google login will fail");
        }

        let mail = MailConfig {
            api_url: env_or("MAIL_API_URL", DEFAULT_MAIL_API_URL),
            api_key: std::env::var("MAIL_API_KEY").ok().filter(|v| !v.trim().is_empty()),
            sender_email: env_or("MAIL_SENDER_EMAIL", "no-reply@crowdmarket.local"),
            sender_name: std::env::var("MAIL_SENDER_NAME").ok(),
        };

        Ok(Self {
            database_url,
            db_max_connections: env_parse("DB_MAX_CONNECTIONS", 10),
            public_base_url: env_or("PUBLIC_BASE_URL", "http://localhost:8080"),
            dependency_timeout: Duration::from_secs(env_parse("DEPENDENCY_TIMEOUT_SECS", 5)),
            jwt,
            storage,
            google,
            mail,
        })
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}

/// The backend client id is always accepted; `extra` adds comma separated ids
/// (e.g. the web frontend's client).
fn accepted_audiences(client_id: &str, extra: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for aud in std::iter::once(client_id).chain(extra.split(',')) {
        let aud = aud.trim();
        if !aud.is_empty() && !out.iter().any(|a| a == aud) {
            out.push(aud.to_string());
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepted_audiences_merges_and_dedups() {
        let auds = accepted_audiences("backend-id", " web-id ,backend-id,, mobile-id");
        assert_eq!(auds, vec!["backend-id", "web-id", "mobile-id"]);
    }

    #[test]
    fn accepted_audiences_skips_empty_client_id() {
        assert_eq!(accepted_audiences("", "web-id"), vec!["web-id"]);
        assert!(accepted_audiences("", "").is_empty());
    }
}

//! Google identity bridge.
//!
//! Two entry points end in the same place: the redirect flow (`/auth/google/login`
//! then `/auth/google/callback`) exchanges an authorization code for the userinfo
//! profile, and the web flow (`/auth/google/web`) receives an ID token minted for a
//! frontend client. Either way the profile email is resolved to a local account and a
//! local session token is issued.

use std::time::Duration;

use anyhow::Context;
use axum::async_trait;
use oauth2::basic::BasicClient;
use oauth2::{
    AuthUrl, AuthorizationCode, ClientId, ClientSecret, CsrfToken, EndpointNotSet, EndpointSet,
    RedirectUrl, Scope, TokenResponse, TokenUrl,
};
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::{
    config::GoogleConfig,
    error::{with_deadline, AppError},
};

const GOOGLE_AUTH_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";
const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
const GOOGLE_USERINFO_URL: &str = "https://www.googleapis.com/oauth2/v2/userinfo";
const GOOGLE_TOKENINFO_URL: &str = "https://oauth2.googleapis.com/tokeninfo";
const GOOGLE_ISSUERS: [&str; 2] = ["accounts.google.com", "https://accounts.google.com"];

/// Claims of an ID token whose signature and expiry Google has already checked.
#[derive(Debug, Clone, Deserialize)]
pub struct IdTokenPayload {
    pub iss: String,
    pub aud: String,
    pub email: Option<String>,
    /// tokeninfo reports this as a string, decoded JWTs as a bool.
    pub email_verified: Option<Value>,
    pub name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternalProfile {
    pub email: String,
    pub name: String,
}

#[async_trait]
pub trait GoogleProvider: Send + Sync {
    /// Consent page URL carrying `state`.
    fn authorize_url(&self, state: &str) -> String;

    async fn exchange_code(&self, code: &str) -> anyhow::Result<ExternalProfile>;

    /// `Ok(None)` when Google rejects the token (bad signature, expired, malformed).
    async fn verify_id_token(&self, id_token: &str) -> anyhow::Result<Option<IdTokenPayload>>;
}

/// Verifies a Google ID token and checks it was minted for one of `accepted_audiences`.
pub async fn validate_external_token(
    provider: &dyn GoogleProvider,
    id_token: &str,
    accepted_audiences: &[String],
    limit: Duration,
) -> Result<ExternalProfile, AppError> {
    let payload = with_deadline(
        limit,
        "google id token verification",
        provider.verify_id_token(id_token),
    )
    .await?
    .ok_or_else(|| AppError::unauthorized("invalid ID token"))?;
    check_payload(payload, accepted_audiences)
}

fn check_payload(
    payload: IdTokenPayload,
    accepted_audiences: &[String],
) -> Result<ExternalProfile, AppError> {
    if !GOOGLE_ISSUERS.contains(&payload.iss.as_str()) {
        warn!(iss = %payload.iss, "unexpected id token issuer");
        return Err(AppError::unauthorized("invalid ID token"));
    }
    if !accepted_audiences.iter().any(|a| *a == payload.aud) {
        warn!(aud = %payload.aud, "id token audience not accepted");
        return Err(AppError::unauthorized("unauthorized audience"));
    }
    let unverified = matches!(
        &payload.email_verified,
        Some(Value::Bool(false))
    ) || matches!(&payload.email_verified, Some(Value::String(s)) if s == "false");
    let email = match payload.email {
        Some(e) if !e.trim().is_empty() && !unverified => e.trim().to_lowercase(),
        _ => return Err(AppError::unauthorized("invalid ID token")),
    };
    let name = display_name(payload.name, &email);
    Ok(ExternalProfile { email, name })
}

fn display_name(name: Option<String>, email: &str) -> String {
    match name {
        Some(n) if !n.trim().is_empty() => n.trim().to_string(),
        _ => email.split('@').next().unwrap_or(email).to_string(),
    }
}

/// OAuth client type with auth URL and token URL set.
type ConfiguredClient = oauth2::Client<
    oauth2::basic::BasicErrorResponse,
    oauth2::basic::BasicTokenResponse,
    oauth2::basic::BasicTokenIntrospectionResponse,
    oauth2::StandardRevocableToken,
    oauth2::basic::BasicRevocationErrorResponse,
    EndpointSet,
    EndpointNotSet,
    EndpointNotSet,
    EndpointNotSet,
    EndpointSet,
>;

#[derive(Debug, Deserialize)]
struct GoogleUser {
    email: Option<String>,
    name: Option<String>,
}

pub struct GoogleOAuth {
    client: ConfiguredClient,
    /// Token exchange client; never follows redirects.
    oauth_http: reqwest::Client,
    http: reqwest::Client,
}

impl GoogleOAuth {
    pub fn new(cfg: &GoogleConfig, http: reqwest::Client, timeout: Duration) -> anyhow::Result<Self> {
        let client = BasicClient::new(ClientId::new(cfg.client_id.clone()))
            .set_client_secret(ClientSecret::new(cfg.client_secret.clone()))
            .set_auth_uri(AuthUrl::new(GOOGLE_AUTH_URL.to_string())?)
            .set_token_uri(TokenUrl::new(GOOGLE_TOKEN_URL.to_string())?)
            .set_redirect_uri(
                RedirectUrl::new(cfg.redirect_url.clone()).context("GOOGLE_REDIRECT_URI")?,
            );

        let oauth_http = reqwest::ClientBuilder::new()
            .redirect(reqwest::redirect::Policy::none())
            .timeout(timeout)
            .build()
            .context("build oauth http client")?;

        Ok(Self {
            client,
            oauth_http,
            http,
        })
    }
}

#[async_trait]
impl GoogleProvider for GoogleOAuth {
    fn authorize_url(&self, state: &str) -> String {
        let state = state.to_string();
        let (url, _) = self
            .client
            .authorize_url(move || CsrfToken::new(state))
            .add_scope(Scope::new("openid".to_string()))
            .add_scope(Scope::new("email".to_string()))
            .add_scope(Scope::new("profile".to_string()))
            .url();
        url.to_string()
    }

    async fn exchange_code(&self, code: &str) -> anyhow::Result<ExternalProfile> {
        let token = self
            .client
            .exchange_code(AuthorizationCode::new(code.to_string()))
            .request_async(&self.oauth_http)
            .await
            .map_err(|e| anyhow::anyhow!("token exchange failed: {e}"))?;

        let user: GoogleUser = self
            .http
            .get(GOOGLE_USERINFO_URL)
            .bearer_auth(token.access_token().secret())
            .send()
            .await
            .context("google userinfo request")?
            .error_for_status()
            .context("google userinfo status")?
            .json()
            .await
            .context("decode google userinfo")?;

        let email = user
            .email
            .map(|e| e.trim().to_lowercase())
            .filter(|e| !e.is_empty())
            .context("google profile has no email")?;
        debug!(%email, "google profile fetched");
        Ok(ExternalProfile {
            name: display_name(user.name, &email),
            email,
        })
    }

    async fn verify_id_token(&self, id_token: &str) -> anyhow::Result<Option<IdTokenPayload>> {
        let resp = self
            .http
            .get(GOOGLE_TOKENINFO_URL)
            .query(&[("id_token", id_token)])
            .send()
            .await
            .context("google tokeninfo request")?;

        match resp.status() {
            s if s.is_success() => Ok(Some(resp.json().await.context("decode tokeninfo")?)),
            StatusCode::BAD_REQUEST | StatusCode::UNAUTHORIZED => Ok(None),
            s => anyhow::bail!("google tokeninfo returned {s}"),
        }
    }
}

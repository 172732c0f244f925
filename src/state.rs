use std::sync::Arc;

use anyhow::Context;
use sqlx::PgPool;
use tracing::{info, warn};

use crate::auth::{
    google::{GoogleOAuth, GoogleProvider},
    repo::{PgUserStore, UserStore},
    tokens::JwtKeys,
};
use crate::config::AppConfig;
use crate::mailer::{HttpMailer, LogMailer, Mailer};
use crate::products::repo::{PgProductStore, ProductStore};
use crate::storage::{Storage, StorageClient};

/// Everything a handler may touch, built once at startup and cloned per request.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub jwt: Arc<JwtKeys>,
    pub users: Arc<dyn UserStore>,
    pub products: Arc<dyn ProductStore>,
    pub storage: Arc<dyn StorageClient>,
    pub mailer: Arc<dyn Mailer>,
    pub google: Arc<dyn GoogleProvider>,
}

impl AppState {
    pub async fn init(config: AppConfig, db: PgPool) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.dependency_timeout)
            .build()
            .context("build http client")?;

        let storage = Arc::new(Storage::new(&config.storage).await?) as Arc<dyn StorageClient>;

        let mailer: Arc<dyn Mailer> = match &config.mail.api_key {
            Some(key) => Arc::new(HttpMailer::new(http.clone(), &config.mail, key.clone())),
            None => {
                warn!("MAIL_API_KEY not set; verification mails will only be logged");
                Arc::new(LogMailer)
            }
        };

        let google = Arc::new(GoogleOAuth::new(
            &config.google,
            http,
            config.dependency_timeout,
        )?) as Arc<dyn GoogleProvider>;

        info!(
            audiences = config.google.accepted_audiences.len(),
            bucket = %config.storage.bucket,
            "services configured"
        );

        Ok(Self::from_parts(
            config,
            Arc::new(PgUserStore::new(db.clone())),
            Arc::new(PgProductStore::new(db)),
            storage,
            mailer,
            google,
        ))
    }

    pub fn from_parts(
        config: AppConfig,
        users: Arc<dyn UserStore>,
        products: Arc<dyn ProductStore>,
        storage: Arc<dyn StorageClient>,
        mailer: Arc<dyn Mailer>,
        google: Arc<dyn GoogleProvider>,
    ) -> Self {
        Self {
            jwt: Arc::new(JwtKeys::new(&config.jwt)),
            config: Arc::new(config),
            users,
            products,
            storage,
            mailer,
            google,
        }
    }
}

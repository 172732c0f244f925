//! In-memory stand-ins for the database, object store, mail API and Google, wired into
//! an [`AppState`] so services and routers can be exercised without any network.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use anyhow::anyhow;
use axum::async_trait;
use bytes::Bytes;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{
    auth::{
        google::{ExternalProfile, GoogleProvider, IdTokenPayload},
        repo::UserStore,
        repo_types::{NewLocalUser, Provider, User},
    },
    config::{AppConfig, GoogleConfig, JwtConfig, MailConfig, StorageConfig},
    mailer::Mailer,
    products::{
        repo::ProductStore,
        repo_types::{NewProduct, Product, ProductFilter, ProductPatch, UpdatedProduct},
    },
    state::AppState,
    storage::{self, StorageClient},
};

pub const STORAGE_BASE: &str = "https://cdn.test/bucket";
pub const MULTIPART_BOUNDARY: &str = "crowdmarket-test-boundary";

#[derive(Default)]
pub struct MemoryUserStore {
    users: Mutex<Vec<User>>,
}

impl MemoryUserStore {
    pub fn get_by_email(&self, email: &str) -> Option<User> {
        self.users.lock().unwrap().iter().find(|u| u.email == email).cloned()
    }

    pub fn count(&self) -> usize {
        self.users.lock().unwrap().len()
    }
}

#[async_trait]
impl UserStore for MemoryUserStore {
    async fn find_by_email(&self, email: &str) -> anyhow::Result<Option<User>> {
        Ok(self.get_by_email(email))
    }

    async fn create_local(&self, new: NewLocalUser) -> anyhow::Result<Option<User>> {
        let mut users = self.users.lock().unwrap();
        if users.iter().any(|u| u.email == new.email) {
            return Ok(None);
        }
        let now = OffsetDateTime::now_utc();
        let user = User {
            id: Uuid::new_v4(),
            name: new.name,
            email: new.email,
            password_hash: Some(new.password_hash),
            provider: Provider::Local,
            is_verified: false,
            verification_code: Some(new.verification_code),
            created_at: now,
            updated_at: now,
        };
        users.push(user.clone());
        Ok(Some(user))
    }

    async fn delete(&self, id: Uuid) -> anyhow::Result<()> {
        self.users.lock().unwrap().retain(|u| u.id != id);
        Ok(())
    }

    async fn consume_verification_code(&self, code: &str) -> anyhow::Result<Option<User>> {
        let mut users = self.users.lock().unwrap();
        let Some(user) = users
            .iter_mut()
            .find(|u| u.verification_code.as_deref() == Some(code))
        else {
            return Ok(None);
        };
        user.is_verified = true;
        user.verification_code = None;
        user.updated_at = OffsetDateTime::now_utc();
        Ok(Some(user.clone()))
    }

    async fn find_or_create_federated(&self, name: &str, email: &str) -> anyhow::Result<User> {
        let mut users = self.users.lock().unwrap();
        if let Some(existing) = users.iter().find(|u| u.email == email) {
            return Ok(existing.clone());
        }
        let now = OffsetDateTime::now_utc();
        let user = User {
            id: Uuid::new_v4(),
            name: name.to_string(),
            email: email.to_string(),
            password_hash: None,
            provider: Provider::Google,
            is_verified: true,
            verification_code: None,
            created_at: now,
            updated_at: now,
        };
        users.push(user.clone());
        Ok(user)
    }
}

#[derive(Default)]
pub struct MemoryProductStore {
    products: Mutex<Vec<Product>>,
    pub fail_inserts: AtomicBool,
    /// Applied before every call; longer than the configured deadline forces a timeout.
    pub delay: Mutex<Option<Duration>>,
}

impl MemoryProductStore {
    async fn pause(&self) {
        let delay = *self.delay.lock().unwrap();
        if let Some(d) = delay {
            tokio::time::sleep(d).await;
        }
    }
}

fn eq_ignore_case(filter: &Option<String>, value: &str) -> bool {
    filter.as_deref().map_or(true, |f| f.eq_ignore_ascii_case(value))
}

#[async_trait]
impl ProductStore for MemoryProductStore {
    async fn insert(&self, new: NewProduct) -> anyhow::Result<Product> {
        self.pause().await;
        if self.fail_inserts.load(Ordering::SeqCst) {
            return Err(anyhow!("insert product: connection reset"));
        }
        let now = OffsetDateTime::now_utc();
        let product = Product {
            id: Uuid::new_v4(),
            user_id: new.user_id,
            name: new.name,
            price: new.price,
            area: new.area,
            description: new.description,
            image_url: new.image_url,
            category: new.category,
            created_at: now,
            updated_at: now,
        };
        self.products.lock().unwrap().push(product.clone());
        Ok(product)
    }

    async fn list(&self, filter: &ProductFilter) -> anyhow::Result<Vec<Product>> {
        self.pause().await;
        let products = self.products.lock().unwrap();
        Ok(products
            .iter()
            .rev()
            .filter(|p| eq_ignore_case(&filter.category, &p.category))
            .filter(|p| eq_ignore_case(&filter.area, &p.area))
            .skip(filter.offset.max(0) as usize)
            .take(filter.limit.max(0) as usize)
            .cloned()
            .collect())
    }

    async fn list_by_owner(&self, owner: Uuid) -> anyhow::Result<Vec<Product>> {
        self.pause().await;
        let products = self.products.lock().unwrap();
        Ok(products
            .iter()
            .rev()
            .filter(|p| p.user_id == owner)
            .cloned()
            .collect())
    }

    async fn get(&self, id: Uuid) -> anyhow::Result<Option<Product>> {
        self.pause().await;
        Ok(self.products.lock().unwrap().iter().find(|p| p.id == id).cloned())
    }

    async fn update_owned(
        &self,
        id: Uuid,
        owner: Uuid,
        patch: &ProductPatch,
    ) -> anyhow::Result<Option<UpdatedProduct>> {
        self.pause().await;
        let mut products = self.products.lock().unwrap();
        let Some(p) = products.iter_mut().find(|p| p.id == id && p.user_id == owner) else {
            return Ok(None);
        };
        let previous_image_url = p.image_url.clone();
        if let Some(v) = &patch.name {
            p.name = v.clone();
        }
        if let Some(v) = patch.price {
            p.price = v;
        }
        if let Some(v) = &patch.area {
            p.area = v.clone();
        }
        if let Some(v) = &patch.description {
            p.description = v.clone();
        }
        if let Some(v) = &patch.category {
            p.category = v.clone();
        }
        if let Some(v) = &patch.image_url {
            p.image_url = v.clone();
        }
        p.updated_at = OffsetDateTime::now_utc();
        Ok(Some(UpdatedProduct {
            product: p.clone(),
            previous_image_url,
        }))
    }

    async fn delete_owned(&self, id: Uuid, owner: Uuid) -> anyhow::Result<Option<Product>> {
        self.pause().await;
        let mut products = self.products.lock().unwrap();
        let Some(pos) = products.iter().position(|p| p.id == id && p.user_id == owner) else {
            return Ok(None);
        };
        Ok(Some(products.remove(pos)))
    }
}

#[derive(Default)]
pub struct MemoryStorage {
    objects: Mutex<HashMap<String, (Bytes, String)>>,
    deleted: Mutex<Vec<String>>,
    pub fail_deletes: AtomicBool,
}

impl MemoryStorage {
    pub fn contains(&self, key: &str) -> bool {
        self.objects.lock().unwrap().contains_key(key)
    }

    pub fn object_count(&self) -> usize {
        self.objects.lock().unwrap().len()
    }

    /// Keys successfully deleted so far, in order.
    pub fn deleted(&self) -> Vec<String> {
        self.deleted.lock().unwrap().clone()
    }

    pub fn key_from_url(&self, url: &str) -> Option<String> {
        storage::key_from_url(STORAGE_BASE, url)
    }
}

#[async_trait]
impl StorageClient for MemoryStorage {
    async fn put_object(&self, key: &str, body: Bytes, content_type: &str) -> anyhow::Result<String> {
        self.objects
            .lock()
            .unwrap()
            .insert(key.to_string(), (body, content_type.to_string()));
        Ok(storage::public_url(STORAGE_BASE, key))
    }

    async fn delete_object(&self, key: &str) -> anyhow::Result<()> {
        if self.fail_deletes.load(Ordering::SeqCst) {
            return Err(anyhow!("delete {key}: access denied"));
        }
        self.objects.lock().unwrap().remove(key);
        self.deleted.lock().unwrap().push(key.to_string());
        Ok(())
    }

    fn key_from_url(&self, url: &str) -> Option<String> {
        storage::key_from_url(STORAGE_BASE, url)
    }
}

#[derive(Debug, Clone)]
pub struct SentMail {
    pub to: String,
    pub subject: String,
    pub text: String,
}

#[derive(Default)]
pub struct RecordingMailer {
    sent: Mutex<Vec<SentMail>>,
}

impl RecordingMailer {
    pub fn sent(&self) -> Vec<SentMail> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Mailer for RecordingMailer {
    async fn send(&self, to: &str, subject: &str, text: &str) -> anyhow::Result<()> {
        self.sent.lock().unwrap().push(SentMail {
            to: to.to_string(),
            subject: subject.to_string(),
            text: text.to_string(),
        });
        Ok(())
    }
}

pub struct FailingMailer;

#[async_trait]
impl Mailer for FailingMailer {
    async fn send(&self, _to: &str, _subject: &str, _text: &str) -> anyhow::Result<()> {
        Err(anyhow!("mail api returned 502"))
    }
}

/// Google double: ID tokens and authorization codes are looked up in tables filled by the test.
#[derive(Default)]
pub struct FakeGoogle {
    id_tokens: Mutex<HashMap<String, IdTokenPayload>>,
    codes: Mutex<HashMap<String, ExternalProfile>>,
}

impl FakeGoogle {
    pub fn add_id_token(&self, token: &str, aud: &str, email: &str, name: &str) {
        self.id_tokens.lock().unwrap().insert(
            token.to_string(),
            IdTokenPayload {
                iss: "https://accounts.google.com".into(),
                aud: aud.into(),
                email: Some(email.into()),
                email_verified: Some(serde_json::Value::Bool(true)),
                name: Some(name.into()),
            },
        );
    }

    pub fn add_code(&self, code: &str, email: &str, name: &str) {
        self.codes.lock().unwrap().insert(
            code.to_string(),
            ExternalProfile {
                email: email.into(),
                name: name.into(),
            },
        );
    }
}

#[async_trait]
impl GoogleProvider for FakeGoogle {
    fn authorize_url(&self, state: &str) -> String {
        format!("https://accounts.test/o/oauth2/auth?client_id=backend-client&state={state}")
    }

    async fn exchange_code(&self, code: &str) -> anyhow::Result<ExternalProfile> {
        self.codes
            .lock()
            .unwrap()
            .get(code)
            .cloned()
            .ok_or_else(|| anyhow!("invalid_grant"))
    }

    async fn verify_id_token(&self, id_token: &str) -> anyhow::Result<Option<IdTokenPayload>> {
        Ok(self.id_tokens.lock().unwrap().get(id_token).cloned())
    }
}

pub fn test_config() -> AppConfig {
    AppConfig {
        database_url: "postgres://unused".into(),
        db_max_connections: 1,
        public_base_url: "http://localhost:8080".into(),
        dependency_timeout: Duration::from_millis(200),
        jwt: JwtConfig {
            secret: "test-secret-with-enough-entropy".into(),
            issuer: "crowdmarket".into(),
            audience: "crowdmarket-users".into(),
            ttl_hours: 24,
        },
        storage: StorageConfig {
            endpoint: "http://localhost:9000".into(),
            bucket: "bucket".into(),
            access_key: String::new(),
            secret_key: String::new(),
            region: "us-east-1".into(),
            public_base_url: STORAGE_BASE.into(),
            key_prefix: "crowd_market/products".into(),
        },
        google: GoogleConfig {
            client_id: "backend-client".into(),
            client_secret: "secret".into(),
            redirect_url: "http://localhost:8080/auth/google/callback".into(),
            accepted_audiences: vec!["backend-client".into(), "web-client".into()],
        },
        mail: MailConfig {
            api_url: "http://mail.test".into(),
            api_key: None,
            sender_email: "no-reply@crowdmarket.test".into(),
            sender_name: None,
        },
    }
}

pub struct TestDeps {
    pub state: AppState,
    pub users: Arc<MemoryUserStore>,
    pub products: Arc<MemoryProductStore>,
    pub storage: Arc<MemoryStorage>,
    pub mailer: Arc<RecordingMailer>,
    pub google: Arc<FakeGoogle>,
}

pub fn test_state() -> TestDeps {
    let users = Arc::new(MemoryUserStore::default());
    let products = Arc::new(MemoryProductStore::default());
    let storage = Arc::new(MemoryStorage::default());
    let mailer = Arc::new(RecordingMailer::default());
    let google = Arc::new(FakeGoogle::default());
    let state = AppState::from_parts(
        test_config(),
        users.clone(),
        products.clone(),
        storage.clone(),
        mailer.clone(),
        google.clone(),
    );
    TestDeps {
        state,
        users,
        products,
        storage,
        mailer,
        google,
    }
}

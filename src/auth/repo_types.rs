use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Local,
    Google,
}

#[derive(Debug, thiserror::Error)]
#[error("unknown provider {0:?}")]
pub struct UnknownProvider(String);

impl TryFrom<String> for Provider {
    type Error = UnknownProvider;

    fn try_from(v: String) -> Result<Self, Self::Error> {
        match v.as_str() {
            "local" => Ok(Provider::Local),
            "google" => Ok(Provider::Google),
            _ => Err(UnknownProvider(v)),
        }
    }
}

/// User record in the database.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: Uuid,
    pub name: String,
    pub email: String, // unique
    #[serde(skip_serializing)]
    pub password_hash: Option<String>, // None for federated accounts
    #[sqlx(try_from = "String")]
    pub provider: Provider,
    pub is_verified: bool,
    #[serde(skip_serializing)]
    pub verification_code: Option<String>, // cleared once consumed
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

/// Insert payload for a password account.
#[derive(Debug, Clone)]
pub struct NewLocalUser {
    pub name: String,
    pub email: String,
    pub password_hash: String,
    pub verification_code: String,
}

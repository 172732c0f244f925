use rust_decimal::Decimal;
use serde::Serialize;
use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, FromRow)]
pub struct Product {
    pub id: Uuid,
    pub user_id: Uuid, // owner
    pub name: String,
    pub price: Decimal,
    pub area: String,
    pub description: String,
    pub image_url: String,
    pub category: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

#[derive(Debug, Clone)]
pub struct NewProduct {
    pub user_id: Uuid,
    pub name: String,
    pub price: Decimal,
    pub area: String,
    pub description: String,
    pub image_url: String,
    pub category: String,
}

/// Fields to overwrite; `None` keeps the stored value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProductPatch {
    pub name: Option<String>,
    pub price: Option<Decimal>,
    pub area: Option<String>,
    pub description: Option<String>,
    pub category: Option<String>,
    pub image_url: Option<String>,
}

impl ProductPatch {
    pub fn is_empty(&self) -> bool {
        *self == ProductPatch::default()
    }
}

/// Result of an owner-scoped update.
#[derive(Debug, Clone, FromRow)]
pub struct UpdatedProduct {
    #[sqlx(flatten)]
    pub product: Product,
    pub previous_image_url: String,
}

#[derive(Debug, Clone, Default)]
pub struct ProductFilter {
    pub category: Option<String>,
    pub area: Option<String>,
    pub limit: i64,
    pub offset: i64,
}

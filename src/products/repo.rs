use anyhow::Context;
use axum::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use super::repo_types::{NewProduct, Product, ProductFilter, ProductPatch, UpdatedProduct};

const PRODUCT_COLUMNS: &str = "id, user_id, name, price, area, description, image_url, category, \
                               created_at, updated_at";

/// Product persistence. Mutations take the owner and match on `(id, owner)` in a
/// single statement, so a foreign product behaves exactly like a missing one.
#[async_trait]
pub trait ProductStore: Send + Sync {
    async fn insert(&self, new: NewProduct) -> anyhow::Result<Product>;
    async fn list(&self, filter: &ProductFilter) -> anyhow::Result<Vec<Product>>;
    async fn list_by_owner(&self, owner: Uuid) -> anyhow::Result<Vec<Product>>;
    async fn get(&self, id: Uuid) -> anyhow::Result<Option<Product>>;
    async fn update_owned(
        &self,
        id: Uuid,
        owner: Uuid,
        patch: &ProductPatch,
    ) -> anyhow::Result<Option<UpdatedProduct>>;
    async fn delete_owned(&self, id: Uuid, owner: Uuid) -> anyhow::Result<Option<Product>>;
}

pub struct PgProductStore {
    db: PgPool,
}

impl PgProductStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl ProductStore for PgProductStore {
    async fn insert(&self, new: NewProduct) -> anyhow::Result<Product> {
        let product = sqlx::query_as::<_, Product>(&format!(
            r#"
            INSERT INTO products (id, user_id, name, price, area, description, image_url, category)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING {PRODUCT_COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(new.user_id)
        .bind(&new.name)
        .bind(new.price)
        .bind(&new.area)
        .bind(&new.description)
        .bind(&new.image_url)
        .bind(&new.category)
        .fetch_one(&self.db)
        .await
        .context("insert product")?;
        Ok(product)
    }

    async fn list(&self, filter: &ProductFilter) -> anyhow::Result<Vec<Product>> {
        let rows = sqlx::query_as::<_, Product>(&format!(
            r#"
            SELECT {PRODUCT_COLUMNS}
              FROM products
             WHERE ($1::text IS NULL OR lower(category) = lower($1))
               AND ($2::text IS NULL OR lower(area) = lower($2))
             ORDER BY created_at DESC
             LIMIT $3 OFFSET $4
            "#
        ))
        .bind(filter.category.as_deref())
        .bind(filter.area.as_deref())
        .bind(filter.limit)
        .bind(filter.offset)
        .fetch_all(&self.db)
        .await
        .context("list products")?;
        Ok(rows)
    }

    async fn list_by_owner(&self, owner: Uuid) -> anyhow::Result<Vec<Product>> {
        let rows = sqlx::query_as::<_, Product>(&format!(
            "SELECT {PRODUCT_COLUMNS} FROM products WHERE user_id = $1 ORDER BY created_at DESC"
        ))
        .bind(owner)
        .fetch_all(&self.db)
        .await
        .context("list products by owner")?;
        Ok(rows)
    }

    async fn get(&self, id: Uuid) -> anyhow::Result<Option<Product>> {
        let row = sqlx::query_as::<_, Product>(&format!(
            "SELECT {PRODUCT_COLUMNS} FROM products WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.db)
        .await
        .context("get product")?;
        Ok(row)
    }

    async fn update_owned(
        &self,
        id: Uuid,
        owner: Uuid,
        patch: &ProductPatch,
    ) -> anyhow::Result<Option<UpdatedProduct>> {
        // The locked sub-select hands back the image URL as it was before this write.
        let row = sqlx::query_as::<_, UpdatedProduct>(
            r#"
            UPDATE products p
               SET name        = COALESCE($3, p.name),
                   price       = COALESCE($4, p.price),
                   area        = COALESCE($5, p.area),
                   description = COALESCE($6, p.description),
                   category    = COALESCE($7, p.category),
                   image_url   = COALESCE($8, p.image_url),
                   updated_at  = now()
              FROM (SELECT id, image_url
                      FROM products
                     WHERE id = $1 AND user_id = $2
                       FOR UPDATE) old
             WHERE p.id = old.id
            RETURNING p.id, p.user_id, p.name, p.price, p.area, p.description, p.image_url,
                      p.category, p.created_at, p.updated_at,
                      old.image_url AS previous_image_url
            "#,
        )
        .bind(id)
        .bind(owner)
        .bind(patch.name.as_deref())
        .bind(patch.price)
        .bind(patch.area.as_deref())
        .bind(patch.description.as_deref())
        .bind(patch.category.as_deref())
        .bind(patch.image_url.as_deref())
        .fetch_optional(&self.db)
        .await
        .context("update product")?;
        Ok(row)
    }

    async fn delete_owned(&self, id: Uuid, owner: Uuid) -> anyhow::Result<Option<Product>> {
        let row = sqlx::query_as::<_, Product>(&format!(
            "DELETE FROM products WHERE id = $1 AND user_id = $2 RETURNING {PRODUCT_COLUMNS}"
        ))
        .bind(id)
        .bind(owner)
        .fetch_optional(&self.db)
        .await
        .context("delete product")?;
        Ok(row)
    }
}

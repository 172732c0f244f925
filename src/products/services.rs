use std::str::FromStr;

use bytes::Bytes;
use rust_decimal::Decimal;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::{
    dto::{ProductListQuery, UpdateProductRequest},
    repo_types::{NewProduct, Product, ProductFilter, ProductPatch},
};
use crate::{
    error::{with_deadline, AppError},
    state::AppState,
};

pub const MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;
const MAX_PAGE: i64 = 100;
const NOT_FOUND: &str = "product not found";

pub struct ImageUpload {
    pub body: Bytes,
    pub content_type: String,
}

/// Raw product fields as submitted in a multipart form. Empty fields count as absent.
#[derive(Default)]
pub struct ProductForm {
    pub name: Option<String>,
    pub price: Option<String>,
    pub area: Option<String>,
    pub description: Option<String>,
    pub category: Option<String>,
    pub image: Option<ImageUpload>,
}

/// Validated fields of a product about to be created.
pub struct ProductDraft {
    pub name: String,
    pub price: Decimal,
    pub area: String,
    pub description: String,
    pub category: String,
    pub image: ImageUpload,
}

impl ProductForm {
    pub fn into_draft(self) -> Result<ProductDraft, AppError> {
        let (Some(name), Some(price), Some(area), Some(description)) =
            (self.name, self.price, self.area, self.description)
        else {
            return Err(AppError::validation("All fields are required"));
        };
        let image = self
            .image
            .ok_or_else(|| AppError::validation("Image file is required"))?;
        Ok(ProductDraft {
            name: required_text("name", name)?,
            price: check_price(parse_price(&price)?)?,
            area: required_text("area", area)?,
            description: required_text("description", description)?,
            category: self.category.map(|c| c.trim().to_string()).unwrap_or_default(),
            image,
        })
    }

    pub fn into_patch(self) -> Result<(ProductPatch, Option<ImageUpload>), AppError> {
        let price = self.price.as_deref().map(parse_price).transpose()?;
        let patch = validate_patch(ProductPatch {
            name: self.name,
            price,
            area: self.area,
            description: self.description,
            category: self.category,
            image_url: None,
        })?;
        Ok((patch, self.image))
    }
}

impl UpdateProductRequest {
    pub fn into_patch(self) -> Result<ProductPatch, AppError> {
        validate_patch(ProductPatch {
            name: self.name,
            price: self.price,
            area: self.area,
            description: self.description,
            category: self.category,
            image_url: None,
        })
    }
}

fn validate_patch(patch: ProductPatch) -> Result<ProductPatch, AppError> {
    Ok(ProductPatch {
        name: patch.name.map(|v| required_text("name", v)).transpose()?,
        price: patch.price.map(check_price).transpose()?,
        area: patch.area.map(|v| required_text("area", v)).transpose()?,
        description: patch
            .description
            .map(|v| required_text("description", v))
            .transpose()?,
        category: patch.category.map(|c| c.trim().to_string()),
        image_url: patch.image_url,
    })
}

fn required_text(field: &str, value: String) -> Result<String, AppError> {
    let v = value.trim();
    if v.is_empty() {
        return Err(AppError::validation(format!("{field} must not be empty")));
    }
    Ok(v.to_string())
}

fn parse_price(raw: &str) -> Result<Decimal, AppError> {
    Decimal::from_str(raw.trim()).map_err(|_| AppError::validation("Invalid price value"))
}

fn check_price(price: Decimal) -> Result<Decimal, AppError> {
    // NUMERIC(12, 2)
    let max = Decimal::new(999_999_999_999, 2);
    if price.is_sign_negative() && !price.is_zero() {
        return Err(AppError::validation("Price must not be negative"));
    }
    let price = price.round_dp(2);
    if price > max {
        return Err(AppError::validation("Price is too large"));
    }
    Ok(price)
}

pub(crate) fn ext_from_mime(ct: &str) -> Option<&'static str> {
    match ct {
        "image/jpeg" | "image/jpg" => Some("jpg"),
        "image/png" => Some("png"),
        "image/webp" => Some("webp"),
        "image/heic" => Some("heic"),
        "image/gif" => Some("gif"),
        _ => None,
    }
}

pub fn list_filter(q: ProductListQuery) -> ProductFilter {
    let clean = |v: Option<String>| v.map(|s| s.trim().to_string()).filter(|s| !s.is_empty());
    ProductFilter {
        category: clean(q.category),
        area: clean(q.area),
        limit: q.limit.clamp(1, MAX_PAGE),
        offset: q.offset.max(0),
    }
}

pub fn parse_product_id(raw: &str) -> Result<Uuid, AppError> {
    Uuid::parse_str(raw).map_err(|_| AppError::NotFound(NOT_FOUND.into()))
}

async fn upload_image(st: &AppState, img: ImageUpload) -> Result<String, AppError> {
    let ext = ext_from_mime(&img.content_type).ok_or_else(|| {
        warn!(content_type = %img.content_type, "unsupported image type");
        AppError::validation("Unsupported image type")
    })?;
    if img.body.is_empty() {
        return Err(AppError::validation("Image file is empty"));
    }
    if img.body.len() > MAX_UPLOAD_BYTES {
        warn!(size = img.body.len(), "image over upload limit");
        return Err(AppError::validation("Image file is too large"));
    }
    let key = format!(
        "{}/{}.{}",
        st.config.storage.key_prefix.trim_end_matches('/'),
        Uuid::new_v4(),
        ext
    );
    let url = with_deadline(
        st.config.dependency_timeout,
        "upload image",
        st.storage.put_object(&key, img.body, &img.content_type),
    )
    .await?;
    info!(%key, "image uploaded");
    Ok(url)
}

/// Best-effort removal of an image that is no longer (or never became) referenced.
/// Failures are logged and swallowed.
async fn discard_image(st: &AppState, url: &str) {
    let Some(key) = st.storage.key_from_url(url) else {
        warn!(%url, "image url not owned by this store; skipping delete");
        return;
    };
    match with_deadline(
        st.config.dependency_timeout,
        "delete image",
        st.storage.delete_object(&key),
    )
    .await
    {
        Ok(()) => info!(%key, "image deleted"),
        Err(e) => error!(error = %e, %key, "image delete failed; object orphaned"),
    }
}

/// Uploads the image, then inserts the row. When the insert fails the upload is
/// rolled back best-effort; if that also fails the object stays orphaned.
pub async fn create_product(
    st: &AppState,
    owner: Uuid,
    draft: ProductDraft,
) -> Result<Product, AppError> {
    let image_url = upload_image(st, draft.image).await?;
    let new = NewProduct {
        user_id: owner,
        name: draft.name,
        price: draft.price,
        area: draft.area,
        description: draft.description,
        image_url: image_url.clone(),
        category: draft.category,
    };
    match with_deadline(st.config.dependency_timeout, "insert product", st.products.insert(new))
        .await
    {
        Ok(product) => {
            info!(product_id = %product.id, user_id = %owner, "product created");
            Ok(product)
        }
        Err(e) => {
            discard_image(st, &image_url).await;
            Err(e)
        }
    }
}

pub async fn update_product(
    st: &AppState,
    owner: Uuid,
    id: Uuid,
    mut patch: ProductPatch,
    image: Option<ImageUpload>,
) -> Result<Product, AppError> {
    if patch.is_empty() && image.is_none() {
        return Err(AppError::validation("No fields to update"));
    }
    let new_image = match image {
        Some(img) => Some(upload_image(st, img).await?),
        None => None,
    };
    patch.image_url = new_image.clone();

    let res = with_deadline(
        st.config.dependency_timeout,
        "update product",
        st.products.update_owned(id, owner, &patch),
    )
    .await;

    match res {
        Ok(Some(updated)) => {
            // The old image goes only after the row points at the new one.
            if new_image.is_some() {
                discard_image(st, &updated.previous_image_url).await;
            }
            info!(product_id = %id, user_id = %owner, "product updated");
            Ok(updated.product)
        }
        other => {
            if let Some(url) = &new_image {
                discard_image(st, url).await;
            }
            match other {
                Ok(_) => {
                    warn!(product_id = %id, user_id = %owner, "update of missing or foreign product");
                    Err(AppError::NotFound(NOT_FOUND.into()))
                }
                Err(e) => Err(e),
            }
        }
    }
}

pub async fn delete_product(st: &AppState, owner: Uuid, id: Uuid) -> Result<(), AppError> {
    let removed = with_deadline(
        st.config.dependency_timeout,
        "delete product",
        st.products.delete_owned(id, owner),
    )
    .await?
    .ok_or_else(|| {
        warn!(product_id = %id, user_id = %owner, "delete of missing or foreign product");
        AppError::NotFound(NOT_FOUND.into())
    })?;
    discard_image(st, &removed.image_url).await;
    info!(product_id = %id, user_id = %owner, "product deleted");
    Ok(())
}

pub async fn get_product(st: &AppState, id: Uuid) -> Result<Product, AppError> {
    with_deadline(st.config.dependency_timeout, "get product", st.products.get(id))
        .await?
        .ok_or_else(|| AppError::NotFound(NOT_FOUND.into()))
}

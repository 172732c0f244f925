use axum::{
    extract::{
        multipart::MultipartRejection,
        rejection::{JsonRejection, QueryRejection},
        DefaultBodyLimit, FromRequest, Multipart, Path, Query, Request, State,
    },
    http::{header::CONTENT_TYPE, StatusCode},
    middleware,
    routing::{get, post, put},
    Json, Router,
};
use tracing::{instrument, warn};

use super::{
    dto::{ProductListQuery, ProductListResponse, ProductResponse, UpdateProductRequest},
    services::{self, ImageUpload, ProductForm, MAX_UPLOAD_BYTES},
};
use crate::{
    auth::{
        handlers::{json_body, query_params},
        middleware::{require_auth, AuthUser},
    },
    error::{with_deadline, AppError},
    state::AppState,
};

pub fn product_routes(state: AppState) -> Router<AppState> {
    let auth = middleware::from_fn_with_state(state, require_auth);
    Router::new()
        .route(
            "/products",
            get(list_products).merge(post(create_product).route_layer(auth.clone())),
        )
        .route(
            "/products/mine",
            get(list_my_products).route_layer(auth.clone()),
        )
        .route(
            "/products/:id",
            get(get_product).merge(
                put(update_product)
                    .delete(delete_product)
                    .route_layer(auth),
            ),
        )
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES + 64 * 1024))
}

fn multipart_body(mp: Result<Multipart, MultipartRejection>) -> Result<Multipart, AppError> {
    mp.map_err(|rej| {
        warn!(reason = %rej.body_text(), "rejected multipart body");
        AppError::validation(rej.body_text())
    })
}

/// Reads the product form fields; any other field name is rejected.
async fn read_form(mut mp: Multipart) -> Result<ProductForm, AppError> {
    let mut form = ProductForm::default();
    while let Some(field) = mp
        .next_field()
        .await
        .map_err(|e| AppError::validation(e.body_text()))?
    {
        let name = field.name().unwrap_or_default().to_string();
        if name == "image" {
            let content_type = field
                .content_type()
                .map(|s| s.to_string())
                .unwrap_or_else(|| "application/octet-stream".into());
            let body = field
                .bytes()
                .await
                .map_err(|e| AppError::validation(e.body_text()))?;
            form.image = Some(ImageUpload { body, content_type });
            continue;
        }
        let slot = match name.as_str() {
            "name" => &mut form.name,
            "price" => &mut form.price,
            "area" => &mut form.area,
            "description" => &mut form.description,
            "category" => &mut form.category,
            other => {
                warn!(field = %other, "unknown form field");
                return Err(AppError::validation(format!("unknown field `{other}`")));
            }
        };
        let text = field
            .text()
            .await
            .map_err(|e| AppError::validation(e.body_text()))?;
        *slot = Some(text).filter(|t| !t.trim().is_empty());
    }
    Ok(form)
}

#[instrument(skip(state, user, mp), fields(user_id = %user.user_id))]
pub async fn create_product(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    mp: Result<Multipart, MultipartRejection>,
) -> Result<(StatusCode, Json<ProductResponse>), AppError> {
    let draft = read_form(multipart_body(mp)?).await?.into_draft()?;
    let product = services::create_product(&state, user.user_id, draft).await?;
    Ok((
        StatusCode::CREATED,
        Json(ProductResponse {
            message: "Product added successfully".into(),
            product,
        }),
    ))
}

#[instrument(skip(state, query))]
pub async fn list_products(
    State(state): State<AppState>,
    query: Result<Query<ProductListQuery>, QueryRejection>,
) -> Result<Json<ProductListResponse>, AppError> {
    let filter = services::list_filter(query_params(query)?);
    let products = with_deadline(
        state.config.dependency_timeout,
        "list products",
        state.products.list(&filter),
    )
    .await?;
    Ok(Json(ProductListResponse {
        message: "Products fetched successfully".into(),
        products,
    }))
}

#[instrument(skip(state, user), fields(user_id = %user.user_id))]
pub async fn list_my_products(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
) -> Result<Json<ProductListResponse>, AppError> {
    let products = with_deadline(
        state.config.dependency_timeout,
        "list own products",
        state.products.list_by_owner(user.user_id),
    )
    .await?;
    Ok(Json(ProductListResponse {
        message: "Products fetched successfully".into(),
        products,
    }))
}

#[instrument(skip(state))]
pub async fn get_product(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ProductResponse>, AppError> {
    let id = services::parse_product_id(&id)?;
    let product = services::get_product(&state, id).await?;
    Ok(Json(ProductResponse {
        message: "Product fetched successfully".into(),
        product,
    }))
}

/// Accepts either a JSON patch or a multipart form (which may carry a new `image`).
#[instrument(skip(state, user, req), fields(user_id = %user.user_id))]
pub async fn update_product(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(id): Path<String>,
    req: Request,
) -> Result<Json<ProductResponse>, AppError> {
    let id = services::parse_product_id(&id)?;
    let content_type = req
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_ascii_lowercase();

    let (patch, image) = if content_type.starts_with("multipart/form-data") {
        let mp = multipart_body(Multipart::from_request(req, &state).await)?;
        read_form(mp).await?.into_patch()?
    } else {
        let payload: Result<Json<UpdateProductRequest>, JsonRejection> =
            Json::from_request(req, &state).await;
        (json_body(payload)?.into_patch()?, None)
    };

    let product = services::update_product(&state, user.user_id, id, patch, image).await?;
    Ok(Json(ProductResponse {
        message: "Product updated successfully".into(),
        product,
    }))
}

#[instrument(skip(state, user), fields(user_id = %user.user_id))]
pub async fn delete_product(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    let id = services::parse_product_id(&id)?;
    services::delete_product(&state, user.user_id, id).await?;
    Ok(Json(serde_json::json!({ "message": "Product deleted successfully" })))
}

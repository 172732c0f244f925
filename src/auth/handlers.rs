use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Query, State,
    },
    http::{
        header::{COOKIE, SET_COOKIE},
        HeaderMap,
    },
    middleware,
    response::{IntoResponse, Redirect},
    routing::{get, post},
    Json, Router,
};
use tracing::{instrument, warn};

use super::{
    dto::{
        GoogleCallbackQuery, GoogleLoginResponse, GoogleWebRequest, LoginRequest, LoginResponse,
        MessageResponse, ProfileResponse, RegisterRequest, VerifyQuery,
    },
    google::validate_external_token,
    middleware::{require_auth, AuthUser},
    services,
};
use crate::{
    error::{with_deadline, AppError},
    state::AppState,
};

const OAUTH_NONCE_COOKIE: &str = "oauth_nonce";
const OAUTH_NONCE_MAX_AGE_SECS: i64 = 600;

pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/register", post(register))
        .route("/login", post(login))
        .route("/verify", get(verify))
        .route("/auth/google/login", get(google_login))
        .route("/auth/google/callback", get(google_callback))
        .route("/auth/google/web", post(google_web))
}

pub fn profile_routes(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/user/profile", get(profile))
        .route_layer(middleware::from_fn_with_state(state, require_auth))
}

pub(crate) fn json_body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, AppError> {
    payload.map(|Json(v)| v).map_err(|rej| {
        warn!(reason = %rej.body_text(), "rejected json body");
        AppError::validation(rej.body_text())
    })
}

pub(crate) fn query_params<T>(query: Result<Query<T>, QueryRejection>) -> Result<T, AppError> {
    query.map(|Query(v)| v).map_err(|rej| {
        warn!(reason = %rej.body_text(), "rejected query string");
        AppError::validation(rej.body_text())
    })
}

fn nonce_cookie(value: &str, max_age: i64) -> String {
    format!(
        "{OAUTH_NONCE_COOKIE}={value}; Path=/auth/google; Max-Age={max_age}; HttpOnly; SameSite=Lax"
    )
}

fn cookie_value<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(k, _)| *k == name)
        .map(|(_, v)| v)
}

#[instrument(skip(state, payload))]
pub async fn register(
    State(state): State<AppState>,
    payload: Result<Json<RegisterRequest>, JsonRejection>,
) -> Result<Json<MessageResponse>, AppError> {
    services::register_user(&state, json_body(payload)?).await?;
    Ok(Json(MessageResponse {
        message: "Registration successful! Please check your email to verify your account."
            .into(),
    }))
}

#[instrument(skip(state, payload))]
pub async fn login(
    State(state): State<AppState>,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> Result<Json<LoginResponse>, AppError> {
    let token = services::login_user(&state, json_body(payload)?).await?;
    Ok(Json(LoginResponse {
        message: "login successful!".into(),
        token,
    }))
}

#[instrument(skip(state, query))]
pub async fn verify(
    State(state): State<AppState>,
    query: Result<Query<VerifyQuery>, QueryRejection>,
) -> Result<Json<MessageResponse>, AppError> {
    let code = query_params(query)?.code.unwrap_or_default();
    services::verify_email(&state, &code).await?;
    Ok(Json(MessageResponse {
        message: "Email verified successfully!".into(),
    }))
}

/// Redirects to Google's consent page. The state's nonce also goes to the browser as a
/// short-lived cookie; the callback only accepts a state presented together with it.
#[instrument(skip(state))]
pub async fn google_login(State(state): State<AppState>) -> Result<impl IntoResponse, AppError> {
    let (csrf, nonce) = state.jwt.issue_oauth_state()?;
    Ok((
        [(SET_COOKIE, nonce_cookie(&nonce, OAUTH_NONCE_MAX_AGE_SECS))],
        Redirect::temporary(&state.google.authorize_url(&csrf)),
    ))
}

#[instrument(skip(state, headers, query))]
pub async fn google_callback(
    State(state): State<AppState>,
    headers: HeaderMap,
    query: Result<Query<GoogleCallbackQuery>, QueryRejection>,
) -> Result<impl IntoResponse, AppError> {
    let q = query_params(query)?;
    if let Some(err) = q.error {
        warn!(error = %err, "google consent failed");
        return Err(AppError::validation(format!("google login failed: {err}")));
    }
    let code = q
        .code
        .filter(|c| !c.is_empty())
        .ok_or_else(|| AppError::validation("code not found"))?;
    let csrf = q.state.unwrap_or_default();
    let nonce = state.jwt.validate_oauth_state(&csrf).map_err(|e| {
        warn!(error = %e, "rejected oauth state");
        AppError::validation("invalid oauth state")
    })?;
    if cookie_value(&headers, OAUTH_NONCE_COOKIE) != Some(nonce.as_str()) {
        warn!("oauth state not bound to this client");
        return Err(AppError::validation("invalid oauth state"));
    }

    let profile = with_deadline(
        state.config.dependency_timeout,
        "google code exchange",
        state.google.exchange_code(&code),
    )
    .await?;
    let token = services::sign_in_federated(&state, &profile).await?;
    Ok((
        [(SET_COOKIE, nonce_cookie("", 0))],
        Json(GoogleLoginResponse {
            token,
            email: profile.email,
            name: profile.name,
        }),
    ))
}

#[instrument(skip(state, payload))]
pub async fn google_web(
    State(state): State<AppState>,
    payload: Result<Json<GoogleWebRequest>, JsonRejection>,
) -> Result<Json<GoogleLoginResponse>, AppError> {
    let body = json_body(payload)?;
    if body.id_token.trim().is_empty() {
        return Err(AppError::validation("idToken is required"));
    }
    let profile = validate_external_token(
        state.google.as_ref(),
        &body.id_token,
        &state.config.google.accepted_audiences,
        state.config.dependency_timeout,
    )
    .await?;
    let token = services::sign_in_federated(&state, &profile).await?;
    Ok(Json(GoogleLoginResponse {
        token,
        email: profile.email,
        name: profile.name,
    }))
}

/// Echoes the identity carried by the caller's session token.
#[instrument(skip(user))]
pub async fn profile(AuthUser(user): AuthUser) -> Json<ProfileResponse> {
    Json(ProfileResponse {
        user_id: user.user_id,
        email: user.email,
        role: user.role,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn cookie_value_finds_named_pair() {
        let mut headers = HeaderMap::new();
        headers.insert(COOKIE, HeaderValue::from_static("theme=dark; oauth_nonce=abc123"));
        assert_eq!(cookie_value(&headers, OAUTH_NONCE_COOKIE), Some("abc123"));
        assert_eq!(cookie_value(&headers, "missing"), None);
        assert_eq!(cookie_value(&HeaderMap::new(), OAUTH_NONCE_COOKIE), None);
    }

    #[test]
    fn nonce_cookie_is_scoped_and_http_only() {
        let c = nonce_cookie("abc", 600);
        assert!(c.starts_with("oauth_nonce=abc;"));
        assert!(c.contains("Path=/auth/google"));
        assert!(c.contains("HttpOnly"));
        assert!(c.contains("Max-Age=600"));
    }
}

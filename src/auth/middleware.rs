use axum::{
    async_trait,
    extract::{FromRequestParts, Request, State},
    http::{header::AUTHORIZATION, request::Parts, HeaderValue},
    middleware::Next,
    response::Response,
};
use tracing::warn;

use super::{claims::AuthContext, tokens::TokenError};
use crate::{error::AppError, state::AppState};

/// Extracts the token from `Authorization: Bearer <token>`.
/// The value must be exactly two space separated parts; the scheme is case-insensitive.
pub fn bearer_token(header: Option<&HeaderValue>) -> Result<&str, AppError> {
    let raw = header.ok_or_else(|| AppError::unauthorized("Missing Authorization header"))?;
    let invalid = || AppError::unauthorized("Invalid Authorization header format");
    let value = raw.to_str().map_err(|_| invalid())?;

    let mut parts = value.split(' ');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(scheme), Some(token), None)
            if scheme.eq_ignore_ascii_case("bearer") && !token.is_empty() =>
        {
            Ok(token)
        }
        _ => Err(invalid()),
    }
}

/// Rejects the request before it reaches a handler unless it carries a valid
/// session token; on success the caller's [`AuthContext`] is put into the request extensions.
pub async fn require_auth(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let token = bearer_token(req.headers().get(AUTHORIZATION)).inspect_err(|e| {
        warn!(reason = %e, "rejected authorization header");
    })?;

    let claims = state.jwt.validate(token).map_err(|e| {
        warn!(error = %e, "rejected session token");
        match e {
            TokenError::Expired => AppError::unauthorized("Token has expired"),
            TokenError::Invalid => AppError::unauthorized("Invalid or expired token"),
        }
    })?;

    req.extensions_mut().insert(AuthContext::from(claims));
    Ok(next.run(req).await)
}

/// Identity of the caller, available in handlers behind [`require_auth`].
pub struct AuthUser(pub AuthContext);

#[async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthContext>()
            .cloned()
            .map(AuthUser)
            .ok_or_else(|| AppError::unauthorized("Missing Authorization header"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(v: &str) -> Result<String, String> {
        let hv = HeaderValue::from_str(v).unwrap();
        bearer_token(Some(&hv))
            .map(str::to_string)
            .map_err(|e| e.to_string())
    }

    #[test]
    fn accepts_bearer_in_any_case() {
        assert_eq!(parse("Bearer abc.def.ghi").unwrap(), "abc.def.ghi");
        assert_eq!(parse("bearer abc").unwrap(), "abc");
        assert_eq!(parse("BEARER abc").unwrap(), "abc");
    }

    #[test]
    fn rejects_malformed_headers() {
        for bad in ["Bearer", "Bearer ", "Basic abc", "Bearer a b", "Bearer  abc", "abc", ""] {
            assert_eq!(
                parse(bad).unwrap_err(),
                "Invalid Authorization header format",
                "header {bad:?}"
            );
        }
    }

    #[test]
    fn rejects_missing_header() {
        assert_eq!(
            bearer_token(None).unwrap_err().to_string(),
            "Missing Authorization header"
        );
    }
}

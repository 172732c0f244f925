use lazy_static::lazy_static;
use rand::RngCore;
use regex::Regex;
use tracing::{error, info, warn};

use super::{
    dto::{LoginRequest, RegisterRequest},
    google::ExternalProfile,
    password::{hash_password, verify_password, MIN_PASSWORD_LEN},
    repo_types::{NewLocalUser, User},
};
use crate::{
    error::{with_deadline, AppError},
    state::AppState,
};

const VERIFICATION_CODE_BYTES: usize = 10;
const INVALID_CREDENTIALS: &str = "Invalid email or password";

pub(crate) fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    }
    EMAIL_RE.is_match(email)
}

pub(crate) fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

pub(crate) fn generate_verification_code() -> String {
    let mut bytes = [0u8; VERIFICATION_CODE_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

pub(crate) fn verification_link(public_base_url: &str, code: &str) -> String {
    format!("{}/verify?code={}", public_base_url.trim_end_matches('/'), code)
}

/// Creates an unverified local account and mails its verification link.
/// A failed send removes the account again so the address can retry registration.
pub async fn register_user(st: &AppState, req: RegisterRequest) -> Result<User, AppError> {
    let name = req.name.trim().to_string();
    let email = normalize_email(&req.email);

    if name.is_empty() {
        return Err(AppError::validation("Name is required"));
    }
    if !is_valid_email(&email) {
        warn!(%email, "invalid email");
        return Err(AppError::validation("Invalid email"));
    }
    if req.password.chars().count() < MIN_PASSWORD_LEN {
        warn!("password too short");
        return Err(AppError::validation(format!(
            "Password must be at least {MIN_PASSWORD_LEN} characters"
        )));
    }

    let password_hash = hash_password(&req.password)?;
    let code = generate_verification_code();
    let limit = st.config.dependency_timeout;

    let user = with_deadline(
        limit,
        "insert user",
        st.users.create_local(NewLocalUser {
            name,
            email: email.clone(),
            password_hash,
            verification_code: code.clone(),
        }),
    )
    .await?
    .ok_or_else(|| {
        warn!(%email, "email already registered");
        AppError::DuplicateEmail
    })?;

    let link = verification_link(&st.config.public_base_url, &code);
    let text = format!("Click here to verify your account: {link}");
    if let Err(e) = with_deadline(
        limit,
        "send verification email",
        st.mailer.send(&user.email, "Verify your email", &text),
    )
    .await
    {
        error!(error = %e, user_id = %user.id, "verification email failed; removing user");
        if let Err(cleanup) = with_deadline(limit, "delete user", st.users.delete(user.id)).await {
            error!(error = %cleanup, user_id = %user.id, "failed to remove unverified user");
        }
        return Err(e);
    }

    info!(user_id = %user.id, email = %user.email, "user registered");
    Ok(user)
}

pub async fn login_user(st: &AppState, req: LoginRequest) -> Result<String, AppError> {
    let email = normalize_email(&req.email);
    if !is_valid_email(&email) {
        warn!(%email, "invalid email");
        return Err(AppError::validation("Invalid email"));
    }

    let user = with_deadline(
        st.config.dependency_timeout,
        "find user",
        st.users.find_by_email(&email),
    )
    .await?
    .ok_or_else(|| {
        warn!(%email, "login unknown email");
        AppError::unauthorized(INVALID_CREDENTIALS)
    })?;

    // Federated accounts have no password to check against.
    let Some(hash) = user.password_hash.as_deref() else {
        warn!(user_id = %user.id, "password login for federated account");
        return Err(AppError::unauthorized(INVALID_CREDENTIALS));
    };
    if !verify_password(&req.password, hash)? {
        warn!(user_id = %user.id, "login invalid password");
        return Err(AppError::unauthorized(INVALID_CREDENTIALS));
    }
    if !user.is_verified {
        warn!(user_id = %user.id, "login before verification");
        return Err(AppError::unauthorized("email is not verified"));
    }

    let token = st.jwt.issue(user.id, &user.email)?;
    info!(user_id = %user.id, "user logged in");
    Ok(token)
}

pub async fn verify_email(st: &AppState, code: &str) -> Result<(), AppError> {
    let code = code.trim();
    if code.is_empty() {
        return Err(AppError::validation("Verification code is required"));
    }
    let user = with_deadline(
        st.config.dependency_timeout,
        "consume verification code",
        st.users.consume_verification_code(code),
    )
    .await?
    .ok_or(AppError::InvalidCode)?;
    info!(user_id = %user.id, "email verified");
    Ok(())
}

/// Maps a Google profile onto a local account (created verified on first sight)
/// and issues a session token for it.
pub async fn sign_in_federated(
    st: &AppState,
    profile: &ExternalProfile,
) -> Result<String, AppError> {
    let user = with_deadline(
        st.config.dependency_timeout,
        "resolve federated user",
        st.users.find_or_create_federated(&profile.name, &profile.email),
    )
    .await?;
    let token = st.jwt.issue(user.id, &user.email)?;
    info!(user_id = %user.id, provider = ?user.provider, "federated login");
    Ok(token)
}

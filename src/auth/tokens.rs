use jsonwebtoken::{
    decode, encode, errors::ErrorKind, Algorithm, DecodingKey, EncodingKey, Header, Validation,
};
use rand::RngCore;
use time::{Duration as TimeDuration, OffsetDateTime};
use tracing::{debug, warn};
use uuid::Uuid;

use super::claims::{Claims, OAuthStateClaims};
use crate::config::JwtConfig;

const ALGORITHM: Algorithm = Algorithm::HS256;
const OAUTH_STATE_PURPOSE: &str = "oauth_state";
const OAUTH_STATE_TTL: TimeDuration = TimeDuration::minutes(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum TokenError {
    #[error("token has expired")]
    Expired,
    #[error("invalid token")]
    Invalid,
}

/// Signs and verifies stateless HS256 tokens with the service secret.
/// Nothing is persisted: expiry is the only way a token stops working.
#[derive(Clone)]
pub struct JwtKeys {
    encoding: EncodingKey,
    decoding: DecodingKey,
    issuer: String,
    audience: String,
    session_ttl: TimeDuration,
}

impl JwtKeys {
    pub fn new(cfg: &JwtConfig) -> Self {
        Self {
            encoding: EncodingKey::from_secret(cfg.secret.as_bytes()),
            decoding: DecodingKey::from_secret(cfg.secret.as_bytes()),
            issuer: cfg.issuer.clone(),
            audience: cfg.audience.clone(),
            session_ttl: TimeDuration::hours(cfg.ttl_hours),
        }
    }

    /// Session token for every login path (password and Google).
    pub fn issue(&self, user_id: Uuid, email: &str) -> anyhow::Result<String> {
        self.issue_at(user_id, email, OffsetDateTime::now_utc(), self.session_ttl)
    }

    pub(crate) fn issue_at(
        &self,
        user_id: Uuid,
        email: &str,
        now: OffsetDateTime,
        ttl: TimeDuration,
    ) -> anyhow::Result<String> {
        let claims = Claims {
            sub: user_id,
            email: email.to_string(),
            role: None,
            iat: now.unix_timestamp().max(0) as usize,
            exp: (now + ttl).unix_timestamp().max(0) as usize,
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
        };
        let token = encode(&Header::new(ALGORITHM), &claims, &self.encoding)?;
        debug!(user_id = %user_id, "jwt signed");
        Ok(token)
    }

    pub fn validate(&self, token: &str) -> Result<Claims, TokenError> {
        let data = decode::<Claims>(token, &self.decoding, &self.validation()).map_err(map_err)?;
        debug!(user_id = %data.claims.sub, "jwt verified");
        Ok(data.claims)
    }

    /// Returns the signed `state` and the nonce it carries. The nonce is handed to the
    /// browser separately so the callback can tie the state to the client that asked for it.
    pub fn issue_oauth_state(&self) -> anyhow::Result<(String, String)> {
        let mut nonce = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut nonce);
        let nonce = hex::encode(nonce);
        let exp = OffsetDateTime::now_utc() + OAUTH_STATE_TTL;
        let claims = OAuthStateClaims {
            purpose: OAUTH_STATE_PURPOSE.to_string(),
            nonce: nonce.clone(),
            exp: exp.unix_timestamp() as usize,
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
        };
        let state = encode(&Header::new(ALGORITHM), &claims, &self.encoding)?;
        Ok((state, nonce))
    }

    /// Verifies `state` and returns its nonce.
    pub fn validate_oauth_state(&self, state: &str) -> Result<String, TokenError> {
        let data =
            decode::<OAuthStateClaims>(state, &self.decoding, &self.validation()).map_err(map_err)?;
        if data.claims.purpose != OAUTH_STATE_PURPOSE {
            warn!(purpose = %data.claims.purpose, "unexpected token purpose");
            return Err(TokenError::Invalid);
        }
        Ok(data.claims.nonce)
    }

    fn validation(&self) -> Validation {
        let mut validation = Validation::new(ALGORITHM);
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp", "iss", "aud"]);
        validation.set_audience(std::slice::from_ref(&self.audience));
        validation.set_issuer(std::slice::from_ref(&self.issuer));
        validation
    }
}

fn map_err(e: jsonwebtoken::errors::Error) -> TokenError {
    match e.kind() {
        ErrorKind::ExpiredSignature => TokenError::Expired,
        _ => TokenError::Invalid,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_keys(secret: &str, issuer: &str, audience: &str) -> JwtKeys {
        JwtKeys::new(&JwtConfig {
            secret: secret.into(),
            issuer: issuer.into(),
            audience: audience.into(),
            ttl_hours: 24,
        })
    }

    fn keys() -> JwtKeys {
        make_keys("dev-secret", "test-issuer", "test-aud")
    }

    #[test]
    fn issue_and_validate() {
        let keys = keys();
        let user_id = Uuid::new_v4();
        let token = keys.issue(user_id, "a@b.io").expect("issue");
        let claims = keys.validate(&token).expect("validate");
        assert_eq!(claims.sub, user_id);
        assert_eq!(claims.email, "a@b.io");
        assert_eq!(claims.iss, "test-issuer");
        assert_eq!(claims.aud, "test-aud");
        assert_eq!(claims.exp - claims.iat, 24 * 3600);
        assert_eq!(claims.role, None);
    }

    #[test]
    fn rejects_expired_token() {
        let keys = keys();
        let issued = OffsetDateTime::now_utc() - TimeDuration::hours(2);
        let token = keys
            .issue_at(Uuid::new_v4(), "a@b.io", issued, TimeDuration::hours(1))
            .expect("issue");
        assert_eq!(keys.validate(&token).unwrap_err(), TokenError::Expired);
    }

    #[test]
    fn accepts_token_until_expiry() {
        let keys = keys();
        let issued = OffsetDateTime::now_utc() - TimeDuration::minutes(59);
        let token = keys
            .issue_at(Uuid::new_v4(), "a@b.io", issued, TimeDuration::hours(1))
            .expect("issue");
        assert!(keys.validate(&token).is_ok());
    }

    #[test]
    fn rejects_tampered_signature() {
        let keys = keys();
        let token = keys.issue(Uuid::new_v4(), "a@b.io").expect("issue");
        let sig_start = token.rfind('.').unwrap() + 1;
        let mut bytes = token.into_bytes();
        bytes[sig_start] = if bytes[sig_start] == b'A' { b'B' } else { b'A' };
        let tampered = String::from_utf8(bytes).unwrap();
        assert_eq!(keys.validate(&tampered).unwrap_err(), TokenError::Invalid);
    }

    #[test]
    fn rejects_tampered_payload() {
        let keys = keys();
        let token = keys.issue(Uuid::new_v4(), "a@b.io").expect("issue");
        let forged = keys.issue(Uuid::new_v4(), "evil@b.io").expect("issue");
        let parts: Vec<&str> = token.split('.').collect();
        let forged_parts: Vec<&str> = forged.split('.').collect();
        let spliced = format!("{}.{}.{}", parts[0], forged_parts[1], parts[2]);
        assert_eq!(keys.validate(&spliced).unwrap_err(), TokenError::Invalid);
    }

    #[test]
    fn rejects_other_secret() {
        let token = make_keys("other-secret", "test-issuer", "test-aud")
            .issue(Uuid::new_v4(), "a@b.io")
            .expect("issue");
        assert_eq!(keys().validate(&token).unwrap_err(), TokenError::Invalid);
    }

    #[test]
    fn rejects_wrong_issuer_or_audience() {
        let token = make_keys("dev-secret", "bad-iss", "bad-aud")
            .issue(Uuid::new_v4(), "a@b.io")
            .expect("issue");
        assert_eq!(keys().validate(&token).unwrap_err(), TokenError::Invalid);
    }

    #[test]
    fn rejects_unexpected_algorithm() {
        let keys = keys();
        let now = OffsetDateTime::now_utc();
        let claims = Claims {
            sub: Uuid::new_v4(),
            email: "a@b.io".into(),
            role: None,
            iat: now.unix_timestamp() as usize,
            exp: (now + TimeDuration::hours(1)).unix_timestamp() as usize,
            iss: "test-issuer".into(),
            aud: "test-aud".into(),
        };
        let token = encode(
            &Header::new(Algorithm::HS512),
            &claims,
            &EncodingKey::from_secret(b"dev-secret"),
        )
        .unwrap();
        assert_eq!(keys.validate(&token).unwrap_err(), TokenError::Invalid);
    }

    #[test]
    fn rejects_token_without_exp() {
        #[derive(serde::Serialize)]
        struct NoExp<'a> {
            sub: Uuid,
            email: &'a str,
            iat: usize,
            iss: &'a str,
            aud: &'a str,
        }
        let token = encode(
            &Header::new(ALGORITHM),
            &NoExp {
                sub: Uuid::new_v4(),
                email: "a@b.io",
                iat: 0,
                iss: "test-issuer",
                aud: "test-aud",
            },
            &EncodingKey::from_secret(b"dev-secret"),
        )
        .unwrap();
        assert_eq!(keys().validate(&token).unwrap_err(), TokenError::Invalid);
    }

    #[test]
    fn oauth_state_roundtrip_and_separation() {
        let keys = keys();
        let (state, nonce) = keys.issue_oauth_state().expect("state");
        assert_eq!(keys.validate_oauth_state(&state).unwrap(), nonce);
        assert_eq!(nonce.len(), 32);
        // a state is not a session and vice versa
        assert_eq!(keys.validate(&state).unwrap_err(), TokenError::Invalid);
        let session = keys.issue(Uuid::new_v4(), "a@b.io").unwrap();
        assert_eq!(
            keys.validate_oauth_state(&session).unwrap_err(),
            TokenError::Invalid
        );
        assert!(keys.validate_oauth_state("state-token").is_err());
    }
}

//! Token verification. Tokens are issued by the account service; this side
//! only checks them.

use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use thiserror::Error;
use uuid::Uuid;

use tapline_types::api::Claims;

/// Who is on the other end of a connection or request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_id: Uuid,
    pub username: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("Authentication error")]
    Missing,

    #[error("Invalid token")]
    Invalid,
}

pub trait AuthVerifier: Send + Sync {
    fn verify(&self, token: &str) -> Result<Identity, AuthError>;
}

/// HS256 JWT verifier sharing its secret with the token issuer.
pub struct JwtVerifier {
    key: DecodingKey,
    validation: Validation,
}

impl JwtVerifier {
    pub fn new(secret: &str) -> Self {
        Self {
            key: DecodingKey::from_secret(secret.as_bytes()),
            validation: Validation::default(),
        }
    }
}

impl AuthVerifier for JwtVerifier {
    fn verify(&self, token: &str) -> Result<Identity, AuthError> {
        let token = token.trim();
        if token.is_empty() {
            return Err(AuthError::Missing);
        }
        let data = decode::<Claims>(token, &self.key, &self.validation).map_err(|e| {
            tracing::debug!("Token rejected: {}", e);
            AuthError::Invalid
        })?;
        Ok(Identity {
            user_id: data.claims.sub,
            username: data.claims.username,
        })
    }
}

/// Signs a token the way the account service does. Used by local tooling
/// and tests.
pub fn create_token(
    secret: &str,
    user_id: Uuid,
    username: &str,
    ttl: chrono::Duration,
) -> anyhow::Result<String> {
    let claims = Claims {
        sub: user_id,
        username: username.to_string(),
        exp: (chrono::Utc::now() + ttl).timestamp() as usize,
    };

    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )?;

    Ok(token)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_token_yields_identity() {
        let user_id = Uuid::new_v4();
        let token = create_token("s3cret", user_id, "alice", chrono::Duration::hours(1)).unwrap();

        let identity = JwtVerifier::new("s3cret").verify(&token).unwrap();
        assert_eq!(identity.user_id, user_id);
        assert_eq!(identity.username, "alice");
    }

    #[test]
    fn wrong_secret_and_expiry_are_rejected() {
        let token =
            create_token("s3cret", Uuid::new_v4(), "alice", chrono::Duration::hours(1)).unwrap();
        assert_eq!(JwtVerifier::new("other").verify(&token), Err(AuthError::Invalid));

        let expired =
            create_token("s3cret", Uuid::new_v4(), "alice", chrono::Duration::hours(-2)).unwrap();
        assert_eq!(JwtVerifier::new("s3cret").verify(&expired), Err(AuthError::Invalid));
    }

    #[test]
    fn blank_token_is_missing() {
        assert_eq!(JwtVerifier::new("s3cret").verify("  "), Err(AuthError::Missing));
        assert_eq!(JwtVerifier::new("s3cret").verify("garbage"), Err(AuthError::Invalid));
    }
}

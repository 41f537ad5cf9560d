/**
 * AUTH - Jetons d'accès de l'API REST
 *
 * RÔLE :
 * Émet et vérifie les JWT HS256 utilisés par le frontend (Authorization: Bearer).
 * Les clients machine peuvent toujours présenter la clé statique x-api-key.
 *
 * RÈGLES :
 * - Secret absent (JWT_SECRET) = aucun jeton émis ni accepté
 * - Login de démonstration : tout couple email/mot de passe non vide est accepté
 * - Expiration obligatoire (claim exp), durée configurable (auth.token_ttl_hours)
 */

use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use time::OffsetDateTime;

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("token signing is not configured")]
    NotConfigured,
    #[error("missing credentials")]
    MissingCredentials,
    #[error("invalid token: {0}")]
    InvalidToken(#[from] jsonwebtoken::errors::Error),
}

impl AuthError {
    pub fn as_label(&self) -> &'static str {
        match self {
            AuthError::NotConfigured => "auth_not_configured",
            AuthError::MissingCredentials => "auth_missing_credentials",
            AuthError::InvalidToken(_) => "auth_invalid_token",
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub exp: i64,
}

/// Secret JWT + clé API statique, partagés par le middleware et /auth/login
#[derive(Clone)]
pub struct Authenticator {
    jwt_secret: Option<Arc<str>>,
    api_key: Option<Arc<str>>,
    token_ttl: Duration,
}

impl Authenticator {
    pub fn new(jwt_secret: Option<String>, api_key: Option<String>, token_ttl: Duration) -> Self {
        Self {
            jwt_secret: jwt_secret.filter(|s| !s.is_empty()).map(Arc::from),
            api_key: api_key.filter(|k| !k.is_empty()).map(Arc::from),
            token_ttl,
        }
    }

    /// Aucun moyen d'authentification configuré : toute l'API est fermée
    pub fn is_closed(&self) -> bool {
        self.jwt_secret.is_none() && self.api_key.is_none()
    }

    pub fn issue(&self, subject: &str) -> Result<String, AuthError> {
        let exp = OffsetDateTime::now_utc().unix_timestamp() + self.token_ttl.as_secs() as i64;
        self.issue_with_expiry(subject, exp)
    }

    fn issue_with_expiry(&self, subject: &str, exp: i64) -> Result<String, AuthError> {
        let secret = self.jwt_secret.as_deref().ok_or(AuthError::NotConfigured)?;
        if subject.trim().is_empty() {
            return Err(AuthError::MissingCredentials);
        }
        let claims = Claims { sub: subject.to_string(), exp };
        Ok(encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )?)
    }

    pub fn verify(&self, token: &str) -> Result<Claims, AuthError> {
        let secret = self.jwt_secret.as_deref().ok_or(AuthError::NotConfigured)?;
        let data = decode::<Claims>(
            token,
            &DecodingKey::from_secret(secret.as_bytes()),
            &Validation::default(),
        )?;
        Ok(data.claims)
    }

    pub fn api_key_matches(&self, presented: &str) -> bool {
        self.api_key.as_deref().is_some_and(|k| k == presented)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn auth() -> Authenticator {
        Authenticator::new(Some("s3cret".into()), None, Duration::from_secs(3600))
    }

    #[test]
    fn test_issue_then_verify() {
        let a = auth();
        let token = a.issue("ops@elid.local").unwrap();
        let claims = a.verify(&token).unwrap();
        assert_eq!(claims.sub, "ops@elid.local");
        assert!(claims.exp > OffsetDateTime::now_utc().unix_timestamp());
    }

    #[test]
    fn test_foreign_or_expired_tokens_rejected() {
        let a = auth();
        let other = Authenticator::new(Some("other".into()), None, Duration::from_secs(3600));
        let foreign = other.issue("x@y").unwrap();
        assert!(matches!(a.verify(&foreign), Err(AuthError::InvalidToken(_))));

        let past = OffsetDateTime::now_utc().unix_timestamp() - 3600;
        let expired = a.issue_with_expiry("x@y", past).unwrap();
        assert!(matches!(a.verify(&expired), Err(AuthError::InvalidToken(_))));
        assert!(a.verify("not.a.jwt").is_err());
    }

    #[test]
    fn test_without_secret_nothing_is_issued() {
        let a = Authenticator::new(None, Some("key".into()), Duration::from_secs(60));
        assert!(matches!(a.issue("x@y"), Err(AuthError::NotConfigured)));
        assert!(a.api_key_matches("key"));
        assert!(!a.api_key_matches("nope"));
        assert!(!a.is_closed());
        assert!(Authenticator::new(Some(String::new()), None, Duration::ZERO).is_closed());
    }
}

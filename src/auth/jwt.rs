use jsonwebtoken::{
    decode, encode, errors::ErrorKind, DecodingKey, EncodingKey, Header, Validation,
};
use time::{Duration, OffsetDateTime};
use tracing::debug;
use uuid::Uuid;

use super::claims::{Claims, TokenKind};
use crate::config::JwtConfig;

#[derive(Debug, thiserror::Error)]
pub enum TokenError {
    #[error("token expired")]
    Expired,
    #[error("token rejected: {0}")]
    Rejected(jsonwebtoken::errors::Error),
    #[error("expected {expected:?} token, got {actual:?}")]
    WrongKind { expected: TokenKind, actual: TokenKind },
    #[error("token signing failed: {0}")]
    Signing(jsonwebtoken::errors::Error),
    #[error("token lifetime {0} overflows the expiry timestamp")]
    ExpiryOutOfRange(Duration),
}

impl From<jsonwebtoken::errors::Error> for TokenError {
    fn from(e: jsonwebtoken::errors::Error) -> Self {
        match e.kind() {
            ErrorKind::ExpiredSignature => TokenError::Expired,
            _ => TokenError::Rejected(e),
        }
    }
}

/// Access/refresh pair. The expiry instants are exactly the `exp` claims
/// embedded in the tokens.
#[derive(Debug, Clone)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    pub access_expires_at: OffsetDateTime,
    pub refresh_expires_at: OffsetDateTime,
}

/// Issues bearer credentials for an authenticated user and maps them back.
pub trait SessionIssuer: Send + Sync {
    fn issue(&self, user_id: Uuid) -> Result<TokenPair, TokenError>;

    fn parse(&self, token: &str, kind: TokenKind) -> Result<Claims, TokenError>;
}

/// Holds JWT signing and verification keys with config data.
#[derive(Clone)]
pub struct JwtKeys {
    pub encoding: EncodingKey,
    pub decoding: DecodingKey,
    pub issuer: String,
    pub audience: String,
    pub access_ttl: Duration,
    pub refresh_ttl: Duration,
}

impl JwtKeys {
    pub fn from_config(cfg: &JwtConfig) -> Self {
        Self {
            encoding: EncodingKey::from_secret(cfg.secret.as_bytes()),
            decoding: DecodingKey::from_secret(cfg.secret.as_bytes()),
            issuer: cfg.issuer.clone(),
            audience: cfg.audience.clone(),
            access_ttl: Duration::seconds(cfg.ttl_minutes.saturating_mul(60)),
            refresh_ttl: Duration::seconds(cfg.refresh_ttl_minutes.saturating_mul(60)),
        }
    }

    fn sign(
        &self,
        user_id: Uuid,
        kind: TokenKind,
        now: OffsetDateTime,
        exp: OffsetDateTime,
    ) -> Result<String, TokenError> {
        let claims = Claims {
            sub: user_id,
            iat: now.unix_timestamp(),
            exp: exp.unix_timestamp(),
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
            kind,
        };
        let token =
            encode(&Header::default(), &claims, &self.encoding).map_err(TokenError::Signing)?;
        debug!(user_id = %user_id, kind = ?kind, "jwt signed");
        Ok(token)
    }

    fn verify(&self, token: &str) -> Result<Claims, TokenError> {
        let mut validation = Validation::default();
        validation.set_audience(std::slice::from_ref(&self.audience));
        validation.set_issuer(std::slice::from_ref(&self.issuer));
        let data = decode::<Claims>(token, &self.decoding, &validation)?;
        debug!(user_id = %data.claims.sub, kind = ?data.claims.kind, "jwt verified");
        Ok(data.claims)
    }
}

impl SessionIssuer for JwtKeys {
    fn issue(&self, user_id: Uuid) -> Result<TokenPair, TokenError> {
        // whole seconds, so the reported instants equal the embedded claims
        let now = OffsetDateTime::from_unix_timestamp(OffsetDateTime::now_utc().unix_timestamp())
            .unwrap_or_else(|_| OffsetDateTime::now_utc());
        let expires = |ttl: Duration| now.checked_add(ttl).ok_or(TokenError::ExpiryOutOfRange(ttl));
        let access_expires_at = expires(self.access_ttl)?;
        let refresh_expires_at = expires(self.refresh_ttl)?;

        Ok(TokenPair {
            access_token: self.sign(user_id, TokenKind::Access, now, access_expires_at)?,
            refresh_token: self.sign(user_id, TokenKind::Refresh, now, refresh_expires_at)?,
            access_expires_at,
            refresh_expires_at,
        })
    }

    fn parse(&self, token: &str, kind: TokenKind) -> Result<Claims, TokenError> {
        let claims = self.verify(token)?;
        if claims.kind != kind {
            return Err(TokenError::WrongKind {
                expected: kind,
                actual: claims.kind,
            });
        }
        Ok(claims)
    }
}

#[cfg(test)]
pub(crate) fn test_config() -> JwtConfig {
    JwtConfig {
        secret: "dev-secret".into(),
        issuer: "test-issuer".into(),
        audience: "test-aud".into(),
        ttl_minutes: 5,
        refresh_ttl_minutes: 60,
    }
}

#[cfg(test)]
pub(crate) fn test_keys() -> JwtKeys {
    JwtKeys::from_config(&test_config())
}

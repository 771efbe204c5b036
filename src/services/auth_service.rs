use crate::domain::credentials::{ApnsSigningKey, ClientCertificate, Credentials};
use crate::error::CredentialsError;
use jsonwebtoken::{Algorithm, Header, encode};
use serde::{Deserialize, Serialize};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use time::OffsetDateTime;

/// Provider tokens older than this are replaced before use. The gateway rejects
/// tokens older than an hour and refreshes more often than every 20 minutes.
pub const DEFAULT_TOKEN_TTL: Duration = Duration::from_secs(50 * 60);

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProviderClaims {
    pub iss: String,
    pub iat: i64,
}

/// A signed provider token, ready for the `authorization` header.
#[derive(Clone, PartialEq, Eq)]
pub struct AuthToken {
    jwt: String,
    issued_at: OffsetDateTime,
}

impl AuthToken {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.jwt
    }

    #[must_use]
    pub const fn issued_at(&self) -> OffsetDateTime {
        self.issued_at
    }

    #[must_use]
    pub fn bearer(&self) -> String {
        format!("bearer {}", self.jwt)
    }
}

impl std::fmt::Debug for AuthToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthToken").field("issued_at", &self.issued_at).finish_non_exhaustive()
    }
}

/// Owns the client's credentials and derives what each connection needs from them.
///
/// For signing keys this mints ES256 provider tokens and caches them until
/// they are older than the configured TTL or the gateway reports them expired.
#[derive(Debug)]
pub struct AuthService {
    credentials: Credentials,
    token_ttl: Duration,
    cached: Mutex<Option<AuthToken>>,
}

impl AuthService {
    #[must_use]
    pub fn new(credentials: Credentials, token_ttl: Duration) -> Self {
        Self { credentials, token_ttl, cached: Mutex::new(None) }
    }

    /// Returns the token to attach to requests, or `None` when the connection is
    /// authenticated by its client certificate.
    ///
    /// # Errors
    /// Returns `CredentialsError::Signing` if a new token cannot be signed.
    pub fn authenticate(&self) -> Result<Option<AuthToken>, CredentialsError> {
        match &self.credentials {
            Credentials::Certificate(_) => Ok(None),
            Credentials::SigningKey(key) => self.current_token(key).map(Some),
        }
    }

    /// Client certificate to present during the TLS handshake, if any.
    #[must_use]
    pub const fn tls_identity(&self) -> Option<&ClientCertificate> {
        match &self.credentials {
            Credentials::Certificate(certificate) => Some(certificate),
            Credentials::SigningKey(_) => None,
        }
    }

    /// Drops the cached token so the next request signs a fresh one.
    pub fn invalidate_token(&self) {
        let mut cached = self.cached.lock().unwrap_or_else(PoisonError::into_inner);
        if cached.take().is_some() {
            tracing::info!("Provider token invalidated, a new one will be signed");
        }
    }

    fn current_token(&self, key: &ApnsSigningKey) -> Result<AuthToken, CredentialsError> {
        let mut cached = self.cached.lock().unwrap_or_else(PoisonError::into_inner);
        let now = OffsetDateTime::now_utc();

        if let Some(token) = cached.as_ref() {
            if now - token.issued_at < self.token_ttl {
                return Ok(token.clone());
            }
        }

        let token = sign_token(key, now)?;
        tracing::debug!(key_id = %key.key_id(), "Signed new provider token");
        *cached = Some(token.clone());
        Ok(token)
    }
}

#[tracing::instrument(level = "debug", skip(key), fields(key_id = %key.key_id()), err)]
fn sign_token(key: &ApnsSigningKey, issued_at: OffsetDateTime) -> Result<AuthToken, CredentialsError> {
    let mut header = Header::new(Algorithm::ES256);
    header.kid = Some(key.key_id().to_string());

    let claims = ProviderClaims { iss: key.team_id().to_string(), iat: issued_at.unix_timestamp() };
    let jwt = encode(&header, &claims, key.encoding_key()).map_err(|e| CredentialsError::Signing(e.to_string()))?;

    Ok(AuthToken { jwt, issued_at })
}

//! JWT token generation and verification.
//!
//! Tokens are HS256 and carry a `token_type` claim, so an access token can
//! never stand in for a refresh token or the other way round.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

use super::AuthError;
use crate::config::AuthConfig;
use crate::models::auth::{TokenClaims, TokenPair, TokenType};
use crate::store::{CredentialStore, with_deadline};

/// Tolerated clock skew when checking `exp` and `nbf`.
const LEEWAY_SECS: u64 = 5;

/// How long past its `exp` a token is still accepted.
pub(crate) fn leeway() -> Duration {
    Duration::seconds(LEEWAY_SECS as i64)
}

/// Why a presented token was not accepted.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TokenError {
    #[error("no token presented")]
    Missing,

    #[error("malformed token: {0}")]
    Malformed(String),

    #[error("bad signature")]
    BadSignature,

    #[error("token expired")]
    Expired,

    #[error("token not yet valid")]
    NotYetValid,

    #[error("unexpected issuer")]
    WrongIssuer,

    #[error("expected {expected} token, got {actual}")]
    WrongType {
        expected: TokenType,
        actual: TokenType,
    },
}

impl From<jsonwebtoken::errors::Error> for TokenError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        match err.kind() {
            ErrorKind::ExpiredSignature => TokenError::Expired,
            ErrorKind::InvalidSignature
            | ErrorKind::InvalidAlgorithm
            | ErrorKind::InvalidAlgorithmName => TokenError::BadSignature,
            ErrorKind::ImmatureSignature => TokenError::NotYetValid,
            ErrorKind::InvalidIssuer => TokenError::WrongIssuer,
            _ => TokenError::Malformed(err.to_string()),
        }
    }
}

/// Mints, validates and refreshes token pairs.
#[derive(Clone)]
pub struct TokenManager {
    config: AuthConfig,
    encoding: EncodingKey,
    decoding: DecodingKey,
    credentials: Arc<dyn CredentialStore>,
}

impl TokenManager {
    pub fn new(config: &AuthConfig, credentials: Arc<dyn CredentialStore>) -> Self {
        Self {
            encoding: EncodingKey::from_secret(config.jwt_secret.as_bytes()),
            decoding: DecodingKey::from_secret(config.jwt_secret.as_bytes()),
            config: config.clone(),
            credentials,
        }
    }

    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    /// Issue an access token and a refresh token for a principal.
    ///
    /// The refresh lifetime is the remember-me lifetime when `remember_me` is
    /// set. Every token gets a fresh `jti`, so two pairs minted in the same
    /// second still differ.
    pub fn issue_token_pair(
        &self,
        principal_id: i64,
        username: &str,
        role_id: i64,
        remember_me: bool,
    ) -> Result<TokenPair, AuthError> {
        let now = Utc::now();
        let access_ttl = self.config.access_token_ttl;
        let refresh_ttl = self.config.refresh_ttl_for(remember_me);

        let access = self.claims(
            principal_id,
            username,
            role_id,
            TokenType::Access,
            remember_me,
            now,
            access_ttl,
        )?;
        let refresh = self.claims(
            principal_id,
            username,
            role_id,
            TokenType::Refresh,
            remember_me,
            now,
            refresh_ttl,
        )?;

        Ok(TokenPair {
            access_token: self.sign(&access)?,
            refresh_token: self.sign(&refresh)?,
            access_ttl: access_ttl.num_seconds(),
            refresh_ttl: refresh_ttl.num_seconds(),
            access_expires_at: expiry(now, access_ttl)?,
            refresh_expires_at: expiry(now, refresh_ttl)?,
        })
    }

    #[allow(clippy::too_many_arguments)]
    fn claims(
        &self,
        principal_id: i64,
        username: &str,
        role_id: i64,
        token_type: TokenType,
        remember_me: bool,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> Result<TokenClaims, AuthError> {
        Ok(TokenClaims {
            sub: principal_id.to_string(),
            username: username.to_string(),
            role_id,
            token_type,
            remember_me,
            iss: self.config.issuer.clone(),
            iat: now.timestamp(),
            nbf: now.timestamp(),
            exp: expiry(now, ttl)?.timestamp(),
            jti: Uuid::now_v7().to_string(),
        })
    }

    fn sign(&self, claims: &TokenClaims) -> Result<String, AuthError> {
        encode(&Header::new(Algorithm::HS256), claims, &self.encoding)
            .map_err(|e| AuthError::Internal(format!("jwt encode: {e}")))
    }

    fn validation(&self, check_exp: bool) -> Validation {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = LEEWAY_SECS;
        validation.validate_exp = check_exp;
        validation.validate_nbf = true;
        validation.set_issuer(&[self.config.issuer.as_str()]);
        validation.set_required_spec_claims(&["exp", "nbf", "iss", "sub"]);
        validation
    }

    /// Verify signature, algorithm, issuer, expiry and not-before.
    pub fn validate_token(&self, token: &str) -> Result<TokenClaims, TokenError> {
        if token.trim().is_empty() {
            return Err(TokenError::Missing);
        }
        let data = decode::<TokenClaims>(token, &self.decoding, &self.validation(true))?;
        Ok(data.claims)
    }

    /// [`Self::validate_token`] restricted to access tokens.
    pub fn validate_access(&self, token: &str) -> Result<TokenClaims, TokenError> {
        expect_type(self.validate_token(token)?, TokenType::Access)
    }

    /// [`Self::validate_token`] restricted to refresh tokens.
    pub fn validate_refresh(&self, token: &str) -> Result<TokenClaims, TokenError> {
        expect_type(self.validate_token(token)?, TokenType::Refresh)
    }

    /// Signature-checked claims of a token that may already be expired.
    pub fn inspect(&self, token: &str) -> Result<TokenClaims, TokenError> {
        if token.trim().is_empty() {
            return Err(TokenError::Missing);
        }
        let data = decode::<TokenClaims>(token, &self.decoding, &self.validation(false))?;
        Ok(data.claims)
    }

    /// Exchange a refresh token for a new pair.
    ///
    /// The subject is re-read from the credential store so the new pair
    /// carries its current username and role. The presented token is not
    /// revoked here.
    pub async fn refresh_token_pair(&self, refresh_token: &str) -> Result<TokenPair, AuthError> {
        let claims = self.validate_refresh(refresh_token)?;
        let principal_id = claims.principal_id().ok_or_else(|| {
            TokenError::Malformed(format!("subject '{}' is not a principal id", claims.sub))
        })?;

        let principal = with_deadline(
            self.config.storage_timeout,
            self.credentials.find_by_id(principal_id),
        )
        .await?
        .ok_or(AuthError::AccountUnavailable)?;

        if !principal.status.is_active() {
            debug!(
                principal_id,
                status = principal.status.as_str(),
                "refresh refused for inactive principal"
            );
            return Err(AuthError::AccountUnavailable);
        }

        self.issue_token_pair(
            principal.id,
            &principal.username,
            principal.role_id,
            claims.remember_me,
        )
    }
}

fn expiry(now: DateTime<Utc>, ttl: Duration) -> Result<DateTime<Utc>, AuthError> {
    now.checked_add_signed(ttl)
        .ok_or_else(|| AuthError::Internal(format!("token lifetime {ttl} out of range")))
}

fn expect_type(claims: TokenClaims, expected: TokenType) -> Result<TokenClaims, TokenError> {
    if claims.token_type != expected {
        return Err(TokenError::WrongType {
            expected,
            actual: claims.token_type,
        });
    }
    Ok(claims)
}

//! Token revocation list.
//!
//! Tokens are stored as SHA-256 hashes until their own expiry plus the
//! validation leeway, after which the signature check rejects them anyway
//! and the entry can be swept.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use sha2::{Digest, Sha256};
use tracing::{debug, info};

use super::AuthError;
use super::jwt::{TokenError, TokenManager, leeway};
use crate::clock::Clock;
use crate::models::auth::RevocationEntry;
use crate::store::{RevocationRepository, with_deadline};

/// SHA-256 hash of a token string (hex-encoded).
pub fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[derive(Clone)]
pub struct RevocationService {
    tokens: TokenManager,
    revocations: Arc<dyn RevocationRepository>,
    clock: Arc<dyn Clock>,
    timeout: StdDuration,
}

impl RevocationService {
    pub fn new(
        tokens: TokenManager,
        revocations: Arc<dyn RevocationRepository>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let timeout = tokens.config().storage_timeout;
        Self {
            tokens,
            revocations,
            clock,
            timeout,
        }
    }

    /// Blacklist a token until it stops validating. Revoking twice is fine.
    pub async fn revoke(
        &self,
        token: &str,
        principal_id: i64,
        username: &str,
        reason: &str,
    ) -> Result<(), AuthError> {
        let claims = self.tokens.inspect(token)?;
        let expires_at = claims
            .expires_at()
            .ok_or_else(|| TokenError::Malformed(format!("exp {} out of range", claims.exp)))?;

        let now = self.clock.now();
        if expires_at + leeway() <= now {
            debug!(principal_id, "token already expired, nothing to revoke");
            return Ok(());
        }

        let entry = RevocationEntry {
            token_hash: hash_token(token),
            principal_id,
            username: username.to_string(),
            reason: reason.to_string(),
            expires_at,
            revoked_at: now,
        };
        with_deadline(self.timeout, self.revocations.insert(&entry)).await?;

        info!(
            principal_id,
            username,
            reason,
            token_type = %claims.token_type,
            "token revoked"
        );
        Ok(())
    }

    pub async fn is_revoked(&self, token: &str) -> Result<bool, AuthError> {
        let hash = hash_token(token);
        Ok(with_deadline(self.timeout, self.revocations.contains(&hash)).await?)
    }

    /// Drop entries whose token no longer validates on its own.
    pub async fn sweep(&self) -> Result<u64, AuthError> {
        let cutoff = self.clock.now() - leeway();
        let removed =
            with_deadline(self.timeout, self.revocations.delete_expired(cutoff)).await?;
        debug!(removed, "expired revocations swept");
        Ok(removed)
    }
}

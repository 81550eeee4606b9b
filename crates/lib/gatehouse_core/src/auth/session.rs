//! Login, logout, refresh and per-request authentication.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use super::AuthError;
use super::bearer::extract_bearer;
use super::brute_force::BruteForceGuard;
use super::jwt::{TokenError, TokenManager};
use super::password::verify_password;
use super::revocation::RevocationService;
use crate::authz::AuthorizationEngine;
use crate::clock::Clock;
use crate::config::AuthConfig;
use crate::models::auth::{Principal, TokenClaims, TokenPair};
use crate::store::{CredentialStore, Repositories, with_deadline};

/// Origin recorded when the caller supplies none.
const UNKNOWN_ORIGIN: &str = "unknown";

#[derive(Debug, Clone, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
    /// Client address the attempt came from.
    pub origin: String,
    #[serde(default)]
    pub remember_me: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct LoginOutcome {
    pub principal_id: i64,
    pub username: String,
    pub role_id: i64,
    pub tokens: TokenPair,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LogoutOutcome {
    /// False when a revocation could not be written; the tokens then stay
    /// valid until they expire.
    pub revocation_persisted: bool,
}

/// Entry point for the HTTP layer.
#[derive(Clone)]
pub struct Authenticator {
    config: AuthConfig,
    credentials: Arc<dyn CredentialStore>,
    tokens: TokenManager,
    revocations: RevocationService,
    guard: BruteForceGuard,
    engine: AuthorizationEngine,
    clock: Arc<dyn Clock>,
}

impl Authenticator {
    pub fn new(config: AuthConfig, repos: Repositories, clock: Arc<dyn Clock>) -> Self {
        let tokens = TokenManager::new(&config, repos.credentials.clone());
        let revocations =
            RevocationService::new(tokens.clone(), repos.revocations.clone(), clock.clone());
        let guard = BruteForceGuard::new(
            repos.attempts.clone(),
            clock.clone(),
            config.lockout,
            config.storage_timeout,
        );
        let engine = AuthorizationEngine::new(repos.policies.clone(), config.storage_timeout);
        Self {
            config,
            credentials: repos.credentials,
            tokens,
            revocations,
            guard,
            engine,
            clock,
        }
    }

    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    pub fn tokens(&self) -> &TokenManager {
        &self.tokens
    }

    pub fn revocations(&self) -> &RevocationService {
        &self.revocations
    }

    pub fn guard(&self) -> &BruteForceGuard {
        &self.guard
    }

    pub fn engine(&self) -> &AuthorizationEngine {
        &self.engine
    }

    /// Verify credentials and issue a token pair.
    ///
    /// A blocked `(username, origin)` pair is refused before any lookup or
    /// password check. Unknown accounts and wrong passwords fail alike.
    pub async fn login(&self, request: LoginRequest) -> Result<LoginOutcome, AuthError> {
        let username = request.username.trim();
        if username.is_empty() || request.password.is_empty() {
            return Err(AuthError::Validation(
                "username and password are required".into(),
            ));
        }
        let origin = match request.origin.trim() {
            "" => UNKNOWN_ORIGIN,
            origin => origin,
        };

        if self.guard.is_blocked(username, origin).await? {
            warn!(username, origin, "login refused: pair is blocked");
            return Err(AuthError::Blocked);
        }

        let principal = with_deadline(
            self.config.storage_timeout,
            self.credentials.find_by_username(username),
        )
        .await?;

        let verified = match &principal {
            Some(p) => self.verify(&request.password, p).await,
            None => false,
        };

        let blocked = self.guard.check_and_record(username, origin, verified).await?;

        let principal = match principal {
            Some(p) if verified => p,
            _ => {
                debug!(username, origin, "login failed: bad credentials");
                return Err(AuthError::CredentialError);
            }
        };
        if blocked {
            warn!(username, origin, "login refused: pair became blocked");
            return Err(AuthError::Blocked);
        }
        if !principal.status.is_active() {
            warn!(
                username,
                status = principal.status.as_str(),
                "login refused: account unavailable"
            );
            return Err(AuthError::AccountUnavailable);
        }

        let tokens = self.tokens.issue_token_pair(
            principal.id,
            &principal.username,
            principal.role_id,
            request.remember_me,
        )?;

        let now = self.clock.now();
        if let Err(e) = with_deadline(
            self.config.storage_timeout,
            self.credentials.record_login(principal.id, now, origin),
        )
        .await
        {
            warn!(principal_id = principal.id, error = %e, "failed to record last login");
        }

        info!(
            principal_id = principal.id,
            username = %principal.username,
            origin,
            remember_me = request.remember_me,
            "login succeeded"
        );
        Ok(LoginOutcome {
            principal_id: principal.id,
            username: principal.username,
            role_id: principal.role_id,
            tokens,
        })
    }

    /// A hash that cannot be checked counts as a failed attempt.
    async fn verify(&self, password: &str, principal: &Principal) -> bool {
        let password = password.to_string();
        let hash = principal.password_hash.clone();
        let result = tokio::task::spawn_blocking(move || verify_password(&password, &hash))
            .await
            .map_err(|e| AuthError::Internal(format!("password verification task: {e}")))
            .and_then(|verified| verified);
        match result {
            Ok(verified) => verified,
            Err(e) => {
                error!(
                    principal_id = principal.id,
                    error = %e,
                    "password verification failed"
                );
                false
            }
        }
    }

    /// Revoke the presented tokens.
    ///
    /// Never fails: a revocation that cannot be stored is logged and reported
    /// through [`LogoutOutcome::revocation_persisted`].
    pub async fn logout(
        &self,
        access_token: &str,
        refresh_token: Option<&str>,
        reason: &str,
    ) -> LogoutOutcome {
        let mut persisted = true;
        for token in std::iter::once(access_token).chain(refresh_token) {
            let claims = match self.tokens.inspect(token) {
                Ok(claims) => claims,
                Err(e) => {
                    debug!(error = %e, "logout skipped unusable token");
                    continue;
                }
            };
            let principal_id = claims.principal_id().unwrap_or_default();
            if let Err(e) = self
                .revocations
                .revoke(token, principal_id, &claims.username, reason)
                .await
            {
                error!(
                    principal_id,
                    username = %claims.username,
                    token_type = %claims.token_type,
                    error = %e,
                    "token revocation not persisted"
                );
                persisted = false;
            }
        }
        LogoutOutcome {
            revocation_persisted: persisted,
        }
    }

    /// Exchange a refresh token for a new pair.
    pub async fn refresh(&self, refresh_token: &str) -> Result<TokenPair, AuthError> {
        let claims = self.tokens.validate_refresh(refresh_token)?;
        if self.revocations.is_revoked(refresh_token).await? {
            warn!(sub = %claims.sub, "revoked refresh token presented");
            return Err(AuthError::Revoked);
        }

        let pair = self.tokens.refresh_token_pair(refresh_token).await?;

        if self.config.rotate_refresh_tokens {
            let principal_id = claims.principal_id().unwrap_or_default();
            self.revocations
                .revoke(refresh_token, principal_id, &claims.username, "rotated")
                .await?;
        }
        debug!(sub = %claims.sub, "token pair refreshed");
        Ok(pair)
    }

    /// Resolve an `Authorization` header to access-token claims.
    pub async fn authenticate(
        &self,
        authorization: Option<&str>,
    ) -> Result<TokenClaims, AuthError> {
        let token = extract_bearer(authorization);
        let claims = self.tokens.validate_access(token)?;
        if self.revocations.is_revoked(token).await? {
            debug!(sub = %claims.sub, "revoked access token presented");
            return Err(AuthError::Revoked);
        }
        Ok(claims)
    }

    /// Authenticate, then authorize `(path, method)` for the token's subject.
    pub async fn authorize_request(
        &self,
        authorization: Option<&str>,
        path: &str,
        method: &str,
    ) -> Result<TokenClaims, AuthError> {
        let claims = self.authenticate(authorization).await?;
        let principal_id = claims.principal_id().ok_or_else(|| {
            TokenError::Malformed(format!("subject '{}' is not a principal id", claims.sub))
        })?;

        let decision = self.engine.authorize(principal_id, path, method).await?;
        if !decision.is_allowed() {
            warn!(principal_id, path, method, "request denied");
            return Err(AuthError::Forbidden);
        }
        Ok(claims)
    }
}

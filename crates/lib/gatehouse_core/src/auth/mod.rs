//! Authentication: password hashing, JWT pairs, revocation, brute-force
//! protection and the session flows built from them.

pub mod bearer;
pub mod brute_force;
pub mod jwt;
pub mod password;
pub mod revocation;
pub mod session;

use thiserror::Error;

use crate::authz::AuthzError;
use crate::store::StorageError;
use jwt::TokenError;

/// Authentication errors.
#[derive(Debug, Error)]
pub enum AuthError {
    /// Unknown account or wrong password; the two are never distinguished.
    #[error("Invalid credentials")]
    CredentialError,

    #[error("Token error: {0}")]
    Token(#[from] TokenError),

    #[error("Token has been revoked")]
    Revoked,

    #[error("Too many failed login attempts")]
    Blocked,

    #[error("Account is disabled or locked")]
    AccountUnavailable,

    #[error("Access denied")]
    Forbidden,

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Storage error: {0}")]
    Storage(StorageError),

    /// A storage call missed its deadline; the answer is unknown.
    #[error("Indeterminate: {0}")]
    Indeterminate(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<StorageError> for AuthError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::DeadlineExceeded(limit) => {
                AuthError::Indeterminate(format!("storage call exceeded {limit:?}"))
            }
            other => AuthError::Storage(other),
        }
    }
}

impl From<AuthzError> for AuthError {
    fn from(err: AuthzError) -> Self {
        match err {
            AuthzError::Storage(e) => AuthError::Storage(e),
            AuthzError::Indeterminate(msg) => AuthError::Indeterminate(msg),
            AuthzError::Validation(msg) => AuthError::Validation(msg),
        }
    }
}

/// What a transport layer should tell the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Unauthorized,
    Forbidden,
    Locked,
    BadRequest,
    Unavailable,
}

impl Outcome {
    /// Conventional HTTP status code.
    pub fn status_code(&self) -> u16 {
        match self {
            Outcome::Unauthorized => 401,
            Outcome::Forbidden => 403,
            Outcome::Locked => 429,
            Outcome::BadRequest => 400,
            Outcome::Unavailable => 503,
        }
    }
}

impl AuthError {
    /// Collapse the error into a caller-facing outcome.
    ///
    /// Bad tokens, revoked tokens and bad credentials all look alike.
    pub fn outcome(&self) -> Outcome {
        match self {
            AuthError::CredentialError | AuthError::Token(_) | AuthError::Revoked => {
                Outcome::Unauthorized
            }
            AuthError::Forbidden | AuthError::AccountUnavailable => Outcome::Forbidden,
            AuthError::Blocked => Outcome::Locked,
            AuthError::Validation(_) => Outcome::BadRequest,
            AuthError::Storage(_) | AuthError::Indeterminate(_) | AuthError::Internal(_) => {
                Outcome::Unavailable
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn deadline_becomes_indeterminate() {
        let err: AuthError = StorageError::DeadlineExceeded(Duration::from_millis(10)).into();
        assert!(matches!(err, AuthError::Indeterminate(_)));
        assert_eq!(err.outcome(), Outcome::Unavailable);
    }

    #[test]
    fn token_failures_look_like_bad_credentials() {
        assert_eq!(AuthError::CredentialError.outcome(), Outcome::Unauthorized);
        assert_eq!(AuthError::Revoked.outcome(), Outcome::Unauthorized);
        assert_eq!(
            AuthError::Token(TokenError::Expired).outcome(),
            Outcome::Unauthorized
        );
        assert_eq!(AuthError::Blocked.outcome().status_code(), 429);
    }
}

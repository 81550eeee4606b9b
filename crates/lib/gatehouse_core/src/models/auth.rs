//! Authentication domain models.
//!
//! Principals, issued token claims, login-attempt bookkeeping and revocation
//! entries. Storage layers map these to rows; nothing here performs I/O.

use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Account status of a principal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrincipalStatus {
    Active,
    Disabled,
    Locked,
}

impl PrincipalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PrincipalStatus::Active => "active",
            PrincipalStatus::Disabled => "disabled",
            PrincipalStatus::Locked => "locked",
        }
    }

    /// Parse a stored status value.
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "active" => Some(PrincipalStatus::Active),
            "disabled" => Some(PrincipalStatus::Disabled),
            "locked" => Some(PrincipalStatus::Locked),
            _ => None,
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self, PrincipalStatus::Active)
    }
}

/// A user identity as held by the credential store.
#[derive(Debug, Clone)]
pub struct Principal {
    pub id: i64,
    pub username: String,
    /// bcrypt hash of the password.
    pub password_hash: String,
    /// Primary role, embedded in issued tokens.
    pub role_id: i64,
    pub status: PrincipalStatus,
    pub last_login_at: Option<DateTime<Utc>>,
    pub last_login_origin: Option<String>,
}

impl Principal {
    /// Build an active principal with no login history.
    pub fn new(id: i64, username: &str, password_hash: &str, role_id: i64) -> Self {
        Self {
            id,
            username: username.to_string(),
            password_hash: password_hash.to_string(),
            role_id,
            status: PrincipalStatus::Active,
            last_login_at: None,
            last_login_origin: None,
        }
    }
}

/// Which half of a token pair a JWT is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenType {
    Access,
    Refresh,
}

impl TokenType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenType::Access => "access",
            TokenType::Refresh => "refresh",
        }
    }
}

impl fmt::Display for TokenType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// JWT claims embedded in both access and refresh tokens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenClaims {
    /// Principal ID as a decimal string (JWT `sub` claim).
    pub sub: String,
    pub username: String,
    pub role_id: i64,
    pub token_type: TokenType,
    pub remember_me: bool,
    /// Issuer.
    pub iss: String,
    /// Issued at (unix timestamp).
    pub iat: i64,
    /// Not before (unix timestamp).
    pub nbf: i64,
    /// Expiry (unix timestamp).
    pub exp: i64,
    /// Unique token ID.
    pub jti: String,
}

impl TokenClaims {
    /// Principal ID parsed from `sub`.
    pub fn principal_id(&self) -> Option<i64> {
        self.sub.parse().ok()
    }

    /// Expiry as a timestamp.
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.exp, 0)
    }
}

/// A freshly minted access/refresh pair.
#[derive(Debug, Clone, Serialize)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    /// Access token lifetime in seconds.
    pub access_ttl: i64,
    /// Refresh token lifetime in seconds.
    pub refresh_ttl: i64,
    pub access_expires_at: DateTime<Utc>,
    pub refresh_expires_at: DateTime<Utc>,
}

/// Failed-login bookkeeping for one `(account, origin)` pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginAttemptRecord {
    pub account: String,
    pub origin: String,
    pub failure_count: u32,
    pub last_attempt_at: DateTime<Utc>,
    pub blocked_at: Option<DateTime<Utc>>,
}

impl LoginAttemptRecord {
    /// A clear record for a pair seen for the first time.
    pub fn new(account: &str, origin: &str, now: DateTime<Utc>) -> Self {
        Self {
            account: account.to_string(),
            origin: origin.to_string(),
            failure_count: 0,
            last_attempt_at: now,
            blocked_at: None,
        }
    }

    /// Whether the block stamp is still inside `window` at `now`.
    ///
    /// An elapsed block is not cleared here; callers reinterpret it as clear.
    pub fn is_blocked_at(&self, now: DateTime<Utc>, window: Duration) -> bool {
        self.blocked_at.is_some_and(|at| now - at < window)
    }

    /// Forget failures and any block stamp.
    pub fn clear(&mut self) {
        self.failure_count = 0;
        self.blocked_at = None;
    }
}

/// A token that must be rejected before its natural expiry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RevocationEntry {
    /// Hex SHA-256 of the bearer string; the raw token is never stored.
    pub token_hash: String,
    pub principal_id: i64,
    pub username: String,
    pub reason: String,
    /// The token's own `exp`; the entry is swept after this instant.
    pub expires_at: DateTime<Utc>,
    pub revoked_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_parse_is_case_insensitive() {
        assert_eq!(PrincipalStatus::parse("ACTIVE"), Some(PrincipalStatus::Active));
        assert_eq!(PrincipalStatus::parse("locked"), Some(PrincipalStatus::Locked));
        assert_eq!(PrincipalStatus::parse("banned"), None);
    }

    #[test]
    fn block_expires_lazily() {
        let now = Utc::now();
        let mut record = LoginAttemptRecord::new("alice", "10.0.0.5", now);
        record.failure_count = 5;
        record.blocked_at = Some(now);

        let window = Duration::hours(2);
        assert!(record.is_blocked_at(now + Duration::minutes(119), window));
        assert!(!record.is_blocked_at(now + Duration::hours(2), window));
        // The stamp itself survives until somebody rewrites the record.
        assert!(record.blocked_at.is_some());
    }

    #[test]
    fn claims_principal_id_requires_numeric_subject() {
        let mut claims = TokenClaims {
            sub: "42".into(),
            username: "alice".into(),
            role_id: 1,
            token_type: TokenType::Access,
            remember_me: false,
            iss: "gatehouse".into(),
            iat: 0,
            nbf: 0,
            exp: 60,
            jti: "x".into(),
        };
        assert_eq!(claims.principal_id(), Some(42));
        claims.sub = "alice".into();
        assert_eq!(claims.principal_id(), None);
    }

    #[test]
    fn token_type_serializes_lowercase() {
        let json = serde_json::to_string(&TokenType::Refresh).unwrap();
        assert_eq!(json, "\"refresh\"");
    }
}

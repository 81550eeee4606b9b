//! Auth core configuration.
//!
//! Values come from the process environment (see [`AuthConfig::from_env`]) or
//! any key lookup function, falling back to the defaults below. The signing
//! secret resolves `JWT_SECRET`, then `AUTH_SECRET`, then a generated secret
//! persisted under the user data directory.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration as StdDuration;

use chrono::Duration;
use rand::distr::Alphanumeric;
use rand::{Rng, rng};
use thiserror::Error;
use tracing::{info, warn};

use crate::auth::brute_force::LockoutPolicy;

/// Issuer written into and required from every token.
pub const DEFAULT_ISSUER: &str = "gatehouse";
const DEFAULT_ACCESS_TTL_SECS: i64 = 2 * 60 * 60;
const DEFAULT_REFRESH_TTL_SECS: i64 = 7 * 24 * 60 * 60;
const DEFAULT_REMEMBER_ME_TTL_SECS: i64 = 30 * 24 * 60 * 60;
const DEFAULT_STORAGE_TIMEOUT_MS: u64 = 3_000;
const DEFAULT_MAINTENANCE_INTERVAL_SECS: u64 = 24 * 60 * 60;
/// Upper bound for every token lifetime and lockout duration.
const MAX_LIFETIME_DAYS: i64 = 10 * 365;

/// Length of a generated signing secret.
const GENERATED_SECRET_LEN: usize = 64;
/// Shorter secrets are accepted but logged.
const RECOMMENDED_SECRET_LEN: usize = 32;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value for {key}: '{value}' ({reason})")]
    InvalidValue {
        key: &'static str,
        value: String,
        reason: String,
    },

    #[error("Validation error: {0}")]
    ValidationError(String),
}

/// Settings shared by every auth service.
#[derive(Clone)]
pub struct AuthConfig {
    /// HS256 signing secret.
    pub jwt_secret: String,
    pub issuer: String,
    pub access_token_ttl: Duration,
    pub refresh_token_ttl: Duration,
    /// Refresh lifetime when the login asked to be remembered.
    pub remember_me_ttl: Duration,
    pub lockout: LockoutPolicy,
    /// Deadline applied to every storage call.
    pub storage_timeout: StdDuration,
    pub maintenance_interval: StdDuration,
    /// Revoke the presented refresh token when it is exchanged.
    pub rotate_refresh_tokens: bool,
}

impl fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthConfig")
            .field("jwt_secret", &"<redacted>")
            .field("issuer", &self.issuer)
            .field("access_token_ttl", &self.access_token_ttl)
            .field("refresh_token_ttl", &self.refresh_token_ttl)
            .field("remember_me_ttl", &self.remember_me_ttl)
            .field("lockout", &self.lockout)
            .field("storage_timeout", &self.storage_timeout)
            .field("maintenance_interval", &self.maintenance_interval)
            .field("rotate_refresh_tokens", &self.rotate_refresh_tokens)
            .finish()
    }
}

impl AuthConfig {
    /// Defaults around an explicit secret.
    pub fn with_secret(secret: impl Into<String>) -> Self {
        Self {
            jwt_secret: secret.into(),
            issuer: DEFAULT_ISSUER.to_string(),
            access_token_ttl: Duration::seconds(DEFAULT_ACCESS_TTL_SECS),
            refresh_token_ttl: Duration::seconds(DEFAULT_REFRESH_TTL_SECS),
            remember_me_ttl: Duration::seconds(DEFAULT_REMEMBER_ME_TTL_SECS),
            lockout: LockoutPolicy::default(),
            storage_timeout: StdDuration::from_millis(DEFAULT_STORAGE_TIMEOUT_MS),
            maintenance_interval: StdDuration::from_secs(DEFAULT_MAINTENANCE_INTERVAL_SECS),
            rotate_refresh_tokens: false,
        }
    }

    /// Load from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load through an arbitrary key lookup. Unset or empty keys take defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let secret = match get("JWT_SECRET").or_else(|| get("AUTH_SECRET")) {
            Some(secret) => secret,
            None => load_or_create_secret(&jwt_secret_path()),
        };

        let mut config = Self::with_secret(secret);
        if let Some(issuer) = get("JWT_ISSUER") {
            config.issuer = issuer;
        }
        config.access_token_ttl =
            parse_seconds(&get, "ACCESS_TOKEN_TTL_SECS", DEFAULT_ACCESS_TTL_SECS)?;
        config.refresh_token_ttl =
            parse_seconds(&get, "REFRESH_TOKEN_TTL_SECS", DEFAULT_REFRESH_TTL_SECS)?;
        config.remember_me_ttl =
            parse_seconds(&get, "REMEMBER_ME_TTL_SECS", DEFAULT_REMEMBER_ME_TTL_SECS)?;

        let defaults = LockoutPolicy::default();
        config.lockout = LockoutPolicy {
            max_failures: parse_or(&get, "LOGIN_MAX_FAILURES", defaults.max_failures)?,
            block_duration: parse_seconds(
                &get,
                "LOGIN_BLOCK_SECS",
                defaults.block_duration.num_seconds(),
            )?,
            retention: parse_days(
                &get,
                "LOGIN_ATTEMPT_RETENTION_DAYS",
                defaults.retention.num_days(),
            )?,
        };

        config.storage_timeout = StdDuration::from_millis(parse_or(
            &get,
            "STORAGE_TIMEOUT_MS",
            DEFAULT_STORAGE_TIMEOUT_MS,
        )?);
        config.maintenance_interval = StdDuration::from_secs(parse_or(
            &get,
            "MAINTENANCE_INTERVAL_SECS",
            DEFAULT_MAINTENANCE_INTERVAL_SECS,
        )?);
        if let Some(raw) = get("ROTATE_REFRESH_TOKENS") {
            config.rotate_refresh_tokens = parse_bool("ROTATE_REFRESH_TOKENS", &raw)?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Check cross-field constraints.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.jwt_secret.is_empty() {
            return Err(ConfigError::ValidationError(
                "signing secret must not be empty".into(),
            ));
        }
        if self.jwt_secret.len() < RECOMMENDED_SECRET_LEN {
            warn!(
                length = self.jwt_secret.len(),
                recommended = RECOMMENDED_SECRET_LEN,
                "JWT secret is shorter than recommended"
            );
        }
        if self.issuer.trim().is_empty() {
            return Err(ConfigError::ValidationError("issuer must not be empty".into()));
        }
        for (name, ttl) in [
            ("access token TTL", self.access_token_ttl),
            ("refresh token TTL", self.refresh_token_ttl),
            ("remember-me TTL", self.remember_me_ttl),
            ("login block duration", self.lockout.block_duration),
            ("login attempt retention", self.lockout.retention),
        ] {
            if ttl <= Duration::zero() {
                return Err(ConfigError::ValidationError(format!(
                    "{name} must be positive"
                )));
            }
            if ttl > Duration::days(MAX_LIFETIME_DAYS) {
                return Err(ConfigError::ValidationError(format!(
                    "{name} must not exceed {MAX_LIFETIME_DAYS} days"
                )));
            }
        }
        if self.lockout.max_failures == 0 {
            return Err(ConfigError::ValidationError(
                "login failure threshold must be at least 1".into(),
            ));
        }
        if self.storage_timeout.is_zero() {
            return Err(ConfigError::ValidationError(
                "storage timeout must be positive".into(),
            ));
        }
        if self.maintenance_interval.is_zero() {
            return Err(ConfigError::ValidationError(
                "maintenance interval must be positive".into(),
            ));
        }
        Ok(())
    }

    /// Refresh lifetime for a login.
    pub fn refresh_ttl_for(&self, remember_me: bool) -> Duration {
        if remember_me {
            self.remember_me_ttl
        } else {
            self.refresh_token_ttl
        }
    }
}

fn parse_or<T, G>(get: &G, key: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e: T::Err| ConfigError::InvalidValue {
                key,
                value: raw.clone(),
                reason: e.to_string(),
            }),
    }
}

fn parse_seconds<G>(get: &G, key: &'static str, default: i64) -> Result<Duration, ConfigError>
where
    G: Fn(&str) -> Option<String>,
{
    let secs = parse_or(get, key, default)?;
    Duration::try_seconds(secs).ok_or_else(|| out_of_range(key, secs))
}

fn parse_days<G>(get: &G, key: &'static str, default: i64) -> Result<Duration, ConfigError>
where
    G: Fn(&str) -> Option<String>,
{
    let days = parse_or(get, key, default)?;
    Duration::try_days(days).ok_or_else(|| out_of_range(key, days))
}

fn out_of_range(key: &'static str, value: i64) -> ConfigError {
    ConfigError::InvalidValue {
        key,
        value: value.to_string(),
        reason: "duration out of range".into(),
    }
}

fn parse_bool(key: &'static str, raw: &str) -> Result<bool, ConfigError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key,
            value: raw.to_string(),
            reason: "expected true or false".into(),
        }),
    }
}

/// Read the secret stored at `path`, or generate and persist a new one.
///
/// A secret that cannot be persisted is still returned; tokens then stop
/// validating after a restart.
pub fn load_or_create_secret(path: &Path) -> String {
    if let Ok(existing) = std::fs::read_to_string(path) {
        let trimmed = existing.trim();
        if !trimmed.is_empty() {
            return trimmed.to_string();
        }
    }

    let secret: String = rng()
        .sample_iter(&Alphanumeric)
        .take(GENERATED_SECRET_LEN)
        .map(char::from)
        .collect();

    if let Some(parent) = path.parent()
        && let Err(e) = std::fs::create_dir_all(parent)
    {
        warn!(path = %parent.display(), error = %e, "cannot create secret directory");
    }
    match std::fs::write(path, &secret) {
        Ok(()) => info!(path = %path.display(), "generated new JWT secret"),
        Err(e) => warn!(path = %path.display(), error = %e, "cannot persist generated JWT secret"),
    }
    secret
}

/// Path to the persisted JWT secret file.
pub fn jwt_secret_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("gatehouse")
        .join("jwt-secret")
}

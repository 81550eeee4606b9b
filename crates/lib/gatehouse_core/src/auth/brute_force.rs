//! Failed-login throttling per `(account, origin)`.
//!
//! A pair moves Clear → Accumulating → Blocked. A block lasts for the
//! configured window and then lapses without any write; the next attempt
//! starts counting from zero again.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info};

use super::AuthError;
use crate::clock::Clock;
use crate::models::auth::LoginAttemptRecord;
use crate::store::{LoginAttemptRepository, with_deadline};

/// Thresholds for blocking and forgetting login attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockoutPolicy {
    /// Failures that trigger a block.
    pub max_failures: u32,
    pub block_duration: Duration,
    /// Records untouched for longer than this are purged.
    pub retention: Duration,
}

impl Default for LockoutPolicy {
    fn default() -> Self {
        Self {
            max_failures: 5,
            block_duration: Duration::hours(2),
            retention: Duration::days(30),
        }
    }
}

/// Observable state of a pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptState {
    Clear,
    Accumulating(u32),
    Blocked { until: DateTime<Utc> },
}

#[derive(Clone)]
pub struct BruteForceGuard {
    attempts: Arc<dyn LoginAttemptRepository>,
    clock: Arc<dyn Clock>,
    policy: LockoutPolicy,
    timeout: StdDuration,
}

impl BruteForceGuard {
    pub fn new(
        attempts: Arc<dyn LoginAttemptRepository>,
        clock: Arc<dyn Clock>,
        policy: LockoutPolicy,
        timeout: StdDuration,
    ) -> Self {
        Self {
            attempts,
            clock,
            policy,
            timeout,
        }
    }

    pub fn policy(&self) -> &LockoutPolicy {
        &self.policy
    }

    async fn load(&self, account: &str, origin: &str) -> Result<Option<LoginAttemptRecord>, AuthError> {
        Ok(with_deadline(self.timeout, self.attempts.find(account, origin)).await?)
    }

    /// Record one verified attempt and report whether the pair is blocked.
    ///
    /// Call exactly once per attempt, after the password was checked.
    pub async fn check_and_record(
        &self,
        account: &str,
        origin: &str,
        success: bool,
    ) -> Result<bool, AuthError> {
        let now = self.clock.now();
        let window = self.policy.block_duration;

        let mut record = match self.load(account, origin).await? {
            Some(record) if record.is_blocked_at(now, window) => {
                debug!(account, origin, "attempt on blocked pair ignored");
                return Ok(true);
            }
            Some(mut record) => {
                if record.blocked_at.is_some() {
                    // Block lapsed: start over.
                    record.clear();
                }
                record
            }
            None => LoginAttemptRecord::new(account, origin, now),
        };

        record.last_attempt_at = now;
        let blocked = if success {
            record.clear();
            false
        } else {
            record.failure_count = record.failure_count.saturating_add(1);
            if record.failure_count >= self.policy.max_failures {
                record.blocked_at = Some(now);
                true
            } else {
                false
            }
        };

        with_deadline(self.timeout, self.attempts.save(&record)).await?;

        if blocked {
            info!(
                account,
                origin,
                failures = record.failure_count,
                until = %(now + window),
                "login blocked after repeated failures"
            );
        }
        Ok(blocked)
    }

    /// Read-only pre-check.
    pub async fn is_blocked(&self, account: &str, origin: &str) -> Result<bool, AuthError> {
        let now = self.clock.now();
        Ok(self
            .load(account, origin)
            .await?
            .is_some_and(|r| r.is_blocked_at(now, self.policy.block_duration)))
    }

    pub async fn state(&self, account: &str, origin: &str) -> Result<AttemptState, AuthError> {
        let now = self.clock.now();
        let window = self.policy.block_duration;
        Ok(match self.load(account, origin).await? {
            Some(r) if r.is_blocked_at(now, window) => AttemptState::Blocked {
                until: r.blocked_at.map_or(now, |at| at + window),
            },
            Some(r) if r.blocked_at.is_none() && r.failure_count > 0 => {
                AttemptState::Accumulating(r.failure_count)
            }
            _ => AttemptState::Clear,
        })
    }

    /// Administrative unlock. Returns whether a record existed.
    pub async fn reset(&self, account: &str, origin: &str) -> Result<bool, AuthError> {
        let existed = with_deadline(self.timeout, self.attempts.delete(account, origin)).await?;
        if existed {
            info!(account, origin, "login attempts reset");
        }
        Ok(existed)
    }

    /// Purge records whose last attempt is older than the retention period.
    pub async fn cleanup_stale(&self) -> Result<u64, AuthError> {
        let cutoff = self.clock.now() - self.policy.retention;
        let removed = with_deadline(self.timeout, self.attempts.delete_stale(cutoff)).await?;
        debug!(removed, %cutoff, "stale login attempts purged");
        Ok(removed)
    }
}

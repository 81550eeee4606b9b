//! PostgreSQL storage backend.
//!
//! Raw SQLx queries against the schema in `migrations/`. Graph syncs and
//! cascading deletes each run in a single transaction.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use super::{
    CredentialStore, LoginAttemptRepository, PolicyRepository, RevocationRepository, StorageError,
};
use crate::models::auth::{LoginAttemptRecord, Principal, PrincipalStatus, RevocationEntry};
use crate::models::policy::{PermissionRecord, PolicyEntry, RestfulRule};

/// Row shape of `principals`.
type PrincipalRow = (
    i64,
    String,
    String,
    i64,
    String,
    Option<DateTime<Utc>>,
    Option<String>,
);

/// Row shape of `login_attempts`.
type AttemptRow = (String, String, i32, DateTime<Utc>, Option<DateTime<Utc>>);

/// Row shape of `permissions`.
type PermissionRow = (i64, String, String, String, bool);

/// Every repository trait, backed by PostgreSQL.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn principal_from_row(row: PrincipalRow) -> Result<Principal, StorageError> {
    let (id, username, password_hash, role_id, status, last_login_at, last_login_origin) = row;
    let status = PrincipalStatus::parse(&status).ok_or_else(|| {
        StorageError::InvalidRow(format!("principal {id} has unknown status '{status}'"))
    })?;
    Ok(Principal {
        id,
        username,
        password_hash,
        role_id,
        status,
        last_login_at,
        last_login_origin,
    })
}

fn attempt_from_row(row: AttemptRow) -> Result<LoginAttemptRecord, StorageError> {
    let (account, origin, failure_count, last_attempt_at, blocked_at) = row;
    let failure_count = u32::try_from(failure_count).map_err(|_| {
        StorageError::InvalidRow(format!(
            "login attempt for '{account}' has negative failure count {failure_count}"
        ))
    })?;
    Ok(LoginAttemptRecord {
        account,
        origin,
        failure_count,
        last_attempt_at,
        blocked_at,
    })
}

fn permission_from_row(row: PermissionRow) -> PermissionRecord {
    let (id, code, url, method, enabled) = row;
    PermissionRecord {
        id,
        code,
        url,
        method,
        enabled,
    }
}

#[async_trait]
impl CredentialStore for PgStore {
    async fn find_by_username(&self, username: &str) -> Result<Option<Principal>, StorageError> {
        let row = sqlx::query_as::<_, PrincipalRow>(
            "SELECT id, username, password_hash, role_id, status, last_login_at, last_login_origin \
             FROM principals WHERE username = $1",
        )
        .bind(username)
        .fetch_optional(&self.pool)
        .await?;
        row.map(principal_from_row).transpose()
    }

    async fn find_by_id(&self, id: i64) -> Result<Option<Principal>, StorageError> {
        let row = sqlx::query_as::<_, PrincipalRow>(
            "SELECT id, username, password_hash, role_id, status, last_login_at, last_login_origin \
             FROM principals WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(principal_from_row).transpose()
    }

    async fn record_login(
        &self,
        id: i64,
        at: DateTime<Utc>,
        origin: &str,
    ) -> Result<(), StorageError> {
        sqlx::query(
            "UPDATE principals SET last_login_at = $2, last_login_origin = $3 WHERE id = $1",
        )
        .bind(id)
        .bind(at)
        .bind(origin)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl LoginAttemptRepository for PgStore {
    async fn find(
        &self,
        account: &str,
        origin: &str,
    ) -> Result<Option<LoginAttemptRecord>, StorageError> {
        let row = sqlx::query_as::<_, AttemptRow>(
            "SELECT account, origin, failure_count, last_attempt_at, blocked_at \
             FROM login_attempts WHERE account = $1 AND origin = $2",
        )
        .bind(account)
        .bind(origin)
        .fetch_optional(&self.pool)
        .await?;
        row.map(attempt_from_row).transpose()
    }

    async fn save(&self, record: &LoginAttemptRecord) -> Result<(), StorageError> {
        let failure_count = i32::try_from(record.failure_count).unwrap_or(i32::MAX);
        sqlx::query(
            r#"
            INSERT INTO login_attempts (account, origin, failure_count, last_attempt_at, blocked_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (account, origin) DO UPDATE
               SET failure_count = EXCLUDED.failure_count,
                   last_attempt_at = EXCLUDED.last_attempt_at,
                   blocked_at = EXCLUDED.blocked_at
            "#,
        )
        .bind(&record.account)
        .bind(&record.origin)
        .bind(failure_count)
        .bind(record.last_attempt_at)
        .bind(record.blocked_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete(&self, account: &str, origin: &str) -> Result<bool, StorageError> {
        let result = sqlx::query("DELETE FROM login_attempts WHERE account = $1 AND origin = $2")
            .bind(account)
            .bind(origin)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_stale(&self, before: DateTime<Utc>) -> Result<u64, StorageError> {
        let result = sqlx::query("DELETE FROM login_attempts WHERE last_attempt_at < $1")
            .bind(before)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl RevocationRepository for PgStore {
    async fn insert(&self, entry: &RevocationEntry) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            INSERT INTO revoked_tokens (token_hash, principal_id, username, reason, expires_at, revoked_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (token_hash) DO NOTHING
            "#,
        )
        .bind(&entry.token_hash)
        .bind(entry.principal_id)
        .bind(&entry.username)
        .bind(&entry.reason)
        .bind(entry.expires_at)
        .bind(entry.revoked_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn contains(&self, token_hash: &str) -> Result<bool, StorageError> {
        let exists = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS(SELECT 1 FROM revoked_tokens WHERE token_hash = $1)",
        )
        .bind(token_hash)
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }

    async fn delete_expired(&self, cutoff: DateTime<Utc>) -> Result<u64, StorageError> {
        let result = sqlx::query("DELETE FROM revoked_tokens WHERE expires_at <= $1")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl PolicyRepository for PgStore {
    async fn roles_for_principal(&self, principal_id: i64) -> Result<Vec<i64>, StorageError> {
        let roles = sqlx::query_scalar::<_, i64>(
            "SELECT role_id FROM user_roles WHERE principal_id = $1 ORDER BY role_id",
        )
        .bind(principal_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(roles)
    }

    async fn restful_rules_for_roles(
        &self,
        role_ids: &[i64],
    ) -> Result<Vec<RestfulRule>, StorageError> {
        let rows = sqlx::query_as::<_, (String, String)>(
            "SELECT path, method FROM role_restful_rules WHERE role_id = ANY($1) ORDER BY id",
        )
        .bind(role_ids)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|(path, method)| RestfulRule { path, method })
            .collect())
    }

    async fn find_enabled_permission(
        &self,
        url: &str,
        method: &str,
    ) -> Result<Option<PermissionRecord>, StorageError> {
        let row = sqlx::query_as::<_, PermissionRow>(
            "SELECT id, code, url, method, enabled FROM permissions \
             WHERE url = $1 AND method = $2 AND enabled \
             ORDER BY id LIMIT 1",
        )
        .bind(url)
        .bind(method)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(permission_from_row))
    }

    async fn any_role_has_code(
        &self,
        role_ids: &[i64],
        code: &str,
    ) -> Result<bool, StorageError> {
        let exists = sqlx::query_scalar::<_, bool>(
            r#"
            SELECT EXISTS(
                SELECT 1
                FROM role_permissions rp
                JOIN permissions p ON p.id = rp.permission_id
                WHERE rp.role_id = ANY($1) AND p.code = $2
            )
            "#,
        )
        .bind(role_ids)
        .bind(code)
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }

    async fn policies_for_role(&self, role_id: i64) -> Result<Vec<PolicyEntry>, StorageError> {
        let codes = sqlx::query_scalar::<_, String>(
            "SELECT p.code FROM role_permissions rp \
             JOIN permissions p ON p.id = rp.permission_id \
             WHERE rp.role_id = $1 ORDER BY p.code",
        )
        .bind(role_id)
        .fetch_all(&self.pool)
        .await?;
        let rules = sqlx::query_as::<_, (String, String)>(
            "SELECT path, method FROM role_restful_rules WHERE role_id = $1 ORDER BY id",
        )
        .bind(role_id)
        .fetch_all(&self.pool)
        .await?;

        let mut entries: Vec<PolicyEntry> = codes
            .into_iter()
            .map(|code| PolicyEntry::PermissionCode { role_id, code })
            .collect();
        entries.extend(
            rules
                .into_iter()
                .map(|(path, method)| PolicyEntry::Restful {
                    role_id,
                    path,
                    method,
                }),
        );
        Ok(entries)
    }

    async fn save_permission(&self, record: &PermissionRecord) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            INSERT INTO permissions (id, code, url, method, enabled)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (id) DO UPDATE
               SET code = EXCLUDED.code,
                   url = EXCLUDED.url,
                   method = EXCLUDED.method,
                   enabled = EXCLUDED.enabled
            "#,
        )
        .bind(record.id)
        .bind(&record.code)
        .bind(&record.url)
        .bind(&record.method)
        .bind(record.enabled)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn replace_user_roles(
        &self,
        principal_id: i64,
        role_ids: &[i64],
    ) -> Result<(), StorageError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM user_roles WHERE principal_id = $1")
            .bind(principal_id)
            .execute(&mut *tx)
            .await?;

        for role_id in role_ids {
            sqlx::query(
                "INSERT INTO user_roles (principal_id, role_id) VALUES ($1, $2) \
                 ON CONFLICT DO NOTHING",
            )
            .bind(principal_id)
            .bind(role_id)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn replace_role_permissions(
        &self,
        role_id: i64,
        permission_ids: &[i64],
    ) -> Result<(), StorageError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM role_permissions WHERE role_id = $1")
            .bind(role_id)
            .execute(&mut *tx)
            .await?;

        for permission_id in permission_ids {
            sqlx::query(
                "INSERT INTO role_permissions (role_id, permission_id) VALUES ($1, $2) \
                 ON CONFLICT DO NOTHING",
            )
            .bind(role_id)
            .bind(permission_id)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn replace_role_restful_rules(
        &self,
        role_id: i64,
        rules: &[RestfulRule],
    ) -> Result<(), StorageError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM role_restful_rules WHERE role_id = $1")
            .bind(role_id)
            .execute(&mut *tx)
            .await?;

        for rule in rules {
            sqlx::query(
                "INSERT INTO role_restful_rules (role_id, path, method) VALUES ($1, $2, $3) \
                 ON CONFLICT DO NOTHING",
            )
            .bind(role_id)
            .bind(&rule.path)
            .bind(&rule.method)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn delete_role(&self, role_id: i64) -> Result<(), StorageError> {
        let mut tx = self.pool.begin().await?;

        for sql in [
            "DELETE FROM user_roles WHERE role_id = $1",
            "DELETE FROM role_permissions WHERE role_id = $1",
            "DELETE FROM role_restful_rules WHERE role_id = $1",
        ] {
            sqlx::query(sql).bind(role_id).execute(&mut *tx).await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn delete_permission(&self, permission_id: i64) -> Result<bool, StorageError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM role_permissions WHERE permission_id = $1")
            .bind(permission_id)
            .execute(&mut *tx)
            .await?;
        let result = sqlx::query("DELETE FROM permissions WHERE id = $1")
            .bind(permission_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(result.rows_affected() > 0)
    }
}

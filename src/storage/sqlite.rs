//! SQLite-backed user and session storage
//!
//! Sessions must outlive the server process, so production deployments use
//! this store. Timestamps for sessions are stored as unix seconds to keep
//! the expiry comparisons inside SQL.

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;

use crate::auth::user::{normalize_email, ExternalIdentity, IdentityProvider, User};
use crate::error::{QuillgateError, Result};
use crate::storage::session_store::{
    ConsumeOutcome, RevocationReason, SessionRecord, SessionStore,
};
use crate::storage::user_store::{ensure_password_account, UserStore};

#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (creating if needed) the database at `database_url` and apply the schema
    pub async fn connect(database_url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.init().await?;
        log::info!("SQLite store ready at {}", database_url);
        Ok(store)
    }

    /// Private in-memory database; one connection so every query sees the same data
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;

        let store = Self { pool };
        store.init().await?;
        Ok(store)
    }

    async fn init(&self) -> Result<()> {
        let queries = [
            r#"CREATE TABLE IF NOT EXISTS users (
                id TEXT PRIMARY KEY,
                email TEXT NOT NULL UNIQUE,
                display_name TEXT,
                password_hash TEXT,
                created_at TEXT NOT NULL
            );"#,
            r#"CREATE TABLE IF NOT EXISTS external_identities (
                provider TEXT NOT NULL,
                subject TEXT NOT NULL,
                user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                email TEXT NOT NULL,
                linked_at TEXT NOT NULL,
                PRIMARY KEY (provider, subject)
            );"#,
            r#"CREATE TABLE IF NOT EXISTS sessions (
                token_id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                issued_at INTEGER NOT NULL,
                expires_at INTEGER NOT NULL,
                revoked_at INTEGER,
                revocation_reason TEXT
            );"#,
            "CREATE INDEX IF NOT EXISTS idx_sessions_user ON sessions(user_id);",
            "CREATE INDEX IF NOT EXISTS idx_identities_user ON external_identities(user_id);",
        ];

        for query in queries {
            sqlx::query(query).execute(&self.pool).await?;
        }
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .map_or(false, |db| db.is_unique_violation())
}

fn parse_rfc3339(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| QuillgateError::StorageError(format!("Bad timestamp '{}': {}", raw, e)))
}

fn from_unix(secs: i64) -> Result<DateTime<Utc>> {
    Utc.timestamp_opt(secs, 0)
        .single()
        .ok_or_else(|| QuillgateError::StorageError(format!("Bad unix timestamp {}", secs)))
}

fn user_from_row(row: &SqliteRow) -> Result<User> {
    let created_at: String = row.try_get("created_at")?;
    Ok(User {
        id: row.try_get("id")?,
        email: row.try_get("email")?,
        display_name: row.try_get("display_name")?,
        password_hash: row.try_get("password_hash")?,
        created_at: parse_rfc3339(&created_at)?,
    })
}

fn identity_from_row(row: &SqliteRow) -> Result<ExternalIdentity> {
    let provider: String = row.try_get("provider")?;
    let linked_at: String = row.try_get("linked_at")?;
    Ok(ExternalIdentity {
        provider: IdentityProvider::parse(&provider).ok_or_else(|| {
            QuillgateError::StorageError(format!("Unknown identity provider '{}'", provider))
        })?,
        subject: row.try_get("subject")?,
        user_id: row.try_get("user_id")?,
        email: row.try_get("email")?,
        linked_at: parse_rfc3339(&linked_at)?,
    })
}

fn session_from_row(row: &SqliteRow) -> Result<SessionRecord> {
    let revoked_at: Option<i64> = row.try_get("revoked_at")?;
    let reason: Option<String> = row.try_get("revocation_reason")?;
    Ok(SessionRecord {
        token_id: row.try_get("token_id")?,
        user_id: row.try_get("user_id")?,
        issued_at: from_unix(row.try_get("issued_at")?)?,
        expires_at: from_unix(row.try_get("expires_at")?)?,
        revoked_at: revoked_at.map(from_unix).transpose()?,
        revocation_reason: reason.as_deref().and_then(RevocationReason::parse),
    })
}

const INSERT_USER: &str = "INSERT INTO users(id,email,display_name,password_hash,created_at) VALUES (?1,?2,?3,?4,?5)";
const INSERT_IDENTITY: &str = "INSERT INTO external_identities(provider,subject,user_id,email,linked_at) VALUES (?1,?2,?3,?4,?5)";

#[async_trait]
impl UserStore for SqliteStore {
    async fn create_user(&self, user: User) -> Result<User> {
        ensure_password_account(&user)?;
        sqlx::query(INSERT_USER)
            .bind(&user.id)
            .bind(&user.email)
            .bind(&user.display_name)
            .bind(&user.password_hash)
            .bind(user.created_at.to_rfc3339())
            .execute(&self.pool)
            .await
            .map_err(|e| {
                if is_unique_violation(&e) {
                    QuillgateError::EmailTaken
                } else {
                    e.into()
                }
            })?;
        Ok(user)
    }

    async fn create_user_with_identity(
        &self,
        user: User,
        identity: ExternalIdentity,
    ) -> Result<User> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(INSERT_USER)
            .bind(&user.id)
            .bind(&user.email)
            .bind(&user.display_name)
            .bind(&user.password_hash)
            .bind(user.created_at.to_rfc3339())
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                if is_unique_violation(&e) {
                    QuillgateError::EmailTaken
                } else {
                    e.into()
                }
            })?;

        sqlx::query(INSERT_IDENTITY)
            .bind(identity.provider.as_str())
            .bind(&identity.subject)
            .bind(&user.id)
            .bind(&identity.email)
            .bind(identity.linked_at.to_rfc3339())
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                if is_unique_violation(&e) {
                    QuillgateError::IdentityAlreadyLinked
                } else {
                    e.into()
                }
            })?;

        tx.commit().await?;
        Ok(user)
    }

    async fn find_by_id(&self, user_id: &str) -> Result<Option<User>> {
        let row = sqlx::query("SELECT * FROM users WHERE id = ?1")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(user_from_row).transpose()
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>> {
        let row = sqlx::query("SELECT * FROM users WHERE email = ?1")
            .bind(normalize_email(email))
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(user_from_row).transpose()
    }

    async fn find_by_identity(
        &self,
        provider: IdentityProvider,
        subject: &str,
    ) -> Result<Option<User>> {
        let row = sqlx::query(
            "SELECT u.* FROM users u JOIN external_identities i ON i.user_id = u.id \
             WHERE i.provider = ?1 AND i.subject = ?2",
        )
        .bind(provider.as_str())
        .bind(subject)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(user_from_row).transpose()
    }

    async fn link_identity(&self, identity: ExternalIdentity) -> Result<()> {
        sqlx::query(INSERT_IDENTITY)
            .bind(identity.provider.as_str())
            .bind(&identity.subject)
            .bind(&identity.user_id)
            .bind(&identity.email)
            .bind(identity.linked_at.to_rfc3339())
            .execute(&self.pool)
            .await
            .map_err(|e| {
                if is_unique_violation(&e) {
                    QuillgateError::IdentityAlreadyLinked
                } else {
                    e.into()
                }
            })?;
        Ok(())
    }

    async fn identities_for(&self, user_id: &str) -> Result<Vec<ExternalIdentity>> {
        let rows = sqlx::query("SELECT * FROM external_identities WHERE user_id = ?1")
            .bind(user_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(identity_from_row).collect()
    }

    async fn update_password_hash(&self, user_id: &str, password_hash: &str) -> Result<()> {
        let result = sqlx::query("UPDATE users SET password_hash = ?1 WHERE id = ?2")
            .bind(password_hash)
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(QuillgateError::StorageError(format!("Unknown user {}", user_id)));
        }
        Ok(())
    }
}

#[async_trait]
impl SessionStore for SqliteStore {
    async fn register(
        &self,
        token_id: &str,
        user_id: &str,
        issued_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO sessions(token_id,user_id,issued_at,expires_at) VALUES (?1,?2,?3,?4)",
        )
        .bind(token_id)
        .bind(user_id)
        .bind(issued_at.timestamp())
        .bind(expires_at.timestamp())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn is_active(&self, token_id: &str) -> Result<bool> {
        let row = sqlx::query(
            "SELECT 1 FROM sessions WHERE token_id = ?1 AND revoked_at IS NULL AND expires_at > ?2",
        )
        .bind(token_id)
        .bind(Utc::now().timestamp())
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.is_some())
    }

    async fn revoke(&self, token_id: &str, reason: RevocationReason) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE sessions SET revoked_at = ?1, revocation_reason = ?2 \
             WHERE token_id = ?3 AND revoked_at IS NULL",
        )
        .bind(Utc::now().timestamp())
        .bind(reason.as_str())
        .bind(token_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn revoke_all(&self, user_id: &str, reason: RevocationReason) -> Result<usize> {
        let result = sqlx::query(
            "UPDATE sessions SET revoked_at = ?1, revocation_reason = ?2 \
             WHERE user_id = ?3 AND revoked_at IS NULL",
        )
        .bind(Utc::now().timestamp())
        .bind(reason.as_str())
        .bind(user_id)
        .execute(&self.pool)
        .await?;

        let count = result.rows_affected() as usize;
        log::info!("Revoked {} sessions for user {} (reason: {:?})", count, user_id, reason);
        Ok(count)
    }

    async fn consume(&self, token_id: &str, expires_after: DateTime<Utc>) -> Result<ConsumeOutcome> {
        // The conditional UPDATE is the compare-and-swap
        let winner = sqlx::query(
            "UPDATE sessions SET revoked_at = ?1, revocation_reason = ?2 \
             WHERE token_id = ?3 AND revoked_at IS NULL AND expires_at > ?4 \
             RETURNING user_id",
        )
        .bind(Utc::now().timestamp())
        .bind(RevocationReason::Rotated.as_str())
        .bind(token_id)
        .bind(expires_after.timestamp())
        .fetch_optional(&self.pool)
        .await?;

        if let Some(row) = winner {
            return Ok(ConsumeOutcome::Consumed {
                user_id: row.try_get("user_id")?,
            });
        }

        Ok(match self.get_session(token_id).await? {
            None => ConsumeOutcome::Unknown,
            Some(record) if record.revoked_at.is_some() => ConsumeOutcome::Revoked,
            Some(_) => ConsumeOutcome::Expired,
        })
    }

    async fn get_session(&self, token_id: &str) -> Result<Option<SessionRecord>> {
        let row = sqlx::query("SELECT * FROM sessions WHERE token_id = ?1")
            .bind(token_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(session_from_row).transpose()
    }

    async fn cleanup_expired(&self, now: DateTime<Utc>) -> Result<usize> {
        let result = sqlx::query("DELETE FROM sessions WHERE expires_at <= ?1")
            .bind(now.timestamp())
            .execute(&self.pool)
            .await?;

        let removed = result.rows_affected() as usize;
        if removed > 0 {
            log::info!("Cleaned up {} expired sessions", removed);
        }
        Ok(removed)
    }
}

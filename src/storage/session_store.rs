//! Refresh-token session storage
//!
//! Every issued refresh token is registered here under its token id (`jti`).
//! A token is usable only while its record exists, is not revoked and has
//! not expired. Rotation consumes the record atomically so a refresh token
//! can be exchanged at most once.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::error::Result;

/// A registered refresh token
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    /// JWT ID (jti) of the refresh token
    pub token_id: String,
    /// User ID who owns the session
    pub user_id: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    /// Set once the session is no longer usable
    pub revoked_at: Option<DateTime<Utc>>,
    pub revocation_reason: Option<RevocationReason>,
}

impl SessionRecord {
    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        self.revoked_at.is_none() && self.expires_at > now
    }
}

/// Reason for session revocation
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum RevocationReason {
    /// User initiated logout
    UserLogout,
    /// Exchanged for a new refresh token
    Rotated,
    /// User changed password/credentials
    CredentialChange,
    /// Security incident detected
    SecurityIncident,
}

impl RevocationReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RevocationReason::UserLogout => "user_logout",
            RevocationReason::Rotated => "rotated",
            RevocationReason::CredentialChange => "credential_change",
            RevocationReason::SecurityIncident => "security_incident",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "user_logout" => Some(RevocationReason::UserLogout),
            "rotated" => Some(RevocationReason::Rotated),
            "credential_change" => Some(RevocationReason::CredentialChange),
            "security_incident" => Some(RevocationReason::SecurityIncident),
            _ => None,
        }
    }
}

/// Result of trying to spend a refresh token
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsumeOutcome {
    /// This caller won; the session is now revoked as `Rotated`
    Consumed { user_id: String },
    /// Already revoked (logged out, rotated by someone else, ...)
    Revoked,
    Expired,
    /// Never registered, or purged after expiry
    Unknown,
}

/// Session storage trait
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Record an active session
    async fn register(
        &self,
        token_id: &str,
        user_id: &str,
        issued_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<()>;

    /// Check if a session is usable right now
    async fn is_active(&self, token_id: &str) -> Result<bool>;

    /// Mark a session inactive. Returns false when it was unknown or already revoked.
    async fn revoke(&self, token_id: &str, reason: RevocationReason) -> Result<bool>;

    /// Revoke all active sessions for a specific user
    async fn revoke_all(&self, user_id: &str, reason: RevocationReason) -> Result<usize>;

    /// Atomically revoke an active session as `Rotated`; at most one caller
    /// ever sees `Consumed` for a given token id. A session counts as expired
    /// unless its expiry is later than `expires_after`.
    async fn consume(&self, token_id: &str, expires_after: DateTime<Utc>) -> Result<ConsumeOutcome>;

    /// Get session information for a token id
    async fn get_session(&self, token_id: &str) -> Result<Option<SessionRecord>>;

    /// Drop sessions whose expiry has passed
    async fn cleanup_expired(&self, now: DateTime<Utc>) -> Result<usize>;
}

/// Shared reference to a session store
pub type SharedSessionStore = Arc<dyn SessionStore>;

/// In-memory implementation of the session store
pub struct MemorySessionStore {
    /// Map of token_id -> SessionRecord
    sessions: Arc<RwLock<HashMap<String, SessionRecord>>>,
    /// Index by user_id for efficient user-based operations
    user_sessions: Arc<RwLock<HashMap<String, Vec<String>>>>,
}

impl MemorySessionStore {
    /// Create a new memory-based session store
    pub fn new() -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            user_sessions: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Start background cleanup task
    pub fn start_cleanup_task(self: Arc<Self>) {
        let store = Arc::clone(&self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(std::time::Duration::from_secs(3600)); // Every hour
            loop {
                interval.tick().await;
                if let Err(e) = store.cleanup_expired(Utc::now()).await {
                    log::error!("Failed to cleanup expired sessions: {}", e);
                }
            }
        });
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn register(
        &self,
        token_id: &str,
        user_id: &str,
        issued_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<()> {
        let record = SessionRecord {
            token_id: token_id.to_string(),
            user_id: user_id.to_string(),
            issued_at,
            expires_at,
            revoked_at: None,
            revocation_reason: None,
        };

        {
            let mut sessions = self.sessions.write().await;
            sessions.insert(token_id.to_string(), record);
        }

        {
            let mut user_sessions = self.user_sessions.write().await;
            user_sessions
                .entry(user_id.to_string())
                .or_insert_with(Vec::new)
                .push(token_id.to_string());
        }

        log::debug!("Session registered: {}", token_id);
        Ok(())
    }

    async fn is_active(&self, token_id: &str) -> Result<bool> {
        let sessions = self.sessions.read().await;
        Ok(sessions
            .get(token_id)
            .map_or(false, |record| record.is_active_at(Utc::now())))
    }

    async fn revoke(&self, token_id: &str, reason: RevocationReason) -> Result<bool> {
        let mut sessions = self.sessions.write().await;
        match sessions.get_mut(token_id) {
            Some(record) if record.revoked_at.is_none() => {
                record.revoked_at = Some(Utc::now());
                record.revocation_reason = Some(reason);
                log::info!("Session revoked: {} ({})", token_id, reason.as_str());
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn revoke_all(&self, user_id: &str, reason: RevocationReason) -> Result<usize> {
        let now = Utc::now();

        let token_ids = {
            let user_sessions = self.user_sessions.read().await;
            user_sessions.get(user_id).cloned().unwrap_or_default()
        };

        let mut count = 0;
        {
            let mut sessions = self.sessions.write().await;
            for token_id in token_ids {
                if let Some(record) = sessions.get_mut(&token_id) {
                    if record.revoked_at.is_none() {
                        record.revoked_at = Some(now);
                        record.revocation_reason = Some(reason);
                        count += 1;
                    }
                }
            }
        }

        log::info!("Revoked {} sessions for user {} (reason: {:?})", count, user_id, reason);
        Ok(count)
    }

    async fn consume(&self, token_id: &str, expires_after: DateTime<Utc>) -> Result<ConsumeOutcome> {
        // Check and mark under one write guard
        let mut sessions = self.sessions.write().await;
        let Some(record) = sessions.get_mut(token_id) else {
            return Ok(ConsumeOutcome::Unknown);
        };

        if record.revoked_at.is_some() {
            return Ok(ConsumeOutcome::Revoked);
        }
        if record.expires_at <= expires_after {
            return Ok(ConsumeOutcome::Expired);
        }

        record.revoked_at = Some(Utc::now());
        record.revocation_reason = Some(RevocationReason::Rotated);
        Ok(ConsumeOutcome::Consumed {
            user_id: record.user_id.clone(),
        })
    }

    async fn get_session(&self, token_id: &str) -> Result<Option<SessionRecord>> {
        let sessions = self.sessions.read().await;
        Ok(sessions.get(token_id).cloned())
    }

    async fn cleanup_expired(&self, now: DateTime<Utc>) -> Result<usize> {
        let mut removed_count = 0;
        let mut sessions_to_remove = Vec::new();

        // Find expired sessions
        {
            let sessions = self.sessions.read().await;
            for (token_id, record) in sessions.iter() {
                if record.expires_at <= now {
                    sessions_to_remove.push((token_id.clone(), record.user_id.clone()));
                }
            }
        }

        // Remove expired sessions
        if !sessions_to_remove.is_empty() {
            let mut sessions = self.sessions.write().await;
            let mut user_sessions = self.user_sessions.write().await;

            for (token_id, user_id) in sessions_to_remove {
                sessions.remove(&token_id);

                if let Some(ids) = user_sessions.get_mut(&user_id) {
                    ids.retain(|id| id != &token_id);
                    if ids.is_empty() {
                        user_sessions.remove(&user_id);
                    }
                }

                removed_count += 1;
            }
        }

        if removed_count > 0 {
            log::info!("Cleaned up {} expired sessions", removed_count);
        }

        Ok(removed_count)
    }
}

impl Default for MemorySessionStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Create a new memory-based session store
pub fn create_memory_session_store() -> SharedSessionStore {
    Arc::new(MemorySessionStore::new())
}

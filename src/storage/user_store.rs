//! Account and linked-identity storage

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::auth::user::{normalize_email, ExternalIdentity, IdentityProvider, User};
use crate::error::{QuillgateError, Result};

/// User storage trait
#[async_trait]
pub trait UserStore: Send + Sync {
    /// Insert a password account. Fails with `EmailTaken` on a duplicate email.
    async fn create_user(&self, user: User) -> Result<User>;

    /// Insert an account together with its first external identity in one step
    async fn create_user_with_identity(
        &self,
        user: User,
        identity: ExternalIdentity,
    ) -> Result<User>;

    async fn find_by_id(&self, user_id: &str) -> Result<Option<User>>;

    async fn find_by_email(&self, email: &str) -> Result<Option<User>>;

    /// Resolve the account bound to a provider subject
    async fn find_by_identity(
        &self,
        provider: IdentityProvider,
        subject: &str,
    ) -> Result<Option<User>>;

    /// Bind an identity to an existing account. Fails with
    /// `IdentityAlreadyLinked` if the provider subject is already bound.
    async fn link_identity(&self, identity: ExternalIdentity) -> Result<()>;

    async fn identities_for(&self, user_id: &str) -> Result<Vec<ExternalIdentity>>;

    async fn update_password_hash(&self, user_id: &str, password_hash: &str) -> Result<()>;
}

/// Shared reference to a user store
pub type SharedUserStore = Arc<dyn UserStore>;

/// Rejects accounts with neither a password nor a provider identity
pub(crate) fn ensure_password_account(user: &User) -> Result<()> {
    if user.password_hash.is_none() {
        return Err(QuillgateError::ValidationError(
            "An account needs a password or a linked external identity".to_string(),
        ));
    }
    Ok(())
}

#[derive(Default)]
struct UserTables {
    users: HashMap<String, User>,
    /// email -> user id
    by_email: HashMap<String, String>,
    /// (provider, subject) -> identity
    identities: HashMap<(IdentityProvider, String), ExternalIdentity>,
}

impl UserTables {
    fn insert_user(&mut self, user: &User) -> Result<()> {
        if self.by_email.contains_key(&user.email) {
            return Err(QuillgateError::EmailTaken);
        }
        self.by_email.insert(user.email.clone(), user.id.clone());
        self.users.insert(user.id.clone(), user.clone());
        Ok(())
    }
}

/// In-memory implementation of the user store
pub struct MemoryUserStore {
    // A single lock keeps email and identity uniqueness checks atomic
    tables: RwLock<UserTables>,
}

impl MemoryUserStore {
    pub fn new() -> Self {
        Self {
            tables: RwLock::new(UserTables::default()),
        }
    }
}

impl Default for MemoryUserStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl UserStore for MemoryUserStore {
    async fn create_user(&self, user: User) -> Result<User> {
        ensure_password_account(&user)?;
        let mut tables = self.tables.write().await;
        tables.insert_user(&user)?;
        Ok(user)
    }

    async fn create_user_with_identity(
        &self,
        user: User,
        identity: ExternalIdentity,
    ) -> Result<User> {
        let mut tables = self.tables.write().await;
        let key = (identity.provider, identity.subject.clone());
        if tables.identities.contains_key(&key) {
            return Err(QuillgateError::IdentityAlreadyLinked);
        }
        tables.insert_user(&user)?;
        tables.identities.insert(
            key,
            ExternalIdentity {
                user_id: user.id.clone(),
                ..identity
            },
        );
        Ok(user)
    }

    async fn find_by_id(&self, user_id: &str) -> Result<Option<User>> {
        let tables = self.tables.read().await;
        Ok(tables.users.get(user_id).cloned())
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>> {
        let tables = self.tables.read().await;
        Ok(tables
            .by_email
            .get(&normalize_email(email))
            .and_then(|id| tables.users.get(id))
            .cloned())
    }

    async fn find_by_identity(
        &self,
        provider: IdentityProvider,
        subject: &str,
    ) -> Result<Option<User>> {
        let tables = self.tables.read().await;
        Ok(tables
            .identities
            .get(&(provider, subject.to_string()))
            .and_then(|identity| tables.users.get(&identity.user_id))
            .cloned())
    }

    async fn link_identity(&self, identity: ExternalIdentity) -> Result<()> {
        let mut tables = self.tables.write().await;
        if !tables.users.contains_key(&identity.user_id) {
            return Err(QuillgateError::StorageError(format!(
                "Cannot link identity to unknown user {}",
                identity.user_id
            )));
        }
        let key = (identity.provider, identity.subject.clone());
        if tables.identities.contains_key(&key) {
            return Err(QuillgateError::IdentityAlreadyLinked);
        }
        tables.identities.insert(key, identity);
        Ok(())
    }

    async fn identities_for(&self, user_id: &str) -> Result<Vec<ExternalIdentity>> {
        let tables = self.tables.read().await;
        Ok(tables
            .identities
            .values()
            .filter(|identity| identity.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn update_password_hash(&self, user_id: &str, password_hash: &str) -> Result<()> {
        let mut tables = self.tables.write().await;
        match tables.users.get_mut(user_id) {
            Some(user) => {
                user.password_hash = Some(password_hash.to_string());
                Ok(())
            }
            None => Err(QuillgateError::StorageError(format!("Unknown user {}", user_id))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn google(subject: &str, user_id: &str, email: &str) -> ExternalIdentity {
        ExternalIdentity::new(
            IdentityProvider::Google,
            subject.to_string(),
            user_id.to_string(),
            email,
        )
    }

    #[tokio::test]
    async fn test_duplicate_email_rejected() {
        let store = MemoryUserStore::new();
        store
            .create_user(User::with_password("a@x.com", "h".to_string(), None))
            .await
            .unwrap();

        let result = store
            .create_user(User::with_password("A@X.com", "h".to_string(), None))
            .await;
        assert!(matches!(result, Err(QuillgateError::EmailTaken)));
    }

    #[tokio::test]
    async fn test_passwordless_user_needs_identity() {
        let store = MemoryUserStore::new();
        let result = store.create_user(User::from_external("a@x.com", None)).await;
        assert!(matches!(result, Err(QuillgateError::ValidationError(_))));

        let user = User::from_external("a@x.com", None);
        let identity = google("sub-1", &user.id, "a@x.com");
        let created = store.create_user_with_identity(user, identity).await.unwrap();

        let found = store
            .find_by_identity(IdentityProvider::Google, "sub-1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.id, created.id);
    }

    #[tokio::test]
    async fn test_identity_maps_to_one_user() {
        let store = MemoryUserStore::new();
        let first = store
            .create_user(User::with_password("a@x.com", "h".to_string(), None))
            .await
            .unwrap();
        let second = store
            .create_user(User::with_password("b@x.com", "h".to_string(), None))
            .await
            .unwrap();

        store.link_identity(google("sub-1", &first.id, "a@x.com")).await.unwrap();
        let result = store.link_identity(google("sub-1", &second.id, "b@x.com")).await;
        assert!(matches!(result, Err(QuillgateError::IdentityAlreadyLinked)));

        let orphan = User::from_external("c@x.com", None);
        let identity = google("sub-1", &orphan.id, "c@x.com");
        let result = store.create_user_with_identity(orphan, identity).await;
        assert!(matches!(result, Err(QuillgateError::IdentityAlreadyLinked)));
        assert!(store.find_by_email("c@x.com").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_update_password_hash() {
        let store = MemoryUserStore::new();
        let user = store
            .create_user(User::with_password("a@x.com", "old".to_string(), None))
            .await
            .unwrap();

        store.update_password_hash(&user.id, "new").await.unwrap();
        let reloaded = store.find_by_id(&user.id).await.unwrap().unwrap();
        assert_eq!(reloaded.password_hash.as_deref(), Some("new"));

        assert!(store.update_password_hash("missing", "x").await.is_err());
    }
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::constants::MAX_EMAIL_LEN;
use crate::error::{QuillgateError, Result};

/// Third-party identity providers accepted for sign-in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdentityProvider {
    Google,
}

impl IdentityProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            IdentityProvider::Google => "google",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "google" => Some(IdentityProvider::Google),
            _ => None,
        }
    }
}

/// Represents a registered account
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    /// Unique user identifier
    pub id: String,
    /// Normalized email address, unique across accounts
    pub email: String,
    /// Display name (optional)
    pub display_name: Option<String>,
    /// Argon2 PHC string; absent for accounts created through a provider
    #[serde(skip_serializing, default)]
    pub password_hash: Option<String>,
    /// Account creation timestamp
    pub created_at: DateTime<Utc>,
}

impl User {
    /// Creates a password account
    pub fn with_password(email: &str, password_hash: String, display_name: Option<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            email: normalize_email(email),
            display_name,
            password_hash: Some(password_hash),
            created_at: Utc::now(),
        }
    }

    /// Creates an account backed only by an external identity
    pub fn from_external(email: &str, display_name: Option<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            email: normalize_email(email),
            display_name,
            password_hash: None,
            created_at: Utc::now(),
        }
    }

    pub fn has_password(&self) -> bool {
        self.password_hash.is_some()
    }
}

/// Association between a user and a provider's subject id
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExternalIdentity {
    pub provider: IdentityProvider,
    /// The provider's stable subject identifier (`sub`)
    pub subject: String,
    pub user_id: String,
    /// Email asserted by the provider when the link was made
    pub email: String,
    pub linked_at: DateTime<Utc>,
}

impl ExternalIdentity {
    pub fn new(provider: IdentityProvider, subject: String, user_id: String, email: &str) -> Self {
        Self {
            provider,
            subject,
            user_id,
            email: normalize_email(email),
            linked_at: Utc::now(),
        }
    }
}

/// Canonical form used for storage and lookups
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Shape check only; deliverability is not our concern
pub fn validate_email(email: &str) -> Result<()> {
    let email = email.trim();
    if email.is_empty() || email.len() > MAX_EMAIL_LEN {
        return Err(QuillgateError::ValidationError(
            "Email must be between 1 and 254 characters".to_string(),
        ));
    }

    let (local, domain) = email.split_once('@').ok_or_else(|| {
        QuillgateError::ValidationError("Email must contain '@'".to_string())
    })?;

    if local.is_empty()
        || domain.len() < 3
        || !domain.contains('.')
        || domain.starts_with('.')
        || domain.ends_with('.')
        || domain.contains('@')
        || email.chars().any(|c| c.is_whitespace() || c.is_control())
    {
        return Err(QuillgateError::ValidationError(
            "Email address is malformed".to_string(),
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_emails_are_normalized() {
        let user = User::with_password("  Alice@Example.COM ", "hash".to_string(), None);
        assert_eq!(user.email, "alice@example.com");
        assert!(user.has_password());
    }

    #[test]
    fn test_external_user_has_no_password() {
        let user = User::from_external("bob@example.com", Some("Bob".to_string()));
        assert!(!user.has_password());
        assert_eq!(user.display_name.as_deref(), Some("Bob"));
    }

    #[test]
    fn test_password_hash_never_serialized() {
        let user = User::with_password("a@x.com", "$argon2id$secret".to_string(), None);
        let json = serde_json::to_string(&user).unwrap();
        assert!(!json.contains("argon2"));
        assert!(json.contains("createdAt"));
    }

    #[test]
    fn test_validate_email() {
        assert!(validate_email("a@x.com").is_ok());
        assert!(validate_email("first.last@blog.example.org").is_ok());
        assert!(validate_email("").is_err());
        assert!(validate_email("no-at-sign.com").is_err());
        assert!(validate_email("@x.com").is_err());
        assert!(validate_email("a@com").is_err());
        assert!(validate_email("a@x.com@y.com").is_err());
        assert!(validate_email("a b@x.com").is_err());
    }

    #[test]
    fn test_identity_provider_round_trip() {
        let provider = IdentityProvider::Google;
        assert_eq!(IdentityProvider::parse(provider.as_str()), Some(provider));
        assert_eq!(IdentityProvider::parse("github"), None);
    }
}

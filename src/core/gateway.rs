//! Authentication gateway
//!
//! Composes credential verification, token issuance and the stores into the
//! operations exposed over HTTP. An attempt moves from credentials to
//! issued tokens; refresh rotates the pair, and a revoked or expired
//! refresh token ends the session for good.

use std::sync::Arc;
use std::time::Duration;

use crate::auth::password::{
    hash_password, validate_password, verify_dummy_password, verify_password,
};
use crate::auth::provider::{ExternalProfile, ExternalTokenVerifier};
use crate::auth::token::{TokenIssuer, TokenPair};
use crate::auth::user::{validate_email, ExternalIdentity, User};
use crate::config::{AccountLinkPolicy, AuthConfig};
use crate::error::{QuillgateError, Result};
use crate::security::AuthTimer;
use crate::security_logger::{log_security_event, SecurityEvent};
use crate::storage::session_store::{RevocationReason, SharedSessionStore};
use crate::storage::user_store::SharedUserStore;

const MAX_DISPLAY_NAME_LEN: usize = 50;

pub struct AuthGateway {
    users: SharedUserStore,
    tokens: TokenIssuer,
    verifier: Option<Arc<dyn ExternalTokenVerifier>>,
    link_policy: AccountLinkPolicy,
    min_auth_duration: Duration,
}

impl AuthGateway {
    pub fn new(
        config: &AuthConfig,
        users: SharedUserStore,
        sessions: SharedSessionStore,
        verifier: Option<Arc<dyn ExternalTokenVerifier>>,
    ) -> Self {
        Self {
            users,
            tokens: TokenIssuer::new(config, sessions),
            verifier,
            link_policy: config.account_link_policy,
            min_auth_duration: config.min_auth_duration,
        }
    }

    pub fn tokens(&self) -> &TokenIssuer {
        &self.tokens
    }

    pub fn users(&self) -> &SharedUserStore {
        &self.users
    }

    fn verifier(&self) -> Result<&Arc<dyn ExternalTokenVerifier>> {
        self.verifier.as_ref().ok_or_else(|| {
            QuillgateError::ConfigError("External sign-in is not configured".to_string())
        })
    }

    /// Create a password account
    pub async fn register(
        &self,
        email: &str,
        password: &str,
        display_name: Option<String>,
    ) -> Result<User> {
        validate_email(email)?;
        validate_password(password)?;

        let display_name = display_name
            .map(|name| name.trim().to_string())
            .filter(|name| !name.is_empty());
        if display_name
            .as_ref()
            .map_or(false, |name| name.chars().count() > MAX_DISPLAY_NAME_LEN)
        {
            return Err(QuillgateError::ValidationError(format!(
                "Display name must be at most {} characters",
                MAX_DISPLAY_NAME_LEN
            )));
        }

        let plaintext = password.to_string();
        let password_hash = tokio::task::spawn_blocking(move || hash_password(&plaintext)).await??;

        let user = self
            .users
            .create_user(User::with_password(email, password_hash, display_name))
            .await?;

        log_security_event(SecurityEvent::AccountCreated {
            user_id: user.id.clone(),
            method: "password".to_string(),
        })
        .await;
        Ok(user)
    }

    /// Password login. Every credential failure is reported as `InvalidCredentials`.
    pub async fn login(&self, email: &str, password: &str) -> Result<TokenPair> {
        let timer = AuthTimer::new(self.min_auth_duration);
        let result = self.check_password(email, password).await;
        timer.wait().await;

        let user = result?;
        log_security_event(SecurityEvent::AuthenticationSuccess {
            user_id: user.id.clone(),
            method: "password".to_string(),
        })
        .await;
        self.tokens.issue_pair(&user.id).await
    }

    async fn check_password(&self, email: &str, password: &str) -> Result<User> {
        let plaintext = password.to_string();

        let Some(user) = self.users.find_by_email(email).await? else {
            tokio::task::spawn_blocking(move || verify_dummy_password(&plaintext)).await?;
            self.log_login_failure(email, "unknown email").await;
            return Err(QuillgateError::InvalidCredentials);
        };

        let has_password = user.has_password();
        let (user, matched) = tokio::task::spawn_blocking(move || {
            let matched = verify_password(&user, &plaintext);
            (user, matched)
        })
        .await?;

        if matched {
            Ok(user)
        } else {
            let reason = if has_password {
                "wrong password"
            } else {
                "account has no password"
            };
            self.log_login_failure(email, reason).await;
            Err(QuillgateError::InvalidCredentials)
        }
    }

    async fn log_login_failure(&self, email: &str, reason: &str) {
        log_security_event(SecurityEvent::AuthenticationFailed {
            subject: Some(email.to_string()),
            method: "password".to_string(),
            reason: reason.to_string(),
        })
        .await;
    }

    /// Sign in with a provider identity token, creating the account on first use
    pub async fn login_with_provider(&self, provider_token: &str) -> Result<TokenPair> {
        // Verification completes before any store access
        let profile = self.verify_external(provider_token).await?;
        let user = self.resolve_external_user(&profile).await?;

        log_security_event(SecurityEvent::AuthenticationSuccess {
            user_id: user.id.clone(),
            method: profile.provider.as_str().to_string(),
        })
        .await;
        self.tokens.issue_pair(&user.id).await
    }

    async fn verify_external(&self, provider_token: &str) -> Result<ExternalProfile> {
        let verifier = self.verifier()?;
        match verifier.verify(provider_token).await {
            Ok(profile) => Ok(profile),
            Err(e) => {
                let provider = verifier.provider().as_str().to_string();
                let event = match &e {
                    QuillgateError::ProviderUnavailable(error) => SecurityEvent::ProviderUnavailable {
                        provider,
                        error: error.clone(),
                    },
                    other => SecurityEvent::AuthenticationFailed {
                        subject: None,
                        method: provider,
                        reason: other.to_string(),
                    },
                };
                log_security_event(event).await;
                Err(e)
            }
        }
    }

    async fn resolve_external_user(&self, profile: &ExternalProfile) -> Result<User> {
        if let Some(user) = self
            .users
            .find_by_identity(profile.provider, &profile.subject)
            .await?
        {
            return Ok(user);
        }

        match self.users.find_by_email(&profile.email).await? {
            None => {
                let user = User::from_external(&profile.email, profile.name.clone());
                let identity = ExternalIdentity::new(
                    profile.provider,
                    profile.subject.clone(),
                    user.id.clone(),
                    &profile.email,
                );

                match self.users.create_user_with_identity(user, identity).await {
                    Ok(user) => {
                        log_security_event(SecurityEvent::AccountCreated {
                            user_id: user.id.clone(),
                            method: profile.provider.as_str().to_string(),
                        })
                        .await;
                        Ok(user)
                    }
                    // Lost a race with a concurrent first sign-in or registration
                    Err(QuillgateError::IdentityAlreadyLinked) | Err(QuillgateError::EmailTaken) => self
                        .users
                        .find_by_identity(profile.provider, &profile.subject)
                        .await?
                        .ok_or(QuillgateError::ConflictingAccount),
                    Err(e) => Err(e),
                }
            }
            Some(existing) => match self.link_policy {
                AccountLinkPolicy::RequireConfirmation => {
                    log_security_event(SecurityEvent::AccountLinkConflict {
                        email: profile.email.clone(),
                        provider: profile.provider.as_str().to_string(),
                    })
                    .await;
                    Err(QuillgateError::ConflictingAccount)
                }
                AccountLinkPolicy::AutoLink => {
                    let identity = ExternalIdentity::new(
                        profile.provider,
                        profile.subject.clone(),
                        existing.id.clone(),
                        &profile.email,
                    );
                    match self.users.link_identity(identity).await {
                        Ok(()) => {
                            log_security_event(SecurityEvent::AccountLinked {
                                user_id: existing.id.clone(),
                                provider: profile.provider.as_str().to_string(),
                            })
                            .await;
                            Ok(existing)
                        }
                        Err(QuillgateError::IdentityAlreadyLinked) => self
                            .users
                            .find_by_identity(profile.provider, &profile.subject)
                            .await?
                            .ok_or(QuillgateError::ConflictingAccount),
                        Err(e) => Err(e),
                    }
                }
            },
        }
    }

    /// Explicitly attach a provider identity to the signed-in account
    pub async fn link_provider(
        &self,
        access_token: &str,
        provider_token: &str,
    ) -> Result<ExternalIdentity> {
        let user = self.current_user(access_token).await?;
        let profile = self.verify_external(provider_token).await?;

        if let Some(owner) = self
            .users
            .find_by_identity(profile.provider, &profile.subject)
            .await?
        {
            if owner.id != user.id {
                return Err(QuillgateError::ConflictingAccount);
            }
            let existing = self
                .users
                .identities_for(&user.id)
                .await?
                .into_iter()
                .find(|identity| {
                    identity.provider == profile.provider && identity.subject == profile.subject
                });
            if let Some(identity) = existing {
                return Ok(identity);
            }
        }

        let identity = ExternalIdentity::new(
            profile.provider,
            profile.subject.clone(),
            user.id.clone(),
            &profile.email,
        );
        match self.users.link_identity(identity.clone()).await {
            Ok(()) => {
                log_security_event(SecurityEvent::AccountLinked {
                    user_id: user.id.clone(),
                    provider: profile.provider.as_str().to_string(),
                })
                .await;
                Ok(identity)
            }
            Err(QuillgateError::IdentityAlreadyLinked) => Err(QuillgateError::ConflictingAccount),
            Err(e) => Err(e),
        }
    }

    /// Exchange a refresh token for a new pair
    pub async fn refresh(&self, refresh_token: &str) -> Result<TokenPair> {
        match self.tokens.rotate_refresh_token(refresh_token).await {
            Ok(pair) => Ok(pair),
            Err(e) => {
                let event = match &e {
                    QuillgateError::RevokedToken => SecurityEvent::RefreshTokenReplay {
                        reason: "refresh token already used or revoked".to_string(),
                    },
                    other => SecurityEvent::TokenValidationFailed {
                        reason: other.to_string(),
                    },
                };
                log_security_event(event).await;
                Err(e)
            }
        }
    }

    /// End the session behind a refresh token. Never fails, so callers
    /// cannot probe whether a token was still valid.
    pub async fn logout(&self, refresh_token: &str) {
        match self
            .tokens
            .revoke_refresh_token(refresh_token, RevocationReason::UserLogout)
            .await
        {
            Ok(Some(user_id)) => {
                log_security_event(SecurityEvent::TokenRevoked {
                    user_id,
                    token_id: None,
                    reason: RevocationReason::UserLogout.as_str().to_string(),
                })
                .await;
            }
            Ok(None) => log::debug!("Logout for a session that was already inactive"),
            Err(e) if e.is_auth_failure() => log::debug!("Logout with unusable token: {}", e),
            Err(e) => log::warn!("Logout could not revoke session: {}", e),
        }
    }

    /// Revoke every session of the signed-in user
    pub async fn logout_all(&self, access_token: &str) -> Result<usize> {
        let user_id = self.authenticate(access_token).await?;
        let count = self
            .tokens
            .sessions()
            .revoke_all(&user_id, RevocationReason::SecurityIncident)
            .await?;

        log_security_event(SecurityEvent::TokenRevoked {
            user_id,
            token_id: None,
            reason: format!("{} ({} sessions)", RevocationReason::SecurityIncident.as_str(), count),
        })
        .await;
        Ok(count)
    }

    /// Replace the password and end every existing session
    pub async fn change_password(
        &self,
        access_token: &str,
        current_password: &str,
        new_password: &str,
    ) -> Result<usize> {
        let user = self.current_user(access_token).await?;
        validate_password(new_password)?;

        let current = current_password.to_string();
        let (user, matched) = tokio::task::spawn_blocking(move || {
            let matched = verify_password(&user, &current);
            (user, matched)
        })
        .await?;
        if !matched {
            self.log_login_failure(&user.email, "wrong current password on change").await;
            return Err(QuillgateError::InvalidCredentials);
        }

        let replacement = new_password.to_string();
        let new_hash = tokio::task::spawn_blocking(move || hash_password(&replacement)).await??;
        self.users.update_password_hash(&user.id, &new_hash).await?;

        let revoked = self
            .tokens
            .sessions()
            .revoke_all(&user.id, RevocationReason::CredentialChange)
            .await?;

        log_security_event(SecurityEvent::CredentialChanged {
            user_id: user.id.clone(),
            sessions_revoked: revoked,
        })
        .await;
        Ok(revoked)
    }

    /// Resolve an access token to a user id
    pub async fn authenticate(&self, access_token: &str) -> Result<String> {
        match self.tokens.verify_access_token(access_token) {
            Ok(user_id) => Ok(user_id),
            Err(e) => {
                log_security_event(SecurityEvent::TokenValidationFailed {
                    reason: e.to_string(),
                })
                .await;
                Err(e)
            }
        }
    }

    /// Load the account behind an access token
    pub async fn current_user(&self, access_token: &str) -> Result<User> {
        let user_id = self.authenticate(access_token).await?;
        self.users
            .find_by_id(&user_id)
            .await?
            .ok_or_else(|| QuillgateError::InvalidToken("Unknown subject".to_string()))
    }
}

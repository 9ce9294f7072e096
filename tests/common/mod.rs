//! Shared fixtures for integration tests
#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use jsonwebtoken::{encode, Algorithm, DecodingKey, EncodingKey, Header};
use serde_json::json;

use quillgate::auth::provider::{ExternalTokenVerifier, GoogleTokenVerifier, StaticKeySource};
use quillgate::config::{AccountLinkPolicy, AuthConfig};
use quillgate::core::AuthGateway;
use quillgate::storage::{create_memory_session_store, MemoryUserStore, SharedUserStore};

pub const SECRET: &str = "test-9f8e7d6c5b4a39281706f5e4d3c2b1a0";
pub const CLIENT_ID: &str = "blog-client.apps.googleusercontent.com";
pub const PROVIDER_KEY: &[u8] = b"provider-signing-key-for-integration";
pub const PROVIDER_KID: &str = "kid-1";

pub fn config() -> AuthConfig {
    let mut config = AuthConfig::new(SECRET).unwrap();
    config.google_client_id = Some(CLIENT_ID.to_string());
    config.min_auth_duration = Duration::from_millis(1);
    config
}

/// Google verifier that trusts tokens signed with `PROVIDER_KEY`
pub fn google_verifier() -> Arc<dyn ExternalTokenVerifier> {
    let keys = StaticKeySource::new().with_key(PROVIDER_KID, DecodingKey::from_secret(PROVIDER_KEY));
    Arc::new(GoogleTokenVerifier::with_algorithm(
        CLIENT_ID,
        Arc::new(keys),
        Duration::from_secs(30),
        Algorithm::HS256,
    ))
}

pub fn google_token_signed_with(subject: &str, email: &str, key: &[u8]) -> String {
    let now = chrono::Utc::now().timestamp();
    let claims = json!({
        "iss": "https://accounts.google.com",
        "aud": CLIENT_ID,
        "sub": subject,
        "email": email,
        "email_verified": true,
        "name": "Blog Writer",
        "iat": now,
        "exp": now + 3600,
    });
    let mut header = Header::new(Algorithm::HS256);
    header.kid = Some(PROVIDER_KID.to_string());
    encode(&header, &claims, &EncodingKey::from_secret(key)).unwrap()
}

pub fn google_token(subject: &str, email: &str) -> String {
    google_token_signed_with(subject, email, PROVIDER_KEY)
}

pub fn gateway_with(config: &AuthConfig) -> (Arc<AuthGateway>, SharedUserStore) {
    let users: SharedUserStore = Arc::new(MemoryUserStore::new());
    let gateway = AuthGateway::new(
        config,
        users.clone(),
        create_memory_session_store(),
        Some(google_verifier()),
    );
    (Arc::new(gateway), users)
}

pub fn gateway() -> (Arc<AuthGateway>, SharedUserStore) {
    gateway_with(&config())
}

pub fn auto_link_gateway() -> (Arc<AuthGateway>, SharedUserStore) {
    let mut config = config();
    config.account_link_policy = AccountLinkPolicy::AutoLink;
    gateway_with(&config)
}

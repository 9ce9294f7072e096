//! External identity verification
//!
//! Identity tokens issued by a third-party provider are verified here,
//! server-side, against the provider's published signing keys. Key lookup
//! sits behind `SigningKeySource` so the HTTP-backed JWKS cache can be
//! swapped for fixed keys in tests and offline setups.

use async_trait::async_trait;
use jsonwebtoken::jwk::JwkSet;
use jsonwebtoken::{decode, decode_header, Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

use crate::auth::user::IdentityProvider;
use crate::config::AuthConfig;
use crate::constants::{GOOGLE_ISSUERS, JWKS_MIN_REFRESH_SECS};
use crate::error::{QuillgateError, Result};

/// Identity asserted by a verified provider token
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternalProfile {
    pub provider: IdentityProvider,
    /// Provider's stable subject id
    pub subject: String,
    pub email: String,
    pub email_verified: bool,
    pub name: Option<String>,
}

/// Trait for identity token verifiers
#[async_trait]
pub trait ExternalTokenVerifier: Send + Sync {
    /// Verify a provider-issued identity token
    async fn verify(&self, token: &str) -> Result<ExternalProfile>;

    /// The provider this verifier speaks for
    fn provider(&self) -> IdentityProvider;
}

/// Source of provider signing keys, looked up by key id
#[async_trait]
pub trait SigningKeySource: Send + Sync {
    async fn key_for(&self, kid: &str) -> Result<Option<DecodingKey>>;
}

/// Fixed set of signing keys
#[derive(Default)]
pub struct StaticKeySource {
    keys: HashMap<String, DecodingKey>,
}

impl StaticKeySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_key(mut self, kid: impl Into<String>, key: DecodingKey) -> Self {
        self.keys.insert(kid.into(), key);
        self
    }
}

#[async_trait]
impl SigningKeySource for StaticKeySource {
    async fn key_for(&self, kid: &str) -> Result<Option<DecodingKey>> {
        Ok(self.keys.get(kid).cloned())
    }
}

struct CachedKeys {
    keys: JwkSet,
    fetched_at: Instant,
}

/// Provider JWKS fetched over HTTPS and cached
pub struct JwksKeySource {
    http: reqwest::Client,
    url: String,
    cache_ttl: Duration,
    cache: RwLock<Option<CachedKeys>>,
    min_refresh_interval: Duration,
    /// When the last fetch was started, successful or not
    last_refresh: Mutex<Option<Instant>>,
}

impl JwksKeySource {
    pub fn new(url: impl Into<String>, timeout: Duration, cache_ttl: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| QuillgateError::ConfigError(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http,
            url: url.into(),
            cache_ttl,
            cache: RwLock::new(None),
            min_refresh_interval: Duration::from_secs(JWKS_MIN_REFRESH_SECS),
            last_refresh: Mutex::new(None),
        })
    }

    pub fn with_min_refresh_interval(mut self, interval: Duration) -> Self {
        self.min_refresh_interval = interval;
        self
    }

    /// Reserve the right to hit the endpoint; false while a recent fetch
    /// still counts
    fn claim_refresh(&self) -> bool {
        let mut last = self
            .last_refresh
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        match *last {
            Some(at) if at.elapsed() < self.min_refresh_interval => false,
            _ => {
                *last = Some(Instant::now());
                true
            }
        }
    }

    async fn fetch(&self) -> Result<JwkSet> {
        let response = self
            .http
            .get(&self.url)
            .send()
            .await
            .map_err(|e| QuillgateError::ProviderUnavailable(format!("JWKS request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(QuillgateError::ProviderUnavailable(format!(
                "JWKS endpoint returned {}",
                response.status()
            )));
        }

        response
            .json::<JwkSet>()
            .await
            .map_err(|e| QuillgateError::ProviderUnavailable(format!("Malformed JWKS: {}", e)))
    }

    fn lookup(keys: &JwkSet, kid: &str) -> Result<Option<DecodingKey>> {
        match keys.find(kid) {
            Some(jwk) => DecodingKey::from_jwk(jwk)
                .map(Some)
                .map_err(|e| QuillgateError::InvalidToken(format!("Unusable signing key: {}", e))),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl SigningKeySource for JwksKeySource {
    async fn key_for(&self, kid: &str) -> Result<Option<DecodingKey>> {
        let cached_key = {
            let cache = self.cache.read().await;
            match cache.as_ref() {
                Some(cached) => {
                    let key = Self::lookup(&cached.keys, kid)?;
                    if key.is_some() && cached.fetched_at.elapsed() < self.cache_ttl {
                        return Ok(key);
                    }
                    Some(key)
                }
                None => None,
            }
        };

        // Stale cache or unknown kid (the provider may have rotated keys).
        // Unknown kids are attacker controlled, so refetches are rate limited.
        if !self.claim_refresh() {
            return match cached_key {
                Some(key) => Ok(key),
                None => Err(QuillgateError::ProviderUnavailable(
                    "JWKS refresh throttled after a recent attempt".to_string(),
                )),
            };
        }

        // The HTTP call happens outside the cache lock
        let keys = self.fetch().await?;
        let key = Self::lookup(&keys, kid)?;
        log::debug!("Refreshed JWKS from {} ({} keys)", self.url, keys.keys.len());

        let mut cache = self.cache.write().await;
        *cache = Some(CachedKeys {
            keys,
            fetched_at: Instant::now(),
        });
        Ok(key)
    }
}

/// Claims Google puts into an ID token
#[derive(Debug, Deserialize)]
struct GoogleIdClaims {
    sub: String,
    email: Option<String>,
    #[serde(default)]
    email_verified: bool,
    name: Option<String>,
}

/// Verifies Google ID tokens
pub struct GoogleTokenVerifier {
    client_id: String,
    keys: Arc<dyn SigningKeySource>,
    validation: Validation,
}

impl GoogleTokenVerifier {
    /// Google signs ID tokens with RS256
    pub fn new(client_id: impl Into<String>, keys: Arc<dyn SigningKeySource>, leeway: Duration) -> Self {
        Self::with_algorithm(client_id, keys, leeway, Algorithm::RS256)
    }

    pub fn with_algorithm(
        client_id: impl Into<String>,
        keys: Arc<dyn SigningKeySource>,
        leeway: Duration,
        algorithm: Algorithm,
    ) -> Self {
        let client_id = client_id.into();
        let mut validation = Validation::new(algorithm);
        validation.leeway = leeway.as_secs();
        validation.set_audience(&[client_id.as_str()]);
        validation.set_issuer(&GOOGLE_ISSUERS[..]);
        validation.set_required_spec_claims(&["exp", "sub", "iss", "aud"]);

        Self {
            client_id,
            keys,
            validation,
        }
    }

    /// Build the production verifier from configuration
    pub fn from_config(config: &AuthConfig) -> Result<Self> {
        let client_id = config.google_client_id.clone().ok_or_else(|| {
            QuillgateError::ConfigError("GOOGLE_CLIENT_ID is required for Google sign-in".to_string())
        })?;
        let keys = JwksKeySource::new(
            config.google_jwks_url.clone(),
            config.provider_timeout,
            config.jwks_cache_ttl,
        )?;
        Ok(Self::new(client_id, Arc::new(keys), config.leeway))
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }
}

#[async_trait]
impl ExternalTokenVerifier for GoogleTokenVerifier {
    async fn verify(&self, token: &str) -> Result<ExternalProfile> {
        let header = decode_header(token)
            .map_err(|e| QuillgateError::InvalidToken(format!("Malformed token header: {}", e)))?;
        let kid = header
            .kid
            .ok_or_else(|| QuillgateError::InvalidToken("Token header has no kid".to_string()))?;

        let key = self
            .keys
            .key_for(&kid)
            .await?
            .ok_or_else(|| QuillgateError::InvalidToken(format!("Unknown signing key {}", kid)))?;

        let data = decode::<GoogleIdClaims>(token, &key, &self.validation)
            .map_err(|e| QuillgateError::InvalidToken(e.to_string()))?;
        let claims = data.claims;

        let email = claims
            .email
            .filter(|email| !email.is_empty())
            .ok_or_else(|| QuillgateError::InvalidToken("Token carries no email".to_string()))?;
        if !claims.email_verified {
            return Err(QuillgateError::InvalidToken("Email not verified by provider".to_string()));
        }

        Ok(ExternalProfile {
            provider: IdentityProvider::Google,
            subject: claims.sub,
            email,
            email_verified: true,
            name: claims.name,
        })
    }

    fn provider(&self) -> IdentityProvider {
        IdentityProvider::Google
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};
    use serde_json::json;

    const KEY: &[u8] = b"provider-signing-key-for-unit-tests";
    const CLIENT_ID: &str = "blog-client.apps.googleusercontent.com";

    fn verifier() -> GoogleTokenVerifier {
        let keys = StaticKeySource::new().with_key("k1", DecodingKey::from_secret(KEY));
        GoogleTokenVerifier::with_algorithm(
            CLIENT_ID,
            Arc::new(keys),
            Duration::from_secs(30),
            Algorithm::HS256,
        )
    }

    fn id_token(claims: serde_json::Value, kid: &str, key: &[u8]) -> String {
        let mut header = Header::new(Algorithm::HS256);
        header.kid = Some(kid.to_string());
        encode(&header, &claims, &EncodingKey::from_secret(key)).unwrap()
    }

    fn claims() -> serde_json::Value {
        let now = chrono::Utc::now().timestamp();
        json!({
            "iss": "https://accounts.google.com",
            "aud": CLIENT_ID,
            "sub": "1100220033",
            "email": "writer@example.com",
            "email_verified": true,
            "name": "Writer",
            "iat": now,
            "exp": now + 3600,
        })
    }

    #[tokio::test]
    async fn test_valid_token() {
        let profile = verifier().verify(&id_token(claims(), "k1", KEY)).await.unwrap();
        assert_eq!(profile.subject, "1100220033");
        assert_eq!(profile.email, "writer@example.com");
        assert_eq!(profile.name.as_deref(), Some("Writer"));
    }

    #[tokio::test]
    async fn test_tampered_signature_rejected() {
        let forged = id_token(claims(), "k1", b"attacker-controlled-signing-key!!");
        assert!(matches!(
            verifier().verify(&forged).await,
            Err(QuillgateError::InvalidToken(_))
        ));
    }

    #[tokio::test]
    async fn test_wrong_audience_rejected() {
        let mut c = claims();
        c["aud"] = json!("someone-else.apps.googleusercontent.com");
        assert!(verifier().verify(&id_token(c, "k1", KEY)).await.is_err());
    }

    #[tokio::test]
    async fn test_wrong_issuer_rejected() {
        let mut c = claims();
        c["iss"] = json!("https://evil.example.com");
        assert!(verifier().verify(&id_token(c, "k1", KEY)).await.is_err());
    }

    #[tokio::test]
    async fn test_expired_token_rejected() {
        let mut c = claims();
        c["exp"] = json!(chrono::Utc::now().timestamp() - 3600);
        assert!(matches!(
            verifier().verify(&id_token(c, "k1", KEY)).await,
            Err(QuillgateError::InvalidToken(_))
        ));
    }

    #[tokio::test]
    async fn test_unverified_email_rejected() {
        let mut c = claims();
        c["email_verified"] = json!(false);
        assert!(verifier().verify(&id_token(c, "k1", KEY)).await.is_err());
    }

    #[tokio::test]
    async fn test_unknown_kid_rejected() {
        assert!(verifier().verify(&id_token(claims(), "k2", KEY)).await.is_err());
        assert!(verifier().verify("not-a-jwt").await.is_err());
    }

    async fn counting_jwks_server() -> (String, Arc<std::sync::atomic::AtomicUsize>) {
        use std::sync::atomic::{AtomicUsize, Ordering};
        use warp::Filter;

        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let route = warp::path("certs").map(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            warp::reply::json(&json!({"keys": []}))
        });
        let (addr, server) = warp::serve(route).bind_ephemeral(([127, 0, 0, 1], 0));
        tokio::spawn(server);
        (format!("http://{}/certs", addr), hits)
    }

    #[tokio::test]
    async fn test_unknown_kids_do_not_multiply_fetches() {
        use std::sync::atomic::Ordering;

        let (url, hits) = counting_jwks_server().await;
        let keys = JwksKeySource::new(url, Duration::from_secs(2), Duration::from_secs(3600)).unwrap();

        for i in 0..20 {
            let kid = format!("random-kid-{}", i);
            assert!(keys.key_for(&kid).await.unwrap().is_none());
        }
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unknown_kid_refetches_after_interval() {
        use std::sync::atomic::Ordering;

        let (url, hits) = counting_jwks_server().await;
        let keys = JwksKeySource::new(url, Duration::from_secs(2), Duration::from_secs(3600))
            .unwrap()
            .with_min_refresh_interval(Duration::ZERO);

        for kid in ["a", "b", "c"] {
            assert!(keys.key_for(kid).await.unwrap().is_none());
        }
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_unreachable_jwks_is_provider_unavailable() {
        // Nothing listens on port 9 (discard) locally
        let keys = JwksKeySource::new(
            "http://127.0.0.1:9/certs",
            Duration::from_millis(200),
            Duration::from_secs(60),
        )
        .unwrap();
        assert!(matches!(
            keys.key_for("k1").await,
            Err(QuillgateError::ProviderUnavailable(_))
        ));
    }
}

use chrono::{DateTime, TimeZone, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::config::AuthConfig;
use crate::constants::CLAIMS_VERSION;
use crate::error::{QuillgateError, Result};
use crate::storage::session_store::{ConsumeOutcome, RevocationReason, SharedSessionStore};

/// What a token may be used for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenPurpose {
    Access,
    Refresh,
}

/// JWT Claims structure shared by access and refresh tokens
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Claim layout version
    pub ver: u8,
    /// Issuer
    pub iss: String,
    /// Subject (user ID)
    pub sub: String,
    /// Issued at (as UTC timestamp)
    pub iat: i64,
    /// Expiration time (as UTC timestamp)
    pub exp: i64,
    pub purpose: TokenPurpose,
    /// Token id, present on refresh tokens only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jti: Option<String>,
}

/// Signed access token
#[derive(Debug, Clone)]
pub struct AccessToken {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

/// Signed refresh token, registered in the session store
#[derive(Debug, Clone)]
pub struct RefreshToken {
    pub token: String,
    pub token_id: String,
    pub expires_at: DateTime<Utc>,
}

/// Tokens handed out by a successful login or refresh
#[derive(Debug, Clone)]
pub struct TokenPair {
    pub user_id: String,
    pub access: AccessToken,
    pub refresh: RefreshToken,
}

impl TokenPair {
    /// Seconds until the access token expires
    pub fn expires_in(&self) -> i64 {
        (self.access.expires_at - Utc::now()).num_seconds().max(0)
    }
}

/// Mints, verifies and rotates the service's own tokens
pub struct TokenIssuer {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
    issuer: String,
    access_ttl: chrono::Duration,
    refresh_ttl: chrono::Duration,
    /// Clock skew tolerated on every expiry check
    leeway: chrono::Duration,
    sessions: SharedSessionStore,
}

impl TokenIssuer {
    /// Creates a token issuer from configuration
    pub fn new(config: &AuthConfig, sessions: SharedSessionStore) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = config.leeway.as_secs();
        validation.set_issuer(&[config.token_issuer.as_str()]);
        validation.set_required_spec_claims(&["exp", "sub", "iss"]);

        Self {
            encoding_key: EncodingKey::from_secret(config.jwt_secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(config.jwt_secret.as_bytes()),
            validation,
            issuer: config.token_issuer.clone(),
            access_ttl: config.access_token_ttl,
            refresh_ttl: config.refresh_token_ttl,
            leeway: chrono::Duration::from_std(config.leeway)
                .unwrap_or_else(|_| chrono::Duration::zero()),
            sessions,
        }
    }

    pub fn sessions(&self) -> &SharedSessionStore {
        &self.sessions
    }

    fn sign(&self, claims: &Claims) -> Result<String> {
        encode(&Header::new(Algorithm::HS256), claims, &self.encoding_key)
            .map_err(|e| QuillgateError::SystemError(format!("Failed to sign token: {}", e)))
    }

    fn decode_claims(&self, token: &str, validation: &Validation) -> Result<Claims> {
        let data = decode::<Claims>(token, &self.decoding_key, validation).map_err(|e| {
            match e.kind() {
                ErrorKind::ExpiredSignature => QuillgateError::ExpiredToken,
                ErrorKind::InvalidSignature => QuillgateError::InvalidSignature,
                _ => QuillgateError::InvalidToken(e.to_string()),
            }
        })?;

        let claims = data.claims;
        if claims.ver != CLAIMS_VERSION {
            return Err(QuillgateError::InvalidToken(format!(
                "Unsupported claims version {}",
                claims.ver
            )));
        }
        if claims.sub.is_empty() {
            return Err(QuillgateError::InvalidToken("Empty subject".to_string()));
        }
        Ok(claims)
    }

    /// Issue an access token stamped with the current time
    pub fn issue_access_token(&self, user_id: &str) -> Result<AccessToken> {
        self.issue_access_token_at(user_id, Utc::now())
    }

    /// Issue an access token with an explicit issue time
    pub fn issue_access_token_at(
        &self,
        user_id: &str,
        issued_at: DateTime<Utc>,
    ) -> Result<AccessToken> {
        let expires_at = issued_at + self.access_ttl;
        let claims = Claims {
            ver: CLAIMS_VERSION,
            iss: self.issuer.clone(),
            sub: user_id.to_string(),
            iat: issued_at.timestamp(),
            exp: expires_at.timestamp(),
            purpose: TokenPurpose::Access,
            jti: None,
        };

        Ok(AccessToken {
            token: self.sign(&claims)?,
            expires_at,
        })
    }

    /// Issue a refresh token and register its session
    pub async fn issue_refresh_token(&self, user_id: &str) -> Result<RefreshToken> {
        self.issue_refresh_token_at(user_id, Utc::now()).await
    }

    pub async fn issue_refresh_token_at(
        &self,
        user_id: &str,
        issued_at: DateTime<Utc>,
    ) -> Result<RefreshToken> {
        let token_id = uuid::Uuid::new_v4().to_string();
        let expires_at = issued_at + self.refresh_ttl;
        let claims = Claims {
            ver: CLAIMS_VERSION,
            iss: self.issuer.clone(),
            sub: user_id.to_string(),
            iat: issued_at.timestamp(),
            exp: expires_at.timestamp(),
            purpose: TokenPurpose::Refresh,
            jti: Some(token_id.clone()),
        };
        let token = self.sign(&claims)?;

        // Stored at second precision, same as the claims
        let issued = Utc.timestamp_opt(claims.iat, 0).single().unwrap_or(issued_at);
        let expires = Utc.timestamp_opt(claims.exp, 0).single().unwrap_or(expires_at);
        self.sessions.register(&token_id, user_id, issued, expires).await?;

        Ok(RefreshToken {
            token,
            token_id,
            expires_at,
        })
    }

    /// Issue a fresh access/refresh pair
    pub async fn issue_pair(&self, user_id: &str) -> Result<TokenPair> {
        let access = self.issue_access_token(user_id)?;
        let refresh = self.issue_refresh_token(user_id).await?;
        Ok(TokenPair {
            user_id: user_id.to_string(),
            access,
            refresh,
        })
    }

    /// Validates an access token and returns the user ID if valid
    pub fn verify_access_token(&self, token: &str) -> Result<String> {
        let claims = self.decode_claims(token, &self.validation)?;
        if claims.purpose != TokenPurpose::Access {
            return Err(QuillgateError::InvalidToken(
                "Refresh token used as access token".to_string(),
            ));
        }
        Ok(claims.sub)
    }

    /// Whether the session behind a refresh token id can still be rotated
    pub async fn is_session_active(&self, token_id: &str) -> Result<bool> {
        let cutoff = Utc::now() - self.leeway;
        Ok(self
            .sessions
            .get_session(token_id)
            .await?
            .map_or(false, |record| record.is_active_at(cutoff)))
    }

    /// Decode a refresh token's claims without touching the session store
    pub fn decode_refresh_token(&self, token: &str) -> Result<Claims> {
        let claims = self.decode_claims(token, &self.validation)?;
        refresh_claims(claims)
    }

    /// Exchange a refresh token for a new pair. The old session is consumed
    /// atomically; replaying it afterwards yields `RevokedToken`.
    pub async fn rotate_refresh_token(&self, token: &str) -> Result<TokenPair> {
        let claims = self.decode_refresh_token(token)?;
        let token_id = claims.jti.as_deref().unwrap_or_default();

        match self.sessions.consume(token_id, Utc::now() - self.leeway).await? {
            ConsumeOutcome::Consumed { user_id } => {
                if user_id != claims.sub {
                    log::error!(
                        "Session {} belongs to {} but token names {}",
                        token_id,
                        user_id,
                        claims.sub
                    );
                    return Err(QuillgateError::InvalidToken("Subject mismatch".to_string()));
                }
                self.issue_pair(&user_id).await
            }
            ConsumeOutcome::Revoked | ConsumeOutcome::Unknown => Err(QuillgateError::RevokedToken),
            ConsumeOutcome::Expired => Err(QuillgateError::ExpiredToken),
        }
    }

    /// Revoke the session behind a refresh token, accepting expired tokens.
    /// Returns the owning user id when a session was revoked.
    pub async fn revoke_refresh_token(
        &self,
        token: &str,
        reason: RevocationReason,
    ) -> Result<Option<String>> {
        let mut validation = self.validation.clone();
        validation.validate_exp = false;

        let claims = refresh_claims(self.decode_claims(token, &validation)?)?;
        let token_id = claims.jti.as_deref().unwrap_or_default();
        if self.sessions.revoke(token_id, reason).await? {
            Ok(Some(claims.sub))
        } else {
            Ok(None)
        }
    }
}

fn refresh_claims(claims: Claims) -> Result<Claims> {
    if claims.purpose != TokenPurpose::Refresh {
        return Err(QuillgateError::InvalidToken(
            "Access token used as refresh token".to_string(),
        ));
    }
    match claims.jti.as_deref() {
        Some(jti) if !jti.is_empty() => Ok(claims),
        _ => Err(QuillgateError::InvalidToken("Missing token id".to_string())),
    }
}

/// Extracts bearer token from Authorization header
pub fn extract_bearer_token(auth_header: &str) -> Option<String> {
    auth_header
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .map(str::to_string)
}

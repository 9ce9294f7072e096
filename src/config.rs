//! Service configuration module
//! Handles the parameters shared by the verifier, token issuer, stores and HTTP layer

use crate::constants::{
    DEFAULT_ACCESS_TOKEN_MINUTES, DEFAULT_DATABASE_URL, DEFAULT_HOST, DEFAULT_JWKS_CACHE_SECS,
    DEFAULT_LEEWAY_SECS, DEFAULT_MIN_AUTH_MILLIS, DEFAULT_PORT, DEFAULT_PROVIDER_TIMEOUT_SECS,
    DEFAULT_REFRESH_TOKEN_DAYS, DEFAULT_TOKEN_ISSUER, GOOGLE_JWKS_URL, MAX_ACCESS_TOKEN_MINUTES,
    MAX_REFRESH_TOKEN_DAYS,
};
use crate::error::{QuillgateError, Result};
use std::env;
use std::time::Duration;

/// What to do when a first Google sign-in carries the email of an existing account
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccountLinkPolicy {
    /// Refuse with `ConflictingAccount`; the owner links from an authenticated session
    RequireConfirmation,
    /// Attach the Google identity to the existing account silently
    AutoLink,
}

impl AccountLinkPolicy {
    fn parse(value: &str) -> Result<Self> {
        match value.trim().to_lowercase().as_str() {
            "confirm" | "require_confirmation" => Ok(Self::RequireConfirmation),
            "auto" | "auto_link" => Ok(Self::AutoLink),
            other => Err(QuillgateError::ConfigError(format!(
                "Unknown account link policy '{}'. Use 'confirm' or 'auto'",
                other
            ))),
        }
    }
}

/// Service configuration parameters
#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub host: String,
    pub port: u16,
    /// sqlx connection string for the user and session database
    pub database_url: String,
    /// Secret for access/refresh token signing
    pub jwt_secret: String,
    /// `iss` claim written into and required from our own tokens
    pub token_issuer: String,
    pub access_token_ttl: chrono::Duration,
    pub refresh_token_ttl: chrono::Duration,
    /// Clock skew tolerated on every expiry check
    pub leeway: Duration,
    /// Origins allowed by the CORS layer
    pub allowed_origins: Vec<String>,
    /// Development mode (refresh cookie without `Secure`)
    pub development_mode: bool,
    /// Deployment environment name (development, production, ...)
    pub environment: String,
    pub google_client_id: Option<String>,
    pub google_client_secret: Option<String>,
    pub google_redirect_uri: Option<String>,
    pub google_jwks_url: String,
    pub jwks_cache_ttl: Duration,
    /// Deadline for calls to the identity provider
    pub provider_timeout: Duration,
    pub account_link_policy: AccountLinkPolicy,
    /// Floor on password login latency
    pub min_auth_duration: Duration,
}

impl AuthConfig {
    /// Build a configuration with defaults around an explicit secret
    pub fn new(jwt_secret: impl Into<String>) -> Result<Self> {
        let jwt_secret = jwt_secret.into();
        Self::validate_jwt_secret(&jwt_secret)?;

        Ok(Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            database_url: DEFAULT_DATABASE_URL.to_string(),
            jwt_secret,
            token_issuer: DEFAULT_TOKEN_ISSUER.to_string(),
            access_token_ttl: chrono::Duration::minutes(DEFAULT_ACCESS_TOKEN_MINUTES),
            refresh_token_ttl: chrono::Duration::days(DEFAULT_REFRESH_TOKEN_DAYS),
            leeway: Duration::from_secs(DEFAULT_LEEWAY_SECS),
            allowed_origins: Vec::new(),
            development_mode: false,
            environment: "development".to_string(),
            google_client_id: None,
            google_client_secret: None,
            google_redirect_uri: None,
            google_jwks_url: GOOGLE_JWKS_URL.to_string(),
            jwks_cache_ttl: Duration::from_secs(DEFAULT_JWKS_CACHE_SECS),
            provider_timeout: Duration::from_secs(DEFAULT_PROVIDER_TIMEOUT_SECS),
            account_link_policy: AccountLinkPolicy::RequireConfirmation,
            min_auth_duration: Duration::from_millis(DEFAULT_MIN_AUTH_MILLIS),
        })
    }

    /// Validate that a secret meets security requirements
    fn validate_jwt_secret(secret: &str) -> Result<()> {
        if secret.len() < 32 {
            return Err(QuillgateError::ConfigError(
                "JWT secret must be at least 32 characters long".to_string(),
            ));
        }

        // Check for insecure default or example values
        let insecure_patterns = [
            "your-secret-key",
            "change-this",
            "INSECURE-DEFAULT-FOR-TESTING-ONLY",
            "test-secret",
            "default",
            "password",
            "12345",
        ];

        for pattern in &insecure_patterns {
            if secret.contains(pattern) {
                return Err(QuillgateError::ConfigError(format!(
                    "JWT secret contains insecure pattern '{}'. Please use a secure random secret generated with: openssl rand -base64 32",
                    pattern
                )));
            }
        }

        // Ensure some complexity
        if secret.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(QuillgateError::ConfigError(
                "JWT secret should contain mixed characters (letters, numbers, symbols) for security"
                    .to_string(),
            ));
        }

        Ok(())
    }

    fn validate_redirect_uri(uri: &str) -> Result<()> {
        let parsed = url::Url::parse(uri).map_err(|e| {
            QuillgateError::ConfigError(format!("Invalid Google redirect URI '{}': {}", uri, e))
        })?;
        if parsed.scheme() != "https" && parsed.host_str() != Some("localhost") {
            return Err(QuillgateError::ConfigError(
                "Google redirect URI must use https outside localhost".to_string(),
            ));
        }
        Ok(())
    }

    /// Reduce an allowed origin to `scheme://host[:port]`
    fn normalize_origin(origin: &str) -> Result<String> {
        let parsed = url::Url::parse(origin).map_err(|e| {
            QuillgateError::ConfigError(format!("Invalid allowed origin '{}': {}", origin, e))
        })?;
        if !matches!(parsed.scheme(), "http" | "https") || parsed.host_str().is_none() {
            return Err(QuillgateError::ConfigError(format!(
                "Allowed origin '{}' must be an http(s) origin",
                origin
            )));
        }
        Ok(parsed.origin().ascii_serialization())
    }

    /// Whether the refresh cookie carries the `Secure` attribute
    pub fn secure_cookies(&self) -> bool {
        !self.development_mode
    }

    /// Load configuration from environment variables if available
    pub fn from_env() -> Result<Self> {
        let jwt_secret = env::var("QUILLGATE_JWT_SECRET")
            .or_else(|_| env::var("SECRET_KEY"))
            .map_err(|_| {
                QuillgateError::ConfigError(
                    "QUILLGATE_JWT_SECRET (or SECRET_KEY) environment variable is required. \
                     Generate one with: openssl rand -base64 32"
                        .to_string(),
                )
            })?;

        let mut config = Self::new(jwt_secret)?;

        config.host = env::var("QUILLGATE_HOST").unwrap_or(config.host);
        config.port = parse_var("QUILLGATE_PORT")?.unwrap_or(config.port);
        config.database_url = env::var("QUILLGATE_DATABASE_URL")
            .or_else(|_| env::var("DATABASE_URL"))
            .unwrap_or(config.database_url);
        config.token_issuer = env::var("QUILLGATE_TOKEN_ISSUER").unwrap_or(config.token_issuer);

        let access_minutes: i64 = parse_var("QUILLGATE_ACCESS_TOKEN_MINUTES")?
            .or(parse_var("ACCESS_TOKEN_EXPIRE_MINUTES")?)
            .unwrap_or(DEFAULT_ACCESS_TOKEN_MINUTES);
        let refresh_days: i64 = parse_var("QUILLGATE_REFRESH_TOKEN_DAYS")?
            .or(parse_var("REFRESH_TOKEN_EXPIRE_DAYS")?)
            .unwrap_or(DEFAULT_REFRESH_TOKEN_DAYS);
        if !(1..=MAX_ACCESS_TOKEN_MINUTES).contains(&access_minutes) {
            return Err(QuillgateError::ConfigError(format!(
                "Access token lifetime must be between 1 and {} minutes",
                MAX_ACCESS_TOKEN_MINUTES
            )));
        }
        if !(1..=MAX_REFRESH_TOKEN_DAYS).contains(&refresh_days) {
            return Err(QuillgateError::ConfigError(format!(
                "Refresh token lifetime must be between 1 and {} days",
                MAX_REFRESH_TOKEN_DAYS
            )));
        }
        config.access_token_ttl = chrono::Duration::try_minutes(access_minutes).ok_or_else(|| {
            QuillgateError::ConfigError("Access token lifetime out of range".to_string())
        })?;
        config.refresh_token_ttl = chrono::Duration::try_days(refresh_days).ok_or_else(|| {
            QuillgateError::ConfigError("Refresh token lifetime out of range".to_string())
        })?;
        if config.access_token_ttl >= config.refresh_token_ttl {
            return Err(QuillgateError::ConfigError(
                "Access token lifetime must be shorter than refresh token lifetime".to_string(),
            ));
        }

        if let Some(secs) = parse_var::<u64>("QUILLGATE_LEEWAY_SECS")? {
            config.leeway = Duration::from_secs(secs);
        }

        config.allowed_origins = env::var("QUILLGATE_ALLOWED_ORIGINS")
            .or_else(|_| env::var("CORS_ORIGINS"))
            .map(|v| {
                v.split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect()
            })
            .unwrap_or_default();
        config.allowed_origins = config
            .allowed_origins
            .iter()
            .map(|origin| Self::normalize_origin(origin))
            .collect::<Result<Vec<_>>>()?;

        config.environment = env::var("ENVIRONMENT").unwrap_or(config.environment);
        config.development_mode = env::var("QUILLGATE_DEVELOPMENT_MODE")
            .map(|v| v.to_lowercase() == "true" || v == "1")
            .unwrap_or_else(|_| config.environment.to_lowercase() == "development");

        config.google_client_id = env::var("QUILLGATE_GOOGLE_CLIENT_ID")
            .or_else(|_| env::var("GOOGLE_CLIENT_ID"))
            .ok();
        config.google_client_secret = env::var("QUILLGATE_GOOGLE_CLIENT_SECRET")
            .or_else(|_| env::var("GOOGLE_CLIENT_SECRET"))
            .ok();
        config.google_redirect_uri = env::var("QUILLGATE_GOOGLE_REDIRECT_URI")
            .or_else(|_| env::var("GOOGLE_REDIRECT_URI"))
            .ok();
        if let Some(ref uri) = config.google_redirect_uri {
            Self::validate_redirect_uri(uri)?;
        }
        config.google_jwks_url =
            env::var("QUILLGATE_GOOGLE_JWKS_URL").unwrap_or(config.google_jwks_url);
        if let Some(secs) = parse_var::<u64>("QUILLGATE_JWKS_CACHE_SECS")? {
            config.jwks_cache_ttl = Duration::from_secs(secs);
        }
        if let Some(secs) = parse_var::<u64>("QUILLGATE_PROVIDER_TIMEOUT_SECS")? {
            config.provider_timeout = Duration::from_secs(secs);
        }

        if let Ok(policy) = env::var("QUILLGATE_ACCOUNT_LINK_POLICY") {
            config.account_link_policy = AccountLinkPolicy::parse(&policy)?;
        }

        if let Some(millis) = parse_var::<u64>("QUILLGATE_MIN_AUTH_MILLIS")? {
            config.min_auth_duration = Duration::from_millis(millis);
        }

        Ok(config)
    }
}

fn parse_var<T: std::str::FromStr>(name: &str) -> Result<Option<T>> {
    match env::var(name) {
        Ok(raw) => raw.trim().parse().map(Some).map_err(|_| {
            QuillgateError::ConfigError(format!("{} has an invalid value: '{}'", name, raw))
        }),
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_applies_defaults() {
        let config = AuthConfig::new("k9$Vq2!mZr7#Lp4@Wx8&Tn3^Hb6*Jd1%Ys5").unwrap();
        assert_eq!(config.access_token_ttl, chrono::Duration::minutes(30));
        assert_eq!(config.refresh_token_ttl, chrono::Duration::days(15));
        assert_eq!(config.account_link_policy, AccountLinkPolicy::RequireConfirmation);
        assert!(config.secure_cookies());
    }

    #[test]
    fn test_short_secret_rejected() {
        let result = AuthConfig::new("short");
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("32 characters"));
    }

    #[test]
    fn test_placeholder_secret_rejected() {
        let result = AuthConfig::new("your-secret-key-here-please-replace-it-0");
        assert!(result.is_err());
    }

    #[test]
    fn test_alphabetic_secret_rejected() {
        let result = AuthConfig::new("abcdefghijklmnopqrstuvwxyzabcdefghij");
        assert!(result.is_err());
    }

    #[test]
    fn test_link_policy_parse() {
        assert_eq!(AccountLinkPolicy::parse("auto").unwrap(), AccountLinkPolicy::AutoLink);
        assert_eq!(
            AccountLinkPolicy::parse(" Confirm ").unwrap(),
            AccountLinkPolicy::RequireConfirmation
        );
        assert!(AccountLinkPolicy::parse("merge").is_err());
    }

    #[test]
    fn test_redirect_uri_validation() {
        assert!(AuthConfig::validate_redirect_uri("https://blog.example.com/auth/callback").is_ok());
        assert!(AuthConfig::validate_redirect_uri("http://localhost:4200/callback").is_ok());
        assert!(AuthConfig::validate_redirect_uri("http://blog.example.com/callback").is_err());
        assert!(AuthConfig::validate_redirect_uri("not a url").is_err());
    }

    #[test]
    fn test_origin_normalization() {
        assert_eq!(
            AuthConfig::normalize_origin("https://blog.example.com/").unwrap(),
            "https://blog.example.com"
        );
        assert_eq!(
            AuthConfig::normalize_origin("http://localhost:4200").unwrap(),
            "http://localhost:4200"
        );
        assert!(AuthConfig::normalize_origin("blog.example.com").is_err());
        assert!(AuthConfig::normalize_origin("ftp://blog.example.com").is_err());
    }
}

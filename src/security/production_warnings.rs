//! Production mode warnings and security configuration validation
//!
//! This module flags configurations that are acceptable in development but
//! should not reach production.

use crate::config::{AccountLinkPolicy, AuthConfig};
use crate::security_logger::{log_security_event, SecurityEvent};

/// Production warning types
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProductionWarning {
    /// Development mode is enabled in production (refresh cookie not `Secure`)
    DevelopmentModeEnabled,
    /// Provider identities merge into existing accounts without confirmation
    AutoLinkEnabled,
    /// Google sign-in cannot work without a client id
    MissingGoogleClientId,
    /// No CORS origins configured
    NoAllowedOrigins,
    /// Debug logging enabled in production
    DebugLoggingEnabled,
}

impl ProductionWarning {
    fn describe(&self) -> (&'static str, &'static str) {
        match self {
            ProductionWarning::DevelopmentModeEnabled => {
                ("cookies", "Development mode is enabled; refresh cookies are sent without Secure")
            }
            ProductionWarning::AutoLinkEnabled => {
                ("accounts", "Google identities are linked to existing accounts without confirmation")
            }
            ProductionWarning::MissingGoogleClientId => {
                ("google", "GOOGLE_CLIENT_ID is not set; Google sign-in is disabled")
            }
            ProductionWarning::NoAllowedOrigins => {
                ("cors", "No allowed origins configured; browsers cannot call the API")
            }
            ProductionWarning::DebugLoggingEnabled => {
                ("logging", "Debug logging is enabled in production")
            }
        }
    }
}

/// Production environment detector
pub struct ProductionChecker {
    is_production: bool,
}

impl ProductionChecker {
    pub fn new(config: &AuthConfig) -> Self {
        let is_production = matches!(
            config.environment.to_lowercase().as_str(),
            "production" | "prod" | "release"
        );
        Self { is_production }
    }

    /// Check if we're running in production
    pub fn is_production(&self) -> bool {
        self.is_production
    }

    /// Collect the warnings that apply to this configuration
    pub fn check(&self, config: &AuthConfig) -> Vec<ProductionWarning> {
        let mut warnings = Vec::new();

        if !self.is_production {
            return warnings; // Skip checks if not in production
        }

        if config.development_mode {
            warnings.push(ProductionWarning::DevelopmentModeEnabled);
        }
        if config.account_link_policy == AccountLinkPolicy::AutoLink {
            warnings.push(ProductionWarning::AutoLinkEnabled);
        }
        if config.google_client_id.is_none() {
            warnings.push(ProductionWarning::MissingGoogleClientId);
        }
        if config.allowed_origins.is_empty() {
            warnings.push(ProductionWarning::NoAllowedOrigins);
        }

        let rust_log = std::env::var("RUST_LOG").unwrap_or_default();
        if rust_log.contains("debug") || rust_log.contains("trace") {
            warnings.push(ProductionWarning::DebugLoggingEnabled);
        }

        warnings
    }

    /// Log every warning for this configuration
    pub async fn report(&self, config: &AuthConfig) -> Vec<ProductionWarning> {
        let warnings = self.check(config);
        for warning in &warnings {
            let (component, message) = warning.describe();
            log::error!("PRODUCTION WARNING: {} - {}", component, message);
            log_security_event(SecurityEvent::ProductionModeWarning {
                component: component.to_string(),
                warning: message.to_string(),
            })
            .await;
        }
        warnings
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(environment: &str) -> AuthConfig {
        let mut config = AuthConfig::new("prod-7Hq2#vL9!xR4$mN8@pK3&wT6^zB1*cD5").unwrap();
        config.environment = environment.to_string();
        config
    }

    #[test]
    fn test_development_is_not_checked() {
        let mut config = config("development");
        config.development_mode = true;
        let checker = ProductionChecker::new(&config);
        assert!(!checker.is_production());
        assert!(checker.check(&config).is_empty());
    }

    #[test]
    fn test_production_flags_risky_settings() {
        let mut config = config("production");
        config.development_mode = true;
        config.account_link_policy = AccountLinkPolicy::AutoLink;

        let warnings = ProductionChecker::new(&config).check(&config);
        assert!(warnings.contains(&ProductionWarning::DevelopmentModeEnabled));
        assert!(warnings.contains(&ProductionWarning::AutoLinkEnabled));
        assert!(warnings.contains(&ProductionWarning::MissingGoogleClientId));
        assert!(warnings.contains(&ProductionWarning::NoAllowedOrigins));
    }

    #[test]
    fn test_clean_production_config() {
        let mut config = config("prod");
        config.google_client_id = Some("client.apps.googleusercontent.com".to_string());
        config.allowed_origins = vec!["https://blog.example.com".to_string()];

        let warnings = ProductionChecker::new(&config).check(&config);
        assert!(!warnings.contains(&ProductionWarning::DevelopmentModeEnabled));
        assert!(!warnings.contains(&ProductionWarning::MissingGoogleClientId));
    }
}

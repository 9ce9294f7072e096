//! Security-focused logging module to track authentication events
//!
//! Callers only ever see a generic authentication failure; the specific
//! reason is recorded here.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

/// Types of security events to track
#[derive(Debug, Clone)]
pub enum SecurityEvent {
    // Authentication events
    AuthenticationFailed { subject: Option<String>, method: String, reason: String },
    AuthenticationSuccess { user_id: String, method: String },
    TokenRevoked { user_id: String, token_id: Option<String>, reason: String },
    TokenValidationFailed { reason: String },
    RefreshTokenReplay { reason: String },

    // Account events
    AccountCreated { user_id: String, method: String },
    AccountLinked { user_id: String, provider: String },
    AccountLinkConflict { email: String, provider: String },
    CredentialChanged { user_id: String, sessions_revoked: usize },

    // Provider and system events
    ProviderUnavailable { provider: String, error: String },
    ProductionModeWarning { component: String, warning: String },
}

/// Security event with timestamp
#[derive(Debug, Clone)]
struct TimestampedEvent {
    event: SecurityEvent,
    timestamp: Instant,
}

/// Security logger for tracking and alerting on security events
pub struct SecurityLogger {
    events: Arc<RwLock<Vec<TimestampedEvent>>>,
    event_counts: Arc<RwLock<HashMap<&'static str, usize>>>,
    max_events: usize,
    alert_thresholds: HashMap<&'static str, usize>,
}

impl SecurityLogger {
    /// Create a new security logger
    pub fn new() -> Self {
        let mut alert_thresholds = HashMap::new();
        alert_thresholds.insert("auth_failed", 5);
        alert_thresholds.insert("token_validation_failed", 10);
        alert_thresholds.insert("refresh_token_replay", 1);
        alert_thresholds.insert("account_link_conflict", 3);
        alert_thresholds.insert("provider_unavailable", 5);

        Self {
            events: Arc::new(RwLock::new(Vec::new())),
            event_counts: Arc::new(RwLock::new(HashMap::new())),
            max_events: 10000,
            alert_thresholds,
        }
    }

    /// Log a security event
    pub async fn log_event(&self, event: SecurityEvent) {
        let event_key = Self::event_key(&event);

        {
            let mut events = self.events.write().await;
            events.push(TimestampedEvent {
                event: event.clone(),
                timestamp: Instant::now(),
            });

            // Limit memory usage
            if events.len() > self.max_events {
                let events_to_remove = events.len() - self.max_events;
                events.drain(0..events_to_remove);
            }
        }

        // Update counters and check for alerts
        {
            let mut counts = self.event_counts.write().await;
            let count = counts.entry(event_key).or_insert(0);
            *count += 1;

            if let Some(&threshold) = self.alert_thresholds.get(event_key) {
                if *count >= threshold {
                    log::error!("SECURITY ALERT: {} events of type '{}' detected", count, event_key);
                    log::error!("Sample event: {:?}", event);
                    *count = 0;
                }
            }
        }

        match event {
            SecurityEvent::AuthenticationFailed { subject, method, reason } => {
                log::warn!("SECURITY: Authentication failed - Subject: {:?}, Method: {}, Reason: {}", subject, method, reason);
            }
            SecurityEvent::AuthenticationSuccess { user_id, method } => {
                log::info!("SECURITY: Authentication success - User: {}, Method: {}", user_id, method);
            }
            SecurityEvent::TokenRevoked { user_id, token_id, reason } => {
                log::info!("SECURITY: Token revoked - User: {}, Token: {:?}, Reason: {}", user_id, token_id, reason);
            }
            SecurityEvent::TokenValidationFailed { reason } => {
                log::warn!("SECURITY: Token validation failed - Reason: {}", reason);
            }
            SecurityEvent::RefreshTokenReplay { reason } => {
                log::error!("SECURITY: Refresh token reuse rejected - Reason: {}", reason);
            }
            SecurityEvent::AccountCreated { user_id, method } => {
                log::info!("SECURITY: Account created - User: {}, Method: {}", user_id, method);
            }
            SecurityEvent::AccountLinked { user_id, provider } => {
                log::info!("SECURITY: External identity linked - User: {}, Provider: {}", user_id, provider);
            }
            SecurityEvent::AccountLinkConflict { email, provider } => {
                log::warn!("SECURITY: Provider sign-in matches existing account - Email: {}, Provider: {}", email, provider);
            }
            SecurityEvent::CredentialChanged { user_id, sessions_revoked } => {
                log::info!("SECURITY: Credentials changed - User: {}, Sessions revoked: {}", user_id, sessions_revoked);
            }
            SecurityEvent::ProviderUnavailable { provider, error } => {
                log::error!("SECURITY: Identity provider unavailable - Provider: {}, Error: {}", provider, error);
            }
            SecurityEvent::ProductionModeWarning { component, warning } => {
                log::warn!("SECURITY: Production mode warning - Component: {}, Warning: {}", component, warning);
            }
        }
    }

    /// Get event key for tracking
    fn event_key(event: &SecurityEvent) -> &'static str {
        match event {
            SecurityEvent::AuthenticationFailed { .. } => "auth_failed",
            SecurityEvent::AuthenticationSuccess { .. } => "auth_success",
            SecurityEvent::TokenRevoked { .. } => "token_revoked",
            SecurityEvent::TokenValidationFailed { .. } => "token_validation_failed",
            SecurityEvent::RefreshTokenReplay { .. } => "refresh_token_replay",
            SecurityEvent::AccountCreated { .. } => "account_created",
            SecurityEvent::AccountLinked { .. } => "account_linked",
            SecurityEvent::AccountLinkConflict { .. } => "account_link_conflict",
            SecurityEvent::CredentialChanged { .. } => "credential_changed",
            SecurityEvent::ProviderUnavailable { .. } => "provider_unavailable",
            SecurityEvent::ProductionModeWarning { .. } => "production_warning",
        }
    }

    /// Get recent security events
    pub async fn get_recent_events(&self, duration: Duration) -> Vec<SecurityEvent> {
        let events = self.events.read().await;
        let now = Instant::now();

        events
            .iter()
            .filter(|event| now.duration_since(event.timestamp) < duration)
            .map(|event| event.event.clone())
            .collect()
    }

    /// Clean up old events
    pub async fn cleanup_old_events(&self, max_age: Duration) {
        let mut events = self.events.write().await;
        let now = Instant::now();

        events.retain(|event| now.duration_since(event.timestamp) < max_age);
    }

    /// Start periodic cleanup task
    pub fn start_cleanup_task(self: Arc<Self>) {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(300)); // Every 5 minutes
            loop {
                interval.tick().await;
                self.cleanup_old_events(Duration::from_secs(3600 * 24)).await; // Keep 24 hours
            }
        });
    }
}

impl Default for SecurityLogger {
    fn default() -> Self {
        Self::new()
    }
}

/// Global security logger instance - thread-safe singleton
static SECURITY_LOGGER: OnceLock<Arc<SecurityLogger>> = OnceLock::new();

/// Initialize the global security logger. Must run inside a tokio runtime.
pub fn init_security_logger() {
    SECURITY_LOGGER.get_or_init(|| {
        let logger = Arc::new(SecurityLogger::new());
        logger.clone().start_cleanup_task();
        logger
    });
}

/// Get the global security logger
pub fn get_security_logger() -> Option<Arc<SecurityLogger>> {
    SECURITY_LOGGER.get().cloned()
}

/// Log a security event using the global logger
pub async fn log_security_event(event: SecurityEvent) {
    if let Some(logger) = get_security_logger() {
        logger.log_event(event).await;
    } else {
        log::debug!("Security logger not initialized, dropping event: {:?}", event);
    }
}

//! Quillgate - authentication and session service for the blog platform
//!
//! This library verifies passwords and Google identity tokens, issues
//! short-lived access tokens with rotating refresh tokens, and tracks
//! refresh-token sessions so they can be revoked.

pub mod auth;
pub mod config;
pub mod constants;
pub mod core;
pub mod error;
pub mod handlers;
pub mod security;
pub mod security_logger;
pub mod storage;

// Re-export main components
pub use config::{AccountLinkPolicy, AuthConfig};
pub use constants::*;
pub use crate::core::AuthGateway;
pub use error::{QuillgateError, Result};

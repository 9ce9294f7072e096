//! Credential verification and token issuance

pub mod password;
pub mod provider;
pub mod token;
pub mod user;

// Re-export main components
pub use provider::{
    ExternalProfile, ExternalTokenVerifier, GoogleTokenVerifier, JwksKeySource, SigningKeySource,
    StaticKeySource,
};
pub use token::{AccessToken, Claims, RefreshToken, TokenIssuer, TokenPair, TokenPurpose};
pub use user::{ExternalIdentity, IdentityProvider, User};

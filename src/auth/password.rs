//! Password hashing and verification

use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use std::sync::OnceLock;

use crate::auth::user::User;
use crate::constants::{MAX_PASSWORD_LEN, MIN_PASSWORD_LEN};
use crate::error::{QuillgateError, Result};

/// Hash a plaintext password into an argon2id PHC string
pub fn hash_password(plaintext: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(plaintext.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| QuillgateError::SystemError(format!("Failed to hash password: {}", e)))
}

/// Check a plaintext password against the user's stored hash.
/// Accounts without a password never match.
pub fn verify_password(user: &User, plaintext: &str) -> bool {
    let Some(stored) = user.password_hash.as_deref() else {
        return false;
    };

    match PasswordHash::new(stored) {
        Ok(parsed) => Argon2::default()
            .verify_password(plaintext.as_bytes(), &parsed)
            .is_ok(),
        Err(e) => {
            log::error!("Stored password hash for user {} is unparsable: {}", user.id, e);
            false
        }
    }
}

/// Spend the same argon2 work as a real check so unknown emails are not
/// distinguishable by latency. Always false.
pub fn verify_dummy_password(plaintext: &str) -> bool {
    static DUMMY_HASH: OnceLock<Option<String>> = OnceLock::new();

    let dummy = DUMMY_HASH.get_or_init(|| hash_password("quillgate-dummy-credential").ok());
    if let Some(stored) = dummy {
        if let Ok(parsed) = PasswordHash::new(stored) {
            let _ = Argon2::default().verify_password(plaintext.as_bytes(), &parsed);
        }
    }
    false
}

/// Length rules applied at registration and password change
pub fn validate_password(plaintext: &str) -> Result<()> {
    let len = plaintext.chars().count();
    if len < MIN_PASSWORD_LEN {
        return Err(QuillgateError::ValidationError(format!(
            "Password must be at least {} characters",
            MIN_PASSWORD_LEN
        )));
    }
    if len > MAX_PASSWORD_LEN {
        return Err(QuillgateError::ValidationError(format!(
            "Password must be at most {} characters",
            MAX_PASSWORD_LEN
        )));
    }
    Ok(())
}

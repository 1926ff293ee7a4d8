//! # rf-auth-simple
//!
//! Argon2-based implementation of `AuthProvider`.
//! Produces PHC-formatted hashes with a fresh random salt per password.

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use rf_core::error::{AppError, Result};
use rf_core::traits::AuthProvider;
use tracing::error;

#[derive(Default)]
pub struct SimpleAuthProvider {
    argon2: Argon2<'static>,
}

impl SimpleAuthProvider {
    pub fn new() -> Self {
        Self::default()
    }
}

impl AuthProvider for SimpleAuthProvider {
    fn hash_password(&self, password: &str) -> Result<String> {
        let salt = SaltString::generate(&mut OsRng);
        self.argon2
            .hash_password(password.as_bytes(), &salt)
            .map(|hash| hash.to_string())
            .map_err(|e| {
                error!(error = %e, "password hashing failed");
                AppError::Internal("password hashing failed".into())
            })
    }

    /// Verifies if a provided password matches a stored Argon2 hash.
    fn verify_password(&self, password: &str, hash: &str) -> bool {
        let parsed_hash = match PasswordHash::new(hash) {
            Ok(p) => p,
            Err(_) => return false,
        };
        self.argon2
            .verify_password(password.as_bytes(), &parsed_hash)
            .is_ok()
    }
}

//! Password encoding against a per-user salt.

use argon2::password_hash::{PasswordHasher, SaltString};
use argon2::Argon2;
use tracing::error;

use crate::error::{Error, Result};

/// Turns a plaintext password and a per-user salt into a stored encoding.
///
/// Implementations must be deterministic: the same `(plain, salt)` pair
/// always yields the same string, so that verification can re-encode and
/// compare against the stored value.
pub trait PasswordEncoder: Send + Sync {
    fn encode(&self, plain: &str, salt: &str) -> Result<String>;
}

/// Default encoder: Argon2 with the user's salt, default parameters.
#[derive(Debug, Clone, Copy, Default)]
pub struct Argon2Encoder;

impl PasswordEncoder for Argon2Encoder {
    fn encode(&self, plain: &str, salt: &str) -> Result<String> {
        let salt = SaltString::encode_b64(salt.as_bytes()).map_err(|e| {
            error!(error = %e, "argon2 salt encoding error");
            Error::PasswordHash(e.to_string())
        })?;
        let hash = Argon2::default()
            .hash_password(plain.as_bytes(), &salt)
            .map_err(|e| {
                error!(error = %e, "argon2 hash_password error");
                Error::PasswordHash(e.to_string())
            })?;
        Ok(hash.to_string())
    }
}

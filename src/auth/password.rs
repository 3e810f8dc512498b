//! Password hashing and validation.

use anyhow::{Context, anyhow};
use bcrypt::{DEFAULT_COST, hash, verify};

use super::errors::{AuthError, AuthResult};

pub const MIN_PASSWORD_LENGTH: usize = 8;

/// bcrypt ignores everything past 72 bytes.
pub const MAX_PASSWORD_LENGTH: usize = 72;

pub fn validate_password(password: &str) -> AuthResult<()> {
    if password.len() < MIN_PASSWORD_LENGTH {
        return Err(AuthError::WeakPassword(format!(
            "must be at least {MIN_PASSWORD_LENGTH} characters"
        )));
    }

    if password.len() > MAX_PASSWORD_LENGTH {
        return Err(AuthError::WeakPassword(format!(
            "must be at most {MAX_PASSWORD_LENGTH} bytes"
        )));
    }

    if password.chars().all(|c| c.is_ascii_digit()) {
        return Err(AuthError::WeakPassword("must not be only digits".into()));
    }

    Ok(())
}

/// Hashes on the blocking pool; bcrypt is deliberately slow.
pub async fn hash_password(password: &str, cost: Option<u32>) -> AuthResult<String> {
    let password = password.to_string();
    let cost = cost.unwrap_or(DEFAULT_COST);

    tokio::task::spawn_blocking(move || hash(password, cost).map_err(|e| anyhow!(e)))
        .await
        .context("Password hashing task failed")?
        .map_err(AuthError::Other)
}

pub async fn verify_password(password: &str, password_hash: &str) -> AuthResult<bool> {
    let password = password.to_string();
    let password_hash = password_hash.to_string();

    tokio::task::spawn_blocking(move || verify(password, &password_hash).map_err(|e| anyhow!(e)))
        .await
        .context("Password verification task failed")?
        .map_err(AuthError::Other)
}

//! Cryptographic helpers: CSPRNG output for ticket ids and bcrypt password
//! hashing for the accept-users handler.

use crate::errors::CasError;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use ring::rand::{SecureRandom, SystemRandom};
use tracing::instrument;

/// Minimum accepted bcrypt cost.
pub const MIN_BCRYPT_COST: u32 = 10;

/// Maximum accepted bcrypt cost.
pub const MAX_BCRYPT_COST: u32 = 14;

/// Default bcrypt cost.
pub const DEFAULT_BCRYPT_COST: u32 = 12;

/// Generate cryptographically secure random bytes
pub fn generate_random_bytes(len: usize) -> Result<Vec<u8>, CasError> {
    let rng = SystemRandom::new();
    let mut bytes = vec![0u8; len];
    rng.fill(&mut bytes)
        .map_err(|e| CasError::Internal(format!("Random bytes generation failed: {}", e)))?;
    Ok(bytes)
}

/// Generate a URL-safe random string with `len` bytes of entropy.
pub fn generate_random_token(len: usize) -> Result<String, CasError> {
    let bytes = generate_random_bytes(len)?;
    Ok(URL_SAFE_NO_PAD.encode(bytes))
}

/// Hash a password with bcrypt.
///
/// # Errors
///
/// Returns `CasError::Internal` if the cost is outside 10-14 or hashing fails.
#[instrument(skip_all)]
pub fn hash_password(password: &str, cost: u32) -> Result<String, CasError> {
    if !(MIN_BCRYPT_COST..=MAX_BCRYPT_COST).contains(&cost) {
        return Err(CasError::Internal(format!(
            "Invalid bcrypt cost: {} (must be {}-{})",
            cost, MIN_BCRYPT_COST, MAX_BCRYPT_COST
        )));
    }

    bcrypt::hash(password, cost)
        .map_err(|e| CasError::Internal(format!("Password hashing failed: {}", e)))
}

/// Verify a password against a bcrypt hash
#[instrument(skip_all)]
pub fn verify_password(password: &str, hash: &str) -> Result<bool, CasError> {
    bcrypt::verify(password, hash)
        .map_err(|e| CasError::Internal(format!("Password verification failed: {}", e)))
}

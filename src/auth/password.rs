//! Password hashing and verification using Argon2
//!
//! Uses argon2id variant with recommended parameters for password hashing.

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};

use crate::types::PomodoroError;

/// Special characters accepted by the password policy
const PASSWORD_SPECIALS: &str = "!@#$%^&*";

/// Hash a password using Argon2id
///
/// Returns the PHC-formatted hash string that includes the salt and parameters.
pub fn hash_password(password: &str) -> Result<String, PomodoroError> {
    let salt = SaltString::generate(&mut OsRng);

    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| PomodoroError::Auth(format!("Failed to hash password: {e}")))
}

/// Verify a password against a stored hash
pub fn verify_password(password: &str, hash: &str) -> Result<bool, PomodoroError> {
    let parsed_hash = PasswordHash::new(hash)
        .map_err(|e| PomodoroError::Auth(format!("Invalid password hash format: {e}")))?;

    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed_hash)
        .is_ok())
}

/// At least 8 characters with one lowercase, one uppercase and one special character.
pub fn check_password_policy(password: &str) -> Result<(), PomodoroError> {
    let long_enough = password.chars().count() >= 8;
    let has_lower = password.chars().any(|c| c.is_ascii_lowercase());
    let has_upper = password.chars().any(|c| c.is_ascii_uppercase());
    let has_special = password.chars().any(|c| PASSWORD_SPECIALS.contains(c));

    if long_enough && has_lower && has_upper && has_special {
        Ok(())
    } else {
        Err(PomodoroError::Validation(
            "Password must be at least 8 characters long and contain at least one uppercase letter, one lowercase letter, and one special character".into(),
        ))
    }
}

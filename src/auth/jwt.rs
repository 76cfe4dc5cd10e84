//! JWT token handling
//!
//! Tokens are HS256-signed and carry only the user id; the auth guard
//! resolves the user from the store on every request.

use jsonwebtoken::{decode, encode, errors::ErrorKind, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::config::MIN_JWT_SECRET_LEN;
use crate::types::PomodoroError;

/// Payload stored in JWT token
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Claims {
    /// Hex-encoded user ObjectId
    pub user_id: String,
    /// Issued at (Unix timestamp)
    pub iat: u64,
    /// Expiration time (Unix timestamp)
    pub exp: u64,
}

/// Result of token validation
#[derive(Debug)]
pub struct TokenValidationResult {
    pub valid: bool,
    pub expired: bool,
    pub claims: Option<Claims>,
    pub error: Option<String>,
}

impl TokenValidationResult {
    pub fn valid(claims: Claims) -> Self {
        Self {
            valid: true,
            expired: false,
            claims: Some(claims),
            error: None,
        }
    }

    pub fn invalid(error: impl Into<String>, expired: bool) -> Self {
        Self {
            valid: false,
            expired,
            claims: None,
            error: Some(error.into()),
        }
    }
}

/// JWT validator and generator
#[derive(Clone)]
pub struct JwtValidator {
    secret: String,
    expiry_seconds: u64,
}

impl JwtValidator {
    /// Create a new JWT validator
    ///
    /// Returns an error if the secret is empty or too short
    pub fn new(secret: String, expiry_seconds: u64) -> Result<Self, PomodoroError> {
        if secret.is_empty() {
            return Err(PomodoroError::Config(
                "JWT_SECRET is required in production mode".into(),
            ));
        }

        if secret.len() < MIN_JWT_SECRET_LEN {
            return Err(PomodoroError::Config(format!(
                "JWT_SECRET must be at least {} characters",
                MIN_JWT_SECRET_LEN
            )));
        }

        Ok(Self {
            secret,
            expiry_seconds,
        })
    }

    pub fn expiry_seconds(&self) -> u64 {
        self.expiry_seconds
    }

    /// Generate a JWT token for a user
    pub fn generate_token(&self, user_id: &str) -> Result<String, PomodoroError> {
        let now = unix_now()?;

        let claims = Claims {
            user_id: user_id.to_string(),
            iat: now,
            exp: now + self.expiry_seconds,
        };

        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(self.secret.as_bytes()),
        )
        .map_err(|e| PomodoroError::Auth(format!("Failed to generate token: {}", e)))
    }

    /// Verify and decode a JWT token
    pub fn verify_token(&self, token: &str) -> TokenValidationResult {
        match decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.secret.as_bytes()),
            &Validation::default(),
        ) {
            Ok(token_data) => TokenValidationResult::valid(token_data.claims),
            Err(err) => match err.kind() {
                ErrorKind::ExpiredSignature => {
                    TokenValidationResult::invalid("Token expired, please login again", true)
                }
                _ => TokenValidationResult::invalid("Invalid access token", false),
            },
        }
    }
}

fn unix_now() -> Result<u64, PomodoroError> {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .map_err(|e| PomodoroError::Auth(format!("System time error: {}", e)))
}

/// Extract token from Authorization header ("Bearer <token>").
pub fn extract_token_from_header(auth_header: Option<&str>) -> Option<&str> {
    let token = auth_header?.strip_prefix("Bearer ")?.trim();
    if token.is_empty() {
        None
    } else {
        Some(token)
    }
}

/// Extract a token from a raw query string (`a=b&token=...`)
pub fn extract_token_from_query(query: Option<&str>, param_name: &str) -> Option<String> {
    query?
        .split('&')
        .filter_map(|param| param.split_once('='))
        .find(|(key, _)| *key == param_name)
        .map(|(_, value)| value.to_string())
        .filter(|value| !value.is_empty())
}

//! Authentication
//!
//! - `password`: Argon2 hashing and the signup password policy
//! - `jwt`: access token issue/verify
//! - `guard`: resolve the caller of a protected route

pub mod guard;
pub mod jwt;
pub mod password;

pub use guard::{authenticate, user_id_from_token, AuthUser};
pub use jwt::{Claims, JwtValidator, TokenValidationResult};
pub use password::{check_password_policy, hash_password, verify_password};

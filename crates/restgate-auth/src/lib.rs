//! Session authentication for restgate.
//!
//! Verifies the Bearer session token on a request into the `User`
//! principal `restgate-core`'s Access Control and Resource Family
//! consume, and provides the `PasswordHasher` the core's `Auth` seam
//! uses for the `Password` field transform. Session issuance/
//! verification (`jwt.rs`) is kept in the teacher's HS256 JWT idiom;
//! password hashing is new (the teacher had none — role-based JWT only)
//! and follows the Argon2 idiom used across the wider example pack.

mod claims;
mod jwt;

pub use claims::SessionClaims;
pub use jwt::{issue_session, verify_session};

use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{PasswordHash, PasswordHasher as Argon2PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use restgate_core::user::{PasswordHasher, User};

/// Session signing configuration.
#[derive(Clone, Debug)]
pub struct SessionConfig {
    pub secret: String,
    pub ttl_secs: u64,
}

/// Session/credential verification error.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("missing authorization header")]
    MissingHeader,

    #[error("invalid authorization header format")]
    InvalidHeaderFormat,

    #[error("session expired")]
    Expired,

    #[error("invalid session signature")]
    InvalidSignature,

    #[error("invalid session token: {0}")]
    InvalidToken(String),
}

/// Resolve a request's `Authorization` header into a `User` principal.
/// `None` means the request is anonymous (no header at all); an
/// absent-but-required or malformed/invalid token is an `Err`.
pub fn authenticate_bearer(auth_header: Option<&str>, config: &SessionConfig) -> Result<Option<User>, AuthError> {
    let Some(header) = auth_header else {
        return Ok(None);
    };
    let token = extract_bearer_token(header)?;
    verify_session(config, token).map(Some)
}

/// Extract the token from a `Bearer <token>` Authorization header.
fn extract_bearer_token(header: &str) -> Result<&str, AuthError> {
    let header = header.trim();
    header
        .strip_prefix("Bearer ")
        .or_else(|| header.strip_prefix("bearer "))
        .map(str::trim)
        .ok_or(AuthError::InvalidHeaderFormat)
}

/// Argon2id-backed `PasswordHasher` for the `Password` field transform.
pub struct Argon2Hasher;

impl PasswordHasher for Argon2Hasher {
    fn hash(&self, plain: &str) -> Vec<u8> {
        let salt = SaltString::generate(&mut OsRng);
        let hash = Argon2::default()
            .hash_password(plain.as_bytes(), &salt)
            .expect("argon2 hashing with the default, fixed params does not fail");
        hash.to_string().into_bytes()
    }

    fn verify(&self, plain: &str, hashed: &[u8]) -> bool {
        let Ok(encoded) = std::str::from_utf8(hashed) else {
            return false;
        };
        let Ok(parsed) = PasswordHash::new(encoded) else {
            return false;
        };
        Argon2::default().verify_password(plain.as_bytes(), &parsed).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_bearer_token_accepts_both_cases() {
        assert_eq!(extract_bearer_token("Bearer abc123").unwrap(), "abc123");
        assert_eq!(extract_bearer_token("bearer abc123").unwrap(), "abc123");
        assert!(extract_bearer_token("Basic abc123").is_err());
    }

    #[test]
    fn authenticate_bearer_is_anonymous_without_a_header() {
        let config = SessionConfig { secret: "s".repeat(32), ttl_secs: 3600 };
        assert!(authenticate_bearer(None, &config).unwrap().is_none());
    }

    #[test]
    fn authenticate_bearer_rejects_a_malformed_header() {
        let config = SessionConfig { secret: "s".repeat(32), ttl_secs: 3600 };
        assert!(matches!(authenticate_bearer(Some("not-a-bearer-token"), &config), Err(AuthError::InvalidHeaderFormat)));
    }

    #[test]
    fn argon2_hasher_round_trips() {
        let hasher = Argon2Hasher;
        let hashed = hasher.hash("hunter2");
        assert!(hasher.verify("hunter2", &hashed));
        assert!(!hasher.verify("wrong", &hashed));
    }

    #[test]
    fn argon2_hasher_rejects_garbage_hash_bytes() {
        let hasher = Argon2Hasher;
        assert!(!hasher.verify("hunter2", b"not a phc string"));
    }
}

//! Session token issuance and verification (HS256).

use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use restgate_core::user::User;

use crate::claims::SessionClaims;
use crate::{AuthError, SessionConfig};

/// Sign a session token for `user`, valid for `config.ttl_secs`.
pub fn issue_session(config: &SessionConfig, user: &User, issued_at: i64) -> Result<String, AuthError> {
    let claims = SessionClaims::for_user(user, issued_at, config.ttl_secs as i64);
    let key = EncodingKey::from_secret(config.secret.as_bytes());
    encode(&Header::new(Algorithm::HS256), &claims, &key).map_err(|e| AuthError::InvalidToken(e.to_string()))
}

/// Verify a session token and recover its `User` principal.
pub fn verify_session(config: &SessionConfig, token: &str) -> Result<User, AuthError> {
    let key = DecodingKey::from_secret(config.secret.as_bytes());
    let mut validation = Validation::new(Algorithm::HS256);
    validation.validate_exp = true;
    validation.validate_nbf = false;
    validation.validate_aud = false;

    let data = decode::<SessionClaims>(token, &key, &validation).map_err(map_jwt_error)?;
    Ok(data.claims.into_user())
}

fn map_jwt_error(e: jsonwebtoken::errors::Error) -> AuthError {
    use jsonwebtoken::errors::ErrorKind;
    let mapped = match e.kind() {
        ErrorKind::ExpiredSignature => AuthError::Expired,
        ErrorKind::InvalidSignature => AuthError::InvalidSignature,
        _ => AuthError::InvalidToken(e.to_string()),
    };
    tracing::debug!(error = %mapped, "session token rejected");
    mapped
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> SessionConfig {
        SessionConfig { secret: "test_secret_key_at_least_32_bytes!".into(), ttl_secs: 3600 }
    }

    #[test]
    fn issues_and_verifies_a_session() {
        let user = User::new(42, "alice", false);
        let token = issue_session(&config(), &user, 1_000).unwrap();
        let recovered = verify_session(&config(), &token).unwrap();
        assert_eq!(recovered.oid, 42);
        assert_eq!(recovered.name(), "alice");
    }

    #[test]
    fn rejects_an_expired_session() {
        let user = User::new(1, "bob", false);
        let cfg = SessionConfig { secret: config().secret, ttl_secs: 0 };
        let token = issue_session(&cfg, &user, 1_000).unwrap();
        // exp == iat == 1000, well before "now" as jsonwebtoken sees it.
        let result = verify_session(&cfg, &token);
        assert!(matches!(result, Err(AuthError::Expired)));
    }

    #[test]
    fn rejects_a_token_signed_with_a_different_secret() {
        let user = User::new(1, "carol", false);
        let token = issue_session(&config(), &user, 1_000).unwrap();
        let other = SessionConfig { secret: "a_completely_different_secret_32b".into(), ttl_secs: 3600 };
        assert!(verify_session(&other, &token).is_err());
    }
}

//! Session token claims.

use restgate_core::user::User;
use serde::{Deserialize, Serialize};

/// Claims embedded in a signed session token. Carries just enough to
/// reconstruct a `User` principal without a storage round-trip.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SessionClaims {
    /// Principal's oid.
    pub sub: i64,
    pub name: String,
    #[serde(default)]
    pub admin: bool,
    /// Expiration, unix seconds.
    pub exp: i64,
    /// Issued-at, unix seconds.
    pub iat: i64,
}

impl SessionClaims {
    pub fn for_user(user: &User, issued_at: i64, ttl_secs: i64) -> Self {
        Self { sub: user.oid, name: user.name().to_string(), admin: user.is_admin(), exp: issued_at + ttl_secs, iat: issued_at }
    }

    pub fn into_user(self) -> User {
        User::new(self.sub, self.name, self.admin)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_user() {
        let user = User::new(7, "alice", true);
        let claims = SessionClaims::for_user(&user, 1_000, 3_600);
        assert_eq!(claims.exp, 4_600);
        let back = claims.into_user();
        assert_eq!(back.oid, 7);
        assert_eq!(back.name(), "alice");
        assert!(back.is_admin());
    }
}

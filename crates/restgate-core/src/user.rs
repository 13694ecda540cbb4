//! The User principal and password-verification seam.
//!
//! Session token derivation itself is out of scope for the core (it is
//! ambient, external functionality — see `restgate-auth`); the core
//! only needs a `User` record to feed Access Control and a small
//! `Auth`/`PasswordHasher` pair to perform the `Password` field
//! transform during create/update.

use crate::value::Value;

/// An authenticated (or anonymous) request principal.
#[derive(Clone, Debug)]
pub struct User {
    pub oid: i64,
    pub name: String,
    admin: bool,
}

impl User {
    pub fn new(oid: i64, name: impl Into<String>, admin: bool) -> Self {
        Self { oid, name: name.into(), admin }
    }

    #[cfg(test)]
    pub fn new_for_test(oid: i64, name: impl Into<String>, admin: bool) -> Self {
        Self::new(oid, name, admin)
    }

    pub fn is_admin(&self) -> bool {
        self.admin
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Hash-algorithm seam for the `Password` field transform: the core
/// stays agnostic to the concrete hashing scheme (argon2, bcrypt, ...)
/// used by whatever crate wires this in.
pub trait PasswordHasher: Send + Sync {
    fn hash(&self, plain: &str) -> Vec<u8>;
    fn verify(&self, plain: &str, hashed: &[u8]) -> bool;
}

/// Resolves the name/password fields for a scheme and verifies
/// credentials, with a try-count the caller can use for backoff.
pub struct Auth<'a> {
    name_field: &'a str,
    password_field: &'a str,
    hasher: &'a dyn PasswordHasher,
}

impl<'a> Auth<'a> {
    pub fn new(name_field: &'a str, password_field: &'a str, hasher: &'a dyn PasswordHasher) -> Self {
        Self { name_field, password_field, hasher }
    }

    pub fn name_field(&self) -> &str {
        self.name_field
    }

    pub fn password_field(&self) -> &str {
        self.password_field
    }

    /// Verifies `input` against the stored (hashed) password bytes.
    /// `try_count` is surfaced so callers can apply backoff or lock a
    /// principal out after repeated failures; the core does not track
    /// attempts itself.
    pub fn authorize_with_password(&self, input: &str, stored: &[u8], _try_count: usize) -> bool {
        self.hasher.verify(input, stored)
    }

    /// Applies the `Password` transform to a create/update payload:
    /// the plaintext value under `password_field` is replaced with its
    /// hash before the payload reaches the Adapter.
    pub fn transform_payload(&self, payload: &mut Value) {
        if let Some(dict) = payload.as_dict_mut() {
            if let Some(Value::String(plain)) = dict.get(self.password_field).cloned() {
                dict.insert(self.password_field.to_string(), Value::Bytes(self.hasher.hash(&plain)));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EchoHasher;
    impl PasswordHasher for EchoHasher {
        fn hash(&self, plain: &str) -> Vec<u8> {
            plain.as_bytes().to_vec()
        }
        fn verify(&self, plain: &str, hashed: &[u8]) -> bool {
            plain.as_bytes() == hashed
        }
    }

    #[test]
    fn transform_payload_replaces_plaintext_password() {
        let hasher = EchoHasher;
        let auth = Auth::new("name", "password", &hasher);
        let mut payload = Value::dict();
        payload.set("name", Value::from("alice"));
        payload.set("password", Value::from("hunter2"));
        auth.transform_payload(&mut payload);
        assert!(matches!(payload.get("password"), Some(Value::Bytes(b)) if b == b"hunter2"));
    }

    #[test]
    fn authorize_with_password_delegates_to_hasher() {
        let hasher = EchoHasher;
        let auth = Auth::new("name", "password", &hasher);
        assert!(auth.authorize_with_password("hunter2", b"hunter2", 0));
        assert!(!auth.authorize_with_password("wrong", b"hunter2", 1));
    }
}

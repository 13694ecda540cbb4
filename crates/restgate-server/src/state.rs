//! Application state.

use std::sync::Arc;

use deadpool_postgres::Pool;
use restgate_auth::Argon2Hasher;
use restgate_core::access::AccessControl;
use restgate_core::config::AppConfig;
use restgate_core::scheme::SchemeRegistry;
use restgate_auth::SessionConfig;

use crate::schemes;

/// Shared application state: one pooled connection is checked out per
/// request and handed to a fresh `PostgresAdapter` (see `app.rs`)
/// rather than held here, matching the adapter's one-connection-per-
/// instance design.
pub struct AppState {
    pub pool: Pool,
    pub registry: Arc<dyn SchemeRegistry>,
    pub access: AccessControl,
    pub session: SessionConfig,
    pub hasher: Argon2Hasher,
    pub config: AppConfig,
}

impl AppState {
    pub fn new(pool: Pool, config: AppConfig) -> Self {
        let registry: Arc<dyn SchemeRegistry> = Arc::new(schemes::build_registry());

        let mut access = AccessControl::new().with_admin_privileges(config.admin_privileges_enabled);
        for (header, value) in &config.server_auth_pairs {
            access = access.with_server_auth_pair(header.clone(), value.clone());
        }

        let session = SessionConfig {
            secret: config.session_secret.clone().unwrap_or_else(|| "insecure-dev-secret-change-me-32b".to_string()),
            ttl_secs: config.token_ttl_secs,
        };

        Self { pool, registry, access, session, hasher: Argon2Hasher, config }
    }
}

//! Process-wide configuration, loaded once at startup.

use serde::{Deserialize, Serialize};

/// Main application configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AppConfig {
    // ========================================================================
    // Adapter Settings
    // ========================================================================
    /// Connection URI for the backing Storage Adapter.
    #[serde(default = "default_db_uri")]
    pub db_uri: String,

    /// Default schema/namespace the adapter resolves unqualified scheme
    /// names against.
    #[serde(default = "default_db_schema")]
    pub db_schema: String,

    /// Connection pool size.
    #[serde(default = "default_pool_size")]
    pub db_pool_size: u32,

    /// Pool acquisition timeout in seconds.
    #[serde(default = "default_pool_timeout")]
    pub db_pool_timeout: u64,

    // ========================================================================
    // Server Settings
    // ========================================================================
    /// Server host to bind.
    #[serde(default = "default_host")]
    pub server_host: String,

    /// Server port.
    #[serde(default = "default_port")]
    pub server_port: u16,

    /// Unix socket path (alternative to host/port).
    pub server_unix_socket: Option<String>,

    // ========================================================================
    // Resolver / Resource Settings
    // ========================================================================
    /// Maximum `resolveDepth` a request may ask for; requests asking
    /// for more are clamped (§6.3).
    #[serde(default = "default_max_resolve_depth")]
    pub max_resolve_depth: u32,

    /// Default page size applied when a list request carries no
    /// `pageCount` and the path did not latch single-object.
    #[serde(default = "default_page_count")]
    pub default_page_count: u32,

    /// Hard ceiling on `pageCount`, regardless of what the request asks.
    #[serde(default = "default_max_page_count")]
    pub max_page_count: u32,

    // ========================================================================
    // Access Control Settings
    // ========================================================================
    /// Whether admin principals and server-to-server auth header pairs
    /// bypass scheme/object permission checks entirely.
    #[serde(default)]
    pub admin_privileges_enabled: bool,

    /// Cross-server auth header pairs accepted for the admin bypass,
    /// as `(header-name, expected-value)`.
    #[serde(default)]
    pub server_auth_pairs: Vec<(String, String)>,

    // ========================================================================
    // Session / Token Settings
    // ========================================================================
    /// Secret used to sign session tokens.
    pub session_secret: Option<String>,

    /// Lifetime of a session token, in seconds.
    #[serde(default = "default_token_ttl")]
    pub token_ttl_secs: u64,

    /// Lifetime of a pending-upload KV entry, in seconds.
    #[serde(default = "default_upload_token_ttl")]
    pub upload_token_ttl_secs: u64,

    // ========================================================================
    // Logging Settings
    // ========================================================================
    /// Log level: crit, error, warn, info, debug.
    #[serde(default = "default_log_level")]
    pub log_level: LogLevel,

    /// Attach a diagnostic `debug` array to every response envelope
    /// (§7 "a process-wide debug flag").
    #[serde(default)]
    pub debug_enabled: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            db_uri: default_db_uri(),
            db_schema: default_db_schema(),
            db_pool_size: default_pool_size(),
            db_pool_timeout: default_pool_timeout(),
            server_host: default_host(),
            server_port: default_port(),
            server_unix_socket: None,
            max_resolve_depth: default_max_resolve_depth(),
            default_page_count: default_page_count(),
            max_page_count: default_max_page_count(),
            admin_privileges_enabled: false,
            server_auth_pairs: Vec::new(),
            session_secret: None,
            token_ttl_secs: default_token_ttl(),
            upload_token_ttl_secs: default_upload_token_ttl(),
            log_level: LogLevel::Error,
            debug_enabled: false,
        }
    }
}

impl AppConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(uri) = std::env::var("RESTGATE_DB_URI") {
            config.db_uri = uri;
        }
        if let Ok(uri) = std::env::var("DATABASE_URL") {
            config.db_uri = uri;
        }
        if let Ok(schema) = std::env::var("RESTGATE_DB_SCHEMA") {
            config.db_schema = schema;
        }
        if let Ok(size) = std::env::var("RESTGATE_DB_POOL") {
            if let Ok(n) = size.parse() {
                config.db_pool_size = n;
            }
        }
        if let Ok(host) = std::env::var("RESTGATE_SERVER_HOST") {
            config.server_host = host;
        }
        if let Ok(port) = std::env::var("RESTGATE_SERVER_PORT") {
            if let Ok(p) = port.parse() {
                config.server_port = p;
            }
        }
        if let Ok(port) = std::env::var("PORT") {
            if let Ok(p) = port.parse() {
                config.server_port = p;
            }
        }
        if let Ok(depth) = std::env::var("RESTGATE_MAX_RESOLVE_DEPTH") {
            if let Ok(n) = depth.parse() {
                config.max_resolve_depth = n;
            }
        }
        if let Ok(secret) = std::env::var("RESTGATE_SESSION_SECRET") {
            config.session_secret = Some(secret);
        }
        if let Ok(flag) = std::env::var("RESTGATE_ADMIN_PRIVILEGES") {
            config.admin_privileges_enabled = flag == "1" || flag.eq_ignore_ascii_case("true");
        }
        if let Ok(flag) = std::env::var("RESTGATE_DEBUG") {
            config.debug_enabled = flag == "1" || flag.eq_ignore_ascii_case("true");
        }

        config
    }
}

/// Log levels.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogLevel {
    Crit,
    Error,
    Warn,
    Info,
    Debug,
}

impl LogLevel {
    pub fn to_tracing(&self) -> tracing::Level {
        match self {
            Self::Crit | Self::Error => tracing::Level::ERROR,
            Self::Warn => tracing::Level::WARN,
            Self::Info => tracing::Level::INFO,
            Self::Debug => tracing::Level::DEBUG,
        }
    }
}

// Default value functions
fn default_db_uri() -> String {
    "postgresql://localhost/postgres".to_string()
}

fn default_db_schema() -> String {
    "public".to_string()
}

fn default_pool_size() -> u32 {
    10
}

fn default_pool_timeout() -> u64 {
    10
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    3000
}

fn default_max_resolve_depth() -> u32 {
    4
}

fn default_page_count() -> u32 {
    25
}

fn default_max_page_count() -> u32 {
    200
}

fn default_token_ttl() -> u64 {
    3600
}

fn default_upload_token_ttl() -> u64 {
    300
}

fn default_log_level() -> LogLevel {
    LogLevel::Error
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.server_port, 3000);
        assert_eq!(config.db_pool_size, 10);
        assert_eq!(config.max_resolve_depth, 4);
        assert!(!config.admin_privileges_enabled);
    }

    #[test]
    fn test_max_page_count_exceeds_default() {
        let config = AppConfig::default();
        assert!(config.max_page_count >= config.default_page_count);
    }
}

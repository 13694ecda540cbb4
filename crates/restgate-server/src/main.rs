//! restgate HTTP server.
//!
//! A resource-oriented REST data-access server over PostgreSQL.

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{
    http::Method,
    routing::any,
    Router,
};
use deadpool_postgres::{Manager, ManagerConfig, Pool, RecyclingMethod};
use restgate_core::config::AppConfig;
use tokio_postgres::NoTls;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use restgate_server::{handle_request, AppState};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(std::env::var("RUST_LOG").unwrap_or_else(|_| "restgate=info".into())))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = AppConfig::from_env();
    info!("starting restgate server");
    info!(db = %mask_db_uri(&config.db_uri), "connecting to database");

    let pool = build_pool(&config)?;
    // Fail fast on a bad connection string/credentials rather than
    // accepting the first request only to error on checkout.
    let _ = pool.get().await.context("could not reach the database")?;

    let state = Arc::new(AppState::new(pool, config.clone()));

    let app = Router::new()
        .route("/", any(handle_request))
        .route("/{*path}", any(handle_request))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods([Method::GET, Method::POST, Method::PUT, Method::PATCH, Method::DELETE, Method::OPTIONS])
                .allow_headers(Any)
                .expose_headers(Any),
        )
        .with_state(state);

    let addr = format!("{}:{}", config.server_host, config.server_port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("listening on http://{}", addr);

    axum::serve(listener, app).await?;
    Ok(())
}

fn build_pool(config: &AppConfig) -> Result<Pool> {
    let pg_config: tokio_postgres::Config = config.db_uri.parse().context("invalid database URI")?;
    let manager = Manager::from_config(pg_config, NoTls, ManagerConfig { recycling_method: RecyclingMethod::Fast });
    Pool::builder(manager)
        .max_size(config.db_pool_size as usize)
        .build()
        .context("failed to build the connection pool")
}

fn mask_db_uri(uri: &str) -> String {
    if let Some(at_pos) = uri.find('@') {
        if let Some(proto_end) = uri.find("://") {
            return format!("{}://***@{}", &uri[..proto_end], &uri[at_pos + 1..]);
        }
    }
    uri.to_string()
}

//! restgate HTTP server library.
//!
//! Axum binding for `restgate-core`'s Handler Facade over a PostgreSQL
//! Storage Adapter.

pub mod app;
pub mod schemes;
pub mod state;

pub use app::handle_request;
pub use state::AppState;

//! PostgreSQL Storage Adapter.
//!
//! Builds on a type-safe SQL builder (parameterized queries, no string
//! concatenation) to implement `restgate_core::adapter::StorageAdapter`
//! against a single pooled `tokio-postgres` connection. See
//! [`postgres::PostgresAdapter`] for the adapter itself and the
//! `builder`/`select`/`insert`/`update`/`delete`/`expr` modules for the
//! SQL construction primitives it's built from.

mod builder;
mod expr;
pub mod identifier;
mod param;
mod select;
mod insert;
mod update;
mod delete;
pub mod postgres;

pub use builder::{SqlBuilder, SqlFragment};
pub use expr::{Expr, OrderExpr};
pub use identifier::{escape_ident, quote_literal, from_qi, QualifiedIdentifier};
pub use param::SqlParam;
pub use select::SelectBuilder;
pub use insert::InsertBuilder;
pub use update::UpdateBuilder;
pub use delete::DeleteBuilder;
pub use postgres::PostgresAdapter;

/// Prelude for common imports.
pub mod prelude {
    pub use super::{
        SqlBuilder, SqlFragment, SqlParam,
        SelectBuilder, InsertBuilder, UpdateBuilder, DeleteBuilder,
        Expr, OrderExpr,
        escape_ident, quote_literal, from_qi,
        PostgresAdapter,
    };
}

//! restgate-core - the resource-resolution engine behind restgate, a
//! resource-oriented REST data-access framework over a relational
//! store.
//!
//! # Architecture
//!
//! The request processing pipeline:
//!
//! 1. **Path Resolver** (`resolver`) - turns a URL path into a Query
//!    List and a resource kind classification
//! 2. **Field Resolver** (`field_resolver`) - builds the include graph
//!    and meta flags that govern hydration
//! 3. **Access Control** (`access`) - gates every action at scheme and
//!    object tier
//! 4. **Resource Family** (`resource`) - the polymorphic resource that
//!    executes the requested verb against the Storage Adapter
//! 5. **Hydrator** (`hydrator`) - expands relation placeholders in the
//!    result graph, pruning protected fields and breaking cycles
//!
//! None of the above generates SQL; every mutation and read goes
//! through the `StorageAdapter` trait, implemented elsewhere (see the
//! `restgate-adapter` crate).

pub mod access;
pub mod adapter;
pub mod config;
pub mod error;
pub mod field_resolver;
pub mod handler;
pub mod hydrator;
pub mod query;
pub mod resolver;
pub mod resource;
pub mod scheme;
pub mod user;
pub mod value;

pub use access::AccessControl;
pub use adapter::{FieldTarget, StorageAdapter, Worker};
pub use config::AppConfig;
pub use error::{Error, Result};
pub use field_resolver::FieldResolver;
pub use query::{Query, QueryList};
pub use resolver::{resolve_path, ResolvedPath, ResourceKind};
pub use resource::{Resource, ResourceBase, ResourceContext};
pub use scheme::{Field, FieldType, Permission, Scheme, SchemeRegistry};
pub use user::User;
pub use value::{Dict, Value};

/// Prelude for common imports.
pub mod prelude {
    pub use super::access::AccessControl;
    pub use super::adapter::{StorageAdapter, Worker};
    pub use super::config::AppConfig;
    pub use super::error::{Error, Result};
    pub use super::query::QueryList;
    pub use super::resolver::{resolve_path, ResourceKind};
    pub use super::resource::{Resource, ResourceBase};
    pub use super::scheme::{Scheme, SchemeRegistry};
    pub use super::value::Value;
}

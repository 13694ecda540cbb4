//! The scheme registry this server exposes.
//!
//! restgate-core treats Schemes as a process-wide, read-only-after-init
//! data model (see `restgate_core::scheme`); something has to build one
//! before the Handler Facade has anything to resolve paths against.
//! Unlike PostgREST, which discovers its surface by introspecting
//! `information_schema`, fields here carry access rules and transforms
//! that can't be recovered from column metadata alone, so they're
//! declared the way a Serenity application declares its own schemes.
//!
//! This module ships a small blog-shaped model (users, posts, comments)
//! to exercise the framework end to end; a real deployment would swap
//! it for its own registry construction.

use restgate_core::scheme::{Action, Field, FieldType, Permission, PermissionList, Scheme, StaticSchemeRegistry, Transform};

/// Name of the scheme `authorize_user` looks principals up in.
pub const AUTH_SCHEME: &str = "users";
pub const AUTH_NAME_FIELD: &str = "name";
pub const AUTH_PASSWORD_FIELD: &str = "password";

pub fn build_registry() -> StaticSchemeRegistry {
    let mut registry = StaticSchemeRegistry::new();

    let users = Scheme::new("users")
        .with_field(Field::new("id", FieldType::Integer))
        .with_field(Field::new("name", FieldType::Text).unique())
        .with_field(Field::new("password", FieldType::Text).with_transform(Transform::Password).protected())
        .with_field(Field::new("admin", FieldType::Boolean))
        .with_field(Field::new("posts", FieldType::Set).references("posts").owned_by("author"))
        .with_delta(true)
        .with_permissions(
            PermissionList::new()
                .set(Action::Create, Permission::Restrict)
                .set(Action::Update, Permission::Restrict)
                .set(Action::Remove, Permission::Restrict),
        );

    let posts = Scheme::new("posts")
        .with_field(Field::new("id", FieldType::Integer))
        .with_field(Field::new("title", FieldType::Text).indexed())
        .with_field(Field::new("slug", FieldType::Text).with_transform(Transform::Alias))
        .with_field(Field::new("body", FieldType::Text))
        .with_field(Field::new("tags", FieldType::Array))
        .with_field(Field::new("author", FieldType::Object).references("users"))
        .with_field(Field::new("comments", FieldType::Set).references("comments").owned_by("post"))
        .with_field(Field::new("mtime", FieldType::Integer).auto_mtime())
        .with_delta(true)
        .with_permissions(
            PermissionList::new()
                .set(Action::Create, Permission::Partial)
                .set(Action::Update, Permission::Partial)
                .set(Action::Remove, Permission::Partial),
        );

    let comments = Scheme::new("comments")
        .with_field(Field::new("id", FieldType::Integer))
        .with_field(Field::new("post", FieldType::Object).references("posts"))
        .with_field(Field::new("author", FieldType::Object).references("users"))
        .with_field(Field::new("body", FieldType::Text))
        .with_delta(true)
        .with_permissions(PermissionList::new().set(Action::Remove, Permission::Partial));

    registry.register(users).register(posts).register(comments);
    registry
}

#[cfg(test)]
mod tests {
    use super::*;
    use restgate_core::scheme::SchemeRegistry;

    #[test]
    fn registers_the_three_demo_schemes() {
        let registry = build_registry();
        assert!(registry.get("users").is_some());
        assert!(registry.get("posts").is_some());
        assert!(registry.get("comments").is_some());
        assert!(registry.get("nope").is_none());
    }

    #[test]
    fn password_field_is_protected_and_transformed() {
        let registry = build_registry();
        let password = registry.get("users").unwrap().field("password").unwrap();
        assert_eq!(password.transform, Transform::Password);
        assert!(password.flags.protected);
    }
}

//! Hydrator (§4.6): recursive result-graph traversal that prunes
//! protected/unrequested fields, materializes relation placeholders by
//! fetching from the Adapter, and collapses already-visited objects to
//! bare identifiers so no object expands twice in one response.

use std::collections::HashSet;

use crate::adapter::{FieldTarget, StorageAdapter, Worker};
use crate::error::Result;
use crate::field_resolver::{self, FieldResolver, MetaFlags};
use crate::query::ResolveOptions;
use crate::scheme::{Field, FieldType, Scheme, SchemeRegistry, Transform};
use crate::value::{meta_keys, Dict, Value};

/// Request-scoped cycle tracker: an oid already emitted in expanded
/// form anywhere in this response collapses to an integer on reuse.
pub struct SeenSet(HashSet<i64>);

impl SeenSet {
    pub fn new() -> Self {
        Self(HashSet::new())
    }

    /// Marks `oid` as expanded; returns whether it was already seen.
    fn mark(&mut self, oid: i64) -> bool {
        !self.0.insert(oid)
    }
}

impl Default for SeenSet {
    fn default() -> Self {
        Self::new()
    }
}

pub struct HydrateCtx<'a> {
    pub adapter: &'a dyn StorageAdapter,
    pub worker: &'a Worker,
    pub registry: &'a dyn SchemeRegistry,
}

/// Hydrates a single result dictionary in place.
pub async fn hydrate(
    value: &mut Value,
    node: &FieldResolver,
    depth: u32,
    max_depth: u32,
    ctx: &HydrateCtx<'_>,
    seen: &mut SeenSet,
) -> Result<()> {
    let Some(scheme) = ctx.registry.get(&node.scheme) else { return Ok(()) };

    let Value::Dict(dict) = value else { return Ok(()) };

    // Pass 1: prune.
    prune(dict, scheme, node);

    let own_oid = dict.get(meta_keys::OID).and_then(Value::as_int);
    if let Some(oid) = own_oid {
        seen.mark(oid);
    }

    if depth >= max_depth {
        // At the max depth, File sub-dictionaries that resolved to null
        // are dropped; relation placeholders are left as-is.
        dict.retain(|_, v| !v.is_null());
        return Ok(());
    }

    // Pass 2: materialize relations whose value is still a placeholder.
    let mut materialized: Vec<String> = Vec::new();
    let field_names: Vec<String> = scheme.fields.keys().cloned().collect();
    for field_name in field_names {
        let field = &scheme.fields[&field_name];
        if field.flags.protected {
            continue;
        }
        if !should_resolve(node, field) {
            continue;
        }
        let placeholder = dict.get(&field_name).and_then(Value::placeholder_oid);
        match field.field_type {
            FieldType::Object => {
                if let Some(oid) = placeholder {
                    if seen.mark(oid) {
                        dict.insert(field_name.clone(), Value::Int(oid));
                    } else {
                        let fetched = fetch_object(ctx, field, oid).await?;
                        dict.insert(field_name.clone(), fetched);
                        materialized.push(field_name);
                    }
                }
            }
            FieldType::Set | FieldType::View => {
                if dict.get(&field_name).map(Value::is_null).unwrap_or(true) || matches!(dict.get(&field_name), Some(Value::Int(_))) {
                    let collapse_ids_only = node_collapses_to_ids(node, field);
                    let fetched = fetch_collection(ctx, field, own_oid, collapse_ids_only).await?;
                    dict.insert(field_name.clone(), fetched);
                    materialized.push(field_name);
                }
            }
            FieldType::Array => {
                // Arrays are scalar lists owned by the row; nothing to
                // materialize beyond what the adapter already returned.
            }
            FieldType::File | FieldType::Image => {
                if let Some(oid) = placeholder {
                    let fetched = fetch_file(ctx, field, oid).await?;
                    dict.insert(field_name.clone(), fetched);
                }
            }
            _ => {}
        }
    }

    // Transforms: Uuid-transformed byte fields format to string.
    for field in scheme.fields.values() {
        if field.transform == Transform::Uuid {
            if let Some(Value::Bytes(bytes)) = dict.get(&field.name) {
                if let Ok(s) = uuid_string(bytes) {
                    dict.insert(field.name.clone(), Value::String(s));
                }
            }
        }
    }

    // Pass 3: descend into newly materialized Object/Set/View relations.
    for field_name in materialized {
        let field = scheme.fields[&field_name].clone();
        if !matches!(field.field_type, FieldType::Object | FieldType::Set | FieldType::View) {
            continue;
        }
        let child_node = node.next(&field_name, field.foreign_scheme.clone().unwrap_or_default());
        match dict.get_mut(&field_name) {
            Some(Value::Dict(_)) => {
                let mut child_value = dict.swap_remove(&field_name).unwrap();
                Box::pin(hydrate(&mut child_value, &child_node, depth + 1, max_depth, ctx, seen)).await?;
                dict.insert(field_name.clone(), child_value);
            }
            Some(Value::Array(items)) => {
                let mut new_items = Vec::with_capacity(items.len());
                let taken = std::mem::take(items);
                for mut item in taken {
                    Box::pin(hydrate(&mut item, &child_node, depth + 1, max_depth, ctx, seen)).await?;
                    new_items.push(item);
                }
                dict.insert(field_name.clone(), Value::Array(new_items));
            }
            _ => {}
        }
    }

    Ok(())
}

fn prune(dict: &mut Dict, scheme: &Scheme, node: &FieldResolver) {
    let keys: Vec<String> = dict.keys().cloned().collect();
    for key in keys {
        if key == meta_keys::OID || key == meta_keys::TS_RANK {
            continue;
        }
        if key == meta_keys::DELTA {
            let reduced = dict.get(&key).and_then(|v| field_resolver::reduce_delta_meta(v, node.meta));
            match reduced {
                Some(v) => {
                    dict.insert(key, v);
                }
                None => {
                    dict.swap_remove(&key);
                }
            }
            continue;
        }
        if key == meta_keys::VIEWS {
            if !field_resolver::retains_views_meta(node.meta) {
                dict.swap_remove(&key);
            }
            continue;
        }
        if key == meta_keys::HEADLINES {
            continue;
        }

        match scheme.field(&key) {
            Some(field) if field.flags.protected => {
                dict.swap_remove(&key);
            }
            Some(_) => {}
            None => {
                dict.swap_remove(&key);
            }
        }
    }
}

/// A relation field is resolved when explicitly included, or — absent
/// an explicit include list — when the node's `ResolveOptions` default
/// collapse policy says so.
fn should_resolve(node: &FieldResolver, field: &Field) -> bool {
    if node.includes(&field.name) {
        return true;
    }
    if !node.include_set().is_empty() {
        return false;
    }
    match field.field_type {
        FieldType::Object => node.resolve_options.objects,
        FieldType::Set | FieldType::View => node.resolve_options.sets,
        FieldType::File | FieldType::Image => node.resolve_options.files,
        _ => false,
    }
}

fn node_collapses_to_ids(node: &FieldResolver, field: &Field) -> bool {
    !node.includes(&field.name) && node.include_set().is_empty() && node.resolve_options.ids
}

fn first_or_self(v: Value) -> Value {
    match v {
        Value::Array(mut a) => {
            if a.is_empty() {
                Value::Null
            } else {
                a.swap_remove(0)
            }
        }
        other => other,
    }
}

async fn fetch_object(ctx: &HydrateCtx<'_>, field: &Field, oid: i64) -> Result<Value> {
    let scheme = field.foreign_scheme.clone().unwrap_or_default();
    let mut list = crate::query::QueryList::new(scheme);
    list.last_mut().query.oid = Some(oid);
    let result = ctx.adapter.select(ctx.worker, &list).await?;
    Ok(first_or_self(result))
}

async fn fetch_collection(ctx: &HydrateCtx<'_>, field: &Field, parent_oid: Option<i64>, ids_only: bool) -> Result<Value> {
    let Some(oid) = parent_oid else { return Ok(Value::array()) };
    let scheme = field.foreign_scheme.clone().unwrap_or_default();
    if ids_only {
        let ids = ctx
            .adapter
            .get_reference_parents(ctx.worker, &scheme, oid, &scheme, &field.name)
            .await?;
        Ok(Value::Array(ids.into_iter().map(Value::Int).collect()))
    } else {
        let mut list = crate::query::QueryList::new(scheme.clone());
        let back_ref_field = field.foreign_field.clone().unwrap_or_else(|| field.name.clone());
        list.last_mut().query.predicates.push(crate::query::Predicate {
            field: back_ref_field,
            comparator: crate::query::Comparator::Eq,
            value1: Value::Int(oid),
            value2: None,
        });
        ctx.adapter.select(ctx.worker, &list).await
    }
}

async fn fetch_file(ctx: &HydrateCtx<'_>, field: &Field, oid: i64) -> Result<Value> {
    let scheme = field.foreign_scheme.clone().unwrap_or_else(|| "__files".to_string());
    ctx.adapter.field_get(ctx.worker, &scheme, FieldTarget::Oid(oid), &field.name).await
}

fn uuid_string(bytes: &[u8]) -> std::result::Result<String, ()> {
    if bytes.len() != 16 {
        return Err(());
    }
    Ok(uuid::Uuid::from_slice(bytes).map_err(|_| ())?.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;

    #[test]
    fn protected_fields_are_pruned() {
        let scheme = Scheme::new("users").with_field(
            crate::scheme::Field::new("password", FieldType::Text).protected(),
        );
        let node = FieldResolver::root("users");
        let mut dict = Dict::new();
        dict.insert("password".to_string(), Value::String("secret".into()));
        dict.insert(meta_keys::OID.to_string(), Value::Int(1));
        prune(&mut dict, &scheme, &node);
        assert!(!dict.contains_key("password"));
        assert!(dict.contains_key(meta_keys::OID));
    }

    #[test]
    fn unknown_keys_are_dropped() {
        let scheme = Scheme::new("users");
        let node = FieldResolver::root("users");
        let mut dict = Dict::new();
        dict.insert("ghost".to_string(), Value::Int(1));
        prune(&mut dict, &scheme, &node);
        assert!(dict.is_empty());
    }
}

//! Handler Facade (§4.7): maps HTTP verbs onto Resource Family
//! operations, applies conditional GET, decodes page parameters and
//! resolve options, and emits the response envelope. Grounded on
//! `ResourceHandler.cpp`'s `onTranslateName`/`onFilterComplete` split
//! and `MultiResourceHandler.cc`'s per-path delta composition.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::debug;

use crate::access::AccessControl;
use crate::adapter::{StorageAdapter, Worker};
use crate::error::{Error, Result};
use crate::field_resolver::FieldResolver;
use crate::query::QueryList;
use crate::resolver::{resolve_path, ResourceKind};
pub use crate::resource::FileUpload;
use crate::resource::{
    ArrayResource, FieldObjectResource, FileResource, ObjectResource, ReferenceSetResource, Resource, ResourceBase,
    ResourceContext, ResourceListResource, SearchResource, SetResource, ViewResource,
};
use crate::scheme::SchemeRegistry;
use crate::user::User;
use crate::value::Value;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Verb {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

/// Everything the facade needs about one inbound request, already
/// decoded from whatever transport carries it.
pub struct RequestInput<'a> {
    pub method: Verb,
    pub root_scheme: String,
    pub path_tokens: Vec<String>,
    pub sub_filter: Option<Value>,
    pub query_args: HashMap<String, String>,
    pub if_modified_since: Option<DateTime<Utc>>,
    pub server_headers: &'a HashMap<String, String>,
    pub user: Option<&'a User>,
    pub payload: Value,
    pub files: Vec<FileUpload>,
}

#[derive(Debug, Serialize)]
pub struct Cursor {
    pub start: i64,
    pub end: i64,
    pub total: i64,
    pub count: i64,
    pub field: String,
    pub next: Option<String>,
    pub prev: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct Envelope {
    pub date: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delta: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cursor: Option<Cursor>,
    pub result: Value,
    #[serde(rename = "OK")]
    pub ok: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub debug: Option<Value>,
}

pub struct HandlerResponse {
    pub status: u16,
    pub envelope: Option<Envelope>,
    pub last_modified: Option<DateTime<Utc>>,
}

fn effective_verb(method: Verb, method_override: Option<&str>) -> Verb {
    match (method, method_override) {
        (Verb::Get, Some("DELETE")) => Verb::Delete,
        (Verb::Post, Some("PUT")) => Verb::Put,
        (Verb::Post, Some("PATCH")) => Verb::Patch,
        (m, _) => m,
    }
}

fn envelope_for(result: Value, delta: Option<i64>, debug_enabled: bool) -> Envelope {
    Envelope {
        date: Utc::now().to_rfc2822(),
        delta,
        cursor: None,
        result,
        ok: true,
        errors: Vec::new(),
        debug: if debug_enabled { Some(Value::array()) } else { None },
    }
}

fn reversed(mut tokens: Vec<String>) -> Vec<String> {
    tokens.reverse();
    tokens
}

fn field_resolver_for(scheme: &str, query_args: &HashMap<String, String>) -> FieldResolver {
    match query_args.get("resolve") {
        Some(resolve_arg) => FieldResolver::build(scheme.to_string(), resolve_arg),
        None => FieldResolver::root(scheme.to_string()),
    }
}

/// Parses page/resolve query arguments into the Query List's
/// limit/offset, honoring values already latched by the path itself
/// (§6.3: `pageFrom`/`pageCount` are ignored when 0 or absent; a
/// path-encoded `limit`/`offset` is not overridden).
fn apply_page_params(list: &mut QueryList, args: &HashMap<String, String>, default_page_count: u32, max_page_count: u32) {
    let item = list.last_mut();
    if item.query.limit.is_none() {
        let count = args
            .get("pageCount")
            .and_then(|s| s.parse::<u32>().ok())
            .filter(|&n| n > 0)
            .unwrap_or(default_page_count)
            .min(max_page_count);
        item.query.limit = Some(count);
    }
    if item.query.offset.is_none() {
        if let Some(from) = args.get("pageFrom").and_then(|s| s.parse::<u32>().ok()) {
            if from > 0 {
                item.query.offset = Some(from);
            }
        }
    }
}

/// Builds the concrete Resource Family variant for a resolved path,
/// composing the shared base with any variant-specific construction
/// argument (the property field name for File/Array, the query text
/// for Search).
fn build_resource<'a>(
    kind: ResourceKind,
    list: QueryList,
    field_name: Option<String>,
    query_args: &HashMap<String, String>,
    ctx: ResourceContext<'a>,
) -> Result<Box<dyn Resource + 'a>> {
    Ok(match kind {
        ResourceKind::Object => Box::new(ObjectResource::new(ResourceBase::new(list, ctx))),
        ResourceKind::ResourceList => Box::new(ResourceListResource::new(ResourceBase::new(list, ctx))),
        ResourceKind::Set => Box::new(SetResource::new(ResourceBase::new(list, ctx))),
        ResourceKind::ReferenceSet => Box::new(ReferenceSetResource::new(ResourceBase::new(list, ctx))),
        ResourceKind::View => Box::new(ViewResource::new(ResourceBase::new(list, ctx))),
        ResourceKind::FieldObject => Box::new(FieldObjectResource::new(ResourceBase::new(list, ctx))),
        ResourceKind::File => {
            let field_name = field_name.ok_or_else(|| Error::Internal("file resource missing field name".into()))?;
            Box::new(FileResource::new(ResourceBase::new(list, ctx), field_name))
        }
        ResourceKind::Array => {
            let field_name = field_name.ok_or_else(|| Error::Internal("array resource missing field name".into()))?;
            Box::new(ArrayResource::new(ResourceBase::new(list, ctx), field_name))
        }
        ResourceKind::Search => {
            let query_text = query_args.get("q").cloned().unwrap_or_default();
            let language = query_args.get("language").cloned();
            Box::new(SearchResource::new(ResourceBase::new(list, ctx), query_text, language))
        }
    })
}

/// Runs one request end to end: resolves the path, builds the
/// resource, applies conditional GET, dispatches the verb, and emits
/// the envelope.
pub async fn handle_request<'a>(
    input: RequestInput<'a>,
    registry: &'a dyn SchemeRegistry,
    adapter: &'a dyn StorageAdapter,
    worker: &'a Worker,
    access: &'a AccessControl,
    max_resolve_depth: u32,
    default_page_count: u32,
    max_page_count: u32,
    debug_enabled: bool,
) -> Result<HandlerResponse> {
    let method = effective_verb(input.method, input.query_args.get("METHOD").map(String::as_str));

    let resolved = resolve_path(registry, &input.root_scheme, reversed(input.path_tokens), input.sub_filter)?;
    let mut list = resolved.list;

    let resolve_depth = input
        .query_args
        .get("resolveDepth")
        .and_then(|s| s.parse::<u32>().ok())
        .unwrap_or(max_resolve_depth);
    list.set_resolve_depth(resolve_depth, max_resolve_depth);
    apply_page_params(&mut list, &input.query_args, default_page_count, max_page_count);

    let resolver = field_resolver_for(list.effective_scheme(), &input.query_args);

    let delta = if list.delta_applicable(registry) {
        Some(adapter.get_delta_value(worker, list.effective_scheme()).await?)
    } else {
        None
    };

    if let (Some(delta_micros), Some(since)) = (delta, input.if_modified_since) {
        let delta_secs = delta_micros / 1_000_000;
        if since.timestamp() >= delta_secs {
            return Ok(HandlerResponse { status: 304, envelope: None, last_modified: None });
        }
    }

    let query_args = input.query_args;
    let ctx = ResourceContext {
        adapter,
        worker,
        registry,
        access,
        user: input.user,
        server_headers: input.server_headers,
        resolver,
        max_resolve_depth,
    };

    let resource = build_resource(resolved.kind, list, resolved.field_name, &query_args, ctx)?;

    let (status, result) = match method {
        Verb::Get => {
            let result = resource.get_result_object().await?;
            (200, result)
        }
        Verb::Delete => {
            if resource.remove_object().await? {
                (204, Value::Null)
            } else {
                return Err(Error::Forbidden("remove denied".into()));
            }
        }
        Verb::Post => {
            if !resource.prepare_create(&input.payload) {
                return Err(Error::NotImplemented("create is not supported on this resource".into()));
            }
            let result = resource.create_object(input.payload, &input.files).await?;
            (201, result)
        }
        Verb::Put => {
            if !resource.prepare_update(&input.payload) {
                return Err(Error::NotImplemented("update is not supported on this resource".into()));
            }
            let result = resource.update_object(input.payload, &input.files).await?;
            (200, result)
        }
        Verb::Patch => {
            if !resource.prepare_append(&input.payload) {
                return Err(Error::NotImplemented("append is not supported on this resource".into()));
            }
            let result = resource.append_object(input.payload).await?;
            (200, result)
        }
    };

    debug!(status, "handled request");

    if status == 204 {
        return Ok(HandlerResponse { status, envelope: None, last_modified: None });
    }

    Ok(HandlerResponse {
        status,
        envelope: Some(envelope_for(result, delta, debug_enabled)),
        last_modified: delta.and_then(|d| DateTime::<Utc>::from_timestamp(d / 1_000_000, 0)),
    })
}

/// One entry of a multi-request: a scheme-qualified path and its own
/// query arguments, resolved independently but composed under one
/// envelope (§4.7 "Multi-request").
pub struct MultiRequestEntry {
    pub path: String,
    pub query_args: HashMap<String, String>,
}

/// Runs a batch of read-only requests and composes them under one
/// envelope with a per-path `delta` sub-map and a composite
/// `Last-Modified`, mirroring `MultiResourceHandler.cc`.
pub async fn handle_multi<'a>(
    entries: Vec<MultiRequestEntry>,
    registry: &'a dyn SchemeRegistry,
    adapter: &'a dyn StorageAdapter,
    worker: &'a Worker,
    access: &'a AccessControl,
    user: Option<&'a User>,
    server_headers: &'a HashMap<String, String>,
    max_resolve_depth: u32,
    default_page_count: u32,
    max_page_count: u32,
    target_delta: Option<i64>,
    if_modified_since: Option<DateTime<Utc>>,
) -> Result<HandlerResponse> {
    let mut result = Value::dict();
    let mut delta_map = Value::dict();
    let mut max_delta: i64 = 0;

    for entry in entries {
        let (scheme, rest) = match entry.path.split_once('/') {
            Some((s, r)) => (s.to_string(), r.to_string()),
            None => (entry.path.clone(), String::new()),
        };
        if registry.get(&scheme).is_none() {
            continue;
        }

        let tokens: Vec<String> = if rest.is_empty() { Vec::new() } else { rest.split('/').map(String::from).collect() };
        let resolved = resolve_path(registry, &scheme, reversed(tokens), None)?;
        let mut list = resolved.list;
        list.set_resolve_depth(max_resolve_depth, max_resolve_depth);
        apply_page_params(&mut list, &entry.query_args, default_page_count, max_page_count);

        if let Some(target) = target_delta {
            if target > 0 && list.delta_applicable(registry) {
                let scheme_name = list.effective_scheme().to_string();
                let scheme_ref = registry.get(&scheme_name).expect("scheme resolved above");
                list.set_query_as_mtime(scheme_ref, target);
            }
        }

        let resolver = field_resolver_for(list.effective_scheme(), &entry.query_args);
        let has_delta = list.delta_applicable(registry);
        let source_delta = if has_delta { Some(adapter.get_delta_value(worker, list.effective_scheme()).await?) } else { None };
        if let Some(d) = source_delta {
            max_delta = max_delta.max(d);
            delta_map.set(entry.path.clone(), Value::Int(d));
        }

        let ctx = ResourceContext {
            adapter,
            worker,
            registry,
            access,
            user,
            server_headers,
            resolver,
            max_resolve_depth,
        };
        let resource = build_resource(resolved.kind, list, resolved.field_name, &entry.query_args, ctx)?;
        let value = resource.get_result_object().await?;
        result.set(entry.path.clone(), value);
    }

    let last_modified = if max_delta > 0 { DateTime::<Utc>::from_timestamp(max_delta / 1_000_000, 0) } else { None };

    if let (Some(lm), Some(since)) = (last_modified, if_modified_since) {
        if since.timestamp() >= lm.timestamp() {
            return Ok(HandlerResponse { status: 304, envelope: None, last_modified: Some(lm) });
        }
    }

    let mut envelope = envelope_for(result, None, false);
    if let Some(d) = delta_map.as_dict() {
        if !d.is_empty() {
            if let Value::Dict(result_dict) = &mut envelope.result {
                result_dict.insert("__delta".to_string(), delta_map);
            }
        }
    }
    Ok(HandlerResponse { status: 200, envelope: Some(envelope), last_modified })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn method_override_maps_get_to_delete() {
        assert_eq!(effective_verb(Verb::Get, Some("DELETE")), Verb::Delete);
        assert_eq!(effective_verb(Verb::Get, None), Verb::Get);
    }

    #[test]
    fn method_override_maps_post_to_put_or_patch() {
        assert_eq!(effective_verb(Verb::Post, Some("PUT")), Verb::Put);
        assert_eq!(effective_verb(Verb::Post, Some("PATCH")), Verb::Patch);
        assert_eq!(effective_verb(Verb::Post, Some("bogus")), Verb::Post);
    }

    #[test]
    fn page_params_respect_path_encoded_limit() {
        let mut list = QueryList::new("things");
        list.last_mut().query.limit = Some(1);
        let args = HashMap::from([("pageCount".to_string(), "50".to_string())]);
        apply_page_params(&mut list, &args, 25, 200);
        assert_eq!(list.last().query.limit, Some(1));
    }

    #[test]
    fn page_params_clamp_to_max() {
        let mut list = QueryList::new("things");
        let args = HashMap::from([("pageCount".to_string(), "9000".to_string())]);
        apply_page_params(&mut list, &args, 25, 200);
        assert_eq!(list.last().query.limit, Some(200));
    }
}

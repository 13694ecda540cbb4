//! Resource Family (§4.5): a polymorphic resource constructed from a
//! Query List, an Adapter transaction handle, an optional user, and
//! resolve options, with one struct per variant and shared helpers on
//! a composed base (never an inheritance hierarchy — see DESIGN.md).

mod array;
mod field_object;
mod file;
mod object;
mod refset;
mod reslist;
mod search;
mod set;
mod view;

pub use array::ArrayResource;
pub use field_object::FieldObjectResource;
pub use file::FileResource;
pub use object::ObjectResource;
pub use refset::ReferenceSetResource;
pub use reslist::ResourceListResource;
pub use search::SearchResource;
pub use set::SetResource;
pub use view::ViewResource;

use std::collections::HashMap;

use async_trait::async_trait;

use crate::access::AccessControl;
use crate::adapter::{StorageAdapter, Worker};
use crate::error::{Error, Result};
use crate::field_resolver::FieldResolver;
use crate::query::QueryList;
use crate::scheme::{Action, Permission, Scheme, SchemeRegistry};
use crate::user::User;
use crate::value::{meta_keys, Value};

/// A file uploaded alongside the request, already staged by the
/// surrounding HTTP layer; the core only needs its target field name
/// and the negative placeholder id standing in for the not-yet-saved
/// content row.
#[derive(Clone, Debug)]
pub struct FileUpload {
    pub field_name: Option<String>,
    pub placeholder_id: i64,
    pub mime: String,
    pub size: u64,
}

/// Everything a Resource needs that is not carried by its Query List:
/// the transaction handle, the scheme registry, access control, the
/// current user, and resolve options.
pub struct ResourceContext<'a> {
    pub adapter: &'a dyn StorageAdapter,
    pub worker: &'a Worker,
    pub registry: &'a dyn SchemeRegistry,
    pub access: &'a AccessControl,
    pub user: Option<&'a User>,
    pub server_headers: &'a HashMap<String, String>,
    pub resolver: FieldResolver,
    pub max_resolve_depth: u32,
}

/// Shared state and helpers composed into every concrete variant.
pub struct ResourceBase<'a> {
    pub list: QueryList,
    pub ctx: ResourceContext<'a>,
}

impl<'a> ResourceBase<'a> {
    pub fn new(list: QueryList, ctx: ResourceContext<'a>) -> Self {
        Self { list, ctx }
    }

    pub fn scheme(&self) -> Result<&'a Scheme> {
        self.ctx
            .registry
            .get(self.list.effective_scheme())
            .ok_or_else(|| Error::NotFound(self.list.effective_scheme().to_string()))
    }

    pub fn permission(&self, action: Action) -> Result<Permission> {
        Ok(self
            .ctx
            .access
            .authorize_scheme(self.ctx.user, self.scheme()?, action, self.ctx.server_headers))
    }

    /// Requires at least `Partial` permission, returning `Forbidden`
    /// otherwise. Callers needing the object-tier callback pass the
    /// current object/patch themselves via `authorize_object`.
    pub fn require_permission(&self, action: Action) -> Result<Permission> {
        let perm = self.permission(action)?;
        if perm == Permission::Restrict {
            return Err(Error::Forbidden(format!("{:?} denied on {}", action, self.list.effective_scheme())));
        }
        Ok(perm)
    }

    pub fn authorize_object(&self, action: Action, object: &Value, patch: &mut Value) -> Result<bool> {
        let scheme = self.scheme()?;
        Ok(self.ctx.access.is_allowed(self.ctx.user, scheme, action, object, patch, self.ctx.server_headers))
    }

    /// Extracts the oid from a freshly adapter-returned object value.
    pub fn object_id(value: &Value) -> Option<i64> {
        value.placeholder_oid()
    }

    /// Before create/update, inserts uploaded files' negative
    /// placeholder ids into the payload under their matching field
    /// name (§4.5 Files). Names that match no scheme field, or don't
    /// match the field the caller expected, are left untouched — the
    /// surrounding layer is responsible for closing those uploads
    /// without linking them.
    pub fn encode_files(scheme: &Scheme, payload: &mut Value, files: &[FileUpload]) {
        let Some(dict) = payload.as_dict_mut() else { return };
        for file in files {
            let Some(field_name) = &file.field_name else { continue };
            if dict.contains_key(field_name) {
                continue;
            }
            if let Some(field) = scheme.field(field_name) {
                if field.field_type.is_content() {
                    dict.insert(field_name.clone(), Value::Int(file.placeholder_id));
                }
            }
        }
    }

    /// Resolves the Query List down to a single governing id, the way
    /// every single-object variant (Object, terminal Set/RefSet items)
    /// needs to before acting.
    pub async fn resolve_single_id(&self) -> Result<i64> {
        let ids = self
            .ctx
            .adapter
            .perform_query_list_for_ids(self.ctx.worker, &self.list, Some(1))
            .await?;
        ids.into_iter()
            .next()
            .ok_or_else(|| Error::NotFound(format!("no {} matched the query", self.list.effective_scheme())))
    }

    pub async fn resolve_ids(&self, limit: Option<u32>) -> Result<Vec<i64>> {
        self.ctx.adapter.perform_query_list_for_ids(self.ctx.worker, &self.list, limit).await
    }

    /// Runs the Hydrator over a freshly fetched value using this
    /// resource's Field Resolver node and configured max depth.
    pub async fn hydrate_result(&self, mut value: Value) -> Result<Value> {
        let hydrate_ctx = crate::hydrator::HydrateCtx {
            adapter: self.ctx.adapter,
            worker: self.ctx.worker,
            registry: self.ctx.registry,
        };
        let mut seen = crate::hydrator::SeenSet::new();
        crate::hydrator::hydrate(&mut value, &self.ctx.resolver, 0, self.ctx.max_resolve_depth, &hydrate_ctx, &mut seen).await?;
        Ok(value)
    }

    /// Runs `action` per id in `ids`, in list order, returning the
    /// per-id results. Used by mass update/append on ResourceList/Set,
    /// and by mass delete semantics in §5 ("per-id operations execute
    /// in list order").
    pub async fn for_each_id<T, F, Fut>(&self, ids: &[i64], mut action: F) -> Vec<Result<T>>
    where
        F: FnMut(i64) -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        let mut out = Vec::with_capacity(ids.len());
        for &id in ids {
            out.push(action(id).await);
        }
        out
    }

    /// For a Query List navigated through a relation field (Set, View,
    /// Reference-Set): the parent's oid and the back-reference field
    /// name on the child scheme, when the parent item resolved to a
    /// single object.
    pub fn parent_link(&self) -> Option<(i64, String)> {
        let items = self.list.items();
        if items.len() < 2 {
            return None;
        }
        let parent = &items[items.len() - 2];
        let child = &items[items.len() - 1];
        let parent_oid = parent.query.oid?;
        let ref_field_name = child.ref_field.clone()?;
        let parent_scheme = self.ctx.registry.get(&parent.scheme)?;
        let field = parent_scheme.field(&ref_field_name)?;
        let back_ref = field.foreign_field.clone().unwrap_or(ref_field_name);
        Some((parent_oid, back_ref))
    }

    /// Like `parent_link`, but returns the raw field name bound on the
    /// *previous* item's scheme without resolving it to a back-reference
    /// field — what Reference-Set needs, since the field it mutates is
    /// named directly on the parent.
    pub fn parent_link_raw(&self) -> Option<(i64, String)> {
        let items = self.list.items();
        if items.len() < 2 {
            return None;
        }
        let parent = &items[items.len() - 2];
        let child = &items[items.len() - 1];
        let parent_oid = parent.query.oid?;
        let ref_field_name = child.ref_field.clone()?;
        Some((parent_oid, ref_field_name))
    }

    pub async fn select_by_id(&self, scheme_name: &str, id: i64) -> Result<Value> {
        let mut list = QueryList::new(scheme_name.to_string());
        list.last_mut().query.oid = Some(id);
        self.ctx.adapter.select(self.ctx.worker, &list).await
    }

    /// Mass update/append: applies `value` to every id the Query List
    /// resolves, each under its own nested transaction (§5), skipping
    /// ids an object-tier callback denies under `Partial` permission.
    pub async fn mass_patch(&self, action: Action, mut value: Value, files: &[FileUpload]) -> Result<Value> {
        let perm = self.require_permission(action)?;
        let scheme = self.scheme()?;
        Self::encode_files(scheme, &mut value, files);
        let ids = self.resolve_ids(None).await?;

        let mut results = Vec::new();
        for id in ids {
            let mut patch = value.clone();
            if perm == Permission::Partial {
                let current = self.select_by_id(&scheme.name, id).await?;
                if !self.authorize_object(action, &current, &mut patch)? {
                    continue;
                }
            }
            let scheme_name = scheme.name.clone();
            let updated = self
                .ctx
                .worker
                .perform_in_transaction(self.ctx.adapter, || async {
                    self.ctx.adapter.patch(self.ctx.worker, &scheme_name, id, patch.clone()).await
                })
                .await?;
            results.push(self.hydrate_result(updated).await?);
        }
        Ok(Value::Array(results))
    }

    /// Mass delete (§5): all-or-none only when the id list has size 1;
    /// otherwise each deletion is independent and the overall result is
    /// true whenever the list is non-empty.
    pub async fn mass_remove(&self) -> Result<bool> {
        self.require_permission(Action::Remove)?;
        let scheme = self.scheme()?;
        let ids = self.resolve_ids(None).await?;
        if ids.len() == 1 {
            return self
                .ctx
                .worker
                .perform_in_transaction(self.ctx.adapter, || async {
                    self.ctx.adapter.remove(self.ctx.worker, &scheme.name, ids[0]).await
                })
                .await;
        }
        for id in &ids {
            let scheme_name = scheme.name.clone();
            self.ctx
                .worker
                .perform_in_transaction(self.ctx.adapter, || async {
                    self.ctx.adapter.remove(self.ctx.worker, &scheme_name, *id).await
                })
                .await?;
        }
        Ok(!ids.is_empty())
    }
}

/// The contract every concrete Resource Family variant implements.
#[async_trait]
pub trait Resource: Send + Sync {
    fn prepare_create(&self, payload: &Value) -> bool;
    fn prepare_update(&self, payload: &Value) -> bool;
    fn prepare_append(&self, payload: &Value) -> bool;

    async fn remove_object(&self) -> Result<bool>;
    async fn create_object(&self, value: Value, files: &[FileUpload]) -> Result<Value>;
    async fn update_object(&self, value: Value, files: &[FileUpload]) -> Result<Value>;
    async fn append_object(&self, value: Value) -> Result<Value>;
    async fn get_result_object(&self) -> Result<Value>;

    /// For Object resources: the object's modification timestamp, used
    /// by the Handler Facade's conditional-GET check. `None` when the
    /// variant has no single governing object (lists, sets).
    fn get_object_mtime(&self) -> Option<i64> {
        None
    }

    fn max_request_size(&self) -> usize;
    fn max_var_size(&self) -> usize;
    fn max_file_size(&self) -> usize;
}

/// A dictionary whose `__delta` meta value is the tombstone marker,
/// used by mass-remove paths to report a deletion without fetching the
/// row back from the adapter.
pub fn tombstone(oid: i64) -> Value {
    let mut v = Value::dict();
    v.set(meta_keys::OID, Value::Int(oid));
    let mut delta = Value::dict();
    delta.set("action", Value::String("delete".to_string()));
    v.set(meta_keys::DELTA, delta);
    v
}

use async_trait::async_trait;

use crate::adapter::FieldTarget;
use crate::error::{Error, Result};
use crate::scheme::{Action, Permission};
use crate::value::Value;

use super::{FileUpload, Resource, ResourceBase};

/// A many-to-many reference list on the tail field of a parent object
/// (§4.5 "Reference-Set"). Three verbs map to three append modes: PUT
/// is "set" (cleanup stale links, assign the given ids), PATCH is
/// "append" (union with the existing links), DELETE is "cleanup"
/// (clears the field).
pub struct ReferenceSetResource<'a> {
    base: ResourceBase<'a>,
}

impl<'a> ReferenceSetResource<'a> {
    pub fn new(base: ResourceBase<'a>) -> Self {
        Self { base }
    }

    fn parent(&self) -> Result<(i64, String, String)> {
        let (parent_oid, field_name) = self
            .base
            .parent_link_raw()
            .ok_or_else(|| Error::InvalidPath("reference-set has no resolved parent".into()))?;
        let parent_scheme = self
            .base
            .list
            .items()
            .get(self.base.list.items().len().wrapping_sub(2))
            .map(|i| i.scheme.clone())
            .ok_or_else(|| Error::InvalidPath("reference-set has no resolved parent".into()))?;
        Ok((parent_oid, parent_scheme, field_name))
    }

    /// Combined permission per §4.5: `min(refPerms, updatePerms)`,
    /// where `refPerms` is `Reference` on the child scheme and
    /// `updatePerms` is `Update` on the parent scheme.
    fn combined_permission(&self, parent_scheme: &str) -> Result<Permission> {
        let ref_perm = self.base.permission(Action::Reference)?;
        let parent = self
            .base
            .ctx
            .registry
            .get(parent_scheme)
            .ok_or_else(|| Error::NotFound(parent_scheme.to_string()))?;
        let update_perm = self.base.ctx.access.authorize_scheme(
            self.base.ctx.user,
            parent,
            Action::Update,
            self.base.ctx.server_headers,
        );
        Ok(ref_perm.min(update_perm))
    }

    /// Resolves a payload (scalar id, array of ids, dict, or a nested
    /// payload under the field key) to concrete child ids, creating new
    /// child rows for any element given as a full object body.
    async fn resolve_ids(&self, value: Value, field_name: &str) -> Result<Vec<i64>> {
        let scheme = self.base.scheme()?;
        let raw = match &value {
            Value::Dict(d) if d.contains_key(field_name) => value.get(field_name).cloned().unwrap_or(Value::Null),
            other => other.clone(),
        };
        let items = raw.coerce_to_array();
        let mut ids = Vec::with_capacity(items.len());
        for item in items {
            match item {
                Value::Int(id) => ids.push(id),
                Value::Dict(ref d) if d.contains_key(crate::value::meta_keys::OID) => {
                    if let Some(id) = item.placeholder_oid() {
                        ids.push(id);
                    }
                }
                Value::Dict(_) => {
                    self.base.require_permission(Action::Create)?;
                    let created = self
                        .base
                        .ctx
                        .worker
                        .perform_in_transaction(self.base.ctx.adapter, || async {
                            self.base.ctx.adapter.create(self.base.ctx.worker, &scheme.name, item.clone()).await
                        })
                        .await?;
                    if let Some(id) = created.placeholder_oid() {
                        ids.push(id);
                    }
                }
                _ => {}
            }
        }
        Ok(ids)
    }
}

#[async_trait]
impl<'a> Resource for ReferenceSetResource<'a> {
    fn prepare_create(&self, _payload: &Value) -> bool {
        false
    }

    fn prepare_update(&self, _payload: &Value) -> bool {
        true
    }

    fn prepare_append(&self, _payload: &Value) -> bool {
        true
    }

    async fn remove_object(&self) -> Result<bool> {
        let (parent_oid, parent_scheme, field_name) = self.parent()?;
        let perm = self.combined_permission(&parent_scheme)?;
        if perm == Permission::Restrict {
            return Err(Error::Forbidden(format!("reference denied on {}", parent_scheme)));
        }
        self.base
            .ctx
            .worker
            .perform_in_transaction(self.base.ctx.adapter, || async {
                self.base
                    .ctx
                    .adapter
                    .field_clear(self.base.ctx.worker, &parent_scheme, FieldTarget::Oid(parent_oid), &field_name, None)
                    .await
                    .map(|_| true)
            })
            .await
    }

    async fn create_object(&self, _value: Value, _files: &[FileUpload]) -> Result<Value> {
        Err(Error::NotImplemented("reference-set resources do not support direct create".into()))
    }

    /// "Set" mode: cleanup stale links, then assign the resolved ids.
    async fn update_object(&self, value: Value, _files: &[FileUpload]) -> Result<Value> {
        let (parent_oid, parent_scheme, field_name) = self.parent()?;
        let perm = self.combined_permission(&parent_scheme)?;
        if perm == Permission::Restrict {
            return Err(Error::Forbidden(format!("reference denied on {}", parent_scheme)));
        }
        let ids = self.resolve_ids(value, &field_name).await?;
        let result = self
            .base
            .ctx
            .worker
            .perform_in_transaction(self.base.ctx.adapter, || async {
                self.base
                    .ctx
                    .adapter
                    .field_clear(self.base.ctx.worker, &parent_scheme, FieldTarget::Oid(parent_oid), &field_name, Some(ids.as_slice()))
                    .await?;
                self.base
                    .ctx
                    .adapter
                    .field_append(
                        self.base.ctx.worker,
                        &parent_scheme,
                        FieldTarget::Oid(parent_oid),
                        &field_name,
                        Value::Array(ids.iter().copied().map(Value::Int).collect()),
                    )
                    .await
            })
            .await?;
        self.base.hydrate_result(result).await
    }

    /// "Append" mode: union the resolved ids with the existing links.
    async fn append_object(&self, value: Value) -> Result<Value> {
        let (parent_oid, parent_scheme, field_name) = self.parent()?;
        let perm = self.combined_permission(&parent_scheme)?;
        if perm == Permission::Restrict {
            return Err(Error::Forbidden(format!("reference denied on {}", parent_scheme)));
        }
        let ids = self.resolve_ids(value, &field_name).await?;
        let result = self
            .base
            .ctx
            .worker
            .perform_in_transaction(self.base.ctx.adapter, || async {
                self.base
                    .ctx
                    .adapter
                    .field_append(
                        self.base.ctx.worker,
                        &parent_scheme,
                        FieldTarget::Oid(parent_oid),
                        &field_name,
                        Value::Array(ids.iter().copied().map(Value::Int).collect()),
                    )
                    .await
            })
            .await?;
        self.base.hydrate_result(result).await
    }

    async fn get_result_object(&self) -> Result<Value> {
        self.base.require_permission(Action::Read)?;
        let result = self.base.ctx.adapter.select(self.base.ctx.worker, &self.base.list).await?;
        self.base.hydrate_result(result).await
    }

    fn max_request_size(&self) -> usize {
        self.base.scheme().map(|s| s.max_request_size).unwrap_or(1 << 20)
    }

    fn max_var_size(&self) -> usize {
        self.base.scheme().map(|s| s.max_var_size).unwrap_or(1 << 16)
    }

    fn max_file_size(&self) -> usize {
        self.base.scheme().map(|s| s.max_file_size).unwrap_or(10 << 20)
    }
}

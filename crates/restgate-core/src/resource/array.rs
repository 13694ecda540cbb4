use async_trait::async_trait;

use crate::adapter::FieldTarget;
use crate::error::{Error, Result};
use crate::scheme::Action;
use crate::value::Value;

use super::{FileUpload, Resource, ResourceBase};

/// A scalar-array property field on the already-resolved object (§4.5
/// "Array accepts a scalar, an array, or a dict-with-field-name, coerces
/// to array, and either setField or appendField depending on verb").
/// POST appends; PUT replaces wholesale. `prepareAppend` stays false —
/// PATCH is not a supported verb for this variant (§8 boundary).
pub struct ArrayResource<'a> {
    base: ResourceBase<'a>,
    field_name: String,
}

impl<'a> ArrayResource<'a> {
    pub fn new(base: ResourceBase<'a>, field_name: String) -> Self {
        Self { base, field_name }
    }

    fn object_oid(&self) -> Result<i64> {
        self.base
            .list
            .last()
            .query
            .oid
            .ok_or_else(|| Error::InvalidPath("array field has no resolved object".into()))
    }

    fn coerce(&self, value: Value) -> Value {
        let items = match value {
            Value::Dict(mut d) => d.swap_remove(&self.field_name).unwrap_or(Value::Null),
            other => other,
        };
        Value::Array(items.coerce_to_array())
    }
}

#[async_trait]
impl<'a> Resource for ArrayResource<'a> {
    fn prepare_create(&self, _payload: &Value) -> bool {
        true
    }

    fn prepare_update(&self, _payload: &Value) -> bool {
        true
    }

    fn prepare_append(&self, _payload: &Value) -> bool {
        false
    }

    async fn remove_object(&self) -> Result<bool> {
        self.base.require_permission(Action::Update)?;
        let scheme = self.base.scheme()?;
        let oid = self.object_oid()?;
        self.base
            .ctx
            .worker
            .perform_in_transaction(self.base.ctx.adapter, || async {
                self.base
                    .ctx
                    .adapter
                    .field_clear(self.base.ctx.worker, &scheme.name, FieldTarget::Oid(oid), &self.field_name, None)
                    .await
                    .map(|_| true)
            })
            .await
    }

    async fn create_object(&self, value: Value, _files: &[FileUpload]) -> Result<Value> {
        self.base.require_permission(Action::Update)?;
        let scheme = self.base.scheme()?;
        let oid = self.object_oid()?;
        let items = self.coerce(value);
        let updated = self
            .base
            .ctx
            .worker
            .perform_in_transaction(self.base.ctx.adapter, || async {
                self.base
                    .ctx
                    .adapter
                    .field_append(self.base.ctx.worker, &scheme.name, FieldTarget::Oid(oid), &self.field_name, items)
                    .await
            })
            .await?;
        self.base.hydrate_result(updated).await
    }

    async fn update_object(&self, value: Value, _files: &[FileUpload]) -> Result<Value> {
        self.base.require_permission(Action::Update)?;
        let scheme = self.base.scheme()?;
        let oid = self.object_oid()?;
        let items = self.coerce(value);
        let updated = self
            .base
            .ctx
            .worker
            .perform_in_transaction(self.base.ctx.adapter, || async {
                self.base
                    .ctx
                    .adapter
                    .field_set(self.base.ctx.worker, &scheme.name, FieldTarget::Oid(oid), &self.field_name, items)
                    .await
            })
            .await?;
        self.base.hydrate_result(updated).await
    }

    async fn append_object(&self, _value: Value) -> Result<Value> {
        Err(Error::NotImplemented("array fields are appended via POST, not PATCH".into()))
    }

    async fn get_result_object(&self) -> Result<Value> {
        self.base.require_permission(Action::Read)?;
        let scheme = self.base.scheme()?;
        let oid = self.object_oid()?;
        self.base.ctx.adapter.field_get(self.base.ctx.worker, &scheme.name, FieldTarget::Oid(oid), &self.field_name).await
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

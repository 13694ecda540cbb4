use async_trait::async_trait;

use crate::adapter::FieldTarget;
use crate::error::{Error, Result};
use crate::scheme::Action;
use crate::value::Value;

use super::{FileUpload, Resource, ResourceBase};

/// A single `File`/`Image` content field on the already-resolved object
/// (§4.5 "File / Array / Field-Object: property resources"). Create and
/// update are unified: either verb replaces the field's content.
pub struct FileResource<'a> {
    base: ResourceBase<'a>,
    field_name: String,
}

impl<'a> FileResource<'a> {
    pub fn new(base: ResourceBase<'a>, field_name: String) -> Self {
        Self { base, field_name }
    }

    fn object_oid(&self) -> Result<i64> {
        self.base
            .list
            .last()
            .query
            .oid
            .ok_or_else(|| Error::InvalidPath("file field has no resolved object".into()))
    }
}

#[async_trait]
impl<'a> Resource for FileResource<'a> {
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

    async fn create_object(&self, value: Value, files: &[FileUpload]) -> Result<Value> {
        self.update_object(value, files).await
    }

    async fn update_object(&self, value: Value, files: &[FileUpload]) -> Result<Value> {
        self.base.require_permission(Action::Update)?;
        let scheme = self.base.scheme()?;
        let oid = self.object_oid()?;

        let content = files
            .iter()
            .find(|f| f.field_name.as_deref() == Some(self.field_name.as_str()))
            .map(|f| Value::Int(f.placeholder_id))
            .unwrap_or(value);

        let updated = self
            .base
            .ctx
            .worker
            .perform_in_transaction(self.base.ctx.adapter, || async {
                self.base
                    .ctx
                    .adapter
                    .field_set(self.base.ctx.worker, &scheme.name, FieldTarget::Oid(oid), &self.field_name, content)
                    .await
            })
            .await?;
        self.base.hydrate_result(updated).await
    }

    async fn append_object(&self, _value: Value) -> Result<Value> {
        Err(Error::NotImplemented("file fields do not support append".into()))
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

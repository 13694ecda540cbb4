use async_trait::async_trait;

use crate::error::{Error, Result};
use crate::scheme::Action;
use crate::value::Value;

use super::{FileUpload, Resource, ResourceBase};

/// A read-only materialized set reached through a `View` field (§4.5
/// "View"); delta-aware by construction — the per-item tag is the
/// parent oid plus the view field id.
pub struct ViewResource<'a> {
    base: ResourceBase<'a>,
}

impl<'a> ViewResource<'a> {
    pub fn new(base: ResourceBase<'a>) -> Self {
        Self { base }
    }
}

#[async_trait]
impl<'a> Resource for ViewResource<'a> {
    fn prepare_create(&self, _payload: &Value) -> bool {
        false
    }

    fn prepare_update(&self, _payload: &Value) -> bool {
        false
    }

    fn prepare_append(&self, _payload: &Value) -> bool {
        false
    }

    async fn remove_object(&self) -> Result<bool> {
        Err(Error::NotImplemented("views are read-only".into()))
    }

    async fn create_object(&self, _value: Value, _files: &[FileUpload]) -> Result<Value> {
        Err(Error::NotImplemented("views are read-only".into()))
    }

    async fn update_object(&self, _value: Value, _files: &[FileUpload]) -> Result<Value> {
        Err(Error::NotImplemented("views are read-only".into()))
    }

    async fn append_object(&self, _value: Value) -> Result<Value> {
        Err(Error::NotImplemented("views are read-only".into()))
    }

    async fn get_result_object(&self) -> Result<Value> {
        self.base.require_permission(Action::Read)?;
        let result = self.base.ctx.adapter.select(self.base.ctx.worker, &self.base.list).await?;
        self.base.hydrate_result(result).await
    }

    fn get_object_mtime(&self) -> Option<i64> {
        None
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

impl<'a> ViewResource<'a> {
    /// The view's delta tag for conditional GET: the parent scheme's
    /// delta value at this row's view field, when the parent resolved
    /// to a single object.
    pub async fn view_delta(&self) -> Result<Option<i64>> {
        let Some((parent_oid, field_name)) = self.base.parent_link_raw() else { return Ok(None) };
        let items = self.base.list.items();
        let Some(parent) = items.get(items.len().wrapping_sub(2)) else { return Ok(None) };
        let delta = self
            .base
            .ctx
            .adapter
            .get_delta_value_view(self.base.ctx.worker, &parent.scheme, &field_name, parent_oid)
            .await?;
        Ok(Some(delta))
    }
}

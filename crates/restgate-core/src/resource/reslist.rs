use async_trait::async_trait;

use crate::error::Result;
use crate::scheme::Action;
use crate::value::Value;

use super::{FileUpload, Resource, ResourceBase};

/// The root collection: `GET` lists, `POST` creates one new row, `PUT`
/// mass-updates every row the Query List resolves, `PATCH` mass-appends
/// (§4.5 "mass updates iterate per-id within independent nested
/// transactions").
pub struct ResourceListResource<'a> {
    base: ResourceBase<'a>,
}

impl<'a> ResourceListResource<'a> {
    pub fn new(base: ResourceBase<'a>) -> Self {
        Self { base }
    }
}

#[async_trait]
impl<'a> Resource for ResourceListResource<'a> {
    fn prepare_create(&self, _payload: &Value) -> bool {
        true
    }

    fn prepare_update(&self, _payload: &Value) -> bool {
        true
    }

    fn prepare_append(&self, _payload: &Value) -> bool {
        true
    }

    async fn remove_object(&self) -> Result<bool> {
        self.base.mass_remove().await
    }

    async fn create_object(&self, mut value: Value, files: &[FileUpload]) -> Result<Value> {
        self.base.require_permission(Action::Create)?;
        let scheme = self.base.scheme()?;
        ResourceBase::encode_files(scheme, &mut value, files);
        let created = self
            .base
            .ctx
            .worker
            .perform_in_transaction(self.base.ctx.adapter, || async {
                self.base.ctx.adapter.create(self.base.ctx.worker, &scheme.name, value).await
            })
            .await?;
        self.base.hydrate_result(created).await
    }

    async fn update_object(&self, value: Value, files: &[FileUpload]) -> Result<Value> {
        self.base.mass_patch(Action::Update, value, files).await
    }

    async fn append_object(&self, value: Value) -> Result<Value> {
        self.base.mass_patch(Action::Append, value, &[]).await
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

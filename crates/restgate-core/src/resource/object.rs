use async_trait::async_trait;

use crate::error::{Error, Result};
use crate::scheme::Action;
use crate::value::Value;

use super::{FileUpload, Resource, ResourceBase};

/// A single addressable entity, selected by oid or alias (§4.5 "Object
/// / ResourceList / Set: perform the Query List to resolve identifiers,
/// then for each identifier perform the requested action").
pub struct ObjectResource<'a> {
    base: ResourceBase<'a>,
}

impl<'a> ObjectResource<'a> {
    pub fn new(base: ResourceBase<'a>) -> Self {
        Self { base }
    }
}

#[async_trait]
impl<'a> Resource for ObjectResource<'a> {
    fn prepare_create(&self, _payload: &Value) -> bool {
        false
    }

    fn prepare_update(&self, _payload: &Value) -> bool {
        true
    }

    fn prepare_append(&self, _payload: &Value) -> bool {
        false
    }

    async fn remove_object(&self) -> Result<bool> {
        self.base.require_permission(Action::Remove)?;
        let scheme = self.base.scheme()?;
        let oid = self.base.resolve_single_id().await?;
        self.base
            .ctx
            .worker
            .perform_in_transaction(self.base.ctx.adapter, || async {
                self.base.ctx.adapter.remove(self.base.ctx.worker, &scheme.name, oid).await
            })
            .await
    }

    async fn create_object(&self, _value: Value, _files: &[FileUpload]) -> Result<Value> {
        Err(Error::NotImplemented("Object resources do not support create".into()))
    }

    async fn update_object(&self, mut value: Value, files: &[FileUpload]) -> Result<Value> {
        let perm = self.base.require_permission(Action::Update)?;
        let scheme = self.base.scheme()?;
        let oid = self.base.resolve_single_id().await?;
        ResourceBase::encode_files(scheme, &mut value, files);

        if perm == crate::scheme::Permission::Partial {
            let current = self.base.ctx.adapter.select(self.base.ctx.worker, &self.base.list).await?;
            if !self.base.authorize_object(Action::Update, &current, &mut value)? {
                return Err(Error::Forbidden(format!("update denied on {}", scheme.name)));
            }
        }

        let updated = self
            .base
            .ctx
            .worker
            .perform_in_transaction(self.base.ctx.adapter, || async {
                self.base.ctx.adapter.patch(self.base.ctx.worker, &scheme.name, oid, value).await
            })
            .await?;
        self.base.hydrate_result(updated).await
    }

    async fn append_object(&self, _value: Value) -> Result<Value> {
        Err(Error::NotImplemented("Object resources do not support append".into()))
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

use async_trait::async_trait;

use crate::error::{Error, Result};
use crate::scheme::Action;
use crate::value::Value;

use super::{FileUpload, Resource, ResourceBase};

/// A one-to-one relation reached through an `Object` field, implemented
/// as "create then patch the parent to reference the child", with
/// transactional remove-and-recreate on PUT (§4.5 "Field-Object").
pub struct FieldObjectResource<'a> {
    base: ResourceBase<'a>,
}

impl<'a> FieldObjectResource<'a> {
    pub fn new(base: ResourceBase<'a>) -> Self {
        Self { base }
    }

    fn parent(&self) -> Result<(i64, String, String)> {
        let (parent_oid, field_name) = self
            .base
            .parent_link_raw()
            .ok_or_else(|| Error::InvalidPath("field-object has no resolved parent".into()))?;
        let parent_scheme = self.base.list.items()[self.base.list.items().len() - 2].scheme.clone();
        Ok((parent_oid, parent_scheme, field_name))
    }
}

#[async_trait]
impl<'a> Resource for FieldObjectResource<'a> {
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
        self.base.require_permission(Action::Remove)?;
        let scheme = self.base.scheme()?;
        let (parent_oid, parent_scheme, field_name) = self.parent()?;
        let child_oid = self.base.resolve_single_id().await.ok();
        self.base
            .ctx
            .worker
            .perform_in_transaction(self.base.ctx.adapter, || async {
                let mut unlink = Value::dict();
                unlink.set(field_name.clone(), Value::Null);
                self.base.ctx.adapter.patch(self.base.ctx.worker, &parent_scheme, parent_oid, unlink).await?;
                if let Some(oid) = child_oid {
                    self.base.ctx.adapter.remove(self.base.ctx.worker, &scheme.name, oid).await?;
                }
                Ok(true)
            })
            .await
    }

    async fn create_object(&self, mut value: Value, files: &[FileUpload]) -> Result<Value> {
        self.base.require_permission(Action::Create)?;
        let scheme = self.base.scheme()?;
        let (parent_oid, parent_scheme, field_name) = self.parent()?;
        ResourceBase::encode_files(scheme, &mut value, files);
        let created = self
            .base
            .ctx
            .worker
            .perform_in_transaction(self.base.ctx.adapter, || async {
                let child = self.base.ctx.adapter.create(self.base.ctx.worker, &scheme.name, value).await?;
                let child_oid = child
                    .placeholder_oid()
                    .ok_or_else(|| Error::Internal("adapter create returned no oid".into()))?;
                let mut link = Value::dict();
                link.set(field_name.clone(), Value::Int(child_oid));
                self.base.ctx.adapter.patch(self.base.ctx.worker, &parent_scheme, parent_oid, link).await?;
                Ok(child)
            })
            .await?;
        self.base.hydrate_result(created).await
    }

    async fn update_object(&self, mut value: Value, files: &[FileUpload]) -> Result<Value> {
        self.base.require_permission(Action::Update)?;
        let scheme = self.base.scheme()?;
        let (parent_oid, parent_scheme, field_name) = self.parent()?;
        ResourceBase::encode_files(scheme, &mut value, files);
        let old_child = self.base.resolve_single_id().await.ok();

        let created = self
            .base
            .ctx
            .worker
            .perform_in_transaction(self.base.ctx.adapter, || async {
                if let Some(oid) = old_child {
                    self.base.ctx.adapter.remove(self.base.ctx.worker, &scheme.name, oid).await?;
                }
                let child = self.base.ctx.adapter.create(self.base.ctx.worker, &scheme.name, value).await?;
                let child_oid = child
                    .placeholder_oid()
                    .ok_or_else(|| Error::Internal("adapter create returned no oid".into()))?;
                let mut link = Value::dict();
                link.set(field_name.clone(), Value::Int(child_oid));
                self.base.ctx.adapter.patch(self.base.ctx.worker, &parent_scheme, parent_oid, link).await?;
                Ok(child)
            })
            .await?;
        self.base.hydrate_result(created).await
    }

    async fn append_object(&self, _value: Value) -> Result<Value> {
        Err(Error::NotImplemented("field-object resources do not support append".into()))
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

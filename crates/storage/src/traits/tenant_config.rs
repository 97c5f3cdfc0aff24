use async_trait::async_trait;
use uuid::Uuid;

use outflow_core::{ChannelKind, Template};

use crate::error::StorageError;
use crate::types::ChannelConfigRecord;

/// Tenant-scoped provider credential rows (encrypted at rest).
#[async_trait]
pub trait ChannelConfigStore: Send + Sync {
    async fn get_channel_config(
        &self,
        tenant_id: Uuid,
        channel: ChannelKind,
    ) -> Result<Option<ChannelConfigRecord>, StorageError>;

    async fn upsert_channel_config(
        &self,
        record: ChannelConfigRecord,
    ) -> Result<(), StorageError>;
}

/// Template lookups for template sends and schema validation.
#[async_trait]
pub trait TemplateStore: Send + Sync {
    async fn get_template(
        &self,
        tenant_id: Uuid,
        id: Uuid,
    ) -> Result<Option<Template>, StorageError>;

    async fn upsert_template(&self, template: Template) -> Result<(), StorageError>;
}

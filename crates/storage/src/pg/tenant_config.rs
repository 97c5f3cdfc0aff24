//! ChannelConfigStore and TemplateStore implementations for PgStorage.

use async_trait::async_trait;
use sqlx::Row;
use uuid::Uuid;

use outflow_core::{ChannelKind, Template};

use crate::error::StorageError;
use crate::traits::{ChannelConfigStore, TemplateStore};
use crate::types::ChannelConfigRecord;

use super::{row_to_template, PgStorage};

#[async_trait]
impl ChannelConfigStore for PgStorage {
    async fn get_channel_config(
        &self,
        tenant_id: Uuid,
        channel: ChannelKind,
    ) -> Result<Option<ChannelConfigRecord>, StorageError> {
        let row = sqlx::query(
            "SELECT settings, updated_at FROM channel_configs
               WHERE tenant_id = $1 AND channel = $2",
        )
        .bind(tenant_id)
        .bind(channel.as_str())
        .fetch_optional(self.pool())
        .await?;
        let Some(row) = row else {
            return Ok(None);
        };
        Ok(Some(ChannelConfigRecord {
            tenant_id,
            channel,
            settings: row.try_get("settings")?,
            updated_at: row.try_get("updated_at")?,
        }))
    }

    async fn upsert_channel_config(
        &self,
        record: ChannelConfigRecord,
    ) -> Result<(), StorageError> {
        sqlx::query(
            "INSERT INTO channel_configs (tenant_id, channel, settings, updated_at)
               VALUES ($1, $2, $3, $4)
               ON CONFLICT (tenant_id, channel) DO UPDATE SET
                 settings = EXCLUDED.settings,
                 updated_at = EXCLUDED.updated_at",
        )
        .bind(record.tenant_id)
        .bind(record.channel.as_str())
        .bind(&record.settings)
        .bind(record.updated_at)
        .execute(self.pool())
        .await?;
        Ok(())
    }
}

#[async_trait]
impl TemplateStore for PgStorage {
    async fn get_template(
        &self,
        tenant_id: Uuid,
        id: Uuid,
    ) -> Result<Option<Template>, StorageError> {
        let row = sqlx::query(
            "SELECT id, tenant_id, name, channel, language, body, variables FROM templates
               WHERE id = $1 AND tenant_id = $2",
        )
        .bind(id)
        .bind(tenant_id)
        .fetch_optional(self.pool())
        .await?;
        row.as_ref().map(row_to_template).transpose()
    }

    async fn upsert_template(&self, template: Template) -> Result<(), StorageError> {
        sqlx::query(
            "INSERT INTO templates (id, tenant_id, name, channel, language, body, variables)
               VALUES ($1, $2, $3, $4, $5, $6, $7)
               ON CONFLICT (id) DO UPDATE SET
                 name = EXCLUDED.name,
                 channel = EXCLUDED.channel,
                 language = EXCLUDED.language,
                 body = EXCLUDED.body,
                 variables = EXCLUDED.variables",
        )
        .bind(template.id)
        .bind(template.tenant_id)
        .bind(&template.name)
        .bind(template.channel.as_str())
        .bind(&template.language)
        .bind(&template.body)
        .bind(serde_json::to_value(&template.variables)?)
        .execute(self.pool())
        .await?;
        Ok(())
    }
}

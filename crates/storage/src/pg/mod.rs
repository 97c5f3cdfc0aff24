//! PostgreSQL storage backend using sqlx.
//!
//! Row-level conditional updates (`FOR UPDATE SKIP LOCKED`, affected-row
//! checks) provide the optimistic leasing the dispatch pipeline relies on;
//! no advisory locks are taken.

mod contacts;
mod dead_letter;
mod messages;
mod migrations;
mod outbox;
mod rate_limit;
mod tenant_config;

use std::collections::HashMap;
use std::time::Duration;

use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Row};

use outflow_core::{
    ChannelKind, Contact, Conversation, DeadLetterKind, DeadLetterStatus, Message,
    MessageDirection, MessageKind, MessageStatus, OutboxMessage, OutboxStatus, Template,
    WebhookDeadLetterItem, PG_POOL_ACQUIRE_TIMEOUT_SECS, PG_POOL_MAX_CONNECTIONS,
};

use crate::error::StorageError;

pub(crate) use migrations::run_pg_migrations;

/// PostgreSQL storage backend.
#[derive(Clone, Debug)]
pub struct PgStorage {
    pool: PgPool,
}

impl PgStorage {
    /// Connect, run migrations, and return a ready backend.
    ///
    /// # Errors
    /// Returns an error if the pool cannot connect or a migration fails.
    pub async fn new(database_url: &str) -> Result<Self, StorageError> {
        let pool = PgPoolOptions::new()
            .max_connections(PG_POOL_MAX_CONNECTIONS)
            .acquire_timeout(Duration::from_secs(PG_POOL_ACQUIRE_TIMEOUT_SECS))
            .connect(database_url)
            .await?;
        run_pg_migrations(&pool).await?;
        tracing::info!("PgStorage initialized");
        Ok(Self { pool })
    }

    /// Wrap an existing pool (tests, shared app pools). Runs migrations.
    pub async fn from_pool(pool: PgPool) -> Result<Self, StorageError> {
        run_pg_migrations(&pool).await?;
        Ok(Self { pool })
    }

    pub(crate) fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn parse_col<T>(row: &PgRow, column: &'static str) -> Result<T, StorageError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    let raw: String = row.try_get(column)?;
    raw.parse().map_err(|e: T::Err| StorageError::DataCorruption {
        context: format!("column {column}: {e}"),
        source: format!("{e}").into(),
    })
}

pub(crate) fn row_to_outbox(row: &PgRow) -> Result<OutboxMessage, StorageError> {
    Ok(OutboxMessage {
        id: row.try_get("id")?,
        tenant_id: row.try_get("tenant_id")?,
        contact_id: row.try_get("contact_id")?,
        conversation_id: row.try_get("conversation_id")?,
        channel: parse_col::<ChannelKind>(row, "channel")?,
        kind: parse_col::<MessageKind>(row, "kind")?,
        template_id: row.try_get("template_id")?,
        payload: row.try_get("payload")?,
        meta: row.try_get("meta")?,
        scheduled_at: row.try_get("scheduled_at")?,
        attempts: row.try_get("attempts")?,
        max_attempts: row.try_get("max_attempts")?,
        status: parse_col::<OutboxStatus>(row, "status")?,
        last_error: row.try_get("last_error")?,
        created_at: row.try_get("created_at")?,
        locked_until: row.try_get("locked_until")?,
    })
}

pub(crate) fn row_to_message(row: &PgRow) -> Result<Message, StorageError> {
    Ok(Message {
        id: row.try_get("id")?,
        tenant_id: row.try_get("tenant_id")?,
        conversation_id: row.try_get("conversation_id")?,
        channel: parse_col::<ChannelKind>(row, "channel")?,
        direction: parse_col::<MessageDirection>(row, "direction")?,
        kind: parse_col::<MessageKind>(row, "kind")?,
        template_name: row.try_get("template_name")?,
        payload: row.try_get("payload")?,
        status: parse_col::<MessageStatus>(row, "status")?,
        provider: row.try_get("provider")?,
        provider_message_id: row.try_get("provider_message_id")?,
        delivered_at: row.try_get("delivered_at")?,
        opened_at: row.try_get("opened_at")?,
        failed_at: row.try_get("failed_at")?,
        error_code: row.try_get("error_code")?,
        error_reason: row.try_get("error_reason")?,
        created_at: row.try_get("created_at")?,
    })
}

pub(crate) fn row_to_contact(row: &PgRow) -> Result<Contact, StorageError> {
    let tags: serde_json::Value = row.try_get("tags")?;
    Ok(Contact {
        id: row.try_get("id")?,
        tenant_id: row.try_get("tenant_id")?,
        full_name: row.try_get("full_name")?,
        email: row.try_get("email")?,
        phone: row.try_get("phone")?,
        timezone: row.try_get("timezone")?,
        tags: serde_json::from_value(tags).unwrap_or_default(),
        opted_out: row.try_get("opted_out")?,
    })
}

pub(crate) fn row_to_conversation(row: &PgRow) -> Result<Conversation, StorageError> {
    Ok(Conversation {
        id: row.try_get("id")?,
        tenant_id: row.try_get("tenant_id")?,
        contact_id: row.try_get("contact_id")?,
        channel: parse_col::<ChannelKind>(row, "channel")?,
        created_at: row.try_get("created_at")?,
        last_message_at: row.try_get("last_message_at")?,
    })
}

pub(crate) fn row_to_dead_letter(row: &PgRow) -> Result<WebhookDeadLetterItem, StorageError> {
    let headers: serde_json::Value = row.try_get("headers")?;
    let headers: HashMap<String, String> = serde_json::from_value(headers).unwrap_or_default();
    Ok(WebhookDeadLetterItem {
        id: row.try_get("id")?,
        tenant_id: row.try_get("tenant_id")?,
        channel: parse_col::<ChannelKind>(row, "channel")?,
        provider: row.try_get("provider")?,
        kind: parse_col::<DeadLetterKind>(row, "kind")?,
        payload: row.try_get("payload")?,
        headers,
        last_error: row.try_get("last_error")?,
        retry_count: row.try_get("retry_count")?,
        next_attempt_at: row.try_get("next_attempt_at")?,
        status: parse_col::<DeadLetterStatus>(row, "status")?,
        created_at: row.try_get("created_at")?,
    })
}

pub(crate) fn row_to_template(row: &PgRow) -> Result<Template, StorageError> {
    let variables: serde_json::Value = row.try_get("variables")?;
    Ok(Template {
        id: row.try_get("id")?,
        tenant_id: row.try_get("tenant_id")?,
        name: row.try_get("name")?,
        channel: parse_col::<ChannelKind>(row, "channel")?,
        language: row.try_get("language")?,
        body: row.try_get("body")?,
        variables: serde_json::from_value(variables).unwrap_or_default(),
    })
}

pub(crate) fn usize_to_i64(value: usize) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

/// Statuses strictly before `next` in the monotonic lifecycle, as SQL text
/// values. Used in `status = ANY($n)` guards on status transitions.
pub(crate) fn statuses_before(next: MessageStatus) -> Vec<String> {
    [
        MessageStatus::Queued,
        MessageStatus::Sent,
        MessageStatus::Delivered,
        MessageStatus::Opened,
        MessageStatus::Failed,
        MessageStatus::Bounced,
    ]
    .into_iter()
    .filter(|status| status.rank() < next.rank())
    .map(|status| status.as_str().to_owned())
    .collect()
}

//! PostgreSQL schema migrations for outflow storage.

use sqlx::PgPool;

use crate::error::StorageError;

/// Run all PostgreSQL migrations. Statements are idempotent.
pub async fn run_pg_migrations(pool: &PgPool) -> Result<(), StorageError> {
    for statement in MIGRATIONS {
        sqlx::query(statement)
            .execute(pool)
            .await
            .map_err(|e| StorageError::Migration(format!("{e}: {statement}")))?;
    }
    Ok(())
}

const MIGRATIONS: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS outbox_messages (
        id UUID PRIMARY KEY,
        tenant_id UUID NOT NULL,
        contact_id UUID NOT NULL,
        conversation_id UUID,
        channel TEXT NOT NULL,
        kind TEXT NOT NULL,
        template_id UUID,
        payload JSONB NOT NULL DEFAULT '{}',
        meta JSONB,
        scheduled_at TIMESTAMPTZ,
        attempts INTEGER NOT NULL DEFAULT 0,
        max_attempts INTEGER NOT NULL,
        status TEXT NOT NULL DEFAULT 'queued',
        last_error TEXT,
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        locked_until TIMESTAMPTZ
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_outbox_claim
        ON outbox_messages (status, scheduled_at, locked_until)",
    "CREATE INDEX IF NOT EXISTS idx_outbox_tenant ON outbox_messages (tenant_id)",
    r#"
    CREATE TABLE IF NOT EXISTS messages (
        id UUID PRIMARY KEY,
        tenant_id UUID NOT NULL,
        conversation_id UUID NOT NULL,
        channel TEXT NOT NULL,
        direction TEXT NOT NULL,
        kind TEXT NOT NULL,
        template_name TEXT,
        payload JSONB NOT NULL DEFAULT '{}',
        status TEXT NOT NULL DEFAULT 'queued',
        provider TEXT,
        provider_message_id TEXT,
        delivered_at TIMESTAMPTZ,
        opened_at TIMESTAMPTZ,
        failed_at TIMESTAMPTZ,
        error_code TEXT,
        error_reason TEXT,
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    "#,
    "CREATE UNIQUE INDEX IF NOT EXISTS idx_messages_provider_id
        ON messages (tenant_id, provider, provider_message_id)
        WHERE provider_message_id IS NOT NULL",
    "CREATE INDEX IF NOT EXISTS idx_messages_conversation
        ON messages (conversation_id, created_at)",
    "CREATE INDEX IF NOT EXISTS idx_messages_tenant_created
        ON messages (tenant_id, direction, created_at)",
    r#"
    CREATE TABLE IF NOT EXISTS message_events (
        id UUID PRIMARY KEY,
        tenant_id UUID NOT NULL,
        message_id UUID,
        provider TEXT NOT NULL,
        provider_event_id TEXT NOT NULL,
        event_type TEXT NOT NULL,
        payload JSONB NOT NULL DEFAULT '{}',
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    "#,
    "CREATE UNIQUE INDEX IF NOT EXISTS idx_message_events_provider_event
        ON message_events (provider, provider_event_id)",
    r#"
    CREATE TABLE IF NOT EXISTS contacts (
        id UUID PRIMARY KEY,
        tenant_id UUID NOT NULL,
        full_name TEXT,
        email TEXT,
        phone TEXT,
        timezone TEXT,
        tags JSONB NOT NULL DEFAULT '[]',
        opted_out BOOLEAN NOT NULL DEFAULT FALSE
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_contacts_phone ON contacts (tenant_id, phone)",
    "CREATE INDEX IF NOT EXISTS idx_contacts_email ON contacts (tenant_id, email)",
    r#"
    CREATE TABLE IF NOT EXISTS conversations (
        id UUID PRIMARY KEY,
        tenant_id UUID NOT NULL,
        contact_id UUID NOT NULL,
        channel TEXT NOT NULL,
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        last_message_at TIMESTAMPTZ
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_conversations_contact
        ON conversations (tenant_id, contact_id, channel, created_at DESC)",
    r#"
    CREATE TABLE IF NOT EXISTS rate_limit_snapshots (
        target_tenant_id UUID NOT NULL,
        scope TEXT NOT NULL,
        hits JSONB NOT NULL DEFAULT '[]',
        window_started_at TIMESTAMPTZ NOT NULL,
        PRIMARY KEY (target_tenant_id, scope)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS webhook_dead_letters (
        id UUID PRIMARY KEY,
        tenant_id UUID,
        channel TEXT NOT NULL,
        provider TEXT NOT NULL,
        kind TEXT NOT NULL,
        payload TEXT NOT NULL,
        headers JSONB NOT NULL DEFAULT '{}',
        last_error TEXT,
        retry_count INTEGER NOT NULL DEFAULT 0,
        next_attempt_at TIMESTAMPTZ,
        status TEXT NOT NULL DEFAULT 'pending',
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_dead_letters_due
        ON webhook_dead_letters (status, next_attempt_at)",
    r#"
    CREATE TABLE IF NOT EXISTS channel_configs (
        tenant_id UUID NOT NULL,
        channel TEXT NOT NULL,
        settings JSONB NOT NULL DEFAULT '{}',
        updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        PRIMARY KEY (tenant_id, channel)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS templates (
        id UUID PRIMARY KEY,
        tenant_id UUID NOT NULL,
        name TEXT NOT NULL,
        channel TEXT NOT NULL,
        language TEXT,
        body TEXT NOT NULL DEFAULT '',
        variables JSONB NOT NULL DEFAULT '[]'
    )
    "#,
];

//! Public enqueue API used by campaign execution, automations, and AI
//! follow-up.

use std::sync::Arc;

use outflow_core::{Clock, MessageKind, NewOutboxMessage};
use outflow_storage::{EngineStore, QueueDepths};
use uuid::Uuid;

use crate::error::DispatchError;

pub struct OutboxService {
    store: Arc<dyn EngineStore>,
    clock: Arc<dyn Clock>,
}

impl OutboxService {
    #[must_use]
    pub fn new(store: Arc<dyn EngineStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Accept a new send intent into the outbox.
    ///
    /// Template sends are validated up front: the template must exist for
    /// the tenant, match the job's channel, and the supplied variables must
    /// cover its declared placeholders. Text sends are accepted as-is; every
    /// runtime rule (opt-out, quiet hours, caps) is the processor's job.
    ///
    /// # Errors
    /// `TemplateNotFound` / `TemplateRejected` for bad template sends,
    /// `Storage` for persistence failures.
    pub async fn enqueue(&self, new: NewOutboxMessage) -> Result<Uuid, DispatchError> {
        if new.kind == MessageKind::Template {
            let Some(template_id) = new.template_id else {
                return Err(DispatchError::TemplateRejected {
                    name: "<none>".to_owned(),
                    reason: "template send without template id".to_owned(),
                });
            };
            let Some(template) = self.store.get_template(new.tenant_id, template_id).await?
            else {
                return Err(DispatchError::TemplateNotFound {
                    tenant_id: new.tenant_id,
                    template_id,
                });
            };
            if template.channel != new.channel {
                return Err(DispatchError::TemplateRejected {
                    name: template.name,
                    reason: format!(
                        "template is for {}, job is for {}",
                        template.channel, new.channel
                    ),
                });
            }
            if !template.variables_satisfied_by(&new.payload) {
                return Err(DispatchError::TemplateRejected {
                    name: template.name,
                    reason: "missing template variables".to_owned(),
                });
            }
        }

        let job = new.into_message(self.clock.now_utc());
        let id = self.store.enqueue(job).await?;
        tracing::debug!(job_id = %id, "enqueued");
        Ok(id)
    }

    /// Queue depths for dashboards.
    ///
    /// # Errors
    /// Storage failures.
    pub async fn queue_depths(&self) -> Result<QueueDepths, DispatchError> {
        Ok(QueueDepths {
            outbox_queued: self.store.outbox_depth().await?,
            dead_letters_pending: self.store.dead_letter_depth().await?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use outflow_core::{ChannelKind, ManualClock, Template};
    use outflow_storage::MemoryStorage;

    fn service() -> (OutboxService, Arc<dyn EngineStore>) {
        let store: Arc<dyn EngineStore> = Arc::new(MemoryStorage::new());
        let clock = Arc::new(ManualClock::new(Utc::now()));
        (OutboxService::new(Arc::clone(&store), clock), store)
    }

    #[tokio::test]
    async fn test_text_enqueue_lands_in_queue() {
        let (service, store) = service();
        let id = service
            .enqueue(NewOutboxMessage::text(
                Uuid::new_v4(),
                Uuid::new_v4(),
                ChannelKind::Email,
                "hello",
            ))
            .await
            .unwrap();

        assert!(store.get_outbox_message(id).await.unwrap().is_some());
        assert_eq!(service.queue_depths().await.unwrap().outbox_queued, 1);
    }

    #[tokio::test]
    async fn test_template_enqueue_requires_existing_template() {
        let (service, _store) = service();
        let err = service
            .enqueue(NewOutboxMessage::template(
                Uuid::new_v4(),
                Uuid::new_v4(),
                ChannelKind::WhatsApp,
                Uuid::new_v4(),
                serde_json::json!({}),
            ))
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::TemplateNotFound { .. }));
    }

    #[tokio::test]
    async fn test_template_enqueue_checks_variables() {
        let (service, store) = service();
        let tenant_id = Uuid::new_v4();
        let template = Template {
            id: Uuid::new_v4(),
            tenant_id,
            name: "followup_1".to_owned(),
            channel: ChannelKind::WhatsApp,
            language: Some("en".to_owned()),
            body: "Hi {{first_name}}".to_owned(),
            variables: vec!["first_name".to_owned()],
        };
        let template_id = template.id;
        store.upsert_template(template).await.unwrap();

        let err = service
            .enqueue(NewOutboxMessage::template(
                tenant_id,
                Uuid::new_v4(),
                ChannelKind::WhatsApp,
                template_id,
                serde_json::json!({ "wrong": "x" }),
            ))
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::TemplateRejected { .. }));

        let id = service
            .enqueue(NewOutboxMessage::template(
                tenant_id,
                Uuid::new_v4(),
                ChannelKind::WhatsApp,
                template_id,
                serde_json::json!({ "first_name": "Ada" }),
            ))
            .await
            .unwrap();
        assert!(store.get_outbox_message(id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_template_channel_mismatch_rejected() {
        let (service, store) = service();
        let tenant_id = Uuid::new_v4();
        let template = Template {
            id: Uuid::new_v4(),
            tenant_id,
            name: "sms_only".to_owned(),
            channel: ChannelKind::Sms,
            language: None,
            body: "hi".to_owned(),
            variables: Vec::new(),
        };
        let template_id = template.id;
        store.upsert_template(template).await.unwrap();

        let err = service
            .enqueue(NewOutboxMessage::template(
                tenant_id,
                Uuid::new_v4(),
                ChannelKind::Email,
                template_id,
                serde_json::json!({}),
            ))
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::TemplateRejected { .. }));
    }
}

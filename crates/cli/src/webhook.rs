//! Notification delivery over HTTP.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use helpdesk_workflow::{
    FanoutEmitter, LogEmitter, NotificationEmitter, NotificationIntent, NotifyError,
};

use crate::config::NotificationConfig;

/// POSTs each intent as JSON to a fixed URL.
///
/// ureq is blocking, so each delivery runs on the blocking pool.
pub(crate) struct WebhookEmitter {
    url: String,
    agent: ureq::Agent,
}

impl WebhookEmitter {
    pub(crate) fn new(url: impl Into<String>, timeout: Duration) -> Self {
        let config = ureq::Agent::config_builder()
            .timeout_global(Some(timeout))
            .build();
        WebhookEmitter {
            url: url.into(),
            agent: config.into(),
        }
    }
}

#[async_trait]
impl NotificationEmitter for WebhookEmitter {
    async fn emit(&self, intent: &NotificationIntent) -> Result<(), NotifyError> {
        let body = serde_json::to_value(intent)
            .map_err(|e| NotifyError::Delivery(format!("encoding intent: {}", e)))?;
        let agent = self.agent.clone();
        let url = self.url.clone();
        tokio::task::spawn_blocking(move || agent.post(&url).send_json(&body).map(|_| ()))
            .await
            .map_err(|e| NotifyError::Delivery(format!("task join error: {}", e)))?
            .map_err(|e| NotifyError::Delivery(format!("POST {}: {}", self.url, e)))
    }
}

/// Log every intent, and also POST it when a webhook is configured.
pub(crate) fn build_emitter(config: &NotificationConfig) -> Arc<dyn NotificationEmitter> {
    let mut fanout = FanoutEmitter::new(vec![Arc::new(LogEmitter)]);
    if let Some(url) = config.webhook_url.as_deref().filter(|u| !u.is_empty()) {
        fanout.push(Arc::new(WebhookEmitter::new(
            url,
            Duration::from_secs(config.timeout_secs),
        )));
    }
    Arc::new(fanout)
}

#[cfg(test)]
mod tests {
    use super::*;
    use helpdesk_workflow::{NotificationKind, Recipient};

    #[tokio::test]
    async fn unreachable_webhook_reports_delivery_error() {
        // port 9 (discard) on localhost is closed in test environments
        let emitter = WebhookEmitter::new("http://127.0.0.1:9/hook", Duration::from_secs(1));
        let intent = NotificationIntent {
            recipient: Recipient::User("alice".into()),
            kind: NotificationKind::Resolution,
            ticket_id: "t".into(),
            ticket_number: 1,
            actor_id: "tina".into(),
            message: "resolved".into(),
        };
        let err = emitter.emit(&intent).await.unwrap_err();
        assert!(err.to_string().contains("http://127.0.0.1:9/hook"));
    }
}

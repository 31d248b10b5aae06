//! Persisted priority mailbox.
//!
//! Workers never talk to each other directly: a sender writes a [`Message`]
//! to the shared store and the recipient drains its pending messages on its
//! next run. The store is the only shared state, so two coordinators over
//! the same store see the same mailboxes.

use chrono::Utc;
use loopwright_core::{
    CoordinatorConfig, Message, MessageAck, MessageId, MessageStatus, MessageStore, MessageType,
    Priority,
};
use loopwright_observability::RuntimeMetrics;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

pub struct Coordinator {
    store: Arc<dyn MessageStore>,
    config: CoordinatorConfig,
    metrics: Option<Arc<RuntimeMetrics>>,
}

impl std::fmt::Debug for Coordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Coordinator")
            .field("config", &self.config)
            .field("metrics", &self.metrics.is_some())
            .finish()
    }
}

impl Coordinator {
    pub fn new(store: Arc<dyn MessageStore>) -> Self {
        Self::with_config(store, CoordinatorConfig::default())
    }

    pub fn with_config(store: Arc<dyn MessageStore>, config: CoordinatorConfig) -> Self {
        Self {
            store,
            config,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<RuntimeMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    pub fn roster(&self) -> &[String] {
        &self.config.roster
    }

    /// Persist a prepared message.
    ///
    /// Never fails: if the store rejects the write the message comes back
    /// with status `Failed` so the caller can tell it was not delivered.
    pub async fn send(&self, mut message: Message) -> Message {
        match self.store.insert_message(&message).await {
            Ok(()) => {
                debug!(
                    message_id = %message.id,
                    from = %message.from_agent,
                    to = %message.to_agent,
                    message_type = %message.message_type,
                    priority = %message.priority,
                    "Message sent"
                );
                if let Some(metrics) = &self.metrics {
                    metrics.record_message_sent(message.priority.as_str());
                }
            }
            Err(e) => {
                warn!(
                    message_id = %message.id,
                    to = %message.to_agent,
                    error = %e,
                    "Failed to persist message"
                );
                message.status = MessageStatus::Failed;
            }
        }
        message
    }

    pub async fn send_message(
        &self,
        from: &str,
        to: &str,
        message_type: MessageType,
        payload: Value,
        priority: Priority,
        correlation_id: Option<MessageId>,
    ) -> Message {
        let mut message = Message::new(from, to, message_type, payload).with_priority(priority);
        if let Some(id) = correlation_id {
            message = message.with_correlation(id);
        }
        self.send(message).await
    }

    /// Pending messages addressed to `agent`, highest priority first and in
    /// send order within a priority. Empty when the store is unreachable.
    pub async fn get_pending_messages(&self, agent: &str, limit: usize) -> Vec<Message> {
        match self.store.pending_messages(agent, limit).await {
            Ok(messages) => messages,
            Err(e) => {
                warn!(agent, error = %e, "Failed to read mailbox");
                Vec::new()
            }
        }
    }

    /// Mark a message processed. Status defaults to `Completed`.
    ///
    /// Concurrent acknowledgers are not arbitrated; the last write wins.
    /// Returns whether the update reached the store.
    pub async fn acknowledge_message(
        &self,
        id: &MessageId,
        response: Option<Value>,
        status: Option<MessageStatus>,
    ) -> bool {
        let ack = MessageAck {
            status: status.unwrap_or(MessageStatus::Completed),
            processed_at: Utc::now(),
            response,
        };
        match self.store.acknowledge(id, ack).await {
            Ok(true) => true,
            Ok(false) => {
                warn!(message_id = %id, "Acknowledged unknown message");
                false
            }
            Err(e) => {
                warn!(message_id = %id, error = %e, "Failed to acknowledge message");
                false
            }
        }
    }

    /// Wait for the recipient to resolve message `id`.
    ///
    /// Polls every `poll_interval`. Returns the attached response (JSON
    /// `null` when the recipient attached none) once the message is
    /// completed or failed, `None` once `timeout` has elapsed.
    pub async fn get_response(&self, id: &MessageId, timeout: Duration) -> Option<Value> {
        let deadline = Instant::now() + timeout;
        loop {
            match self.store.get_message(id).await {
                Ok(Some(message)) if message.status.is_resolved() => {
                    return Some(message.response.unwrap_or(Value::Null));
                }
                Ok(_) => {}
                Err(e) => warn!(message_id = %id, error = %e, "Failed to poll message"),
            }

            let now = Instant::now();
            if now >= deadline {
                debug!(message_id = %id, ?timeout, "No response before timeout");
                return None;
            }
            tokio::time::sleep(self.config.poll_interval.min(deadline - now)).await;
        }
    }

    /// Low-priority notification to every roster member except the sender
    /// and `exclude`. Returns the messages as sent.
    pub async fn broadcast(&self, from: &str, payload: Value, exclude: &[&str]) -> Vec<Message> {
        let recipients: Vec<&String> = self
            .config
            .roster
            .iter()
            .filter(|name| name.as_str() != from && !exclude.contains(&name.as_str()))
            .collect();

        let mut sent = Vec::with_capacity(recipients.len());
        for recipient in recipients {
            sent.push(
                self.send_message(
                    from,
                    recipient,
                    MessageType::Notification,
                    payload.clone(),
                    Priority::Low,
                    None,
                )
                .await,
            );
        }
        debug!(from, recipients = sent.len(), "Broadcast sent");
        sent
    }

    /// Reply to `request`, linking the answer through its correlation id
    pub async fn reply(&self, request: &Message, payload: Value) -> Message {
        self.send_message(
            &request.to_agent,
            &request.from_agent,
            MessageType::Response,
            payload,
            request.priority,
            Some(request.id.clone()),
        )
        .await
    }
}

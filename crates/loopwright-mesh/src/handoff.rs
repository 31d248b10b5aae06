//! Fixed-shape messages between the standard workers.

use loopwright_core::{Message, MessageType, Priority};
use serde_json::{Value, json};

use crate::Coordinator;

pub const RESEARCH: &str = "research";
pub const CONTENT: &str = "content";
pub const QUALITY: &str = "quality";

impl Coordinator {
    /// Ask the research worker to investigate `topic`.
    pub async fn request_research(
        &self,
        from: &str,
        topic: &str,
        context: Value,
        priority: Priority,
    ) -> Message {
        let payload = json!({
            "action": "research",
            "topic": topic,
            "context": context,
        });
        self.send_message(from, RESEARCH, MessageType::Request, payload, priority, None)
            .await
    }

    /// Hand finished research to the content worker. Always high priority so
    /// it is picked up ahead of routine requests.
    pub async fn handoff_to_content(
        &self,
        from: &str,
        research: Value,
        content_type: &str,
    ) -> Message {
        let payload = json!({
            "action": "create_content",
            "content_type": content_type,
            "research": research,
        });
        self.send_message(from, CONTENT, MessageType::Handoff, payload, Priority::High, None)
            .await
    }

    pub async fn report_quality_issue(
        &self,
        to: &str,
        content_id: &str,
        issues: &[String],
        priority: Priority,
    ) -> Message {
        let payload = json!({
            "action": "fix_quality_issue",
            "content_id": content_id,
            "issues": issues,
        });
        self.send_message(QUALITY, to, MessageType::Request, payload, priority, None)
            .await
    }

    pub async fn suggest_new_content(&self, from: &str, suggestion: Value) -> Message {
        let payload = json!({
            "action": "suggested_content",
            "suggestion": suggestion,
        });
        self.send_message(from, CONTENT, MessageType::Notification, payload, Priority::Normal, None)
            .await
    }
}

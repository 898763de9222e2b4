//! User-visible transcript surface.
//!
//! The core never renders anything; it reports system messages and breadcrumbs
//! to a [`TranscriptSink`] and lets the host decide how to show them.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;

/// A short marker in the transcript, e.g. a handoff or a guardrail trip.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Breadcrumb {
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl Breadcrumb {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            data: None,
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }
}

pub trait TranscriptSink: Send + Sync {
    /// A system-role line. `is_final` is false for progress notes like "Connecting...".
    fn add_system_message(&self, text: &str, is_final: bool);
    fn add_breadcrumb(&self, breadcrumb: Breadcrumb);
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TranscriptEntry {
    SystemMessage { text: String, is_final: bool },
    Breadcrumb(Breadcrumb),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TranscriptItem {
    pub id: String,
    pub created_at: DateTime<Utc>,
    #[serde(flatten)]
    pub entry: TranscriptEntry,
}

/// In-memory transcript kept for the process lifetime.
#[derive(Debug, Default)]
pub struct Transcript {
    items: Mutex<Vec<TranscriptItem>>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn items(&self) -> Vec<TranscriptItem> {
        self.items.lock().clone()
    }

    pub fn system_messages(&self) -> Vec<String> {
        self.items
            .lock()
            .iter()
            .filter_map(|item| match &item.entry {
                TranscriptEntry::SystemMessage { text, .. } => Some(text.clone()),
                TranscriptEntry::Breadcrumb(_) => None,
            })
            .collect()
    }

    pub fn breadcrumbs(&self) -> Vec<Breadcrumb> {
        self.items
            .lock()
            .iter()
            .filter_map(|item| match &item.entry {
                TranscriptEntry::Breadcrumb(b) => Some(b.clone()),
                TranscriptEntry::SystemMessage { .. } => None,
            })
            .collect()
    }

    fn push(&self, entry: TranscriptEntry) {
        let id = uuid::Uuid::new_v4().simple().to_string();
        self.items.lock().push(TranscriptItem {
            id,
            created_at: Utc::now(),
            entry,
        });
    }
}

impl TranscriptSink for Transcript {
    fn add_system_message(&self, text: &str, is_final: bool) {
        self.push(TranscriptEntry::SystemMessage {
            text: text.to_string(),
            is_final,
        });
    }

    fn add_breadcrumb(&self, breadcrumb: Breadcrumb) {
        self.push(TranscriptEntry::Breadcrumb(breadcrumb));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_transcript_keeps_order_and_kinds() {
        let transcript = Transcript::new();
        transcript.add_system_message("Connecting...", false);
        transcript.add_breadcrumb(Breadcrumb::new("Agent: greeter").with_data(json!({"name": "greeter"})));
        transcript.add_system_message("Disconnected from session.", true);

        assert_eq!(
            transcript.system_messages(),
            vec!["Connecting...", "Disconnected from session."]
        );
        assert_eq!(transcript.breadcrumbs()[0].title, "Agent: greeter");

        let value = serde_json::to_value(&transcript.items()[1]).unwrap();
        assert_eq!(value["kind"], "breadcrumb");
        assert_eq!(value["title"], "Agent: greeter");
    }
}

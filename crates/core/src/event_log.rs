//! Event correlation log.
//!
//! A process-wide, append-only record of every protocol event that crosses the
//! session boundary. Each record is stamped with the conversation id active
//! when it was logged so the inspection surface can isolate one session span.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Client,
    Server,
    System,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoggedEvent {
    pub id: u64,
    pub direction: Direction,
    pub timestamp: DateTime<Utc>,
    /// `None` only for events logged before any session existed.
    pub conversation_id: Option<String>,
    pub event_name: String,
    pub payload: Value,
    /// Display toggle; never consulted by filtering.
    pub expanded: bool,
}

impl LoggedEvent {
    pub fn is_error(&self) -> bool {
        self.event_name.to_lowercase().contains("error")
    }
}

#[derive(Debug, Default)]
struct LogInner {
    next_id: u64,
    events: Vec<LoggedEvent>,
}

#[derive(Debug, Default)]
pub struct EventCorrelationLog {
    inner: Mutex<LogInner>,
}

impl EventCorrelationLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a record and returns its id. Ids strictly increase.
    pub fn record(
        &self,
        direction: Direction,
        event_name: impl Into<String>,
        payload: Value,
        conversation_id: Option<&str>,
    ) -> u64 {
        let event_name = event_name.into();
        let mut inner = self.inner.lock();
        inner.next_id += 1;
        let id = inner.next_id;
        debug!(id, ?direction, event = %event_name, conversation_id, "event recorded");
        inner.events.push(LoggedEvent {
            id,
            direction,
            timestamp: Utc::now(),
            conversation_id: conversation_id.map(str::to_string),
            event_name,
            payload,
            expanded: false,
        });
        id
    }

    /// Records for one conversation in append order, or everything for `None`.
    pub fn filter(&self, conversation_id: Option<&str>) -> Vec<LoggedEvent> {
        let inner = self.inner.lock();
        match conversation_id {
            None => inner.events.clone(),
            Some(id) => inner
                .events
                .iter()
                .filter(|e| e.conversation_id.as_deref() == Some(id))
                .cloned()
                .collect(),
        }
    }

    /// Flips `expanded` on the record with `id`. Returns the new value, or
    /// `None` if no such record exists.
    pub fn toggle_expand(&self, id: u64) -> Option<bool> {
        let mut inner = self.inner.lock();
        let event = inner.events.iter_mut().find(|e| e.id == id)?;
        event.expanded = !event.expanded;
        Some(event.expanded)
    }

    /// Distinct conversation ids in first-seen order.
    pub fn conversation_ids(&self) -> Vec<String> {
        let inner = self.inner.lock();
        let mut ids: Vec<String> = Vec::new();
        for id in inner.events.iter().filter_map(|e| e.conversation_id.as_ref()) {
            if !ids.contains(id) {
                ids.push(id.clone());
            }
        }
        ids
    }

    pub fn len(&self) -> usize {
        self.inner.lock().events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

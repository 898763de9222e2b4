//! API Models
//!
//! Request and response bodies of the control and inspection API, with
//! `utoipa` schemas for the OpenAPI document. Core types are mapped into these
//! shapes at the edge so the core crate stays free of HTTP concerns.

use chrono::{DateTime, Utc};
use handoff_core::event_log::{Direction, LoggedEvent};
use handoff_core::lifecycle::{ConnectOutcome, SessionSnapshot};
use handoff_core::persona::AgentRoster;
use handoff_core::scenario::ScenarioDefinition;
use handoff_core::transcript::{TranscriptEntry, TranscriptItem};
use handoff_core::transport::ConnectionStatus;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::{IntoParams, ToSchema};

#[derive(Serialize, Deserialize, ToSchema, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionStatus {
    Disconnected,
    Connecting,
    Connected,
}

impl From<ConnectionStatus> for SessionStatus {
    fn from(status: ConnectionStatus) -> Self {
        match status {
            ConnectionStatus::Disconnected => SessionStatus::Disconnected,
            ConnectionStatus::Connecting => SessionStatus::Connecting,
            ConnectionStatus::Connected => SessionStatus::Connected,
        }
    }
}

#[derive(Serialize, ToSchema, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SessionStatusResponse {
    pub status: SessionStatus,
    pub conversation_id: Option<String>,
    pub scenario_key: Option<String>,
    pub active_persona: Option<String>,
    pub selected_scenario: Option<String>,
    pub selected_persona: Option<String>,
    pub push_to_talk: bool,
    pub audio_playback: bool,
    pub user_speaking: bool,
}

impl From<SessionSnapshot> for SessionStatusResponse {
    fn from(snapshot: SessionSnapshot) -> Self {
        let session = snapshot.session;
        Self {
            status: snapshot.status.into(),
            conversation_id: session.as_ref().map(|s| s.conversation_id.clone()),
            scenario_key: session.as_ref().map(|s| s.scenario_key.clone()),
            active_persona: session.map(|s| s.active_persona_name),
            selected_scenario: snapshot.selection.scenario_key,
            selected_persona: snapshot.selection.persona_name,
            push_to_talk: snapshot.preferences.push_to_talk,
            audio_playback: snapshot.preferences.audio_playback,
            user_speaking: snapshot.user_speaking,
        }
    }
}

/// Omit `scenario` to connect with the stored selection.
#[derive(Deserialize, ToSchema, Debug, Default)]
pub struct ConnectPayload {
    #[schema(example = "customerServiceRetail")]
    pub scenario: Option<String>,
    #[schema(example = "sales")]
    pub persona: Option<String>,
}

#[derive(Serialize, ToSchema, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ConnectResult {
    Started,
    Ignored,
    Discarded,
}

#[derive(Serialize, ToSchema, Debug, PartialEq)]
pub struct ConnectResponse {
    pub result: ConnectResult,
    pub status: SessionStatus,
}

impl ConnectResponse {
    pub fn new(outcome: ConnectOutcome, status: ConnectionStatus) -> Self {
        let result = match outcome {
            ConnectOutcome::Started => ConnectResult::Started,
            ConnectOutcome::Ignored(_) => ConnectResult::Ignored,
            ConnectOutcome::Discarded => ConnectResult::Discarded,
        };
        Self {
            result,
            status: status.into(),
        }
    }
}

#[derive(Deserialize, ToSchema, Debug, Default)]
pub struct SelectPayload {
    #[schema(example = "simpleHandoff")]
    pub scenario: Option<String>,
    #[schema(example = "greeter")]
    pub persona: Option<String>,
}

#[derive(Deserialize, ToSchema, Debug)]
pub struct TogglePayload {
    pub enabled: bool,
}

#[derive(Deserialize, ToSchema, Debug)]
pub struct TextPayload {
    #[schema(example = "Where is my order?")]
    pub text: String,
}

/// Whether the input action was forwarded to the live session.
#[derive(Serialize, ToSchema, Debug, PartialEq)]
pub struct InputResponse {
    pub sent: bool,
}

#[derive(Deserialize, IntoParams, Debug, Default)]
#[into_params(parameter_in = Query)]
pub struct EventsQuery {
    /// Only events stamped with this conversation id.
    pub conversation_id: Option<String>,
}

#[derive(Serialize, ToSchema, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EventResponse {
    pub id: u64,
    #[schema(example = "client")]
    pub direction: String,
    pub timestamp: DateTime<Utc>,
    pub conversation_id: Option<String>,
    pub event_name: String,
    #[schema(value_type = Object)]
    pub payload: Value,
    pub expanded: bool,
    pub is_error: bool,
}

impl From<LoggedEvent> for EventResponse {
    fn from(event: LoggedEvent) -> Self {
        let direction = match event.direction {
            Direction::Client => "client",
            Direction::Server => "server",
            Direction::System => "system",
        };
        Self {
            is_error: event.is_error(),
            id: event.id,
            direction: direction.to_string(),
            timestamp: event.timestamp,
            conversation_id: event.conversation_id,
            event_name: event.event_name,
            payload: event.payload,
            expanded: event.expanded,
        }
    }
}

#[derive(Serialize, ToSchema, Debug, PartialEq)]
pub struct ExpandResponse {
    pub id: u64,
    pub expanded: bool,
}

#[derive(Serialize, ToSchema, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TranscriptItemResponse {
    pub id: String,
    pub created_at: DateTime<Utc>,
    #[schema(example = "system_message")]
    pub kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_final: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<Object>)]
    pub data: Option<Value>,
}

impl From<TranscriptItem> for TranscriptItemResponse {
    fn from(item: TranscriptItem) -> Self {
        let mut response = Self {
            id: item.id,
            created_at: item.created_at,
            kind: String::new(),
            text: None,
            is_final: None,
            title: None,
            data: None,
        };
        match item.entry {
            TranscriptEntry::SystemMessage { text, is_final } => {
                response.kind = "system_message".to_string();
                response.text = Some(text);
                response.is_final = Some(is_final);
            }
            TranscriptEntry::Breadcrumb(crumb) => {
                response.kind = "breadcrumb".to_string();
                response.title = Some(crumb.title);
                response.data = crumb.data;
            }
        }
        response
    }
}

/// A scenario as submitted and returned by the catalogue endpoints.
#[derive(Serialize, Deserialize, ToSchema, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ScenarioPayload {
    #[schema(example = "simpleHandoff")]
    pub key: String,
    #[schema(example = "Simple Handoff (Haiku)")]
    pub display_name: String,
    #[schema(example = "GenericHandoffInc")]
    pub company_name: String,
    /// Ordered personas; the first is the default entry point.
    #[schema(value_type = Vec<Object>)]
    pub roster: AgentRoster,
}

impl From<ScenarioDefinition> for ScenarioPayload {
    fn from(definition: ScenarioDefinition) -> Self {
        Self {
            key: definition.key,
            display_name: definition.display_name,
            company_name: definition.company_name,
            roster: definition.roster,
        }
    }
}

impl From<ScenarioPayload> for ScenarioDefinition {
    fn from(payload: ScenarioPayload) -> Self {
        Self {
            key: payload.key,
            roster: payload.roster,
            company_name: payload.company_name,
            display_name: payload.display_name,
        }
    }
}

#[derive(Serialize, Deserialize, ToSchema, Debug, Clone, PartialEq)]
pub struct CredentialValue {
    pub value: String,
}

/// Body of `GET /api/session`.
#[derive(Serialize, Deserialize, ToSchema, Debug, Clone, PartialEq)]
pub struct SessionTokenResponse {
    pub credential: CredentialValue,
}

#[derive(Serialize, ToSchema, Debug)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

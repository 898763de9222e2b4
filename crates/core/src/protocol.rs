//! Client-to-server realtime protocol events.

use crate::persona::ToolDescriptor;
use serde::{Serialize, Serializer};
use serde_json::Value;

/// Server-side voice activity detection parameters.
#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TurnDetection {
    ServerVad {
        threshold: f64,
        prefix_padding_ms: u32,
        silence_duration_ms: u32,
        create_response: bool,
    },
}

/// Partial session configuration carried by `session.update`.
///
/// `None` fields are left untouched by the server. `turn_detection` is doubly
/// optional: `Some(None)` serializes as `null` and disables turn detection.
#[derive(Serialize, Debug, Clone, Default, PartialEq)]
pub struct SessionConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub voice: Option<String>,
    #[serde(
        skip_serializing_if = "Option::is_none",
        serialize_with = "serialize_tools"
    )]
    pub tools: Option<Vec<ToolDescriptor>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub turn_detection: Option<Option<TurnDetection>>,
}

fn serialize_tools<S: Serializer>(
    tools: &Option<Vec<ToolDescriptor>>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    let wire: Option<Vec<Value>> = tools
        .as_ref()
        .map(|tools| tools.iter().map(ToolDescriptor::to_realtime_tool).collect());
    wire.serialize(serializer)
}

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ItemRole {
    User,
    Assistant,
    System,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    InputText { text: String },
}

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ConversationItem {
    Message {
        #[serde(skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        role: ItemRole,
        content: Vec<ContentPart>,
    },
    FunctionCallOutput {
        call_id: String,
        output: String,
    },
}

impl ConversationItem {
    pub fn user_text(id: Option<String>, text: impl Into<String>) -> Self {
        ConversationItem::Message {
            id,
            role: ItemRole::User,
            content: vec![ContentPart::InputText { text: text.into() }],
        }
    }
}

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(tag = "type")]
pub enum ClientEvent {
    #[serde(rename = "session.update")]
    SessionUpdate { session: SessionConfig },
    #[serde(rename = "conversation.item.create")]
    ConversationItemCreate { item: ConversationItem },
    #[serde(rename = "response.create")]
    ResponseCreate,
    #[serde(rename = "response.cancel")]
    ResponseCancel,
    #[serde(rename = "input_audio_buffer.clear")]
    InputAudioBufferClear,
    #[serde(rename = "input_audio_buffer.commit")]
    InputAudioBufferCommit,
}

impl ClientEvent {
    /// Wire `type` of the event.
    pub fn name(&self) -> &'static str {
        match self {
            ClientEvent::SessionUpdate { .. } => "session.update",
            ClientEvent::ConversationItemCreate { .. } => "conversation.item.create",
            ClientEvent::ResponseCreate => "response.create",
            ClientEvent::ResponseCancel => "response.cancel",
            ClientEvent::InputAudioBufferClear => "input_audio_buffer.clear",
            ClientEvent::InputAudioBufferCommit => "input_audio_buffer.commit",
        }
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or_default()
    }

    /// Turn detection carried by a `session.update`, if it sets one.
    pub fn turn_detection(&self) -> Option<&Option<TurnDetection>> {
        match self {
            ClientEvent::SessionUpdate { session } => session.turn_detection.as_ref(),
            _ => None,
        }
    }
}

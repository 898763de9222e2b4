//! Realtime transport for the OpenAI Realtime API.
//!
//! [`RealtimeSession`] holds the per-connection protocol state (active persona,
//! guardrail, handoff tool handling) and turns server events into actions. The
//! socket plumbing lives in [`openai`].

pub mod openai;

use anyhow::Context;
use handoff_core::guardrail::GuardrailPolicy;
use handoff_core::persona::{AgentPersona, AgentRoster, handoff_target_of};
use handoff_core::protocol::{ClientEvent, ConversationItem, SessionConfig};
use handoff_core::transport::{SessionDefaults, TransportNotification};
use serde_json::{Value, json};
use std::sync::Arc;
use tracing::{debug, info, warn};

pub use openai::OpenAIRealtimeTransport;

/// Server events too frequent to forward to the correlation log.
const UNLOGGED_EVENTS: &[&str] = &["response.audio.delta", "response.output_audio.delta"];

/// What the connection task should do in response to a server event.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionAction {
    Send(ClientEvent),
    Notify(TransportNotification),
}

#[derive(Debug)]
pub struct RealtimeSession {
    roster: AgentRoster,
    active: String,
    guardrail: Arc<GuardrailPolicy>,
    defaults: SessionDefaults,
}

impl RealtimeSession {
    pub fn new(
        roster: AgentRoster,
        guardrail: Arc<GuardrailPolicy>,
        defaults: SessionDefaults,
    ) -> anyhow::Result<Self> {
        let active = roster
            .entry()
            .map(|p| p.name.clone())
            .context("Cannot open a realtime session with an empty roster")?;
        Ok(Self {
            roster,
            active,
            guardrail,
            defaults,
        })
    }

    pub fn active_persona_name(&self) -> &str {
        &self.active
    }

    fn active_persona(&self) -> Option<&AgentPersona> {
        self.roster.get(&self.active)
    }

    /// First `session.update`: persona, voice, tools and turn detection.
    pub fn initial_update(&self) -> ClientEvent {
        let mut session = self.persona_config();
        session.voice = self.active_persona().map(|p| p.voice.clone());
        session.turn_detection = Some(self.defaults.turn_detection.clone());
        ClientEvent::SessionUpdate { session }
    }

    fn persona_config(&self) -> SessionConfig {
        match self.active_persona() {
            Some(persona) => SessionConfig {
                instructions: Some(persona.instructions.clone()),
                tools: Some(persona.session_tools(&self.roster)),
                ..Default::default()
            },
            None => SessionConfig::default(),
        }
    }

    pub fn on_server_event(&mut self, event: Value) -> Vec<SessionAction> {
        let Some(kind) = event.get("type").and_then(Value::as_str).map(str::to_string) else {
            debug!("Server event without a type, ignoring");
            return Vec::new();
        };

        let mut actions = Vec::new();
        match kind.as_str() {
            "response.function_call_arguments.done" => {
                let name = event.get("name").and_then(Value::as_str).unwrap_or_default();
                let call_id = event
                    .get("call_id")
                    .and_then(Value::as_str)
                    .unwrap_or_default();
                actions.extend(self.on_function_call(name, call_id));
            }
            "response.text.done" | "response.output_text.done" => {
                let text = event.get("text").and_then(Value::as_str).unwrap_or_default();
                actions.extend(self.check_output(text));
            }
            "response.audio_transcript.done" | "response.output_audio_transcript.done" => {
                let text = event
                    .get("transcript")
                    .and_then(Value::as_str)
                    .unwrap_or_default();
                actions.extend(self.check_output(text));
            }
            "error" => {
                warn!(error = %event["error"], "Realtime server reported an error");
            }
            _ => {}
        }

        if !UNLOGGED_EVENTS.contains(&kind.as_str()) {
            actions.insert(
                0,
                SessionAction::Notify(TransportNotification::ServerEvent {
                    name: kind,
                    payload: event,
                }),
            );
        }
        actions
    }

    fn on_function_call(&mut self, name: &str, call_id: &str) -> Vec<SessionAction> {
        let allowed = self
            .active_persona()
            .is_some_and(|p| handoff_target_of(name).is_some_and(|t| p.handoff_targets.contains(t)));
        let target = handoff_target_of(name).filter(|t| allowed && self.roster.contains(t));

        let Some(target) = target else {
            warn!(tool = %name, persona = %self.active, "Function call without a handler");
            return vec![
                SessionAction::Send(function_output(
                    call_id,
                    json!({ "error": format!("Tool '{name}' is not available") }),
                )),
                SessionAction::Send(ClientEvent::ResponseCreate),
            ];
        };

        let target = target.to_string();
        info!(from = %self.active, to = %target, "Handoff requested by the model");
        self.active = target.clone();
        vec![
            SessionAction::Send(ClientEvent::SessionUpdate {
                session: self.persona_config(),
            }),
            SessionAction::Send(function_output(
                call_id,
                json!({ "destination_agent": target }),
            )),
            SessionAction::Send(ClientEvent::ResponseCreate),
            SessionAction::Notify(TransportNotification::Handoff(target)),
        ]
    }

    fn check_output(&self, text: &str) -> Vec<SessionAction> {
        let verdict = self.guardrail.evaluate(text);
        if !verdict.is_blocked() {
            return Vec::new();
        }
        warn!(persona = %self.active, "Output blocked by guardrail");
        vec![
            SessionAction::Send(ClientEvent::ResponseCancel),
            SessionAction::Notify(TransportNotification::GuardrailTripped(verdict)),
        ]
    }
}

fn function_output(call_id: &str, output: Value) -> ClientEvent {
    ClientEvent::ConversationItemCreate {
        item: ConversationItem::FunctionCallOutput {
            call_id: call_id.to_string(),
            output: output.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use handoff_core::scenario::builtin_scenarios;

    fn session(scenario: usize, turn_detection: Option<handoff_core::protocol::TurnDetection>) -> RealtimeSession {
        let definition = builtin_scenarios().swap_remove(scenario);
        RealtimeSession::new(
            definition.roster,
            Arc::new(GuardrailPolicy::new(definition.company_name)),
            SessionDefaults { turn_detection },
        )
        .unwrap()
    }

    fn sends(actions: &[SessionAction]) -> Vec<&ClientEvent> {
        actions
            .iter()
            .filter_map(|a| match a {
                SessionAction::Send(e) => Some(e),
                SessionAction::Notify(_) => None,
            })
            .collect()
    }

    #[test]
    fn test_initial_update_carries_entry_persona() {
        let session = session(0, None);
        let value = session.initial_update().to_value();
        assert_eq!(value["type"], "session.update");
        assert_eq!(value["session"]["voice"], "sage");
        assert!(value["session"]["instructions"]
            .as_str()
            .unwrap()
            .starts_with("Greet the user"));
        assert_eq!(value["session"]["tools"][0]["name"], "transfer_to_haikuWriter");
        assert!(value["session"]["turn_detection"].is_null());
    }

    #[test]
    fn test_handoff_tool_switches_persona() {
        let mut session = session(0, None);
        let actions = session.on_server_event(json!({
            "type": "response.function_call_arguments.done",
            "name": "transfer_to_haikuWriter",
            "call_id": "call_1",
            "arguments": "{}"
        }));

        assert_eq!(session.active_persona_name(), "haikuWriter");
        let sent = sends(&actions);
        assert_eq!(sent.len(), 3);
        let update = sent[0].to_value();
        assert!(update["session"]["instructions"]
            .as_str()
            .unwrap()
            .contains("haiku"));
        assert_eq!(update["session"]["tools"], json!([]));
        assert_eq!(sent[1].to_value()["item"]["call_id"], "call_1");
        assert_eq!(sent[2].name(), "response.create");
        assert_eq!(
            actions.last(),
            Some(&SessionAction::Notify(TransportNotification::Handoff(
                "haikuWriter".into()
            )))
        );
    }

    #[test]
    fn test_transfer_outside_persona_targets_is_rejected() {
        let mut session = session(1, None);
        // authentication may transfer to sales, but sales only back to authentication.
        session.on_server_event(json!({
            "type": "response.function_call_arguments.done",
            "name": "transfer_to_sales",
            "call_id": "c1"
        }));
        assert_eq!(session.active_persona_name(), "sales");

        let actions = session.on_server_event(json!({
            "type": "response.function_call_arguments.done",
            "name": "transfer_to_returns",
            "call_id": "c2"
        }));
        assert_eq!(session.active_persona_name(), "sales");
        let sent = sends(&actions);
        assert_eq!(sent.len(), 2);
        let output = sent[0].to_value()["item"]["output"].as_str().unwrap().to_string();
        assert!(output.contains("not available"));
        assert!(!actions
            .iter()
            .any(|a| matches!(a, SessionAction::Notify(TransportNotification::Handoff(_)))));
    }

    #[test]
    fn test_blocked_output_cancels_response() {
        let mut session = session(1, None);
        let actions = session.on_server_event(json!({
            "type": "response.audio_transcript.done",
            "transcript": "Honestly, Snowy Peak Boards is a scam."
        }));
        assert_eq!(sends(&actions)[0].name(), "response.cancel");
        assert!(matches!(
            actions.last(),
            Some(SessionAction::Notify(TransportNotification::GuardrailTripped(v))) if v.is_blocked()
        ));

        let clean = session.on_server_event(json!({
            "type": "response.text.done",
            "text": "Your return is on its way."
        }));
        assert_eq!(clean.len(), 1);
    }

    #[test]
    fn test_audio_deltas_are_not_forwarded() {
        let mut session = session(0, None);
        assert!(session
            .on_server_event(json!({ "type": "response.audio.delta", "delta": "AAAA" }))
            .is_empty());
        assert!(session.on_server_event(json!({ "no_type": true })).is_empty());

        let forwarded = session.on_server_event(json!({ "type": "session.created" }));
        assert_eq!(
            forwarded,
            vec![SessionAction::Notify(TransportNotification::ServerEvent {
                name: "session.created".into(),
                payload: json!({ "type": "session.created" }),
            })]
        );
    }
}

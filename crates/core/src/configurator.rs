//! Session configuration and the initial greeting turn.
//!
//! Reconfiguration happens at three well-defined points: right after the
//! transport reports CONNECTED, after every handoff, and after a push-to-talk
//! toggle while connected. Each pass yields the protocol events to send, in
//! order; the configuration update always comes before any greeting.

use crate::handoff::HandoffCoordinator;
use crate::protocol::{ClientEvent, ConversationItem, SessionConfig, TurnDetection};

/// User turn synthesized on a fresh connect so the entry persona speaks first.
pub const GREETING_TEXT: &str = "hola";

pub const VAD_THRESHOLD: f64 = 0.9;
pub const VAD_PREFIX_PADDING_MS: u32 = 300;
pub const VAD_SILENCE_DURATION_MS: u32 = 500;

/// A protocol event together with the label it is logged under.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundEvent {
    pub event: ClientEvent,
    pub label: Option<&'static str>,
}

impl OutboundEvent {
    pub fn new(event: ClientEvent) -> Self {
        Self { event, label: None }
    }

    pub fn labeled(event: ClientEvent, label: &'static str) -> Self {
        Self {
            event,
            label: Some(label),
        }
    }

    /// Name used in the correlation log, e.g. `response.create trigger_initial_response`.
    pub fn log_name(&self) -> String {
        match self.label {
            Some(label) => format!("{} {}", self.event.name(), label),
            None => self.event.name().to_string(),
        }
    }
}

/// Why a reconfiguration pass runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconfigureTrigger {
    /// The active persona changed: first activation after connect or a handoff.
    PersonaActivated,
    /// A preference such as push-to-talk changed while connected.
    PreferenceChanged,
}

#[derive(Debug, Default)]
pub struct SessionConfigurator {
    greeted: bool,
}

impl SessionConfigurator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forget the greeting state; called at the start of every connect.
    pub fn reset(&mut self) {
        self.greeted = false;
    }

    pub fn has_greeted(&self) -> bool {
        self.greeted
    }

    pub fn turn_detection(push_to_talk_active: bool) -> Option<TurnDetection> {
        if push_to_talk_active {
            None
        } else {
            Some(TurnDetection::ServerVad {
                threshold: VAD_THRESHOLD,
                prefix_padding_ms: VAD_PREFIX_PADDING_MS,
                silence_duration_ms: VAD_SILENCE_DURATION_MS,
                create_response: true,
            })
        }
    }

    /// The `session.update` carrying turn-detection for the current preference.
    pub fn apply_configuration(&self, push_to_talk_active: bool) -> OutboundEvent {
        OutboundEvent::new(ClientEvent::SessionUpdate {
            session: SessionConfig {
                turn_detection: Some(Self::turn_detection(push_to_talk_active)),
                ..Default::default()
            },
        })
    }

    /// Greeting message followed by the response trigger, at most once per connect.
    ///
    /// `greeting` overrides [`GREETING_TEXT`] when the entry persona defines one.
    pub fn maybe_greet(&mut self, greeting: Option<&str>) -> Vec<OutboundEvent> {
        if self.greeted {
            return Vec::new();
        }
        self.greeted = true;
        let item_id = uuid::Uuid::new_v4().simple().to_string();
        vec![
            OutboundEvent::labeled(
                ClientEvent::ConversationItemCreate {
                    item: ConversationItem::user_text(Some(item_id), greeting.unwrap_or(GREETING_TEXT)),
                },
                "internal_greeting",
            ),
            OutboundEvent::labeled(ClientEvent::ResponseCreate, "trigger_initial_response"),
        ]
    }

    /// Runs one reconfiguration pass.
    ///
    /// On a persona activation the coordinator's handoff flag is consumed; the
    /// greeting only follows when the activation was not a handoff.
    pub fn reconfigure(
        &mut self,
        push_to_talk_active: bool,
        trigger: ReconfigureTrigger,
        coordinator: &mut HandoffCoordinator,
    ) -> Vec<OutboundEvent> {
        let mut events = vec![self.apply_configuration(push_to_talk_active)];
        if trigger == ReconfigureTrigger::PersonaActivated && !coordinator.take_handoff_in_progress()
        {
            let greeting = coordinator
                .active_persona()
                .and_then(|persona| persona.greeting.as_deref());
            events.extend(self.maybe_greet(greeting));
        }
        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persona::{AgentPersona, AgentRoster};
    use serde_json::json;

    fn coordinator() -> HandoffCoordinator {
        let mut coordinator = HandoffCoordinator::new();
        coordinator.activate(
            AgentRoster::new(vec![
                AgentPersona::new("greeter", "").with_handoff("haikuWriter"),
                AgentPersona::new("haikuWriter", ""),
            ]),
            "greeter",
        );
        coordinator
    }

    #[test]
    fn test_push_to_talk_disables_turn_detection() {
        let configurator = SessionConfigurator::new();
        let event = configurator.apply_configuration(true).event;
        assert_eq!(event.turn_detection(), Some(&None));
        assert_eq!(event.to_value()["session"]["turn_detection"], json!(null));
    }

    #[test]
    fn test_vad_parameters_are_fixed() {
        let configurator = SessionConfigurator::new();
        let value = configurator.apply_configuration(false).event.to_value();
        assert_eq!(
            value["session"]["turn_detection"],
            json!({
                "type": "server_vad",
                "threshold": 0.9,
                "prefix_padding_ms": 300,
                "silence_duration_ms": 500,
                "create_response": true
            })
        );
    }

    #[test]
    fn test_first_activation_greets_after_configuring() {
        let mut configurator = SessionConfigurator::new();
        let mut coordinator = coordinator();
        let events =
            configurator.reconfigure(false, ReconfigureTrigger::PersonaActivated, &mut coordinator);

        let names: Vec<String> = events.iter().map(OutboundEvent::log_name).collect();
        assert_eq!(
            names,
            vec![
                "session.update",
                "conversation.item.create internal_greeting",
                "response.create trigger_initial_response",
            ]
        );
        assert!(configurator.has_greeted());
    }

    #[test]
    fn test_handoff_activation_skips_greeting() {
        let mut configurator = SessionConfigurator::new();
        let mut coordinator = coordinator();
        configurator.reconfigure(false, ReconfigureTrigger::PersonaActivated, &mut coordinator);

        coordinator.on_handoff_notification("haikuWriter");
        let events =
            configurator.reconfigure(false, ReconfigureTrigger::PersonaActivated, &mut coordinator);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event.name(), "session.update");
        assert!(!coordinator.handoff_in_progress());
    }

    #[test]
    fn test_greeting_never_repeats_within_a_connect() {
        let mut configurator = SessionConfigurator::new();
        let mut coordinator = coordinator();
        configurator.reconfigure(false, ReconfigureTrigger::PersonaActivated, &mut coordinator);
        let again =
            configurator.reconfigure(false, ReconfigureTrigger::PersonaActivated, &mut coordinator);
        assert_eq!(again.len(), 1);

        configurator.reset();
        let fresh =
            configurator.reconfigure(false, ReconfigureTrigger::PersonaActivated, &mut coordinator);
        assert_eq!(fresh.len(), 3);
    }

    #[test]
    fn test_persona_greeting_overrides_default_text() {
        let mut configurator = SessionConfigurator::new();
        let mut coordinator = HandoffCoordinator::new();
        coordinator.activate(
            AgentRoster::new(vec![
                AgentPersona::new("concierge", "").with_greeting("Hi, who am I speaking with?"),
            ]),
            "concierge",
        );
        let events =
            configurator.reconfigure(false, ReconfigureTrigger::PersonaActivated, &mut coordinator);
        assert_eq!(
            events[1].event.to_value()["item"]["content"][0]["text"],
            "Hi, who am I speaking with?"
        );

        let mut configurator = SessionConfigurator::new();
        let mut coordinator = self::coordinator();
        let events =
            configurator.reconfigure(false, ReconfigureTrigger::PersonaActivated, &mut coordinator);
        assert_eq!(
            events[1].event.to_value()["item"]["content"][0]["text"],
            GREETING_TEXT
        );
    }

    #[test]
    fn test_preference_change_leaves_handoff_flag() {
        let mut configurator = SessionConfigurator::new();
        let mut coordinator = coordinator();
        coordinator.on_handoff_notification("haikuWriter");
        let events =
            configurator.reconfigure(true, ReconfigureTrigger::PreferenceChanged, &mut coordinator);
        assert_eq!(events.len(), 1);
        assert!(coordinator.handoff_in_progress());
    }
}

//! Connection lifecycle state machine.
//!
//! `DISCONNECTED -> CONNECTING -> CONNECTED -> DISCONNECTED`, restartable
//! indefinitely. The manager owns the [`ConnectionSession`], the transport, and
//! the order in which the other components are called.
//!
//! The only suspension points are the credential fetch and the transport
//! connect. Each connect attempt takes a fresh generation number; a resolution
//! that arrives after the generation moved on (because of `disconnect()` or a
//! transport-side close) is discarded instead of applied. The generation is
//! also the transport epoch, so notifications from an abandoned connection are
//! dropped the same way.

use crate::configurator::{OutboundEvent, ReconfigureTrigger, SessionConfigurator};
use crate::error::SessionError;
use crate::event_log::{Direction, EventCorrelationLog};
use crate::guardrail::{GuardrailPolicy, GuardrailVerdict};
use crate::handoff::HandoffCoordinator;
use crate::preferences::{PreferenceStore, Preferences};
use crate::protocol::{ClientEvent, ConversationItem};
use crate::scenario::{ScenarioDefinition, ScenarioError, ScenarioRegistry};
use crate::transcript::{Breadcrumb, TranscriptSink};
use crate::transport::{
    ConnectOptions, ConnectionStatus, CredentialProvider, RealtimeTransport, SessionDefaults,
    TransportMessage, TransportNotification,
};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use serde_json::{Value, json};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

/// State of one connect-to-disconnect span. Dropped on return to DISCONNECTED.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionSession {
    pub status: ConnectionStatus,
    pub conversation_id: String,
    pub scenario_key: String,
    pub active_persona_name: String,
    /// Set once the single-use credential has been obtained and handed on.
    pub credential_acquired: bool,
}

/// What a `connect()` call did when it did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectOutcome {
    /// The transport accepted the connection; CONNECTED follows by notification.
    Started,
    /// A session already exists in the given state.
    Ignored(ConnectionStatus),
    /// `disconnect()` happened while the attempt was suspended.
    Discarded,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Selection {
    pub scenario_key: Option<String>,
    pub persona_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub status: ConnectionStatus,
    pub session: Option<ConnectionSession>,
    pub selection: Selection,
    pub preferences: Preferences,
    pub user_speaking: bool,
}

/// External collaborators, shared with the host.
#[derive(Clone)]
pub struct Collaborators {
    pub credentials: Arc<dyn CredentialProvider>,
    pub transport: Arc<dyn RealtimeTransport>,
    pub transcript: Arc<dyn TranscriptSink>,
    pub preferences: Arc<dyn PreferenceStore>,
}

#[derive(Debug, Default)]
struct ManagerState {
    session: Option<ConnectionSession>,
    generation: u64,
    coordinator: HandoffCoordinator,
    configurator: SessionConfigurator,
    preferences: Preferences,
    user_speaking: bool,
    selection: Selection,
}

impl ManagerState {
    fn status(&self) -> ConnectionStatus {
        self.session
            .as_ref()
            .map(|s| s.status)
            .unwrap_or(ConnectionStatus::Disconnected)
    }

    fn connected_conversation(&self) -> Option<String> {
        self.session
            .as_ref()
            .filter(|s| s.status == ConnectionStatus::Connected)
            .map(|s| s.conversation_id.clone())
    }

    /// Drops the session and invalidates any in-flight attempt.
    fn end_session(&mut self) -> Option<ConnectionSession> {
        self.generation += 1;
        self.coordinator.clear();
        self.user_speaking = false;
        self.session.take()
    }
}

pub struct ConnectionLifecycleManager {
    credentials: Arc<dyn CredentialProvider>,
    transport: Arc<dyn RealtimeTransport>,
    transcript: Arc<dyn TranscriptSink>,
    preference_store: Arc<dyn PreferenceStore>,
    registry: Arc<RwLock<ScenarioRegistry>>,
    log: Arc<EventCorrelationLog>,
    state: Mutex<ManagerState>,
}

impl ConnectionLifecycleManager {
    pub fn new(
        collaborators: Collaborators,
        registry: Arc<RwLock<ScenarioRegistry>>,
        log: Arc<EventCorrelationLog>,
    ) -> Self {
        let state = ManagerState {
            preferences: collaborators.preferences.load(),
            ..Default::default()
        };
        Self {
            credentials: collaborators.credentials,
            transport: collaborators.transport,
            transcript: collaborators.transcript,
            preference_store: collaborators.preferences,
            registry,
            log,
            state: Mutex::new(state),
        }
    }

    pub fn status(&self) -> ConnectionStatus {
        self.state.lock().status()
    }

    pub fn session(&self) -> Option<ConnectionSession> {
        self.state.lock().session.clone()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let state = self.state.lock();
        SessionSnapshot {
            status: state.status(),
            session: state.session.clone(),
            selection: state.selection.clone(),
            preferences: state.preferences,
            user_speaking: state.user_speaking,
        }
    }

    pub fn registry(&self) -> &Arc<RwLock<ScenarioRegistry>> {
        &self.registry
    }

    pub fn event_log(&self) -> &Arc<EventCorrelationLog> {
        &self.log
    }

    fn conversation_id(&self) -> Option<String> {
        self.state
            .lock()
            .session
            .as_ref()
            .map(|s| s.conversation_id.clone())
    }

    fn is_current(&self, generation: u64) -> bool {
        self.state.lock().generation == generation
    }

    // --- Connect / disconnect ---

    /// Opens a session for `scenario_key` with `requested_persona` as entry point.
    ///
    /// A no-op unless DISCONNECTED. Credential and transport failures return the
    /// manager to DISCONNECTED without retrying.
    #[instrument(name = "connect", skip(self), fields(conversation_id = tracing::field::Empty))]
    pub async fn connect(
        &self,
        scenario_key: &str,
        requested_persona: &str,
    ) -> Result<ConnectOutcome, SessionError> {
        let (generation, conversation_id, scenario) = {
            let mut state = self.state.lock();
            if let Some(session) = &state.session {
                debug!(status = ?session.status, "Connect ignored, a session is already active");
                return Ok(ConnectOutcome::Ignored(session.status));
            }
            let Some(scenario) = self.registry.read().get(scenario_key).cloned() else {
                drop(state);
                let err = SessionError::InvalidScenarioSelection(scenario_key.to_string());
                self.surface_error(&err, None);
                return Err(err);
            };

            state.generation += 1;
            let conversation_id = Uuid::new_v4().to_string();
            state.configurator.reset();
            state.coordinator.clear();
            state.session = Some(ConnectionSession {
                status: ConnectionStatus::Connecting,
                conversation_id: conversation_id.clone(),
                scenario_key: scenario.key.clone(),
                active_persona_name: requested_persona.to_string(),
                credential_acquired: false,
            });
            (state.generation, conversation_id, scenario)
        };
        tracing::Span::current().record("conversation_id", conversation_id.as_str());
        info!(scenario = %scenario.key, persona = %requested_persona, "Connecting");

        self.transcript.add_system_message("Connecting...", false);
        self.log.record(
            Direction::System,
            "connect_attempt",
            json!({ "scenario": scenario.key, "persona": requested_persona }),
            Some(&conversation_id),
        );

        // Suspension point 1: credential fetch.
        self.log.record(
            Direction::Client,
            "fetch_session_token_request",
            json!({}),
            Some(&conversation_id),
        );
        let fetched = self.credentials.fetch_credential().await;
        if !self.is_current(generation) {
            info!("Credential resolved after disconnect, discarding");
            return Ok(ConnectOutcome::Discarded);
        }
        let credential = match fetched {
            Ok(credential) => credential,
            Err(err) => {
                let err = SessionError::from(err);
                self.abort_connect(generation, &conversation_id, &err);
                return Err(err);
            }
        };
        self.log.record(
            Direction::Server,
            "fetch_session_token_response",
            json!({ "credential": "[redacted]" }),
            Some(&conversation_id),
        );

        let prepared = match HandoffCoordinator::prepare_roster(&scenario.roster, requested_persona)
        {
            Ok(prepared) => prepared,
            Err(err) => {
                self.abort_connect(generation, &conversation_id, &err);
                return Err(err);
            }
        };
        if let Some(fallback) = &prepared.fallback {
            self.log.record(
                Direction::System,
                fallback.event_name(),
                fallback.payload(),
                Some(&conversation_id),
            );
            self.transcript
                .add_breadcrumb(Breadcrumb::new(fallback.to_string()).with_data(fallback.payload()));
        }

        let session_defaults = {
            let mut state = self.state.lock();
            if state.generation != generation {
                return Ok(ConnectOutcome::Discarded);
            }
            let ManagerState {
                session,
                coordinator,
                preferences,
                ..
            } = &mut *state;
            coordinator.activate(prepared.roster.clone(), &prepared.active_persona);
            if let Some(session) = session.as_mut() {
                session.active_persona_name = prepared.active_persona.clone();
                session.credential_acquired = true;
            }
            SessionDefaults {
                turn_detection: SessionConfigurator::turn_detection(preferences.push_to_talk),
            }
        };

        let options = ConnectOptions {
            epoch: generation,
            credential,
            initial_roster: prepared.roster,
            output_guardrail: Arc::new(GuardrailPolicy::new(scenario.company_name.clone())),
            session_defaults,
        };

        // Suspension point 2: transport connect.
        let result = self.transport.connect(options).await;
        let current = self.is_current(generation);
        match result {
            Ok(()) if current => {
                info!(persona = %prepared.active_persona, "Transport connect resolved");
                Ok(ConnectOutcome::Started)
            }
            Ok(()) => {
                warn!("Transport connected after disconnect, tearing it down");
                self.transport.release(generation);
                Ok(ConnectOutcome::Discarded)
            }
            Err(err) if current => {
                let err = SessionError::TransportConnect(format!("{err:#}"));
                self.abort_connect(generation, &conversation_id, &err);
                Err(err)
            }
            Err(err) => {
                debug!(error = %err, "Transport connect failed after disconnect, ignoring");
                Ok(ConnectOutcome::Discarded)
            }
        }
    }

    /// Connects with the stored scenario and persona selection.
    pub async fn connect_selected(&self) -> Result<ConnectOutcome, SessionError> {
        let selection = self.state.lock().selection.clone();
        let Some(scenario_key) = selection.scenario_key else {
            let err = SessionError::InvalidScenarioSelection(String::new());
            self.surface_error(&err, None);
            return Err(err);
        };
        let persona = match selection.persona_name {
            Some(persona) => persona,
            None => self
                .registry
                .read()
                .get(&scenario_key)
                .and_then(|s| s.roster.entry().map(|p| p.name.clone()))
                .unwrap_or_default(),
        };
        self.connect(&scenario_key, &persona).await
    }

    fn abort_connect(&self, generation: u64, conversation_id: &str, err: &SessionError) {
        {
            let mut state = self.state.lock();
            if state.generation == generation {
                state.end_session();
            }
        }
        error!(error = %err, "Connect attempt failed");
        self.surface_error(err, Some(conversation_id));
    }

    fn surface_error(&self, err: &SessionError, conversation_id: Option<&str>) {
        self.log.record(
            Direction::System,
            err.event_name(),
            err.payload(),
            conversation_id,
        );
        self.transcript.add_system_message(&err.user_message(), true);
    }

    /// Tears the session down from any state. Safe to call repeatedly.
    pub fn disconnect(&self) {
        let ended = self.state.lock().end_session();
        self.transport.disconnect();
        if let Some(session) = ended {
            info!(conversation_id = %session.conversation_id, "Session disconnected");
            self.log.record(
                Direction::System,
                "session_disconnect",
                json!({ "previous_status": session.status }),
                Some(&session.conversation_id),
            );
            self.transcript
                .add_system_message("Disconnected from session.", true);
        }
    }

    // --- Transport notifications ---

    /// Applies one transport notification if it belongs to the current attempt.
    pub fn handle_message(&self, message: TransportMessage) {
        let TransportMessage {
            epoch,
            notification,
        } = message;
        let current = {
            let state = self.state.lock();
            state.session.is_some() && state.generation == epoch
        };
        if !current {
            debug!(epoch, ?notification, "Dropping notification from an abandoned connection");
            if notification == TransportNotification::ConnectionChange(ConnectionStatus::Connected) {
                self.transport.release(epoch);
            }
            return;
        }
        match notification {
            TransportNotification::ConnectionChange(status) => self.on_connection_change(status),
            TransportNotification::Handoff(persona) => self.on_handoff(&persona),
            TransportNotification::ServerEvent { name, payload } => {
                let conversation_id = self.conversation_id();
                self.log
                    .record(Direction::Server, name, payload, conversation_id.as_deref());
            }
            TransportNotification::GuardrailTripped(verdict) => self.on_guardrail_tripped(verdict),
        }
    }

    /// Drains transport notifications until the sender side closes.
    pub async fn run_notifications(&self, mut rx: mpsc::UnboundedReceiver<TransportMessage>) {
        while let Some(message) = rx.recv().await {
            self.handle_message(message);
        }
        debug!("Transport notification channel closed");
    }

    fn on_connection_change(&self, status: ConnectionStatus) {
        match status {
            ConnectionStatus::Connected => self.on_connected(),
            ConnectionStatus::Disconnected => {
                let ended = self.state.lock().end_session();
                if let Some(session) = ended {
                    warn!(conversation_id = %session.conversation_id, "Transport closed the session");
                    self.log.record(
                        Direction::System,
                        "connection_change",
                        json!({ "status": ConnectionStatus::Disconnected }),
                        Some(&session.conversation_id),
                    );
                    self.transcript.add_system_message("Session closed.", true);
                }
            }
            ConnectionStatus::Connecting => {
                debug!("Transport reports connecting");
            }
        }
    }

    fn on_connected(&self) {
        let (conversation_id, events, muted) = {
            let mut state = self.state.lock();
            let ManagerState {
                session,
                coordinator,
                configurator,
                preferences,
                ..
            } = &mut *state;
            let Some(session) = session.as_mut() else {
                debug!("CONNECTED without a session, ignoring");
                return;
            };
            if session.status == ConnectionStatus::Connected {
                return;
            }
            session.status = ConnectionStatus::Connected;
            let events = configurator.reconfigure(
                preferences.push_to_talk,
                ReconfigureTrigger::PersonaActivated,
                coordinator,
            );
            (
                session.conversation_id.clone(),
                events,
                !preferences.audio_playback,
            )
        };
        info!(conversation_id = %conversation_id, "Session connected");
        self.log.record(
            Direction::System,
            "connection_change",
            json!({ "status": ConnectionStatus::Connected }),
            Some(&conversation_id),
        );
        self.transcript.add_system_message("Connected.", true);
        self.transport.mute(muted);
        self.dispatch(&conversation_id, events);
    }

    fn on_handoff(&self, persona_name: &str) {
        let (conversation_id, applied, crumb, events) = {
            let mut state = self.state.lock();
            let ManagerState {
                session,
                coordinator,
                configurator,
                preferences,
                ..
            } = &mut *state;
            let Some(session) = session
                .as_mut()
                .filter(|s| s.status == ConnectionStatus::Connected)
            else {
                warn!(persona = %persona_name, "Handoff outside a connected session, ignoring");
                return;
            };
            let Some(applied) = coordinator.on_handoff_notification(persona_name) else {
                return;
            };
            session.active_persona_name = applied.active_persona.clone();
            let events = configurator.reconfigure(
                preferences.push_to_talk,
                ReconfigureTrigger::PersonaActivated,
                coordinator,
            );
            (
                session.conversation_id.clone(),
                applied,
                coordinator.active_persona_breadcrumb(),
                events,
            )
        };

        self.log.record(
            Direction::System,
            "agent_handoff",
            json!({ "persona": applied.active_persona }),
            Some(&conversation_id),
        );
        if let Some(substitution) = &applied.substitution {
            self.log.record(
                Direction::System,
                substitution.event_name(),
                substitution.payload(),
                Some(&conversation_id),
            );
        }
        self.transcript.add_breadcrumb(applied.breadcrumb);
        if let Some(crumb) = crumb {
            self.transcript.add_breadcrumb(crumb);
        }
        self.dispatch(&conversation_id, events);
    }

    fn on_guardrail_tripped(&self, verdict: GuardrailVerdict) {
        let conversation_id = self.conversation_id();
        let payload = serde_json::to_value(&verdict).unwrap_or_default();
        warn!(conversation_id = ?conversation_id, "Output guardrail tripped");
        self.log.record(
            Direction::System,
            "guardrail_tripped",
            payload.clone(),
            conversation_id.as_deref(),
        );
        self.transcript
            .add_breadcrumb(Breadcrumb::new("Output guardrail triggered").with_data(payload));
        if let Some(message) = verdict.fallback_message() {
            self.transcript.add_system_message(message, true);
        }
    }

    // --- Preferences and input ---

    /// Toggles push-to-talk; re-applies turn detection when connected.
    pub fn set_push_to_talk(&self, enabled: bool) {
        let (preferences, pending) = {
            let mut state = self.state.lock();
            state.preferences.push_to_talk = enabled;
            if !enabled {
                state.user_speaking = false;
            }
            let conversation_id = state.connected_conversation();
            let ManagerState {
                coordinator,
                configurator,
                ..
            } = &mut *state;
            let pending = conversation_id.map(|id| {
                let events =
                    configurator.reconfigure(enabled, ReconfigureTrigger::PreferenceChanged, coordinator);
                (id, events)
            });
            (state.preferences, pending)
        };
        self.persist(preferences);
        if let Some((conversation_id, events)) = pending {
            self.dispatch(&conversation_id, events);
        }
    }

    pub fn set_audio_playback(&self, enabled: bool) {
        let preferences = {
            let mut state = self.state.lock();
            state.preferences.audio_playback = enabled;
            state.preferences
        };
        self.persist(preferences);
        self.transport.mute(!enabled);
    }

    fn persist(&self, preferences: Preferences) {
        if let Err(err) = self.preference_store.save(&preferences) {
            warn!(error = %err, "Failed to persist preferences");
        }
    }

    /// Push-to-talk press. Returns whether anything was sent.
    pub fn talk_button_down(&self) -> bool {
        let conversation_id = {
            let mut state = self.state.lock();
            let Some(id) = state.connected_conversation() else {
                return false;
            };
            state.user_speaking = true;
            id
        };
        self.transport.interrupt();
        self.dispatch(
            &conversation_id,
            vec![OutboundEvent::labeled(
                ClientEvent::InputAudioBufferClear,
                "clear_ptt_buffer",
            )],
        );
        true
    }

    /// Push-to-talk release: commits the buffered audio and asks for a response.
    pub fn talk_button_up(&self) -> bool {
        let conversation_id = {
            let mut state = self.state.lock();
            let Some(id) = state.connected_conversation() else {
                return false;
            };
            if !state.user_speaking {
                return false;
            }
            state.user_speaking = false;
            id
        };
        self.dispatch(
            &conversation_id,
            vec![
                OutboundEvent::labeled(ClientEvent::InputAudioBufferCommit, "commit_ptt"),
                OutboundEvent::labeled(ClientEvent::ResponseCreate, "trigger_response_ptt"),
            ],
        );
        true
    }

    /// Sends a typed user message. Blank text or no connection is a no-op.
    pub fn send_user_text(&self, text: &str) -> bool {
        let text = text.trim();
        if text.is_empty() {
            return false;
        }
        let Some(conversation_id) = self.state.lock().connected_conversation() else {
            return false;
        };
        self.transport.interrupt();
        self.dispatch(
            &conversation_id,
            vec![
                OutboundEvent::labeled(
                    ClientEvent::ConversationItemCreate {
                        item: ConversationItem::user_text(None, text),
                    },
                    "user_text",
                ),
                OutboundEvent::new(ClientEvent::ResponseCreate),
            ],
        );
        true
    }

    fn dispatch(&self, conversation_id: &str, events: Vec<OutboundEvent>) {
        for outbound in events {
            let payload: Value = outbound.event.to_value();
            self.transport.send_event(outbound.event.clone());
            self.log.record(
                Direction::Client,
                outbound.log_name(),
                payload,
                Some(conversation_id),
            );
        }
    }

    // --- Selection and scenario edits ---

    /// Selects a scenario and its entry persona. Disconnects a live session first.
    pub fn select_scenario(&self, scenario_key: &str) -> Result<Selection, SessionError> {
        let entry = self
            .registry
            .read()
            .get(scenario_key)
            .and_then(|s| s.roster.entry().map(|p| p.name.clone()));
        let Some(entry) = entry else {
            let err = SessionError::InvalidScenarioSelection(scenario_key.to_string());
            self.surface_error(&err, None);
            return Err(err);
        };
        if self.status() != ConnectionStatus::Disconnected {
            self.disconnect();
        }
        let selection = {
            let mut state = self.state.lock();
            state.selection = Selection {
                scenario_key: Some(scenario_key.to_string()),
                persona_name: Some(entry),
            };
            state.selection.clone()
        };
        self.log.record(
            Direction::System,
            "scenario_selected",
            json!(selection),
            None,
        );
        Ok(selection)
    }

    /// Selects the entry persona within the selected scenario.
    ///
    /// An unknown name is replaced by the scenario's first persona with a
    /// warning. Reconnecting is left to the operator.
    pub fn select_persona(&self, persona_name: &str) -> Result<Selection, SessionError> {
        let scenario_key = self.state.lock().selection.scenario_key.clone();
        let roster = scenario_key
            .as_deref()
            .and_then(|key| self.registry.read().get(key).map(|s| s.roster.clone()));
        let Some(roster) = roster else {
            let err = SessionError::InvalidScenarioSelection(scenario_key.unwrap_or_default());
            self.surface_error(&err, None);
            return Err(err);
        };
        let prepared = HandoffCoordinator::prepare_roster(&roster, persona_name)?;
        if let Some(fallback) = &prepared.fallback {
            self.log
                .record(Direction::System, fallback.event_name(), fallback.payload(), None);
        }
        if self.status() != ConnectionStatus::Disconnected {
            self.disconnect();
        }
        let selection = {
            let mut state = self.state.lock();
            state.selection.persona_name = Some(prepared.active_persona);
            state.selection.clone()
        };
        self.log.record(
            Direction::System,
            "persona_selected",
            json!(selection),
            None,
        );
        Ok(selection)
    }

    pub fn create_scenario(&self, definition: ScenarioDefinition) -> Result<(), ScenarioError> {
        let key = definition.key.clone();
        self.registry.write().create(definition)?;
        info!(scenario = %key, "Scenario created");
        Ok(())
    }

    /// Updates a scenario, re-pointing the persona selection if it vanished.
    pub fn update_scenario(
        &self,
        key: &str,
        definition: ScenarioDefinition,
    ) -> Result<(), ScenarioError> {
        let entry = definition.roster.entry().map(|p| p.name.clone());
        let names: Vec<String> = definition
            .roster
            .names()
            .into_iter()
            .map(str::to_string)
            .collect();
        self.registry.write().update(key, definition)?;
        let mut state = self.state.lock();
        if state.selection.scenario_key.as_deref() == Some(key) {
            let still_present = state
                .selection
                .persona_name
                .as_ref()
                .is_some_and(|p| names.contains(p));
            if !still_present {
                state.selection.persona_name = entry;
            }
        }
        info!(scenario = %key, "Scenario updated");
        Ok(())
    }

    /// Deletes a scenario. A selection pointing at it is cleared, so the
    /// operator has to pick a valid scenario before the next connect.
    pub fn delete_scenario(&self, key: &str) -> Result<ScenarioDefinition, ScenarioError> {
        let removed = self.registry.write().delete(key)?;
        let mut state = self.state.lock();
        if state.selection.scenario_key.as_deref() == Some(key) {
            warn!(scenario = %key, "Selected scenario deleted, clearing selection");
            state.selection = Selection::default();
        }
        info!(scenario = %key, "Scenario deleted");
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CredentialError;
    use crate::persona::{AgentPersona, AgentRoster};
    use crate::preferences::MemoryPreferenceStore;
    use crate::protocol::TurnDetection;
    use crate::scenario::builtin_scenarios;
    use crate::testing::{FakeCredentials, FakeTransport};
    use crate::transcript::Transcript;
    use crate::transport::{MockCredentialProvider, MockRealtimeTransport};

    struct Harness {
        manager: ConnectionLifecycleManager,
        credentials: Arc<FakeCredentials>,
        transport: Arc<FakeTransport>,
        transcript: Arc<Transcript>,
        preferences: Arc<MemoryPreferenceStore>,
        log: Arc<EventCorrelationLog>,
    }

    fn registry() -> Arc<RwLock<ScenarioRegistry>> {
        Arc::new(RwLock::new(
            ScenarioRegistry::load(builtin_scenarios()).unwrap(),
        ))
    }

    fn harness_with(credentials: FakeCredentials, transport: FakeTransport) -> Harness {
        let credentials = Arc::new(credentials);
        let transport = Arc::new(transport);
        let transcript = Arc::new(Transcript::new());
        let preferences = Arc::new(MemoryPreferenceStore::default());
        let log = Arc::new(EventCorrelationLog::new());
        let manager = ConnectionLifecycleManager::new(
            Collaborators {
                credentials: credentials.clone(),
                transport: transport.clone(),
                transcript: transcript.clone(),
                preferences: preferences.clone(),
            },
            registry(),
            log.clone(),
        );
        Harness {
            manager,
            credentials,
            transport,
            transcript,
            preferences,
            log,
        }
    }

    fn harness() -> Harness {
        harness_with(FakeCredentials::ok("ek_test"), FakeTransport::default())
    }

    /// Delivers a notification tagged with the current attempt's epoch.
    fn deliver(h: &Harness, notification: TransportNotification) {
        let epoch = h.manager.state.lock().generation;
        h.manager.handle_message(TransportMessage::new(epoch, notification));
    }

    fn deliver_from(h: &Harness, epoch: u64, notification: TransportNotification) {
        h.manager.handle_message(TransportMessage::new(epoch, notification));
    }

    async fn connected(h: &Harness) -> String {
        let outcome = h.manager.connect("simpleHandoff", "greeter").await.unwrap();
        assert_eq!(outcome, ConnectOutcome::Started);
        deliver(h, TransportNotification::ConnectionChange(ConnectionStatus::Connected));
        h.manager.session().unwrap().conversation_id
    }

    fn count(events: &[ClientEvent], name: &str) -> usize {
        events.iter().filter(|e| e.name() == name).count()
    }

    #[tokio::test]
    async fn test_rate_limited_credential_aborts_without_transport() {
        let mut credentials = MockCredentialProvider::new();
        credentials.expect_fetch_credential().times(1).returning(|| {
            Err(CredentialError::Server {
                code: 429,
                error: "rate_limited".into(),
                details: None,
            })
        });
        let mut transport = MockRealtimeTransport::new();
        transport.expect_connect().never();

        let log = Arc::new(EventCorrelationLog::new());
        let transcript = Arc::new(Transcript::new());
        let manager = ConnectionLifecycleManager::new(
            Collaborators {
                credentials: Arc::new(credentials),
                transport: Arc::new(transport),
                transcript: transcript.clone(),
                preferences: Arc::new(MemoryPreferenceStore::default()),
            },
            registry(),
            log.clone(),
        );

        let err = manager.connect("simpleHandoff", "greeter").await.unwrap_err();
        assert_eq!(
            err,
            SessionError::CredentialServer {
                code: 429,
                error: "rate_limited".into(),
                details: None,
            }
        );
        assert_eq!(manager.status(), ConnectionStatus::Disconnected);
        assert!(manager.session().is_none());

        let errors: Vec<_> = log.filter(None).into_iter().filter(|e| e.is_error()).collect();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].event_name, "error.credential_server");
        assert!(errors[0].conversation_id.is_some());
        assert_eq!(
            transcript.system_messages().last().map(String::as_str),
            Some("Error: rate_limited")
        );
    }

    #[tokio::test]
    async fn test_connect_then_handoff_greets_once() {
        let h = harness();
        let conversation_id = connected(&h).await;
        assert_eq!(h.manager.status(), ConnectionStatus::Connected);

        deliver(&h, TransportNotification::Handoff("haikuWriter".into()));

        let session = h.manager.session().unwrap();
        assert_eq!(session.active_persona_name, "haikuWriter");
        let sent = h.transport.sent();
        assert_eq!(count(&sent, "session.update"), 2);
        assert_eq!(count(&sent, "response.create"), 1);
        assert_eq!(count(&sent, "conversation.item.create"), 1);

        let breadcrumbs = h.transcript.breadcrumbs();
        assert!(breadcrumbs
            .iter()
            .any(|b| b.title == "Session handed off to: haikuWriter"));
        assert!(breadcrumbs.iter().any(|b| b.title == "Agent: haikuWriter"));

        // Every client event carries the session's conversation id.
        let client_events: Vec<_> = h
            .log
            .filter(None)
            .into_iter()
            .filter(|e| e.direction == Direction::Client)
            .collect();
        assert!(!client_events.is_empty());
        assert!(client_events
            .iter()
            .all(|e| e.conversation_id.as_deref() == Some(conversation_id.as_str())));
    }

    #[tokio::test]
    async fn test_configuration_precedes_greeting() {
        let h = harness();
        connected(&h).await;
        let names: Vec<&str> = h.transport.sent().iter().map(ClientEvent::name).collect();
        assert_eq!(
            names,
            vec!["session.update", "conversation.item.create", "response.create"]
        );
    }

    #[tokio::test]
    async fn test_repeated_connected_notification_does_not_regreet() {
        let h = harness();
        connected(&h).await;
        deliver(&h, TransportNotification::ConnectionChange(ConnectionStatus::Connected));
        assert_eq!(count(&h.transport.sent(), "response.create"), 1);
    }

    #[tokio::test]
    async fn test_connect_is_noop_while_active() {
        let h = harness();
        h.manager.connect("simpleHandoff", "greeter").await.unwrap();
        assert_eq!(h.manager.status(), ConnectionStatus::Connecting);
        assert_eq!(
            h.manager.connect("simpleHandoff", "greeter").await.unwrap(),
            ConnectOutcome::Ignored(ConnectionStatus::Connecting)
        );

        deliver(&h, TransportNotification::ConnectionChange(ConnectionStatus::Connected));
        assert_eq!(
            h.manager.connect("customerServiceRetail", "sales").await.unwrap(),
            ConnectOutcome::Ignored(ConnectionStatus::Connected)
        );
        assert_eq!(h.transport.connects().len(), 1);
        assert_eq!(h.credentials.calls(), 1);
    }

    #[tokio::test]
    async fn test_requested_persona_is_entry_point() {
        let h = harness();
        h.manager
            .connect("customerServiceRetail", "sales")
            .await
            .unwrap();
        let record = &h.transport.connects()[0];
        assert_eq!(record.roster[0], "sales");
        assert_eq!(record.roster.len(), 4);
        assert_eq!(record.credential, "ek_test");
        assert_eq!(record.company_name, "Snowy Peak Boards");
        assert_eq!(h.manager.session().unwrap().active_persona_name, "sales");
    }

    #[tokio::test]
    async fn test_unknown_persona_falls_back_to_first() {
        let h = harness();
        let outcome = h.manager.connect("simpleHandoff", "ghost").await.unwrap();
        assert_eq!(outcome, ConnectOutcome::Started);
        assert_eq!(h.transport.connects()[0].roster[0], "greeter");
        assert_eq!(h.manager.session().unwrap().active_persona_name, "greeter");

        let events = h.log.filter(None);
        assert!(events.iter().any(|e| e.event_name == "warning.invalid_persona"));
        assert!(!events.iter().any(|e| e.is_error()));
    }

    #[tokio::test]
    async fn test_unknown_scenario_is_rejected_before_session() {
        let h = harness();
        let err = h.manager.connect("nope", "greeter").await.unwrap_err();
        assert_eq!(err, SessionError::InvalidScenarioSelection("nope".into()));
        assert_eq!(h.manager.status(), ConnectionStatus::Disconnected);
        assert_eq!(h.credentials.calls(), 0);

        let events = h.log.filter(None);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_name, "error.invalid_scenario");
        assert!(events[0].conversation_id.is_none());
    }

    #[tokio::test]
    async fn test_credential_failures_are_classified() {
        for (failure, expected) in [
            (
                CredentialError::Network("connection refused".into()),
                "error.credential_network",
            ),
            (CredentialError::Missing, "error.credential_missing"),
        ] {
            let h = harness_with(FakeCredentials::failing(failure), FakeTransport::default());
            let err = h.manager.connect("simpleHandoff", "greeter").await.unwrap_err();
            assert_eq!(err.event_name(), expected);
            assert_eq!(h.manager.status(), ConnectionStatus::Disconnected);
            assert!(h.transport.connects().is_empty());
        }
    }

    #[tokio::test]
    async fn test_transport_connect_failure_returns_to_disconnected() {
        let h = harness_with(
            FakeCredentials::ok("ek_test"),
            FakeTransport::failing("handshake rejected"),
        );
        let err = h.manager.connect("simpleHandoff", "greeter").await.unwrap_err();
        assert!(matches!(err, SessionError::TransportConnect(ref cause) if cause.contains("handshake rejected")));
        assert_eq!(h.manager.status(), ConnectionStatus::Disconnected);
        assert!(h
            .log
            .filter(None)
            .iter()
            .any(|e| e.event_name == "error.transport_connect"));
        assert_eq!(
            h.transcript.system_messages().last().map(String::as_str),
            Some("Error connecting to the session. Please try again.")
        );
    }

    #[tokio::test]
    async fn test_disconnect_is_idempotent_in_every_state() {
        let h = harness();
        h.manager.disconnect();
        h.manager.disconnect();
        assert_eq!(h.manager.status(), ConnectionStatus::Disconnected);

        h.manager.connect("simpleHandoff", "greeter").await.unwrap();
        assert_eq!(h.manager.status(), ConnectionStatus::Connecting);
        h.manager.disconnect();
        h.manager.disconnect();
        assert_eq!(h.manager.status(), ConnectionStatus::Disconnected);

        connected(&h).await;
        h.manager.disconnect();
        h.manager.disconnect();
        h.manager.disconnect();
        assert_eq!(h.manager.status(), ConnectionStatus::Disconnected);
        assert!(h.manager.session().is_none());

        // Only real teardowns produce a transcript line.
        let disconnects = h
            .transcript
            .system_messages()
            .into_iter()
            .filter(|m| m == "Disconnected from session.")
            .count();
        assert_eq!(disconnects, 2);
    }

    #[tokio::test]
    async fn test_disconnect_during_credential_fetch_discards_result() {
        let h = harness_with(FakeCredentials::gated("ek_late"), FakeTransport::default());
        let gate = h.credentials.gate();

        let (outcome, ()) = tokio::join!(h.manager.connect("simpleHandoff", "greeter"), async {
            gate.started.notified().await;
            assert_eq!(h.manager.status(), ConnectionStatus::Connecting);
            h.manager.disconnect();
            gate.release.notify_one();
        });

        assert_eq!(outcome.unwrap(), ConnectOutcome::Discarded);
        assert_eq!(h.manager.status(), ConnectionStatus::Disconnected);
        assert!(h.transport.connects().is_empty());
    }

    #[tokio::test]
    async fn test_disconnect_during_transport_connect_tears_down_late_connection() {
        let h = harness_with(FakeCredentials::ok("ek_test"), FakeTransport::gated());
        let gate = h.transport.gate();

        let (outcome, ()) = tokio::join!(h.manager.connect("simpleHandoff", "greeter"), async {
            gate.started.notified().await;
            h.manager.disconnect();
            gate.release.notify_one();
        });

        assert_eq!(outcome.unwrap(), ConnectOutcome::Discarded);
        assert_eq!(h.manager.status(), ConnectionStatus::Disconnected);
        assert_eq!(h.transport.disconnects(), 1);
        let epoch = h.transport.connects()[0].epoch;
        assert_eq!(h.transport.releases(), vec![epoch]);

        // A stale CONNECTED from the abandoned attempt changes nothing.
        deliver_from(&h, epoch, TransportNotification::ConnectionChange(ConnectionStatus::Connected));
        assert_eq!(h.manager.status(), ConnectionStatus::Disconnected);
        assert!(h.transport.sent().is_empty());
    }

    #[tokio::test]
    async fn test_abandoned_connection_cannot_complete_a_newer_attempt() {
        let h = harness_with(FakeCredentials::gated("ek_test"), FakeTransport::default());
        let gate = h.credentials.gate();

        let (first, ()) = tokio::join!(h.manager.connect("simpleHandoff", "greeter"), async {
            gate.started.notified().await;
            gate.release.notify_one();
        });
        assert_eq!(first.unwrap(), ConnectOutcome::Started);
        let stale_epoch = h.transport.connects()[0].epoch;
        h.manager.disconnect();

        let (second, ()) = tokio::join!(h.manager.connect("simpleHandoff", "greeter"), async {
            gate.started.notified().await;
            deliver_from(
                &h,
                stale_epoch,
                TransportNotification::ConnectionChange(ConnectionStatus::Connected),
            );
            deliver_from(&h, stale_epoch, TransportNotification::Handoff("haikuWriter".into()));
            assert_eq!(h.manager.status(), ConnectionStatus::Connecting);
            assert!(h.transport.sent().is_empty());
            gate.release.notify_one();
        });
        assert_eq!(second.unwrap(), ConnectOutcome::Started);
        assert_eq!(h.transport.releases(), vec![stale_epoch]);

        let epoch = h.transport.connects()[1].epoch;
        assert_ne!(epoch, stale_epoch);
        deliver_from(&h, epoch, TransportNotification::ConnectionChange(ConnectionStatus::Connected));
        assert_eq!(h.manager.status(), ConnectionStatus::Connected);
        assert_eq!(h.manager.session().unwrap().active_persona_name, "greeter");
        let names: Vec<&str> = h.transport.sent().iter().map(ClientEvent::name).collect();
        assert_eq!(
            names,
            vec!["session.update", "conversation.item.create", "response.create"]
        );
    }

    #[tokio::test]
    async fn test_each_connect_gets_a_new_conversation_id() {
        let h = harness();
        let first = connected(&h).await;
        h.manager.disconnect();
        let second = connected(&h).await;
        assert_ne!(first, second);
        assert_eq!(h.log.conversation_ids(), vec![first, second]);
    }

    #[tokio::test]
    async fn test_transport_side_close_clears_session() {
        let h = harness();
        connected(&h).await;
        deliver(&h, TransportNotification::ConnectionChange(ConnectionStatus::Disconnected));
        assert_eq!(h.manager.status(), ConnectionStatus::Disconnected);
        assert!(h.manager.session().is_none());

        deliver(&h, TransportNotification::Handoff("haikuWriter".into()));
        assert_eq!(count(&h.transport.sent(), "session.update"), 1);
    }

    #[tokio::test]
    async fn test_late_close_does_not_end_new_attempt() {
        let h = harness();
        connected(&h).await;
        let stale_epoch = h.transport.connects()[0].epoch;
        h.manager.disconnect();
        h.manager.connect("simpleHandoff", "greeter").await.unwrap();

        deliver_from(
            &h,
            stale_epoch,
            TransportNotification::ConnectionChange(ConnectionStatus::Disconnected),
        );
        assert_eq!(h.manager.status(), ConnectionStatus::Connecting);

        // The attempt's own close ends it even before CONNECTED.
        deliver(&h, TransportNotification::ConnectionChange(ConnectionStatus::Disconnected));
        assert_eq!(h.manager.status(), ConnectionStatus::Disconnected);
        assert!(h.transport.releases().is_empty());
    }

    #[tokio::test]
    async fn test_push_to_talk_toggle_reconfigures() {
        let h = harness();
        connected(&h).await;

        h.manager.set_push_to_talk(true);
        let last = h.transport.sent().last().cloned().unwrap();
        assert_eq!(last.turn_detection(), Some(&None));
        assert!(h.preferences.load().push_to_talk);

        h.manager.set_push_to_talk(false);
        let last = h.transport.sent().last().cloned().unwrap();
        assert_eq!(
            last.turn_detection(),
            Some(&Some(TurnDetection::ServerVad {
                threshold: 0.9,
                prefix_padding_ms: 300,
                silence_duration_ms: 500,
                create_response: true,
            }))
        );
        assert_eq!(count(&h.transport.sent(), "response.create"), 1);
    }

    #[tokio::test]
    async fn test_push_to_talk_applies_to_session_defaults() {
        let h = harness();
        h.manager.set_push_to_talk(true);
        assert!(h.transport.sent().is_empty());
        h.manager.connect("simpleHandoff", "greeter").await.unwrap();
        assert_eq!(h.transport.connects()[0].turn_detection, None);
    }

    #[tokio::test]
    async fn test_push_to_talk_buttons() {
        let h = harness();
        assert!(!h.manager.talk_button_down());

        connected(&h).await;
        let before = h.transport.sent().len();
        assert!(!h.manager.talk_button_up());
        assert!(h.manager.talk_button_down());
        assert!(h.manager.snapshot().user_speaking);
        assert!(h.manager.talk_button_up());

        let names: Vec<&str> = h.transport.sent()[before..]
            .iter()
            .map(ClientEvent::name)
            .collect();
        assert_eq!(
            names,
            vec![
                "input_audio_buffer.clear",
                "input_audio_buffer.commit",
                "response.create"
            ]
        );
        assert_eq!(h.transport.interrupts(), 1);
        assert!(h
            .log
            .filter(None)
            .iter()
            .any(|e| e.event_name == "input_audio_buffer.commit commit_ptt"));
    }

    #[tokio::test]
    async fn test_send_user_text() {
        let h = harness();
        assert!(!h.manager.send_user_text("hello"));
        connected(&h).await;
        assert!(!h.manager.send_user_text("   "));
        assert!(h.manager.send_user_text("  where is my order?  "));

        let sent = h.transport.sent();
        let item = &sent[sent.len() - 2];
        assert_eq!(
            item.to_value()["item"]["content"][0]["text"],
            "where is my order?"
        );
        assert_eq!(sent.last().unwrap().name(), "response.create");
    }

    #[tokio::test]
    async fn test_audio_playback_mutes_transport() {
        let h = harness();
        h.manager.set_audio_playback(false);
        assert_eq!(h.transport.mutes(), vec![true]);
        assert!(!h.preferences.load().audio_playback);

        connected(&h).await;
        assert_eq!(h.transport.mutes(), vec![true, true]);
    }

    #[tokio::test]
    async fn test_server_events_and_guardrail_trips_are_recorded() {
        let h = harness();
        let conversation_id = connected(&h).await;
        deliver(&h, TransportNotification::ServerEvent {
            name: "response.done".into(),
            payload: json!({ "type": "response.done" }),
        });
        let policy = GuardrailPolicy::new("GenericHandoffInc");
        let verdict = policy.evaluate("you idiot");
        deliver(&h, TransportNotification::GuardrailTripped(verdict.clone()));

        let events = h.log.filter(Some(&conversation_id));
        assert!(events
            .iter()
            .any(|e| e.direction == Direction::Server && e.event_name == "response.done"));
        assert!(events.iter().any(|e| e.event_name == "guardrail_tripped"));
        assert_eq!(h.manager.status(), ConnectionStatus::Connected);
        assert_eq!(
            h.transcript.system_messages().last().map(String::as_str),
            verdict.fallback_message()
        );
    }

    #[tokio::test]
    async fn test_selection_flow_and_scenario_deletion() {
        let h = harness();
        assert!(matches!(
            h.manager.connect_selected().await,
            Err(SessionError::InvalidScenarioSelection(_))
        ));

        let selection = h.manager.select_scenario("customerServiceRetail").unwrap();
        assert_eq!(selection.persona_name.as_deref(), Some("authentication"));
        let selection = h.manager.select_persona("returns").unwrap();
        assert_eq!(selection.persona_name.as_deref(), Some("returns"));
        let selection = h.manager.select_persona("ghost").unwrap();
        assert_eq!(selection.persona_name.as_deref(), Some("authentication"));

        h.manager.select_persona("returns").unwrap();
        h.manager.connect_selected().await.unwrap();
        assert_eq!(h.transport.connects()[0].roster[0], "returns");

        // Changing selection while live disconnects; no auto-connect follows.
        h.manager.select_scenario("simpleHandoff").unwrap();
        assert_eq!(h.manager.status(), ConnectionStatus::Disconnected);
        assert_eq!(h.transport.connects().len(), 1);

        h.manager.delete_scenario("simpleHandoff").unwrap();
        assert_eq!(h.manager.snapshot().selection, Selection::default());
        assert!(matches!(
            h.manager.connect_selected().await,
            Err(SessionError::InvalidScenarioSelection(_))
        ));
    }

    #[tokio::test]
    async fn test_update_scenario_repoints_vanished_persona() {
        let h = harness();
        h.manager.select_scenario("simpleHandoff").unwrap();
        h.manager.select_persona("haikuWriter").unwrap();

        let replacement = ScenarioDefinition {
            key: "simpleHandoff".into(),
            roster: AgentRoster::new(vec![AgentPersona::new("poet", "Write poems.")]),
            company_name: "GenericHandoffInc".into(),
            display_name: "Poems".into(),
        };
        h.manager.update_scenario("simpleHandoff", replacement).unwrap();
        assert_eq!(
            h.manager.snapshot().selection.persona_name.as_deref(),
            Some("poet")
        );
    }
}

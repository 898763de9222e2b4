//! Handoff coordination.
//!
//! Owns which persona is active for the current session and reacts to the
//! transport's handoff notifications. Roster preparation is a pure function so
//! the entry-point reordering can be checked without a session.

use crate::error::SessionError;
use crate::persona::{AgentPersona, AgentRoster};
use crate::transcript::Breadcrumb;
use serde_json::to_value;
use tracing::{info, warn};

/// Result of moving the desired persona to the roster's entry position.
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedRoster {
    pub roster: AgentRoster,
    /// Name at position 0 of `roster`.
    pub active_persona: String,
    /// Set when the desired persona was not found and `roster[0]` was used.
    pub fallback: Option<SessionError>,
}

/// Effect of a handoff notification on the coordinator.
#[derive(Debug, Clone, PartialEq)]
pub struct HandoffApplied {
    pub active_persona: String,
    pub breadcrumb: Breadcrumb,
    /// Set when the notified persona was not in the roster.
    pub substitution: Option<SessionError>,
}

#[derive(Debug, Default)]
pub struct HandoffCoordinator {
    roster: Option<AgentRoster>,
    active_persona: Option<String>,
    handoff_in_progress: bool,
}

impl HandoffCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `roster` with `desired_persona` at index 0.
    ///
    /// An unknown name leaves the order unchanged and reports a fallback to the
    /// first persona. An empty roster aborts the connect.
    pub fn prepare_roster(
        roster: &AgentRoster,
        desired_persona: &str,
    ) -> Result<PreparedRoster, SessionError> {
        let entry = roster.entry().ok_or(SessionError::EmptyRoster)?;
        match roster.position(desired_persona) {
            Some(index) => Ok(PreparedRoster {
                roster: roster.with_front(index),
                active_persona: desired_persona.to_string(),
                fallback: None,
            }),
            None => {
                warn!(
                    requested = %desired_persona,
                    fallback = %entry.name,
                    "Requested persona not in roster, falling back to entry persona"
                );
                Ok(PreparedRoster {
                    roster: roster.clone(),
                    active_persona: entry.name.clone(),
                    fallback: Some(SessionError::InvalidPersonaSelection {
                        requested: desired_persona.to_string(),
                        fallback: entry.name.clone(),
                    }),
                })
            }
        }
    }

    /// Starts tracking a freshly connected roster.
    pub fn activate(&mut self, roster: AgentRoster, active_persona: &str) {
        let active = if roster.contains(active_persona) {
            active_persona.to_string()
        } else {
            let fallback = roster
                .entry()
                .map(|p| p.name.clone())
                .unwrap_or_default();
            warn!(requested = %active_persona, fallback = %fallback, "Active persona not in roster");
            fallback
        };
        self.active_persona = Some(active);
        self.roster = Some(roster);
        self.handoff_in_progress = false;
    }

    /// Applies a mid-session handoff. Returns `None` when no roster is active.
    pub fn on_handoff_notification(&mut self, persona_name: &str) -> Option<HandoffApplied> {
        let roster = self.roster.as_ref()?;
        let (active, substitution) = if roster.contains(persona_name) {
            (persona_name.to_string(), None)
        } else {
            let fallback = roster.entry()?.name.clone();
            warn!(
                requested = %persona_name,
                fallback = %fallback,
                "Handoff named a persona outside the roster, substituting entry persona"
            );
            let err = SessionError::InvalidPersonaSelection {
                requested: persona_name.to_string(),
                fallback: fallback.clone(),
            };
            (fallback, Some(err))
        };

        info!(persona = %active, "Session handed off");
        self.handoff_in_progress = true;
        self.active_persona = Some(active.clone());
        Some(HandoffApplied {
            breadcrumb: Breadcrumb::new(format!("Session handed off to: {active}")),
            active_persona: active,
            substitution,
        })
    }

    /// Reads and clears the one-shot handoff flag.
    pub fn take_handoff_in_progress(&mut self) -> bool {
        std::mem::take(&mut self.handoff_in_progress)
    }

    pub fn handoff_in_progress(&self) -> bool {
        self.handoff_in_progress
    }

    pub fn active_persona_name(&self) -> Option<&str> {
        self.active_persona.as_deref()
    }

    pub fn active_persona(&self) -> Option<&AgentPersona> {
        let name = self.active_persona.as_deref()?;
        self.roster.as_ref()?.get(name)
    }

    pub fn roster(&self) -> Option<&AgentRoster> {
        self.roster.as_ref()
    }

    /// "Agent: X" breadcrumb carrying the active persona's definition.
    pub fn active_persona_breadcrumb(&self) -> Option<Breadcrumb> {
        let persona = self.active_persona()?;
        let crumb = Breadcrumb::new(format!("Agent: {}", persona.name));
        Some(match to_value(persona) {
            Ok(data) => crumb.with_data(data),
            Err(_) => crumb,
        })
    }

    pub fn clear(&mut self) {
        self.roster = None;
        self.active_persona = None;
        self.handoff_in_progress = false;
    }
}

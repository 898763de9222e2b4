//! Scenario registry.
//!
//! A scenario bundles a persona roster with the identity used by the output
//! guardrail and a display name. The registry is validated on load and only
//! changes through the explicit create/update/delete edit path.

use crate::persona::{AgentPersona, AgentRoster, ToolDescriptor};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ScenarioError {
    #[error("Scenario key must not be empty")]
    EmptyKey,
    #[error("Scenario '{0}' already exists")]
    DuplicateKey(String),
    #[error("Scenario '{0}' not found")]
    NotFound(String),
    #[error("Scenario '{0}' has an empty roster")]
    EmptyRoster(String),
    #[error("Scenario '{scenario}' defines persona '{persona}' more than once")]
    DuplicatePersona { scenario: String, persona: String },
    #[error("Persona '{persona}' in scenario '{scenario}' hands off to unknown persona '{target}'")]
    UnknownHandoffTarget {
        scenario: String,
        persona: String,
        target: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScenarioDefinition {
    pub key: String,
    pub roster: AgentRoster,
    /// Identity the moderation guardrail is bound to.
    pub company_name: String,
    pub display_name: String,
}

impl ScenarioDefinition {
    /// Checks the roster invariants that must hold before a scenario is usable.
    pub fn validate(&self) -> Result<(), ScenarioError> {
        if self.key.trim().is_empty() {
            return Err(ScenarioError::EmptyKey);
        }
        if self.roster.is_empty() {
            return Err(ScenarioError::EmptyRoster(self.key.clone()));
        }
        let mut seen = HashSet::new();
        for persona in self.roster.personas() {
            if !seen.insert(persona.name.as_str()) {
                return Err(ScenarioError::DuplicatePersona {
                    scenario: self.key.clone(),
                    persona: persona.name.clone(),
                });
            }
        }
        for persona in self.roster.personas() {
            if let Some(target) = persona
                .handoff_targets
                .iter()
                .find(|t| !seen.contains(t.as_str()))
            {
                return Err(ScenarioError::UnknownHandoffTarget {
                    scenario: self.key.clone(),
                    persona: persona.name.clone(),
                    target: target.clone(),
                });
            }
        }
        Ok(())
    }
}

/// Keyed scenario definitions in insertion order.
#[derive(Debug, Clone, Default)]
pub struct ScenarioRegistry {
    scenarios: Vec<ScenarioDefinition>,
}

impl ScenarioRegistry {
    /// Builds a registry, rejecting the whole set if any definition is invalid.
    pub fn load(definitions: Vec<ScenarioDefinition>) -> Result<Self, ScenarioError> {
        let mut registry = Self::default();
        for definition in definitions {
            registry.create(definition)?;
        }
        Ok(registry)
    }

    pub fn get(&self, key: &str) -> Option<&ScenarioDefinition> {
        self.scenarios.iter().find(|s| s.key == key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn keys(&self) -> Vec<&str> {
        self.scenarios.iter().map(|s| s.key.as_str()).collect()
    }

    pub fn list(&self) -> &[ScenarioDefinition] {
        &self.scenarios
    }

    pub fn default_key(&self) -> Option<&str> {
        self.scenarios.first().map(|s| s.key.as_str())
    }

    pub fn create(&mut self, definition: ScenarioDefinition) -> Result<(), ScenarioError> {
        definition.validate()?;
        if self.contains(&definition.key) {
            return Err(ScenarioError::DuplicateKey(definition.key));
        }
        self.scenarios.push(definition);
        Ok(())
    }

    /// Replaces the definition stored under `key`. The key itself cannot change.
    pub fn update(
        &mut self,
        key: &str,
        mut definition: ScenarioDefinition,
    ) -> Result<(), ScenarioError> {
        definition.key = key.to_string();
        definition.validate()?;
        let slot = self
            .scenarios
            .iter_mut()
            .find(|s| s.key == key)
            .ok_or_else(|| ScenarioError::NotFound(key.to_string()))?;
        *slot = definition;
        Ok(())
    }

    pub fn delete(&mut self, key: &str) -> Result<ScenarioDefinition, ScenarioError> {
        let index = self
            .scenarios
            .iter()
            .position(|s| s.key == key)
            .ok_or_else(|| ScenarioError::NotFound(key.to_string()))?;
        Ok(self.scenarios.remove(index))
    }
}

/// Scenarios shipped with the service when no catalogue file is configured.
pub fn builtin_scenarios() -> Vec<ScenarioDefinition> {
    let haiku_writer = AgentPersona::new(
        "haikuWriter",
        "Ask the user for a topic, then reply with a haiku about that topic.",
    )
    .with_handoff_description("Agent that writes haikus");
    let greeter = AgentPersona::new(
        "greeter",
        "Greet the user and ask whether they would like a haiku. If so, transfer to the haiku agent.",
    )
    .with_handoff_description("Agent that greets the user")
    .with_handoff("haikuWriter");

    let authentication = AgentPersona::new(
        "authentication",
        "Greet the customer, verify their identity with phone number and date of birth, then route them.",
    )
    .with_handoff_description("Verifies the customer's identity")
    .with_tool(ToolDescriptor::new(
        "authenticate_user_information",
        "Look up a customer by phone number and date of birth",
    ))
    .with_handoff("returns")
    .with_handoff("sales")
    .with_handoff("simulatedHuman");
    let returns = AgentPersona::new(
        "returns",
        "Help the customer return a purchased item after checking the return policy.",
    )
    .with_handoff_description("Handles returns and order lookups")
    .with_tool(ToolDescriptor::new("lookupOrders", "Retrieve recent orders"))
    .with_handoff("authentication");
    let sales = AgentPersona::new(
        "sales",
        "Help the customer find products and current promotions.",
    )
    .with_handoff_description("Answers product and promotion questions")
    .with_handoff("authentication");
    let simulated_human = AgentPersona::new(
        "simulatedHuman",
        "Act as a senior human agent for escalations.",
    )
    .with_handoff_description("Escalation to a human agent")
    .with_voice("alloy")
    .with_handoff("authentication");

    vec![
        ScenarioDefinition {
            key: "simpleHandoff".to_string(),
            roster: AgentRoster::new(vec![greeter, haiku_writer]),
            company_name: "GenericHandoffInc".to_string(),
            display_name: "Simple Handoff (Haiku)".to_string(),
        },
        ScenarioDefinition {
            key: "customerServiceRetail".to_string(),
            roster: AgentRoster::new(vec![authentication, returns, sales, simulated_human]),
            company_name: "Snowy Peak Boards".to_string(),
            display_name: "Customer Service (Retail)".to_string(),
        },
    ]
}

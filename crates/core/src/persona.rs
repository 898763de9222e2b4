//! Agent personas and rosters.
//!
//! A persona is one named agent configuration that can be the active speaker in
//! a realtime session. Personas in a roster form a directed graph through their
//! handoff targets; cycles are allowed so a persona can hand back to its caller.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::BTreeSet;

/// Prefix of the function tools that request a handoff to another persona.
pub const HANDOFF_TOOL_PREFIX: &str = "transfer_to_";

/// A function tool advertised to the realtime model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// JSON schema of the arguments.
    #[serde(default = "empty_parameters")]
    pub parameters: Value,
}

fn empty_parameters() -> Value {
    json!({ "type": "object", "properties": {} })
}

impl ToolDescriptor {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters: empty_parameters(),
        }
    }

    /// Wire shape expected by the realtime `session.update` event.
    pub fn to_realtime_tool(&self) -> Value {
        json!({
            "type": "function",
            "name": self.name,
            "description": self.description,
            "parameters": self.parameters,
        })
    }
}

/// One named agent configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentPersona {
    /// Unique within a roster.
    pub name: String,
    #[serde(default)]
    pub instructions: String,
    /// Opening user turn sent on a fresh connect in place of the default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub greeting: Option<String>,
    #[serde(default = "default_voice")]
    pub voice: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub handoff_description: Option<String>,
    #[serde(default)]
    pub tools: Vec<ToolDescriptor>,
    #[serde(default)]
    pub handoff_targets: BTreeSet<String>,
}

fn default_voice() -> String {
    "sage".to_string()
}

impl AgentPersona {
    pub fn new(name: impl Into<String>, instructions: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            instructions: instructions.into(),
            greeting: None,
            voice: default_voice(),
            handoff_description: None,
            tools: Vec::new(),
            handoff_targets: BTreeSet::new(),
        }
    }

    pub fn with_handoff(mut self, target: impl Into<String>) -> Self {
        self.handoff_targets.insert(target.into());
        self
    }

    pub fn with_tool(mut self, tool: ToolDescriptor) -> Self {
        self.tools.push(tool);
        self
    }

    pub fn with_greeting(mut self, greeting: impl Into<String>) -> Self {
        self.greeting = Some(greeting.into());
        self
    }

    pub fn with_voice(mut self, voice: impl Into<String>) -> Self {
        self.voice = voice.into();
        self
    }

    pub fn with_handoff_description(mut self, description: impl Into<String>) -> Self {
        self.handoff_description = Some(description.into());
        self
    }

    /// The persona's own tools followed by one transfer tool per handoff target.
    pub fn session_tools(&self, roster: &AgentRoster) -> Vec<ToolDescriptor> {
        let mut tools = self.tools.clone();
        for target in &self.handoff_targets {
            let description = roster
                .get(target)
                .and_then(|p| p.handoff_description.clone())
                .unwrap_or_else(|| format!("Transfer the conversation to {target}"));
            tools.push(ToolDescriptor::new(
                format!("{HANDOFF_TOOL_PREFIX}{target}"),
                description,
            ));
        }
        tools
    }
}

/// Persona name addressed by a transfer tool, if `tool_name` is one.
pub fn handoff_target_of(tool_name: &str) -> Option<&str> {
    tool_name
        .strip_prefix(HANDOFF_TOOL_PREFIX)
        .filter(|target| !target.is_empty())
}

/// Ordered personas of one scenario. Position 0 is the connection entry point.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AgentRoster(Vec<AgentPersona>);

impl AgentRoster {
    pub fn new(personas: Vec<AgentPersona>) -> Self {
        Self(personas)
    }

    pub fn personas(&self) -> &[AgentPersona] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn entry(&self) -> Option<&AgentPersona> {
        self.0.first()
    }

    pub fn get(&self, name: &str) -> Option<&AgentPersona> {
        self.0.iter().find(|p| p.name == name)
    }

    pub fn position(&self, name: &str) -> Option<usize> {
        self.0.iter().position(|p| p.name == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.position(name).is_some()
    }

    pub fn names(&self) -> Vec<&str> {
        self.0.iter().map(|p| p.name.as_str()).collect()
    }

    /// Copy of the roster with the persona at `index` moved to the front.
    pub(crate) fn with_front(&self, index: usize) -> Self {
        let mut personas = self.0.clone();
        if index > 0 && index < personas.len() {
            let persona = personas.remove(index);
            personas.insert(0, persona);
        }
        Self(personas)
    }
}

impl FromIterator<AgentPersona> for AgentRoster {
    fn from_iter<I: IntoIterator<Item = AgentPersona>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

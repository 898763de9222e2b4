//! Scenario catalogue loading.

use anyhow::Context;
use handoff_core::scenario::{ScenarioDefinition, ScenarioRegistry, builtin_scenarios};
use std::path::Path;
use tracing::info;

/// Loads scenarios from a JSON array file, or the built-in set when no path is given.
pub fn load_registry(path: Option<&Path>) -> anyhow::Result<ScenarioRegistry> {
    let definitions = match path {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read scenarios from {}", path.display()))?;
            let definitions: Vec<ScenarioDefinition> = serde_json::from_str(&raw)
                .with_context(|| format!("Malformed scenarios file {}", path.display()))?;
            info!(path = %path.display(), count = definitions.len(), "Loaded scenarios from file");
            definitions
        }
        None => builtin_scenarios(),
    };
    ScenarioRegistry::load(definitions).context("Invalid scenario catalogue")
}

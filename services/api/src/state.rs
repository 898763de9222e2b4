//! Shared Application State
//!
//! This module defines the `AppState` struct, which holds the lifecycle
//! manager and the other shared resources the handlers need.

use crate::config::Config;
use handoff_core::lifecycle::ConnectionLifecycleManager;
use handoff_core::transcript::Transcript;
use std::sync::Arc;

/// The shared application state, created once at startup and passed to all handlers.
/// The scenario registry and event log are reached through the manager.
#[derive(Clone)]
pub struct AppState {
    pub manager: Arc<ConnectionLifecycleManager>,
    pub transcript: Arc<Transcript>,
    pub http: reqwest::Client,
    pub config: Arc<Config>,
}

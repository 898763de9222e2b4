//! Collaborator contracts the lifecycle manager drives: the credential endpoint
//! and the realtime transport. Implementations live in the host service.

use crate::error::CredentialError;
use crate::guardrail::{GuardrailPolicy, GuardrailVerdict};
use crate::persona::AgentRoster;
use crate::protocol::{ClientEvent, TurnDetection};
use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

#[cfg(test)]
use mockall::automock;

/// Single-use, time-bounded token needed to open a realtime session.
#[derive(Debug)]
pub struct Credential {
    value: SecretString,
}

impl Credential {
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: SecretString::from(value.into()),
        }
    }

    pub fn expose(&self) -> &str {
        self.value.expose_secret()
    }
}

/// Source of ephemeral credentials.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    async fn fetch_credential(&self) -> Result<Credential, CredentialError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
}

/// Session parameters applied by the transport when it opens the connection.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionDefaults {
    pub turn_detection: Option<TurnDetection>,
}

#[derive(Debug)]
pub struct ConnectOptions {
    /// Tags every notification raised by the connection opened with these options.
    pub epoch: u64,
    pub credential: Credential,
    /// Position 0 is the entry persona.
    pub initial_roster: AgentRoster,
    pub output_guardrail: Arc<GuardrailPolicy>,
    pub session_defaults: SessionDefaults,
}

/// Callbacks a transport raises after `connect` succeeded.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportNotification {
    ConnectionChange(ConnectionStatus),
    Handoff(String),
    /// A server event to record in the correlation log.
    ServerEvent { name: String, payload: Value },
    GuardrailTripped(GuardrailVerdict),
}

/// A notification together with the epoch of the connection that raised it.
#[derive(Debug, Clone, PartialEq)]
pub struct TransportMessage {
    pub epoch: u64,
    pub notification: TransportNotification,
}

impl TransportMessage {
    pub fn new(epoch: u64, notification: TransportNotification) -> Self {
        Self {
            epoch,
            notification,
        }
    }
}

/// The realtime connection. Only the lifecycle manager calls these.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait RealtimeTransport: Send + Sync {
    async fn connect(&self, options: ConnectOptions) -> anyhow::Result<()>;
    /// Idempotent teardown.
    fn disconnect(&self);
    /// Tears down the connection opened with `epoch`, if it is still the open one.
    fn release(&self, epoch: u64);
    /// Fire-and-forget.
    fn send_event(&self, event: ClientEvent);
    fn interrupt(&self);
    fn mute(&self, muted: bool);
}

//! Session core for a realtime voice agent with persona handoffs.
//!
//! The [`lifecycle::ConnectionLifecycleManager`] drives one connection at a time
//! through credential acquisition, transport connect, configuration and
//! handoffs. Everything transport-specific sits behind the traits in
//! [`transport`].

pub mod configurator;
pub mod error;
pub mod event_log;
pub mod guardrail;
pub mod handoff;
pub mod lifecycle;
pub mod persona;
pub mod preferences;
pub mod protocol;
pub mod scenario;
pub mod transcript;
pub mod transport;

#[cfg(test)]
pub(crate) mod testing;

pub use error::{CredentialError, SessionError};
pub use event_log::{Direction, EventCorrelationLog, LoggedEvent};
pub use guardrail::{GuardrailPolicy, GuardrailVerdict, ModerationCategory};
pub use lifecycle::{Collaborators, ConnectOutcome, ConnectionLifecycleManager, ConnectionSession};
pub use persona::{AgentPersona, AgentRoster, ToolDescriptor};
pub use scenario::{ScenarioDefinition, ScenarioError, ScenarioRegistry};
pub use transport::{
    ConnectionStatus, Credential, CredentialProvider, RealtimeTransport, TransportMessage,
    TransportNotification,
};

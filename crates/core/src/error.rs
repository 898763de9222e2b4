//! Error taxonomy for the session core.
//!
//! Every failure that can abort a connect attempt is a [`SessionError`]. Each
//! variant carries a stable event name so that the correlation log and the
//! inspection UI can classify it without string matching on messages.

use serde_json::{Value, json};

/// Outcome classes of a failed credential request.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CredentialError {
    /// The endpoint could not be reached or its body could not be read.
    #[error("Network or server communication issue: {0}")]
    Network(String),
    /// The endpoint answered with a non-success status.
    #[error("Credential endpoint returned {code}: {error}")]
    Server {
        code: u16,
        error: String,
        details: Option<String>,
    },
    /// The endpoint answered with success but no credential value.
    #[error("Session token not found in server response")]
    Missing,
}

/// Failures surfaced by the connection lifecycle.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SessionError {
    #[error("Credential request failed: {0}")]
    CredentialNetwork(String),
    #[error("Credential endpoint error {code}: {error}")]
    CredentialServer {
        code: u16,
        error: String,
        details: Option<String>,
    },
    #[error("Credential missing in endpoint response")]
    CredentialMissing,
    #[error("Transport connect failed: {0}")]
    TransportConnect(String),
    #[error("Unknown scenario '{0}'")]
    InvalidScenarioSelection(String),
    /// Recoverable: the first persona of the roster is used instead.
    #[error("Persona '{requested}' is not in the roster, using '{fallback}'")]
    InvalidPersonaSelection { requested: String, fallback: String },
    #[error("Scenario roster has no personas")]
    EmptyRoster,
}

impl SessionError {
    /// Event name used when the error is written to the correlation log.
    pub fn event_name(&self) -> &'static str {
        match self {
            SessionError::CredentialNetwork(_) => "error.credential_network",
            SessionError::CredentialServer { .. } => "error.credential_server",
            SessionError::CredentialMissing => "error.credential_missing",
            SessionError::TransportConnect(_) => "error.transport_connect",
            SessionError::InvalidScenarioSelection(_) => "error.invalid_scenario",
            SessionError::InvalidPersonaSelection { .. } => "warning.invalid_persona",
            SessionError::EmptyRoster => "error.empty_roster",
        }
    }

    /// Whether the session continues after this error.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, SessionError::InvalidPersonaSelection { .. })
    }

    /// Single user-visible line for the transcript.
    pub fn user_message(&self) -> String {
        match self {
            SessionError::CredentialServer { error, details, .. } => match details {
                Some(details) => format!("Error: {error} (Details: {details})"),
                None => format!("Error: {error}"),
            },
            SessionError::TransportConnect(_) => {
                "Error connecting to the session. Please try again.".to_string()
            }
            other => format!("Error: {other}"),
        }
    }

    /// Structured payload for the correlation log.
    pub fn payload(&self) -> Value {
        match self {
            SessionError::CredentialServer {
                code,
                error,
                details,
            } => json!({ "status": code, "error": error, "details": details }),
            SessionError::InvalidPersonaSelection {
                requested,
                fallback,
            } => json!({ "requested": requested, "fallback": fallback }),
            other => json!({ "error": other.to_string() }),
        }
    }
}

impl From<CredentialError> for SessionError {
    fn from(err: CredentialError) -> Self {
        match err {
            CredentialError::Network(message) => SessionError::CredentialNetwork(message),
            CredentialError::Server {
                code,
                error,
                details,
            } => SessionError::CredentialServer {
                code,
                error,
                details,
            },
            CredentialError::Missing => SessionError::CredentialMissing,
        }
    }
}

//! Ephemeral credentials.
//!
//! Two halves live here: [`mint_ephemeral_key`] talks to the OpenAI sessions
//! endpoint on behalf of `GET /api/session`, and [`HttpCredentialProvider`] is the
//! client side the lifecycle manager uses to call that route.

use async_trait::async_trait;
use handoff_core::error::CredentialError;
use handoff_core::transport::{Credential, CredentialProvider};
use reqwest::Client as HttpClient;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::{Value, json};
use std::time::Duration;
use tracing::{debug, instrument, warn};

#[derive(Debug, Deserialize)]
struct CredentialValue {
    value: Option<String>,
}

/// Body of a successful credential response. `client_secret` is the field
/// name used by the OpenAI sessions endpoint itself.
#[derive(Debug, Deserialize)]
struct CredentialBody {
    #[serde(alias = "client_secret")]
    credential: Option<CredentialValue>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: Option<Value>,
    details: Option<Value>,
}

fn value_to_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Object(map) => map
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| value.to_string()),
        other => other.to_string(),
    }
}

/// Maps a non-success response to [`CredentialError::Server`].
fn server_error(status: u16, body: &str) -> CredentialError {
    let parsed = serde_json::from_str::<ErrorBody>(body).ok();
    let error = parsed
        .as_ref()
        .and_then(|b| b.error.as_ref())
        .map(value_to_text)
        .unwrap_or_else(|| "Unknown server error".to_string());
    let details = parsed
        .and_then(|b| b.details)
        .filter(|d| !d.is_null())
        .map(|d| value_to_text(&d));
    CredentialError::Server {
        code: status,
        error,
        details,
    }
}

/// Extracts the credential value from a success body.
fn credential_from_body(body: &str) -> Result<Credential, CredentialError> {
    let parsed: CredentialBody = serde_json::from_str(body)
        .map_err(|e| CredentialError::Network(format!("Malformed credential response: {e}")))?;
    parsed
        .credential
        .and_then(|c| c.value)
        .filter(|v| !v.is_empty())
        .map(Credential::new)
        .ok_or(CredentialError::Missing)
}

/// Fetches credentials from the local `/api/session` route.
pub struct HttpCredentialProvider {
    http: HttpClient,
    url: String,
    timeout: Duration,
}

impl HttpCredentialProvider {
    pub fn new(http: HttpClient, url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            http,
            url: url.into(),
            timeout,
        }
    }
}

#[async_trait]
impl CredentialProvider for HttpCredentialProvider {
    #[instrument(name = "fetch_credential", skip(self), fields(url = %self.url))]
    async fn fetch_credential(&self) -> Result<Credential, CredentialError> {
        let response = self
            .http
            .get(&self.url)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| CredentialError::Network(e.to_string()))?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| CredentialError::Network(e.to_string()))?;

        if !status.is_success() {
            warn!(status = status.as_u16(), "Credential endpoint returned an error");
            return Err(server_error(status.as_u16(), &body));
        }
        debug!("Credential endpoint answered");
        credential_from_body(&body)
    }
}

/// Asks OpenAI for an ephemeral realtime key.
///
/// Returns the value on success. Failures keep the upstream status so the
/// route can pass it through.
#[instrument(name = "mint_ephemeral_key", skip(http, api_key))]
pub async fn mint_ephemeral_key(
    http: &HttpClient,
    sessions_url: &str,
    api_key: &SecretString,
    model: &str,
    timeout: Duration,
) -> Result<SecretString, CredentialError> {
    let response = http
        .post(sessions_url)
        .timeout(timeout)
        .bearer_auth(api_key.expose_secret())
        .json(&json!({ "model": model }))
        .send()
        .await
        .map_err(|e| CredentialError::Network(e.to_string()))?;
    let status = response.status();
    let body = response
        .text()
        .await
        .map_err(|e| CredentialError::Network(e.to_string()))?;

    if !status.is_success() {
        warn!(status = status.as_u16(), "OpenAI sessions endpoint rejected the request");
        return Err(server_error(status.as_u16(), &body));
    }
    let credential = credential_from_body(&body)?;
    Ok(SecretString::from(credential.expose().to_string()))
}

//! Axum Handlers for the REST API
//!
//! Control and inspection endpoints for the voice session, plus the
//! credential-minting route the session itself calls on connect. It uses
//! `utoipa` doc comments to generate OpenAPI documentation.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use handoff_core::error::{CredentialError, SessionError};
use handoff_core::scenario::{ScenarioDefinition, ScenarioError};
use secrecy::ExposeSecret;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::{
    credential::mint_ephemeral_key,
    models::{
        ConnectPayload, ConnectResponse, CredentialValue, ErrorResponse, EventResponse,
        EventsQuery, ExpandResponse, InputResponse, ScenarioPayload, SelectPayload,
        SessionStatusResponse, SessionTokenResponse, TextPayload, TogglePayload,
        TranscriptItemResponse,
    },
    state::AppState,
};

pub enum ApiError {
    BadRequest(String),
    NotFound(String),
    Conflict(String),
    /// A collaborator failed; `status` is passed through when it is meaningful.
    Upstream {
        status: StatusCode,
        error: String,
        details: Option<String>,
    },
    InternalServerError(anyhow::Error),
}

impl ApiError {
    pub fn from_session(err: SessionError) -> Self {
        match err {
            SessionError::InvalidScenarioSelection(_)
            | SessionError::InvalidPersonaSelection { .. }
            | SessionError::EmptyRoster => ApiError::BadRequest(err.to_string()),
            SessionError::CredentialServer { .. }
            | SessionError::CredentialNetwork(_)
            | SessionError::CredentialMissing
            | SessionError::TransportConnect(_) => ApiError::Upstream {
                status: StatusCode::BAD_GATEWAY,
                error: err.user_message(),
                details: Some(err.to_string()),
            },
        }
    }

    pub fn from_scenario(err: ScenarioError) -> Self {
        match err {
            ScenarioError::NotFound(_) => ApiError::NotFound(err.to_string()),
            ScenarioError::DuplicateKey(_) => ApiError::Conflict(err.to_string()),
            _ => ApiError::BadRequest(err.to_string()),
        }
    }

    fn from_credential(err: CredentialError) -> Self {
        match err {
            CredentialError::Server {
                code,
                error,
                details,
            } => ApiError::Upstream {
                status: StatusCode::from_u16(code).unwrap_or(StatusCode::BAD_GATEWAY),
                error,
                details,
            },
            CredentialError::Network(details) => ApiError::Upstream {
                status: StatusCode::BAD_GATEWAY,
                error: "Failed to reach the realtime sessions endpoint".to_string(),
                details: Some(details),
            },
            CredentialError::Missing => ApiError::Upstream {
                status: StatusCode::BAD_GATEWAY,
                error: err.to_string(),
                details: None,
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            ApiError::BadRequest(error) => (
                StatusCode::BAD_REQUEST,
                ErrorResponse {
                    error,
                    details: None,
                },
            ),
            ApiError::NotFound(error) => (
                StatusCode::NOT_FOUND,
                ErrorResponse {
                    error,
                    details: None,
                },
            ),
            ApiError::Conflict(error) => (
                StatusCode::CONFLICT,
                ErrorResponse {
                    error,
                    details: None,
                },
            ),
            ApiError::Upstream {
                status,
                error,
                details,
            } => (status, ErrorResponse { error, details }),
            ApiError::InternalServerError(err) => {
                error!("Internal Server Error: {:?}", err);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorResponse {
                        error: "An internal server error occurred.".to_string(),
                        details: None,
                    },
                )
            }
        };
        (status, Json(body)).into_response()
    }
}

impl<E> From<E> for ApiError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self::InternalServerError(err.into())
    }
}

fn status_of(state: &AppState) -> Json<SessionStatusResponse> {
    Json(state.manager.snapshot().into())
}

/// First persona of `scenario`, or empty when the scenario is unknown.
fn entry_persona(state: &AppState, scenario: &str) -> String {
    state
        .manager
        .registry()
        .read()
        .get(scenario)
        .and_then(|s| s.roster.entry().map(|p| p.name.clone()))
        .unwrap_or_default()
}

/// Mint an ephemeral realtime credential.
#[utoipa::path(
    get,
    path = "/api/session",
    responses(
        (status = 200, description = "Ephemeral credential", body = SessionTokenResponse),
        (status = 502, description = "Sessions endpoint unreachable or malformed", body = ErrorResponse)
    )
)]
pub async fn mint_session_token(
    State(state): State<Arc<AppState>>,
) -> Result<Json<SessionTokenResponse>, ApiError> {
    let key = mint_ephemeral_key(
        &state.http,
        &state.config.openai_sessions_url,
        &state.config.openai_api_key,
        &state.config.realtime_model,
        state.config.connect_timeout,
    )
    .await
    .map_err(|err| {
        warn!(error = %err, "Failed to mint ephemeral key");
        ApiError::from_credential(err)
    })?;
    Ok(Json(SessionTokenResponse {
        credential: CredentialValue {
            value: key.expose_secret().to_string(),
        },
    }))
}

/// Current connection status, selection and preferences.
#[utoipa::path(
    get,
    path = "/session",
    responses((status = 200, description = "Session snapshot", body = SessionStatusResponse))
)]
pub async fn get_session(State(state): State<Arc<AppState>>) -> Json<SessionStatusResponse> {
    status_of(&state)
}

/// Connect a new voice session.
#[utoipa::path(
    post,
    path = "/session/connect",
    request_body = ConnectPayload,
    responses(
        (status = 200, description = "Connect attempt finished", body = ConnectResponse),
        (status = 400, description = "Unknown scenario or nothing selected", body = ErrorResponse),
        (status = 502, description = "Credential or transport failure", body = ErrorResponse)
    )
)]
pub async fn connect_session(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<ConnectPayload>,
) -> Result<Json<ConnectResponse>, ApiError> {
    let outcome = match payload.scenario {
        Some(scenario) => {
            let persona = payload
                .persona
                .unwrap_or_else(|| entry_persona(&state, &scenario));
            state.manager.connect(&scenario, &persona).await
        }
        None => state.manager.connect_selected().await,
    }
    .map_err(ApiError::from_session)?;

    info!(?outcome, "Connect request handled");
    Ok(Json(ConnectResponse::new(outcome, state.manager.status())))
}

/// Disconnect the current session. Safe to call in any state.
#[utoipa::path(
    post,
    path = "/session/disconnect",
    responses((status = 200, description = "Session snapshot after disconnect", body = SessionStatusResponse))
)]
pub async fn disconnect_session(State(state): State<Arc<AppState>>) -> Json<SessionStatusResponse> {
    state.manager.disconnect();
    status_of(&state)
}

/// Select the scenario and/or entry persona for the next connect.
#[utoipa::path(
    post,
    path = "/session/select",
    request_body = SelectPayload,
    responses(
        (status = 200, description = "Selection stored", body = SessionStatusResponse),
        (status = 400, description = "Unknown scenario or empty request", body = ErrorResponse)
    )
)]
pub async fn select(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<SelectPayload>,
) -> Result<Json<SessionStatusResponse>, ApiError> {
    if payload.scenario.is_none() && payload.persona.is_none() {
        return Err(ApiError::BadRequest(
            "Provide a scenario, a persona, or both".to_string(),
        ));
    }
    if let Some(scenario) = &payload.scenario {
        state
            .manager
            .select_scenario(scenario)
            .map_err(ApiError::from_session)?;
    }
    if let Some(persona) = &payload.persona {
        state
            .manager
            .select_persona(persona)
            .map_err(ApiError::from_session)?;
    }
    Ok(status_of(&state))
}

/// Toggle push-to-talk.
#[utoipa::path(
    post,
    path = "/session/push-to-talk",
    request_body = TogglePayload,
    responses((status = 200, description = "Preference stored", body = SessionStatusResponse))
)]
pub async fn set_push_to_talk(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<TogglePayload>,
) -> Json<SessionStatusResponse> {
    state.manager.set_push_to_talk(payload.enabled);
    status_of(&state)
}

/// Toggle audio playback.
#[utoipa::path(
    post,
    path = "/session/audio-playback",
    request_body = TogglePayload,
    responses((status = 200, description = "Preference stored", body = SessionStatusResponse))
)]
pub async fn set_audio_playback(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<TogglePayload>,
) -> Json<SessionStatusResponse> {
    state.manager.set_audio_playback(payload.enabled);
    status_of(&state)
}

/// Send a typed user message to the live session.
#[utoipa::path(
    post,
    path = "/session/text",
    request_body = TextPayload,
    responses((status = 200, description = "Whether the message was sent", body = InputResponse))
)]
pub async fn send_text(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<TextPayload>,
) -> Json<InputResponse> {
    Json(InputResponse {
        sent: state.manager.send_user_text(&payload.text),
    })
}

/// Push-to-talk button pressed.
#[utoipa::path(
    post,
    path = "/session/talk/start",
    responses((status = 200, description = "Whether the press was forwarded", body = InputResponse))
)]
pub async fn talk_start(State(state): State<Arc<AppState>>) -> Json<InputResponse> {
    Json(InputResponse {
        sent: state.manager.talk_button_down(),
    })
}

/// Push-to-talk button released.
#[utoipa::path(
    post,
    path = "/session/talk/stop",
    responses((status = 200, description = "Whether the release was forwarded", body = InputResponse))
)]
pub async fn talk_stop(State(state): State<Arc<AppState>>) -> Json<InputResponse> {
    Json(InputResponse {
        sent: state.manager.talk_button_up(),
    })
}

/// List logged events, optionally for one conversation.
#[utoipa::path(
    get,
    path = "/events",
    params(EventsQuery),
    responses((status = 200, description = "Events in append order", body = [EventResponse]))
)]
pub async fn list_events(
    State(state): State<Arc<AppState>>,
    Query(query): Query<EventsQuery>,
) -> Json<Vec<EventResponse>> {
    let events = state
        .manager
        .event_log()
        .filter(query.conversation_id.as_deref())
        .into_iter()
        .map(EventResponse::from)
        .collect();
    Json(events)
}

/// Flip the expanded flag of one event.
#[utoipa::path(
    post,
    path = "/events/{id}/toggle",
    responses(
        (status = 200, description = "New expanded state", body = ExpandResponse),
        (status = 404, description = "Event not found", body = ErrorResponse)
    ),
    params(("id" = u64, Path, description = "Event ID"))
)]
pub async fn toggle_event(
    State(state): State<Arc<AppState>>,
    Path(id): Path<u64>,
) -> Result<Json<ExpandResponse>, ApiError> {
    let expanded = state
        .manager
        .event_log()
        .toggle_expand(id)
        .ok_or_else(|| ApiError::NotFound(format!("Event with id '{}' not found", id)))?;
    Ok(Json(ExpandResponse { id, expanded }))
}

/// Distinct conversation ids seen in the log.
#[utoipa::path(
    get,
    path = "/conversations",
    responses((status = 200, description = "Conversation ids, first seen first", body = [String]))
)]
pub async fn list_conversations(State(state): State<Arc<AppState>>) -> Json<Vec<String>> {
    Json(state.manager.event_log().conversation_ids())
}

/// System messages and breadcrumbs shown to the user.
#[utoipa::path(
    get,
    path = "/transcript",
    responses((status = 200, description = "Transcript items", body = [TranscriptItemResponse]))
)]
pub async fn get_transcript(State(state): State<Arc<AppState>>) -> Json<Vec<TranscriptItemResponse>> {
    Json(
        state
            .transcript
            .items()
            .into_iter()
            .map(TranscriptItemResponse::from)
            .collect(),
    )
}

/// List all scenarios.
#[utoipa::path(
    get,
    path = "/scenarios",
    responses((status = 200, description = "Scenarios in insertion order", body = [ScenarioPayload]))
)]
pub async fn list_scenarios(State(state): State<Arc<AppState>>) -> Json<Vec<ScenarioPayload>> {
    let scenarios = state
        .manager
        .registry()
        .read()
        .list()
        .iter()
        .cloned()
        .map(ScenarioPayload::from)
        .collect();
    Json(scenarios)
}

/// Add a scenario.
#[utoipa::path(
    post,
    path = "/scenarios",
    request_body = ScenarioPayload,
    responses(
        (status = 201, description = "Scenario created", body = ScenarioPayload),
        (status = 400, description = "Invalid scenario", body = ErrorResponse),
        (status = 409, description = "Key already exists", body = ErrorResponse)
    )
)]
pub async fn create_scenario(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<ScenarioPayload>,
) -> Result<impl IntoResponse, ApiError> {
    state
        .manager
        .create_scenario(ScenarioDefinition::from(payload.clone()))
        .map_err(ApiError::from_scenario)?;
    Ok((StatusCode::CREATED, Json(payload)))
}

/// Replace a scenario. The key in the path wins over the body.
#[utoipa::path(
    put,
    path = "/scenarios/{key}",
    request_body = ScenarioPayload,
    responses(
        (status = 200, description = "Scenario updated", body = ScenarioPayload),
        (status = 400, description = "Invalid scenario", body = ErrorResponse),
        (status = 404, description = "Scenario not found", body = ErrorResponse)
    ),
    params(("key" = String, Path, description = "Scenario key"))
)]
pub async fn update_scenario(
    State(state): State<Arc<AppState>>,
    Path(key): Path<String>,
    Json(mut payload): Json<ScenarioPayload>,
) -> Result<Json<ScenarioPayload>, ApiError> {
    payload.key = key.clone();
    state
        .manager
        .update_scenario(&key, ScenarioDefinition::from(payload.clone()))
        .map_err(ApiError::from_scenario)?;
    Ok(Json(payload))
}

/// Delete a scenario.
#[utoipa::path(
    delete,
    path = "/scenarios/{key}",
    responses(
        (status = 204, description = "Scenario deleted"),
        (status = 404, description = "Scenario not found", body = ErrorResponse)
    ),
    params(("key" = String, Path, description = "Scenario key"))
)]
pub async fn delete_scenario(
    State(state): State<Arc<AppState>>,
    Path(key): Path<String>,
) -> Result<StatusCode, ApiError> {
    state
        .manager
        .delete_scenario(&key)
        .map_err(ApiError::from_scenario)?;
    Ok(StatusCode::NO_CONTENT)
}

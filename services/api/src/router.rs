//! Axum Router Configuration
//!
//! This module defines the complete HTTP routing for the application,
//! including the credential route, the session control API, the inspection
//! endpoints and the OpenAPI documentation.

use crate::{
    handlers,
    models::{
        ConnectPayload, ConnectResponse, ConnectResult, CredentialValue, ErrorResponse,
        EventResponse, ExpandResponse, InputResponse, ScenarioPayload, SelectPayload,
        SessionStatus, SessionStatusResponse, SessionTokenResponse, TextPayload, TogglePayload,
        TranscriptItemResponse,
    },
    state::AppState,
};

use axum::{
    Router,
    routing::{get, post, put},
};
use std::sync::Arc;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::mint_session_token,
        handlers::get_session,
        handlers::connect_session,
        handlers::disconnect_session,
        handlers::select,
        handlers::set_push_to_talk,
        handlers::set_audio_playback,
        handlers::send_text,
        handlers::talk_start,
        handlers::talk_stop,
        handlers::list_events,
        handlers::toggle_event,
        handlers::list_conversations,
        handlers::get_transcript,
        handlers::list_scenarios,
        handlers::create_scenario,
        handlers::update_scenario,
        handlers::delete_scenario,
    ),
    components(
        schemas(
            SessionStatus, SessionStatusResponse, ConnectPayload, ConnectResponse, ConnectResult,
            SelectPayload, TogglePayload, TextPayload, InputResponse, EventResponse,
            ExpandResponse, TranscriptItemResponse, ScenarioPayload, SessionTokenResponse,
            CredentialValue, ErrorResponse
        )
    ),
    tags(
        (name = "Handoff API", description = "Realtime voice session control and inspection")
    )
)]
pub struct ApiDoc;

/// Creates the main Axum router for the application.
pub fn create_router(app_state: Arc<AppState>) -> Router {
    let api_router = Router::new()
        .route("/api/session", get(handlers::mint_session_token))
        .route("/session", get(handlers::get_session))
        .route("/session/connect", post(handlers::connect_session))
        .route("/session/disconnect", post(handlers::disconnect_session))
        .route("/session/select", post(handlers::select))
        .route("/session/push-to-talk", post(handlers::set_push_to_talk))
        .route("/session/audio-playback", post(handlers::set_audio_playback))
        .route("/session/text", post(handlers::send_text))
        .route("/session/talk/start", post(handlers::talk_start))
        .route("/session/talk/stop", post(handlers::talk_stop))
        .route("/events", get(handlers::list_events))
        .route("/events/{id}/toggle", post(handlers::toggle_event))
        .route("/conversations", get(handlers::list_conversations))
        .route("/transcript", get(handlers::get_transcript))
        .route(
            "/scenarios",
            get(handlers::list_scenarios).post(handlers::create_scenario),
        )
        .route(
            "/scenarios/{key}",
            put(handlers::update_scenario).delete(handlers::delete_scenario),
        )
        // Apply the state ONLY to this group of routes.
        .with_state(app_state);

    Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .merge(api_router)
}

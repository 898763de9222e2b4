//! Handoff API Library Crate
//!
//! The host service for the session core: environment configuration, the
//! credential route and client, the OpenAI Realtime transport, file-backed
//! preferences, scenario loading, and the axum control/inspection API. The
//! `api` binary is a thin wrapper around this library.

pub mod config;
pub mod credential;
pub mod handlers;
pub mod models;
pub mod preferences;
pub mod realtime;
pub mod router;
pub mod scenarios;
pub mod state;

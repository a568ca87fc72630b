//! antwort: an OpenAI-compatible Responses API server.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Json},
    Router,
};
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tower_http::cors::{Any, CorsLayer};

pub mod backend;
pub mod config;
pub mod models;
pub mod store;
pub mod tokens;
pub mod web;

use backend::InferenceBackend;
use store::ConversationStore;
use web::responses::ResponsesEngine;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ApiError {
    #[error("{message}")]
    BadRequest {
        param: Option<String>,
        message: String,
    },

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    ServiceUnavailable(String),

    #[error("Internal server error")]
    InternalServerError,
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        ApiError::BadRequest {
            param: None,
            message: message.into(),
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::BadRequest { .. } => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::InternalServerError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    #[serde(rename = "type")]
    error_type: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    code: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    param: Option<String>,
    message: String,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: ErrorBody,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let status = self.status_code();
        let message = self.to_string();
        let (error_type, code, param) = match self {
            ApiError::BadRequest { param, .. } => ("invalid_request_error", None, param),
            ApiError::NotFound(_) => ("invalid_request_error", Some("not_found"), None),
            ApiError::ServiceUnavailable(_) => ("server_error", Some("backend_unavailable"), None),
            ApiError::InternalServerError => ("server_error", None, None),
        };
        (
            status,
            Json(ErrorResponse {
                error: ErrorBody {
                    error_type,
                    code,
                    param,
                    message,
                },
            }),
        )
            .into_response()
    }
}

pub struct AppState {
    pub engine: Arc<ResponsesEngine>,
    pub backend: Arc<dyn InferenceBackend>,
    pub store: Arc<dyn ConversationStore>,
}

impl AppState {
    pub fn new(
        backend: Arc<dyn InferenceBackend>,
        store: Arc<dyn ConversationStore>,
        engine_config: web::responses::EngineConfig,
    ) -> Self {
        let engine = Arc::new(ResponsesEngine::new(
            backend.clone(),
            store.clone(),
            engine_config,
        ));
        Self {
            engine,
            backend,
            store,
        }
    }
}

/// Build the full HTTP application.
pub fn app(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    web::router(state).layer(cors)
}

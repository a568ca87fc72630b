use crate::{
    web::responses::{constants::OBJECT_TYPE_LIST, constants::OBJECT_TYPE_MODEL, error_mapping},
    ApiError, AppState,
};
use axum::{extract::State, routing::get, Json, Router};
use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Clone, Serialize)]
pub struct ModelObject {
    pub id: String,
    pub object: &'static str,
    pub created: i64,
    pub owned_by: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ModelList {
    pub object: &'static str,
    pub data: Vec<ModelObject>,
}

pub fn router(app_state: Arc<AppState>) -> Router<()> {
    Router::new()
        .route("/v1/models", get(list_models))
        .with_state(app_state)
}

/// GET /v1/models - Model identifiers offered by the configured backend
async fn list_models(State(state): State<Arc<AppState>>) -> Result<Json<ModelList>, ApiError> {
    debug!("Listing models from backend {}", state.backend.name());
    let ids = state
        .backend
        .list_models()
        .await
        .map_err(error_mapping::map_backend_error)?;

    let created = Utc::now().timestamp();
    let owned_by = state.backend.name().to_string();
    Ok(Json(ModelList {
        object: OBJECT_TYPE_LIST,
        data: ids
            .into_iter()
            .map(|id| ModelObject {
                id,
                object: OBJECT_TYPE_MODEL,
                created,
                owned_by: owned_by.clone(),
            })
            .collect(),
    }))
}

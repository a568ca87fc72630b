//! HTTP handlers for the Responses API

use crate::{
    web::responses::{
        constants::OBJECT_TYPE_LIST,
        error_mapping,
        events::to_sse_event,
        pagination::Paginator,
        types::{InputItemList, ListQuery, ResponseList, ResponsesCreateRequest},
    },
    ApiError, AppState,
};
use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    response::{
        sse::{KeepAlive, Sse},
        IntoResponse, Json,
    },
    routing::{get, post},
    Router,
};
use futures::StreamExt;
use std::convert::Infallible;
use std::sync::Arc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, trace};

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/v1/responses", post(create_response).get(list_responses))
        .route("/v1/responses/:id", get(get_response))
        .route("/v1/responses/:id/input_items", get(list_input_items))
        .route("/v1/responses/:id/cancel", post(cancel_response))
        .with_state(state)
}

/// POST /v1/responses - Create a response, blocking or streamed
async fn create_response(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<axum::response::Response, ApiError> {
    let body: ResponsesCreateRequest = serde_json::from_slice(&body).map_err(|e| {
        debug!("Invalid request body: {}", e);
        ApiError::bad_request(format!("invalid request body: {}", e))
    })?;
    trace!("Create response request: {:?}", body);

    if body.stream {
        let rx = state
            .engine
            .create_streaming(body)
            .await
            .map_err(error_mapping::map_responses_error)?;
        let stream =
            ReceiverStream::new(rx).map(|event| Ok::<_, Infallible>(to_sse_event(&event)));
        Ok(Sse::new(stream)
            .keep_alive(KeepAlive::default())
            .into_response())
    } else {
        let response = state
            .engine
            .create_blocking(body)
            .await
            .map_err(error_mapping::map_responses_error)?;
        Ok(Json(response).into_response())
    }
}

/// GET /v1/responses - List stored responses
async fn list_responses(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ListQuery>,
) -> Result<Json<ResponseList>, ApiError> {
    let limit =
        Paginator::resolve_limit(params.limit).map_err(error_mapping::map_responses_error)?;
    let order = Paginator::resolve_order(params.order.as_deref())
        .map_err(error_mapping::map_responses_error)?;

    let responses = state
        .store
        .list()
        .await
        .map_err(error_mapping::map_store_error)?;
    debug!("Listing {} stored responses", responses.len());

    let responses = Paginator::apply_order(responses, order);
    let responses = Paginator::apply_cursor(responses, params.after.as_deref(), |r| r.id.as_str())
        .map_err(error_mapping::map_responses_error)?;
    let (data, has_more) = Paginator::paginate(responses, limit);
    let (first_id, last_id) = Paginator::get_cursor_ids(&data, |r| r.id.clone());

    Ok(Json(ResponseList {
        object: OBJECT_TYPE_LIST,
        data,
        first_id,
        last_id,
        has_more,
    }))
}

/// GET /v1/responses/{id} - Retrieve a stored response
async fn get_response(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    debug!("Retrieving response {}", id);
    let response = state
        .engine
        .get(&id)
        .await
        .map_err(error_mapping::map_responses_error)?;
    Ok(Json(response))
}

/// GET /v1/responses/{id}/input_items - List the turn's own input items
async fn list_input_items(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(params): Query<ListQuery>,
) -> Result<Json<InputItemList>, ApiError> {
    let limit =
        Paginator::resolve_limit(params.limit).map_err(error_mapping::map_responses_error)?;
    let order = Paginator::resolve_order(params.order.as_deref())
        .map_err(error_mapping::map_responses_error)?;

    let response = state
        .engine
        .get(&id)
        .await
        .map_err(error_mapping::map_responses_error)?;

    let items = Paginator::apply_order(response.input.clone(), order);
    let items = Paginator::apply_cursor(items, params.after.as_deref(), |item| item.id())
        .map_err(error_mapping::map_responses_error)?;
    let (data, has_more) = Paginator::paginate(items, limit);
    let (first_id, last_id) = Paginator::get_cursor_ids(&data, |item| item.id().to_string());

    Ok(Json(InputItemList {
        object: OBJECT_TYPE_LIST,
        data,
        first_id,
        last_id,
        has_more,
    }))
}

/// POST /v1/responses/{id}/cancel - Cancel an in-progress response
async fn cancel_response(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    debug!("Cancelling response {}", id);
    let response = state
        .engine
        .cancel(&id)
        .await
        .map_err(error_mapping::map_responses_error)?;
    Ok(Json(response))
}

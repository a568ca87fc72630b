//! Error mapping utilities for the Responses API

use crate::{backend::BackendError, models::responses::ResponsesError, store::StoreError, ApiError};
use tracing::{debug, error, warn};

/// Centralized error mapping utilities
///
/// Converts domain errors into the HTTP surface's [`ApiError`], logging the
/// unexpected ones. Expected conditions such as unknown ids stay at `debug`.
pub mod error_mapping {
    use super::*;

    /// Map engine errors surfaced before or outside generation
    pub fn map_responses_error(e: ResponsesError) -> ApiError {
        match e {
            ResponsesError::Validation { param, message } => {
                debug!("Rejected request: {}", message);
                ApiError::BadRequest { param, message }
            }
            ResponsesError::PreviousResponseNotFound(_) | ResponsesError::ResponseNotFound(_) => {
                debug!("{}", e);
                ApiError::NotFound(e.to_string())
            }
            ResponsesError::Backend(_) => {
                warn!("{}", e);
                ApiError::ServiceUnavailable(e.to_string())
            }
            _ => {
                error!("Responses error: {:?}", e);
                ApiError::InternalServerError
            }
        }
    }

    /// Map backend errors from calls made outside a turn (model listing)
    pub fn map_backend_error(e: BackendError) -> ApiError {
        warn!("Backend error: {}", e);
        ApiError::ServiceUnavailable(e.to_string())
    }

    /// Map conversation store errors to API errors
    pub fn map_store_error(e: StoreError) -> ApiError {
        match e {
            StoreError::NotFound(_) => ApiError::NotFound(e.to_string()),
            _ => {
                error!("Conversation store error: {:?}", e);
                ApiError::InternalServerError
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_returns_bad_request_with_param() {
        let api_error =
            error_mapping::map_responses_error(ResponsesError::validation("input", "empty"));
        assert_eq!(
            api_error,
            ApiError::BadRequest {
                param: Some("input".to_string()),
                message: "empty".to_string()
            }
        );
    }

    #[test]
    fn test_missing_responses_return_not_found() {
        let api_error = error_mapping::map_responses_error(
            ResponsesError::PreviousResponseNotFound("resp_x".into()),
        );
        assert!(matches!(api_error, ApiError::NotFound(_)));
        let api_error = error_mapping::map_store_error(StoreError::NotFound("resp_x".into()));
        assert!(matches!(api_error, ApiError::NotFound(_)));
    }

    #[test]
    fn test_backend_errors_are_unavailable() {
        let api_error = error_mapping::map_backend_error(BackendError::Timeout(
            std::time::Duration::from_secs(1),
        ));
        assert_eq!(
            api_error.status_code(),
            axum::http::StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[test]
    fn test_internal_errors_hide_details() {
        let api_error = error_mapping::map_store_error(StoreError::Closed);
        assert_eq!(api_error, ApiError::InternalServerError);
        let api_error = error_mapping::map_responses_error(ResponsesError::Store("boom".into()));
        assert_eq!(api_error, ApiError::InternalServerError);
    }
}

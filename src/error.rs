use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;
use uuid::Uuid;

use crate::store::{StoreConflict, StoreError};

#[derive(Debug, Error)]
pub enum AppError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    /// Unexpected persistence failure. The detail is logged next to the
    /// correlation id and never sent to the client.
    #[error("system fault {correlation_id}")]
    SystemFault { correlation_id: Uuid },

    #[error("internal error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, AppError::Conflict(_))
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { entity, id } => AppError::NotFound(format!("{entity} {id} not found")),
            StoreError::Conflict(conflict) => AppError::Conflict(conflict.to_string()),
            StoreError::Duplicate { entity, id } => {
                AppError::Conflict(format!("{entity} {id} already exists"))
            }
            other => {
                let correlation_id = Uuid::new_v4();
                tracing::error!(%correlation_id, error = %other, "store operation failed");
                AppError::SystemFault { correlation_id }
            }
        }
    }
}

impl From<StoreConflict> for AppError {
    fn from(conflict: StoreConflict) -> Self {
        AppError::Conflict(conflict.to_string())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, body) = match &self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, json!({ "error": msg })),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, json!({ "error": msg })),
            AppError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, json!({ "error": msg })),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, json!({ "error": msg })),
            AppError::UpstreamUnavailable(msg) => {
                (StatusCode::SERVICE_UNAVAILABLE, json!({ "error": msg }))
            }
            AppError::SystemFault { correlation_id } => (
                StatusCode::INTERNAL_SERVER_ERROR,
                json!({
                    "error": "temporary failure, try again",
                    "correlation_id": correlation_id,
                }),
            ),
            AppError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, json!({ "error": msg })),
        };

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use axum::http::StatusCode;
    use axum::response::IntoResponse;
    use serde_json::Value;

    use super::AppError;
    use crate::models::request::RequestStatus;
    use crate::store::{StoreConflict, StoreError};

    async fn render(err: AppError) -> (StatusCode, Value) {
        let response = err.into_response();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn database_failure_renders_as_500_with_correlation_id() {
        let err = AppError::from(StoreError::Database(sqlx::Error::PoolTimedOut));
        let AppError::SystemFault { correlation_id } = err else {
            panic!("expected a system fault, got {err:?}");
        };

        let (status, body) = render(err).await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["correlation_id"], correlation_id.to_string());
        assert_eq!(body["error"], "temporary failure, try again");
        assert!(!body.to_string().contains("pool"));
    }

    #[tokio::test]
    async fn store_conflict_renders_as_409() {
        let err = AppError::from(StoreError::Conflict(StoreConflict::RequestUnavailable(
            RequestStatus::Assigned,
        )));

        let (status, body) = render(err).await;

        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error"], "request no longer available: already assigned");
    }
}

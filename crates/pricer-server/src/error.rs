// Error responses for the HTTP surface.

use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use pricer_core::PredictionError;
use serde::Serialize;
use tracing::{error, warn};

/// Body of every error response: `{"detail": "<message>"}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorBody {
    pub detail: String,
}

/// A request that could not be priced. Always rendered as `400 Bad Request`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiError {
    pub kind: &'static str,
    pub detail: String,
}

impl ApiError {
    pub fn bad_request(kind: &'static str, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: detail.into(),
        }
    }
}

impl From<PredictionError> for ApiError {
    fn from(err: PredictionError) -> Self {
        let kind = err.kind();
        match err {
            PredictionError::Validation(_) => warn!(kind, "rejected request: {}", err),
            PredictionError::Transform(_) | PredictionError::Inference(_) => {
                error!(kind, "prediction failed: {}", err)
            }
        }
        Self::bad_request(kind, err.to_string())
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        let detail = rejection.body_text();
        warn!(kind = "body", "rejected request body: {}", detail);
        Self::bad_request("body", detail)
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind, self.detail)
    }
}

impl std::error::Error for ApiError {}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            detail: self.detail,
        };
        (StatusCode::BAD_REQUEST, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pricer_core::request::ValidationError;

    #[test]
    fn prediction_errors_keep_message_and_kind() {
        let err = PredictionError::Validation(ValidationError {
            field: "Area".into(),
            message: "must be a positive number, got -1".into(),
        });
        let api: ApiError = err.into();
        assert_eq!(api.kind, "validation");
        assert_eq!(
            api.detail,
            "invalid value for `Area`: must be a positive number, got -1"
        );
    }

    #[test]
    fn renders_as_bad_request() {
        let response = ApiError::bad_request("body", "oops").into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}

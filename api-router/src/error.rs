use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use common::error::AppError;
use serde::Serialize;
use thiserror::Error;

/// The single place the internal error taxonomy becomes HTTP statuses.
#[derive(Error, Debug, Serialize, Clone)]
pub enum ApiError {
    #[error("Internal server error")]
    InternalError(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Rate limited")]
    RateLimited { retry_after_secs: u64 },

    #[error("Upstream dependency failed: {0}")]
    BadGateway(String),
}

impl From<AppError> for ApiError {
    fn from(err: AppError) -> Self {
        match err {
            AppError::NotFound(msg) => Self::NotFound(msg),
            AppError::Validation(msg) => Self::ValidationError(msg),
            AppError::Auth(msg) => Self::Forbidden(msg),
            AppError::Config(msg) => Self::ValidationError(msg),
            AppError::RateLimited { retry_after_secs } => Self::RateLimited { retry_after_secs },
            AppError::ExternalService(msg)
            | AppError::VectorDb(msg)
            | AppError::LlmExhausted(msg) => {
                tracing::error!("dependency error: {msg}");
                Self::BadGateway(msg)
            }
            AppError::Cancelled => Self::ValidationError("operation cancelled".to_string()),
            other => {
                tracing::error!("Internal error: {other:?}");
                Self::InternalError("Internal server error".to_string())
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            Self::InternalError(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal server error".to_string(),
            ),
            Self::ValidationError(message) => (StatusCode::BAD_REQUEST, message.clone()),
            Self::NotFound(message) => (StatusCode::NOT_FOUND, message.clone()),
            Self::Unauthorized(message) => (StatusCode::UNAUTHORIZED, message.clone()),
            Self::Forbidden(message) => (StatusCode::FORBIDDEN, message.clone()),
            Self::RateLimited { retry_after_secs } => (
                StatusCode::TOO_MANY_REQUESTS,
                format!("rate limited, retry after {retry_after_secs}s"),
            ),
            Self::BadGateway(message) => (StatusCode::BAD_GATEWAY, message.clone()),
        };

        let mut response = (
            status,
            Json(ErrorResponse {
                error: message,
                status: "error".to_string(),
            }),
        )
            .into_response();

        if let Self::RateLimited { retry_after_secs } = self {
            if let Ok(value) = HeaderValue::from_str(&retry_after_secs.to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }
        response
    }
}

#[derive(Serialize, Debug)]
struct ErrorResponse {
    error: String,
    status: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status_of(error: ApiError) -> StatusCode {
        error.into_response().status()
    }

    #[test]
    fn taxonomy_maps_to_statuses() {
        assert_eq!(
            status_of(ApiError::from(AppError::NotFound("ticket".into()))),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status_of(ApiError::from(AppError::Validation("bad".into()))),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_of(ApiError::from(AppError::Auth("tenant mismatch".into()))),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            status_of(ApiError::from(AppError::ExternalService("down".into()))),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            status_of(ApiError::from(AppError::InternalError("x".into()))),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn rate_limit_carries_retry_after() {
        let response =
            ApiError::from(AppError::RateLimited { retry_after_secs: 7 }).into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(
            response
                .headers()
                .get(header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok()),
            Some("7")
        );
    }

    #[test]
    fn internal_errors_hide_details() {
        let error = ApiError::from(AppError::InternalError("db password wrong".into()));
        assert_eq!(error.to_string(), "Internal server error");
    }
}

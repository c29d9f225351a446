//! HTTP错误响应

use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use lis_core::LisError;
use serde_json::json;

/// 包装 `LisError` 以实现 `IntoResponse`
#[derive(Debug)]
pub struct ApiError(pub LisError);

pub type ApiResult<T> = std::result::Result<T, ApiError>;

impl From<LisError> for ApiError {
    fn from(err: LisError) -> Self {
        ApiError(err)
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            LisError::NotFound(_) => StatusCode::NOT_FOUND,
            LisError::InvalidTransition { .. } | LisError::Conflict(_) => StatusCode::CONFLICT,
            LisError::Validation(_) => StatusCode::BAD_REQUEST,
            LisError::Unauthenticated(_) => StatusCode::UNAUTHORIZED,
            LisError::Permission(_) => StatusCode::FORBIDDEN,
            LisError::Config(_)
            | LisError::Database(_)
            | LisError::Notification(_)
            | LisError::Serialization(_)
            | LisError::Io(_)
            | LisError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!("Request failed: {}", self.0);
        } else {
            tracing::debug!("Request rejected with {}: {}", status, self.0);
        }

        let body = Json(json!({
            "success": false,
            "error": true,
            "message": self.0.to_string(),
            "status": status.as_u16()
        }));

        (status, body).into_response()
    }
}

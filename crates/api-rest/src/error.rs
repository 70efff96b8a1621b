//! Translation of core outcomes into HTTP responses.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use ckd_core::{CkdError, FieldError};
use serde::Serialize;

/// `{"status":"failure","errors":[...]}`
#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct FailureBody {
    pub status: &'static str,
    pub errors: Vec<FieldError>,
}

/// A rejected request. Wraps the core error so handlers can use `?`.
#[derive(Debug)]
pub struct ApiError(pub CkdError);

impl From<CkdError> for ApiError {
    fn from(err: CkdError) -> Self {
        Self(err)
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            CkdError::Unauthenticated => StatusCode::UNAUTHORIZED,
            CkdError::Forbidden(_) => StatusCode::FORBIDDEN,
            CkdError::ValidationFailed(_) | CkdError::Contract(_) => StatusCode::BAD_REQUEST,
            CkdError::NotFound(_) => StatusCode::NOT_FOUND,
            CkdError::Conflict(_) => StatusCode::CONFLICT,
            CkdError::UpstreamFailure(_) => StatusCode::BAD_GATEWAY,
            CkdError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let errors = match self.0 {
            CkdError::ValidationFailed(errors) => errors,
            CkdError::Store(e) => {
                tracing::error!("store failure: {:?}", e);
                vec![FieldError::new("request", "Internal error")]
            }
            other => vec![FieldError::new("request", other.to_string())],
        };

        (
            status,
            Json(FailureBody {
                status: "failure",
                errors,
            }),
        )
            .into_response()
    }
}

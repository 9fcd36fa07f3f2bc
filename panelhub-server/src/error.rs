//! Operator-facing error responses
//!
//! Every handler error becomes a `{"error": ...}` JSON body. Core
//! errors keep their message; the status code reflects who is at fault:
//! missing configuration is the operator's to fix (400), panel and
//! network failures are upstream (502), database failures are ours
//! (500).

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

use panelhub_core::db::DbError;
use panelhub_core::marketplace::MarketplaceError;
use panelhub_core::PanelError;

pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(serde_json::json!({ "error": self.message })),
        )
            .into_response()
    }
}

impl From<PanelError> for ApiError {
    fn from(err: PanelError) -> Self {
        let status = match &err {
            PanelError::Configuration(_)
            | PanelError::CredentialMissing(_)
            | PanelError::AllocationResolution => StatusCode::BAD_REQUEST,
            PanelError::Transport(_)
            | PanelError::Remote(_)
            | PanelError::InvalidResponse(_) => StatusCode::BAD_GATEWAY,
        };
        Self::new(status, err.to_string())
    }
}

impl From<DbError> for ApiError {
    fn from(err: DbError) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
    }
}

impl From<MarketplaceError> for ApiError {
    fn from(err: MarketplaceError) -> Self {
        let status = match &err {
            MarketplaceError::UnknownCatalog(_) | MarketplaceError::NoDownload(_) => {
                StatusCode::BAD_REQUEST
            }
            _ => StatusCode::BAD_GATEWAY,
        };
        Self::new(status, err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use panelhub_core::CredentialScope;

    #[test]
    fn test_panel_error_statuses() {
        let err: ApiError = PanelError::Configuration("panel URL is not set".into()).into();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);

        let err: ApiError = PanelError::CredentialMissing(CredentialScope::Client).into();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
        assert!(err.message.contains("client"));

        let err: ApiError = PanelError::Remote("Server is suspended.".into()).into();
        assert_eq!(err.status, StatusCode::BAD_GATEWAY);
        assert!(err.message.contains("Server is suspended."));
    }
}

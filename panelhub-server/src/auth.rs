//! Operator login and session middleware
//!
//! One admin account, created through a one-time registration that
//! closes itself once an admin exists. Login issues an opaque bearer
//! token stored with a 24-hour expiry; the middleware checks it on
//! every protected route.

use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::Response;
use axum::Json;
use chrono::Utc;
use serde::{Deserialize, Serialize};

use panelhub_core::auth::{self, SESSION_TTL_SECS};

use crate::error::ApiError;
use crate::state::SharedState;

#[derive(Deserialize)]
pub struct CredentialsRequest {
    username: String,
    password: String,
}

#[derive(Serialize)]
pub struct LoginResponse {
    token: String,
    expires: i64,
}

/// One-time admin registration; refused once an admin exists.
pub async fn register_handler(
    State(state): State<SharedState>,
    Json(req): Json<CredentialsRequest>,
) -> Result<(StatusCode, Json<serde_json::Value>), ApiError> {
    if state.db.has_admin()? {
        return Err(ApiError::new(
            StatusCode::FORBIDDEN,
            "Registration disabled",
        ));
    }
    if req.username.is_empty() || req.password.is_empty() {
        return Err(ApiError::bad_request("username and password are required"));
    }

    let hash = auth::hash_password(&req.password)
        .map_err(|e| ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    state.db.create_admin(&req.username, &hash)?;

    tracing::info!("admin account {} created", req.username);
    Ok((
        StatusCode::CREATED,
        Json(serde_json::json!({ "message": "Admin account created" })),
    ))
}

pub async fn login_handler(
    State(state): State<SharedState>,
    Json(req): Json<CredentialsRequest>,
) -> Result<Json<LoginResponse>, ApiError> {
    let record = state
        .db
        .user_credentials(&req.username)?
        .ok_or_else(|| ApiError::unauthorized("Invalid credentials"))?;

    auth::verify_password(&req.password, &record.password_hash)
        .map_err(|_| ApiError::unauthorized("Invalid credentials"))?;

    let token = auth::generate_session_token();
    let expires = Utc::now().timestamp() + SESSION_TTL_SECS;
    state.db.insert_session(&token, record.id, expires)?;

    Ok(Json(LoginResponse { token, expires }))
}

/// Bearer-token middleware for the protected API surface.
pub async fn require_session(
    State(state): State<SharedState>,
    req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = bearer_token(
        req.headers()
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok()),
    )
    .ok_or_else(|| ApiError::unauthorized("Missing token"))?;

    let user = state.db.session_user(token, Utc::now().timestamp())?;
    if user.is_none() {
        return Err(ApiError::unauthorized("Invalid or expired token"));
    }

    Ok(next.run(req).await)
}

/// Extract the token from an `Authorization: Bearer <token>` header.
fn bearer_token(header: Option<&str>) -> Option<&str> {
    header?.strip_prefix("Bearer ").filter(|t| !t.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bearer_token_extraction() {
        assert_eq!(bearer_token(Some("Bearer abc123")), Some("abc123"));
        assert_eq!(bearer_token(Some("Bearer ")), None);
        assert_eq!(bearer_token(Some("Basic abc123")), None);
        assert_eq!(bearer_token(Some("abc123")), None);
        assert_eq!(bearer_token(None), None);
    }
}

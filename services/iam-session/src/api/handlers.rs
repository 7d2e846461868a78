//! 请求处理器

use axum::{
    Json,
    extract::{Path, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use iam_auth_core::Principal;
use iam_common::{SessionId, UserId};
use serde_json::json;

use super::dto::{
    LoginRequest, RefreshRequest, RevokeAllResponse, SessionResponse, SuccessResponse,
    TokenResponse,
};
use super::extract::{AuthPrincipal, BearerToken, ClientMeta};
use super::state::AppState;
use crate::domain::SessionSummary;
use crate::error::{AuthError, AuthResult};

pub async fn login(
    State(state): State<AppState>,
    client: ClientMeta,
    Json(request): Json<LoginRequest>,
) -> AuthResult<Json<TokenResponse>> {
    let command = request.into_command(client.ip, client.user_agent)?;
    let pair = state.lifecycle.login(command).await?;
    Ok(Json(pair.into()))
}

pub async fn refresh(
    State(state): State<AppState>,
    Json(request): Json<RefreshRequest>,
) -> AuthResult<Json<TokenResponse>> {
    let pair = state.lifecycle.refresh(request.refresh_token.trim()).await?;
    Ok(Json(pair.into()))
}

pub async fn logout(
    State(state): State<AppState>,
    BearerToken(token): BearerToken,
) -> AuthResult<Json<SuccessResponse>> {
    state.lifecycle.logout(&token).await?;
    Ok(Json(SuccessResponse { success: true }))
}

pub async fn me(AuthPrincipal(principal): AuthPrincipal) -> Json<Principal> {
    Json(principal)
}

pub async fn list_sessions(
    State(state): State<AppState>,
    AuthPrincipal(principal): AuthPrincipal,
) -> AuthResult<Json<Vec<SessionResponse>>> {
    let sessions = state.lifecycle.list_sessions(&principal).await?;
    Ok(Json(
        sessions
            .iter()
            .map(|record| SessionResponse {
                current: record.session_id == principal.session_id,
                session: SessionSummary::from(record),
            })
            .collect(),
    ))
}

fn parse_session_id(raw: &str) -> AuthResult<SessionId> {
    SessionId::from_string(raw).map_err(|_| AuthError::InvalidRequest(format!("invalid session id: {}", raw)))
}

fn parse_user_id(raw: &str) -> AuthResult<UserId> {
    UserId::from_string(raw).map_err(|_| AuthError::InvalidRequest(format!("invalid user id: {}", raw)))
}

pub async fn terminate_session(
    State(state): State<AppState>,
    AuthPrincipal(principal): AuthPrincipal,
    Path(session_id): Path<String>,
) -> AuthResult<StatusCode> {
    let session_id = parse_session_id(&session_id)?;
    state
        .lifecycle
        .terminate_session(&principal, &session_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn revoke_user_sessions(
    State(state): State<AppState>,
    AuthPrincipal(principal): AuthPrincipal,
    Path(user_id): Path<String>,
) -> AuthResult<Json<RevokeAllResponse>> {
    let user_id = parse_user_id(&user_id)?;
    let revoked = state
        .lifecycle
        .revoke_user_sessions(&principal, &user_id)
        .await?;
    Ok(Json(RevokeAllResponse { revoked }))
}

pub async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

pub async fn metrics(State(state): State<AppState>) -> Response {
    match &state.metrics {
        Some(handle) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            handle.render(),
        )
            .into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

//! 路由

use axum::{
    Router, middleware,
    routing::{delete, get, post},
};
use tower_http::trace::TraceLayer;

use super::handlers;
use super::middleware::{auth_middleware, rate_limit_after_auth, rate_limit_before_auth};
use super::state::AppState;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/auth/login", post(handlers::login))
        .route("/auth/refresh", post(handlers::refresh))
        .route("/auth/logout", post(handlers::logout))
        .route("/auth/me", get(handlers::me))
        .route("/auth/sessions", get(handlers::list_sessions))
        .route("/auth/sessions/{session_id}", delete(handlers::terminate_session))
        .route(
            "/auth/users/{user_id}/sessions",
            delete(handlers::revoke_user_sessions),
        )
        .route("/health", get(handlers::health))
        .route("/metrics", get(handlers::metrics))
        // 后添加的层先执行：ip 规则先于认证，user 规则在认证之后才能拿到主体
        .layer(middleware::from_fn_with_state(
            state.clone(),
            rate_limit_after_auth,
        ))
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            rate_limit_before_auth,
        ))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

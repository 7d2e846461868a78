//! 认证中间件
//!
//! 公开路径直接放行；其余请求必须携带有效的访问令牌，
//! 校验结果以 `Principal` 写入请求扩展，由处理器显式提取。

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use iam_errors::{AppError, AppResult};
use regex::Regex;
use tracing::debug;

use crate::api::extract::bearer_token;
use crate::api::state::AppState;
use crate::error::AuthError;

/// 内置公开路径
pub const BUILTIN_PUBLIC_PATHS: [&str; 5] = [
    "/auth/login",
    "/auth/refresh",
    "/auth/logout",
    "/health",
    "/metrics",
];

/// 将路径通配符编译为正则
///
/// `*` 匹配单个路径段，`**` 匹配任意后缀。
pub fn compile_path_pattern(pattern: &str) -> AppResult<Regex> {
    let mut regex = String::with_capacity(pattern.len() + 8);
    regex.push('^');

    let mut chars = pattern.trim().chars().peekable();
    while let Some(c) = chars.next() {
        if c == '*' {
            if chars.peek() == Some(&'*') {
                chars.next();
                regex.push_str(".*");
            } else {
                regex.push_str("[^/]*");
            }
        } else {
            regex.push_str(&regex::escape(&c.to_string()));
        }
    }
    regex.push('$');

    Regex::new(&regex)
        .map_err(|e| AppError::validation(format!("Invalid path pattern '{}': {}", pattern, e)))
}

/// 免认证路径集合
#[derive(Debug, Clone)]
pub struct PublicPaths {
    patterns: Vec<Regex>,
}

impl PublicPaths {
    /// 内置路径加上配置的路径
    pub fn new(extra: &[String]) -> AppResult<Self> {
        let patterns = BUILTIN_PUBLIC_PATHS
            .iter()
            .copied()
            .chain(extra.iter().map(String::as_str))
            .map(compile_path_pattern)
            .collect::<AppResult<Vec<_>>>()?;
        Ok(Self { patterns })
    }

    pub fn matches(&self, path: &str) -> bool {
        self.patterns.iter().any(|p| p.is_match(path))
    }
}

pub async fn auth_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Response {
    if state.public_paths.matches(request.uri().path()) {
        return next.run(request).await;
    }

    let Some(token) = bearer_token(request.headers()) else {
        debug!(path = %request.uri().path(), "Missing bearer token");
        return AuthError::InvalidAccessToken.into_response();
    };

    match state.lifecycle.validate(token).await {
        Ok(principal) => {
            request.extensions_mut().insert(principal);
            next.run(request).await
        }
        Err(e) => {
            debug!(path = %request.uri().path(), error = %e, "Access token rejected");
            e.into_response()
        }
    }
}

//! 服务错误定义

use axum::{
    Json,
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use iam_common::DeviceType;
use iam_errors::{AppError, ProblemDetails};
use serde_json::Value;
use thiserror::Error;
use tracing::{error, warn};

use crate::domain::SessionSummary;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Account is locked")]
    AccountLocked { retry_after_secs: Option<u64> },

    #[error("Invalid username or password")]
    InvalidCredentials,

    #[error("Too many successful logins, try again later")]
    TooManyLoginAttempts { retry_after_secs: Option<u64> },

    #[error("Maximum number of {device_type} sessions reached")]
    TooManyDevices {
        device_type: DeviceType,
        sessions: Vec<SessionSummary>,
    },

    #[error("Invalid access token")]
    InvalidAccessToken,

    #[error("Invalid refresh token")]
    InvalidRefreshToken,

    #[error("Rate limit exceeded")]
    RateLimited { retry_after_secs: u64 },

    #[error("Authentication infrastructure unavailable")]
    InfrastructureUnavailable(String),

    #[error("Invalid captcha")]
    InvalidCaptcha,

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Session not found")]
    SessionNotFound,

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type AuthResult<T> = Result<T, AuthError>;

impl AuthError {
    /// 稳定的错误码
    pub fn code(&self) -> &'static str {
        match self {
            Self::AccountLocked { .. } => "ACCOUNT_LOCKED",
            Self::InvalidCredentials => "INVALID_CREDENTIALS",
            Self::TooManyLoginAttempts { .. } => "TOO_MANY_LOGIN_ATTEMPTS",
            Self::TooManyDevices { .. } => "TOO_MANY_DEVICES",
            Self::InvalidAccessToken => "INVALID_ACCESS_TOKEN",
            Self::InvalidRefreshToken => "INVALID_REFRESH_TOKEN",
            Self::RateLimited { .. } => "RATE_LIMITED",
            Self::InfrastructureUnavailable(_) => "AUTH_INFRASTRUCTURE_UNAVAILABLE",
            Self::InvalidCaptcha => "INVALID_CAPTCHA",
            Self::Forbidden(_) => "FORBIDDEN",
            Self::SessionNotFound => "SESSION_NOT_FOUND",
            Self::InvalidRequest(_) => "INVALID_REQUEST",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::AccountLocked { .. } => StatusCode::LOCKED,
            Self::InvalidCredentials | Self::InvalidAccessToken | Self::InvalidRefreshToken => {
                StatusCode::UNAUTHORIZED
            }
            Self::TooManyLoginAttempts { .. }
            | Self::TooManyDevices { .. }
            | Self::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::InfrastructureUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::InvalidCaptcha | Self::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::SessionNotFound => StatusCode::NOT_FOUND,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// 建议客户端等待的秒数
    pub fn retry_after(&self) -> Option<u64> {
        match self {
            Self::AccountLocked { retry_after_secs }
            | Self::TooManyLoginAttempts { retry_after_secs } => *retry_after_secs,
            Self::RateLimited { retry_after_secs } => Some(*retry_after_secs),
            _ => None,
        }
    }

    fn title(&self) -> &'static str {
        match self {
            Self::AccountLocked { .. } => "Account Locked",
            Self::InvalidCredentials => "Authentication Failed",
            Self::TooManyLoginAttempts { .. } | Self::RateLimited { .. } => "Too Many Requests",
            Self::TooManyDevices { .. } => "Too Many Devices",
            Self::InvalidAccessToken | Self::InvalidRefreshToken => "Invalid Token",
            Self::InfrastructureUnavailable(_) => "Service Unavailable",
            Self::InvalidCaptcha | Self::InvalidRequest(_) => "Bad Request",
            Self::Forbidden(_) => "Forbidden",
            Self::SessionNotFound => "Session Not Found",
            Self::Internal(_) => "Internal Server Error",
        }
    }

    /// 转换为 Problem Details
    ///
    /// 基础设施与内部错误的细节只写日志，不返回给调用方。
    pub fn to_problem_details(&self) -> ProblemDetails {
        let detail = match self {
            Self::InfrastructureUnavailable(_) => {
                "The authentication store could not be reached".to_string()
            }
            Self::Internal(_) => "An unexpected error occurred".to_string(),
            other => other.to_string(),
        };

        let mut problem =
            ProblemDetails::new(self.code(), self.title(), self.status_code().as_u16(), detail);
        if let Some(retry_after) = self.retry_after() {
            problem = problem.with_extension("retryAfter", retry_after);
        }
        if let Self::TooManyDevices { sessions, .. } = self {
            let sessions = serde_json::to_value(sessions).unwrap_or(Value::Null);
            problem = problem.with_extension("sessions", sessions);
        }
        problem
    }
}

impl From<AppError> for AuthError {
    fn from(err: AppError) -> Self {
        match err {
            AppError::ExternalService(msg) => {
                warn!(error = %msg, "Shared store unavailable, failing closed");
                Self::InfrastructureUnavailable(msg)
            }
            AppError::Unauthorized(_) => Self::InvalidAccessToken,
            AppError::Validation(msg) => Self::InvalidRequest(msg),
            AppError::Internal(msg) => Self::Internal(msg),
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        match &self {
            Self::Internal(msg) => error!(error = %msg, "Request failed with internal error"),
            Self::InfrastructureUnavailable(msg) => {
                warn!(error = %msg, "Request failed: auth infrastructure unavailable")
            }
            _ => {}
        }

        let status = self.status_code();
        let retry_after = self.retry_after();
        let mut response = (status, Json(self.to_problem_details())).into_response();

        let headers = response.headers_mut();
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/problem+json"),
        );
        if let Some(secs) = retry_after {
            headers.insert(header::RETRY_AFTER, HeaderValue::from(secs));
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(
            AuthError::AccountLocked {
                retry_after_secs: Some(60)
            }
            .status_code(),
            StatusCode::LOCKED
        );
        assert_eq!(AuthError::InvalidCredentials.status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            AuthError::TooManyDevices {
                device_type: DeviceType::Web,
                sessions: vec![]
            }
            .status_code(),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(
            AuthError::InfrastructureUnavailable("timeout".into()).status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[test]
    fn test_store_outage_maps_to_infrastructure_unavailable() {
        let err: AuthError = AppError::external_service("Redis get timed out").into();
        assert!(matches!(err, AuthError::InfrastructureUnavailable(_)));
        assert_eq!(err.code(), "AUTH_INFRASTRUCTURE_UNAVAILABLE");

        let err: AuthError = AppError::internal("bad field").into();
        assert!(matches!(err, AuthError::Internal(_)));
    }

    #[test]
    fn test_problem_details_carry_retry_after() {
        let problem = AuthError::AccountLocked {
            retry_after_secs: Some(840),
        }
        .to_problem_details();

        assert_eq!(problem.code, "ACCOUNT_LOCKED");
        assert_eq!(problem.status, 423);
        assert_eq!(problem.extensions["retryAfter"], 840);
    }

    #[test]
    fn test_infrastructure_detail_is_hidden() {
        let problem =
            AuthError::InfrastructureUnavailable("redis://10.0.0.5 refused".into()).to_problem_details();
        assert!(!problem.detail.contains("10.0.0.5"));
    }

    #[tokio::test]
    async fn test_into_response_sets_headers() {
        let response = AuthError::RateLimited {
            retry_after_secs: 30,
        }
        .into_response();

        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()[header::RETRY_AFTER], "30");
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "application/problem+json"
        );
    }
}

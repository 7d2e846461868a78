//! 登录审计 trait 定义

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use iam_errors::AppResult;
use serde::Serialize;

/// 登录事件
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginEvent {
    pub username: String,
    pub ip: String,
    pub user_agent: String,
    pub success: bool,
    /// 失败原因（错误码）
    pub reason: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

impl LoginEvent {
    pub fn success(username: impl Into<String>, ip: impl Into<String>, user_agent: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            ip: ip.into(),
            user_agent: user_agent.into(),
            success: true,
            reason: None,
            occurred_at: Utc::now(),
        }
    }

    pub fn failure(
        username: impl Into<String>,
        ip: impl Into<String>,
        user_agent: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            username: username.into(),
            ip: ip.into(),
            user_agent: user_agent.into(),
            success: false,
            reason: Some(reason.into()),
            occurred_at: Utc::now(),
        }
    }
}

/// 登录审计输出
///
/// 审计失败不影响登录结果。
#[async_trait]
pub trait LoginAuditSink: Send + Sync {
    async fn record_login_event(&self, event: LoginEvent) -> AppResult<()>;
}

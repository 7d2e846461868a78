//! 登录审计输出到日志

use async_trait::async_trait;
use iam_errors::AppResult;
use iam_ports::{LoginAuditSink, LoginEvent};
use tracing::{info, warn};

/// 以结构化日志记录登录事件，target 为 `audit`
#[derive(Debug, Clone, Default)]
pub struct TracingAuditSink;

#[async_trait]
impl LoginAuditSink for TracingAuditSink {
    async fn record_login_event(&self, event: LoginEvent) -> AppResult<()> {
        if event.success {
            info!(
                target: "audit",
                username = %event.username,
                ip = %event.ip,
                user_agent = %event.user_agent,
                occurred_at = %event.occurred_at,
                "Login succeeded"
            );
        } else {
            warn!(
                target: "audit",
                username = %event.username,
                ip = %event.ip,
                user_agent = %event.user_agent,
                reason = event.reason.as_deref().unwrap_or("unknown"),
                occurred_at = %event.occurred_at,
                "Login failed"
            );
        }
        Ok(())
    }
}

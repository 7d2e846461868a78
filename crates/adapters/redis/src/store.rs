//! Redis 存储句柄

use std::future::Future;
use std::time::Duration;

use iam_errors::{AppError, AppResult};
use redis::RedisResult;
use redis::aio::ConnectionManager;
use tracing::debug;

use crate::keys::KeySpace;

/// 默认单次命令超时
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_millis(250);

/// 基于 Redis 的共享存储
///
/// 同时实现计数器、会话与验证码存储。每次命令都有超时，连接错误与超时
/// 统一转换为 `AppError::ExternalService`，由上层决定放行还是拒绝。
#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
    pub(crate) keys: KeySpace,
    command_timeout: Duration,
}

impl RedisStore {
    pub fn new(conn: ConnectionManager) -> Self {
        Self {
            conn,
            keys: KeySpace::default(),
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
        }
    }

    /// 设置键前缀
    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.keys = KeySpace::new(prefix);
        self
    }

    /// 设置单次命令超时
    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    pub fn keys(&self) -> &KeySpace {
        &self.keys
    }

    pub(crate) fn connection(&self) -> ConnectionManager {
        self.conn.clone()
    }

    /// 在超时限制内执行一次 Redis 调用
    pub(crate) async fn run<T, F>(&self, operation: &str, fut: F) -> AppResult<T>
    where
        F: Future<Output = RedisResult<T>>,
    {
        match tokio::time::timeout(self.command_timeout, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => {
                debug!(operation, error = %e, "Redis command failed");
                Err(AppError::external_service(format!(
                    "Redis {} failed: {}",
                    operation, e
                )))
            }
            Err(_) => {
                debug!(operation, timeout_ms = self.command_timeout.as_millis() as u64, "Redis command timed out");
                Err(AppError::external_service(format!(
                    "Redis {} timed out after {}ms",
                    operation,
                    self.command_timeout.as_millis()
                )))
            }
        }
    }

    /// 健康检查
    pub async fn ping(&self) -> AppResult<()> {
        let mut conn = self.connection();
        let _: String = self
            .run("ping", redis::cmd("PING").query_async(&mut conn))
            .await?;
        Ok(())
    }
}

/// 毫秒数，至少为 1
pub(crate) fn millis(duration: Duration) -> u64 {
    (duration.as_millis() as u64).max(1)
}

//! Redis 连接管理

use iam_common::{RetryConfig, is_retryable_error, with_retry};
use iam_errors::{AppError, AppResult};
use redis::aio::ConnectionManager;
use redis::{Client, RedisError};
use tracing::info;

fn is_transient(error: &RedisError) -> bool {
    error.is_io_error()
        || error.is_connection_refusal()
        || error.is_timeout()
        || is_retryable_error(&error.to_string())
}

/// 创建 Redis 连接管理器
///
/// 启动阶段的连接失败按 `retry` 做指数退避重试。
pub async fn create_connection_manager(
    url: &str,
    retry: &RetryConfig,
) -> AppResult<ConnectionManager> {
    let client = Client::open(url)
        .map_err(|e| AppError::internal(format!("Failed to create Redis client: {}", e)))?;

    let manager = with_retry(
        retry,
        "redis_connect",
        || ConnectionManager::new(client.clone()),
        is_transient,
    )
    .await
    .map_err(|e| {
        AppError::external_service(format!("Failed to create Redis connection manager: {}", e))
    })?;

    info!("Redis connection manager established");
    Ok(manager)
}

/// 检查 Redis 连接
pub async fn check_connection(conn: &mut ConnectionManager) -> AppResult<()> {
    redis::cmd("PING")
        .query_async::<String>(conn)
        .await
        .map_err(|e| AppError::external_service(format!("Redis health check failed: {}", e)))?;
    Ok(())
}

//! 通用限流器
//!
//! 固定窗口，"读-判断-递增"在共享存储端原子完成。共享存储不可用时放行。

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use iam_common::UserId;
use iam_ports::CounterStore;
use metrics::counter;
use tracing::{debug, warn};

/// 限流键及其命名空间
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RateLimitKey {
    Ip(String),
    User(String),
    Custom(String),
}

impl RateLimitKey {
    pub fn user(user_id: &UserId) -> Self {
        Self::User(user_id.to_string())
    }

    pub fn scope(&self) -> &'static str {
        match self {
            Self::Ip(_) => "ip",
            Self::User(_) => "user",
            Self::Custom(_) => "custom",
        }
    }

    /// 计数器键
    pub fn storage_key(&self) -> String {
        format!("ratelimit:{}", self)
    }
}

impl fmt::Display for RateLimitKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ip(ip) => write!(f, "ip:{}", ip),
            Self::User(key) => write!(f, "user:{}", key),
            Self::Custom(key) => write!(f, "custom:{}", key),
        }
    }
}

/// 限流结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub limit: u64,
    pub remaining: u64,
    /// 窗口剩余秒数
    pub retry_after_secs: u64,
    /// 共享存储不可用而放行
    pub degraded: bool,
}

impl RateLimitDecision {
    pub fn is_limited(&self) -> bool {
        !self.allowed
    }
}

/// 限流器
#[derive(Clone)]
pub struct RateLimiter {
    store: Arc<dyn CounterStore>,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn CounterStore>) -> Self {
        Self { store }
    }

    /// 申请一次配额
    pub async fn try_acquire(&self, key: &RateLimitKey, max_count: u64, window_secs: u64) -> bool {
        self.acquire(key, max_count, window_secs).await.allowed
    }

    /// 申请一次配额并返回窗口信息
    pub async fn acquire(
        &self,
        key: &RateLimitKey,
        max_count: u64,
        window_secs: u64,
    ) -> RateLimitDecision {
        let window = Duration::from_secs(window_secs.max(1));

        match self
            .store
            .acquire_permit(&key.storage_key(), max_count, window)
            .await
        {
            Ok(permit) => {
                if !permit.allowed {
                    counter!("rate_limit_rejected_total", "scope" => key.scope()).increment(1);
                    debug!(key = %key, count = permit.count, "Rate limit exceeded");
                }
                RateLimitDecision {
                    allowed: permit.allowed,
                    limit: max_count,
                    remaining: max_count.saturating_sub(permit.count),
                    retry_after_secs: permit.retry_after_secs,
                    degraded: false,
                }
            }
            Err(e) => {
                counter!("rate_limit_fail_open_total", "scope" => key.scope()).increment(1);
                warn!(key = %key, error = %e, "Rate limit check failed, allowing request (fail-open)");
                RateLimitDecision {
                    allowed: true,
                    limit: max_count,
                    remaining: max_count,
                    retry_after_secs: window.as_secs(),
                    degraded: true,
                }
            }
        }
    }
}

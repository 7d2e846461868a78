//! 计数器存储 trait 定义

use async_trait::async_trait;
use iam_errors::AppResult;
use std::time::Duration;

/// 一次配额申请的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PermitDecision {
    /// 是否允许
    pub allowed: bool,
    /// 当前窗口内已发放的配额
    pub count: u64,
    /// 窗口剩余时间（秒）
    pub retry_after_secs: u64,
}

/// 计数器存储
///
/// 所有"读-判断-写"组合必须在存储端原子执行，多个进程并发调用时不得超发。
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// 固定窗口配额申请
    ///
    /// 首次申请创建计数器并设置窗口 TTL；计数达到 `max` 后拒绝且不再递增；
    /// 窗口过期后由 TTL 自然重置。
    async fn acquire_permit(&self, key: &str, max: u64, window: Duration)
        -> AppResult<PermitDecision>;

    /// 递增计数器并把 TTL 重置为 `ttl`（每次递增都会延长）
    async fn increment_sliding(&self, key: &str, ttl: Duration) -> AppResult<u64>;

    /// 获取计数，不存在时为 0
    async fn count(&self, key: &str) -> AppResult<u64>;

    /// 剩余 TTL，键不存在或无过期时间时为 None
    async fn ttl(&self, key: &str) -> AppResult<Option<Duration>>;

    /// 删除计数器
    async fn reset(&self, key: &str) -> AppResult<()>;

    /// 滑动窗口内事件数未达到 `max` 时记录一次事件
    ///
    /// 检查与写入在存储端一步完成。返回事件 ID（可用于撤销），已达上限时返回 None。
    async fn try_record_event(&self, key: &str, max: u64, window: Duration)
        -> AppResult<Option<String>>;

    /// 撤销 `try_record_event` 记录的事件，事件已过期或不存在时不做任何事
    async fn remove_event(&self, key: &str, event_id: &str) -> AppResult<()>;
}

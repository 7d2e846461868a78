//! 会话存储 trait 定义

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use iam_common::{DeviceType, SessionId, UserId};
use iam_errors::AppResult;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// 会话记录
///
/// 生命周期等于刷新令牌的有效期，存储端以 TTL 自动回收。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub session_id: SessionId,
    pub user_id: UserId,
    pub username: String,
    pub device_type: DeviceType,
    pub device_name: String,
    pub ip: String,
    pub region: Option<String>,
    pub user_agent: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    /// 当前刷新令牌指纹
    pub refresh_token_id: String,
    /// 当前访问令牌 ID
    pub access_token_id: String,
    pub access_expires_at: DateTime<Utc>,
    /// 登录时的角色与权限，刷新时据此重新签发访问令牌
    pub roles: Vec<String>,
    pub permissions: Vec<String>,
}

impl SessionRecord {
    /// 距离会话过期的剩余时间
    pub fn remaining_ttl(&self, now: DateTime<Utc>) -> Duration {
        (self.expires_at - now).to_std().unwrap_or(Duration::ZERO)
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

/// 超出并发上限时的处理方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverflowPolicy {
    RejectNew,
    EvictOldest,
}

/// 单个 (用户, 设备类型) 的并发会话上限
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceLimit {
    pub max_sessions: u32,
    pub policy: OverflowPolicy,
}

/// 准入结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    /// 已写入；`evicted` 为被踢出的会话（按创建时间从早到晚）
    Admitted { evicted: Vec<SessionId> },
    /// 已达上限，未写入任何数据
    Rejected { active: Vec<SessionId> },
}

/// 按刷新令牌查找会话的结果
#[derive(Debug, Clone, PartialEq)]
pub enum RefreshLookup {
    Active(SessionRecord),
    /// 该刷新令牌已被轮换掉，再次出现视为重放
    Retired(SessionId),
    Unknown,
}

/// 刷新令牌轮换
#[derive(Debug, Clone)]
pub struct RefreshRotation {
    pub session_id: SessionId,
    pub old_refresh_id: String,
    pub new_refresh_id: String,
    pub new_access_token_id: String,
    pub new_access_expires_at: DateTime<Utc>,
}

/// 访问令牌在存储端的状态
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccessState {
    Active { user_id: UserId },
    /// 令牌 ID 在黑名单中
    Revoked,
    /// 会话记录不存在（登出、踢出或过期）
    SessionMissing,
}

/// 会话存储
///
/// 同时涉及会话记录和设备索引的修改必须原子生效。索引中的过期条目
/// 是自愈的：任何依据索引的判断都会先回查会话记录。
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// 写入会话记录、刷新令牌指针和设备索引，不检查并发上限
    async fn create(&self, session: &SessionRecord) -> AppResult<SessionId>;

    /// 在并发上限内原子写入会话
    ///
    /// 检查上限、踢出旧会话（加入黑名单并删除）与写入新会话在同一步完成。
    async fn create_bounded(&self, session: &SessionRecord, limit: DeviceLimit)
        -> AppResult<Admission>;

    async fn get(&self, session_id: &SessionId) -> AppResult<Option<SessionRecord>>;

    async fn find_by_refresh(&self, refresh_id: &str) -> AppResult<RefreshLookup>;

    /// 比较并轮换刷新令牌；当前刷新令牌已不是 `old_refresh_id` 时返回 false
    ///
    /// 旧访问令牌会被加入黑名单，旧刷新令牌被标记为已退役。
    async fn rotate_refresh(&self, rotation: &RefreshRotation) -> AppResult<bool>;

    /// 仅更换访问令牌，不改变会话 ID 与刷新令牌；会话不存在时返回 false
    async fn touch(
        &self,
        session_id: &SessionId,
        access_token_id: &str,
        access_expires_at: DateTime<Utc>,
    ) -> AppResult<bool>;

    /// 删除会话及其全部索引，并把当前访问令牌加入黑名单；返回会话是否存在
    async fn delete(&self, session_id: &SessionId) -> AppResult<bool>;

    /// 仅当 `access_token_id` 仍是会话当前的访问令牌时删除会话；返回是否删除
    async fn delete_current(&self, session_id: &SessionId, access_token_id: &str)
        -> AppResult<bool>;

    /// 按创建时间从早到晚列出用户的会话
    async fn list_by_user(
        &self,
        user_id: &UserId,
        device_type: Option<DeviceType>,
    ) -> AppResult<Vec<SessionRecord>>;

    /// 一次往返检查访问令牌：黑名单与会话是否存在
    async fn inspect_access(&self, session_id: &SessionId, token_id: &str)
        -> AppResult<AccessState>;

    async fn blacklist(&self, token_id: &str, ttl: Duration) -> AppResult<()>;

    async fn is_blacklisted(&self, token_id: &str) -> AppResult<bool>;
}

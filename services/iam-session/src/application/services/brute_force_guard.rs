//! 暴力破解防护
//!
//! 按用户名统计连续失败次数。每次失败都会把锁定时间重新计满，
//! 只有完整登录成功后才清零。

use std::sync::Arc;
use std::time::Duration;

use iam_ports::CounterStore;
use tracing::{info, warn};

use crate::domain::normalize_username;
use crate::error::{AuthError, AuthResult};

#[derive(Clone)]
pub struct BruteForceGuard {
    store: Arc<dyn CounterStore>,
    max_failed_attempts: u32,
    lockout: Duration,
}

impl BruteForceGuard {
    /// `max_failed_attempts` 为 0 时不做限制
    pub fn new(store: Arc<dyn CounterStore>, max_failed_attempts: u32, lockout: Duration) -> Self {
        Self {
            store,
            max_failed_attempts,
            lockout,
        }
    }

    fn key(username: &str) -> String {
        format!("login:failed:{}", normalize_username(username))
    }

    /// 检查账户是否因连续失败被锁定
    ///
    /// 存储不可用时返回 `InfrastructureUnavailable`。
    pub async fn allow_login(&self, username: &str) -> AuthResult<()> {
        if self.max_failed_attempts == 0 {
            return Ok(());
        }

        let key = Self::key(username);
        let failures = self.store.count(&key).await?;
        if failures < u64::from(self.max_failed_attempts) {
            return Ok(());
        }

        let retry_after_secs = self
            .store
            .ttl(&key)
            .await?
            .map(|ttl| ttl.as_secs().max(1))
            .unwrap_or_else(|| self.lockout.as_secs());

        warn!(
            username = %username,
            failures,
            retry_after_secs,
            "Login rejected: account locked"
        );
        Err(AuthError::AccountLocked {
            retry_after_secs: Some(retry_after_secs),
        })
    }

    /// 记录一次失败，返回当前连续失败次数
    pub async fn record_failure(&self, username: &str) -> AuthResult<u64> {
        let failures = self
            .store
            .increment_sliding(&Self::key(username), self.lockout)
            .await?;

        if self.max_failed_attempts > 0 && failures >= u64::from(self.max_failed_attempts) {
            warn!(
                username = %username,
                failures,
                lockout_secs = self.lockout.as_secs(),
                "Account locked after repeated login failures"
            );
        }
        Ok(failures)
    }

    /// 清除失败记录
    pub async fn clear_record(&self, username: &str) -> AuthResult<()> {
        self.store.reset(&Self::key(username)).await?;
        info!(username = %username, "Login failure record cleared");
        Ok(())
    }

    /// 当前连续失败次数
    pub async fn failed_attempts(&self, username: &str) -> AuthResult<u64> {
        Ok(self.store.count(&Self::key(username)).await?)
    }
}

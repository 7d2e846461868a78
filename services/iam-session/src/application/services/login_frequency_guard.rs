//! 登录频率防护
//!
//! 统计滑动窗口内的成功登录次数，与失败计数相互独立。
//! 检查与记录在存储端一步完成，并发登录不会突破上限。

use std::sync::Arc;
use std::time::Duration;

use iam_ports::CounterStore;
use tracing::{debug, warn};

use crate::domain::normalize_username;
use crate::error::{AuthError, AuthResult};

/// 一次登录占用的频率配额
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginSlot {
    key: String,
    event_id: String,
}

#[derive(Clone)]
pub struct LoginFrequencyGuard {
    store: Arc<dyn CounterStore>,
    max_logins: u32,
    window: Duration,
}

impl LoginFrequencyGuard {
    /// `max_logins` 为 0 时不做限制
    pub fn new(store: Arc<dyn CounterStore>, max_logins: u32, window: Duration) -> Self {
        Self {
            store,
            max_logins,
            window,
        }
    }

    fn key(username: &str) -> String {
        format!("login:success:{}", normalize_username(username))
    }

    /// 检查并记录一次成功登录
    ///
    /// 窗口内成功登录次数已达上限时返回 `TooManyLoginAttempts`，否则占用一个配额。
    /// 登录随后失败时应调用 [`release`](Self::release) 归还。不限制时返回 None。
    pub async fn check_frequency_limit(&self, username: &str) -> AuthResult<Option<LoginSlot>> {
        if self.max_logins == 0 {
            return Ok(None);
        }

        let key = Self::key(username);
        let Some(event_id) = self
            .store
            .try_record_event(&key, u64::from(self.max_logins), self.window)
            .await?
        else {
            warn!(
                username = %username,
                max_logins = self.max_logins,
                window_secs = self.window.as_secs(),
                "Login rejected: too many successful logins"
            );
            return Err(AuthError::TooManyLoginAttempts {
                retry_after_secs: Some(self.window.as_secs()),
            });
        };

        debug!(username = %username, "Successful login recorded");
        Ok(Some(LoginSlot { key, event_id }))
    }

    /// 归还未能完成的登录占用的配额
    pub async fn release(&self, slot: LoginSlot) -> AuthResult<()> {
        self.store.remove_event(&slot.key, &slot.event_id).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use iam_adapter_memory::MemoryStore;

    #[tokio::test(start_paused = true)]
    async fn test_limit_within_window() {
        let guard = LoginFrequencyGuard::new(
            Arc::new(MemoryStore::new()),
            2,
            Duration::from_secs(60),
        );

        assert!(guard.check_frequency_limit("alice").await.unwrap().is_some());
        assert!(guard.check_frequency_limit("alice").await.unwrap().is_some());

        let err = guard.check_frequency_limit("Alice").await.unwrap_err();
        assert!(matches!(
            err,
            AuthError::TooManyLoginAttempts {
                retry_after_secs: Some(60)
            }
        ));

        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(guard.check_frequency_limit("alice").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_release_returns_slot() {
        let guard = LoginFrequencyGuard::new(
            Arc::new(MemoryStore::new()),
            1,
            Duration::from_secs(60),
        );

        let slot = guard.check_frequency_limit("bob").await.unwrap().unwrap();
        assert!(guard.check_frequency_limit("bob").await.is_err());

        guard.release(slot).await.unwrap();
        assert!(guard.check_frequency_limit("bob").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_zero_disables_guard() {
        let guard = LoginFrequencyGuard::new(
            Arc::new(MemoryStore::new()),
            0,
            Duration::from_secs(60),
        );
        for _ in 0..5 {
            assert!(guard.check_frequency_limit("alice").await.unwrap().is_none());
        }
    }
}

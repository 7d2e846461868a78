//! 设备并发会话限制
//!
//! 上限按 (用户, 设备类型) 计算。检查、踢出与写入由会话存储原子完成，
//! 并发登录不会同时看到"还剩一个位置"。

use std::collections::HashMap;
use std::sync::Arc;

use iam_common::{DeviceType, SessionId};
use iam_config::{AdmissionPolicy, SessionConfig};
use iam_ports::{Admission, DeviceLimit, OverflowPolicy, SessionRecord, SessionStore};
use metrics::counter;
use tracing::{info, warn};

use crate::error::AuthResult;

/// 准入结果
#[derive(Debug, Clone, PartialEq)]
pub enum AdmissionOutcome {
    /// 新会话已写入；`evicted` 为被踢出的旧会话
    Admitted { evicted: Vec<SessionId> },
    /// 已达上限，新会话未写入
    Rejected { existing: Vec<SessionRecord> },
}

#[derive(Clone)]
pub struct DeviceLimiter {
    sessions: Arc<dyn SessionStore>,
    policy: OverflowPolicy,
    default_max_sessions: u32,
    max_sessions: HashMap<DeviceType, u32>,
}

impl DeviceLimiter {
    pub fn new(
        sessions: Arc<dyn SessionStore>,
        policy: OverflowPolicy,
        default_max_sessions: u32,
        max_sessions: HashMap<DeviceType, u32>,
    ) -> Self {
        Self {
            sessions,
            policy,
            default_max_sessions,
            max_sessions,
        }
    }

    /// 从配置构建；无法识别的设备类型键被忽略
    pub fn from_config(sessions: Arc<dyn SessionStore>, config: &SessionConfig) -> Self {
        let policy = match config.policy {
            AdmissionPolicy::RejectNew => OverflowPolicy::RejectNew,
            AdmissionPolicy::EvictOldest => OverflowPolicy::EvictOldest,
        };

        let mut max_sessions = HashMap::new();
        for (key, max) in &config.max_sessions {
            match key.parse::<DeviceType>() {
                Ok(device_type) => {
                    max_sessions.insert(device_type, *max);
                }
                Err(e) => warn!(key = %key, error = %e, "Ignoring session cap for unknown device type"),
            }
        }

        Self::new(sessions, policy, config.default_max_sessions, max_sessions)
    }

    pub fn policy(&self) -> OverflowPolicy {
        self.policy
    }

    /// 设备类型的并发上限，0 表示不限制
    pub fn limit_for(&self, device_type: DeviceType) -> u32 {
        self.max_sessions
            .get(&device_type)
            .copied()
            .unwrap_or(self.default_max_sessions)
    }

    /// 在上限内写入新会话
    pub async fn admit(&self, session: &SessionRecord) -> AuthResult<AdmissionOutcome> {
        let max_sessions = self.limit_for(session.device_type);
        if max_sessions == 0 {
            self.sessions.create(session).await?;
            return Ok(AdmissionOutcome::Admitted { evicted: vec![] });
        }

        let limit = DeviceLimit {
            max_sessions,
            policy: self.policy,
        };
        match self.sessions.create_bounded(session, limit).await? {
            Admission::Admitted { evicted } => {
                for victim in &evicted {
                    counter!("auth_session_evicted_total", "device_type" => session.device_type.as_str())
                        .increment(1);
                    warn!(
                        user_id = %session.user_id,
                        device_type = %session.device_type,
                        evicted_session_id = %victim,
                        new_session_id = %session.session_id,
                        "Session evicted by device concurrency limit"
                    );
                }
                Ok(AdmissionOutcome::Admitted { evicted })
            }
            Admission::Rejected { active } => {
                info!(
                    user_id = %session.user_id,
                    device_type = %session.device_type,
                    active = active.len(),
                    max_sessions,
                    "Login rejected by device concurrency limit"
                );
                let existing = self
                    .sessions
                    .list_by_user(&session.user_id, Some(session.device_type))
                    .await?;
                Ok(AdmissionOutcome::Rejected { existing })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use iam_adapter_memory::MemoryStore;

    #[test]
    fn test_from_config_parses_device_keys() {
        let mut config = SessionConfig::default();
        config.default_max_sessions = 5;
        config.policy = AdmissionPolicy::EvictOldest;
        config.max_sessions.insert("web".into(), 2);
        config.max_sessions.insert("app".into(), 1);
        config.max_sessions.insert("fridge".into(), 9);

        let limiter = DeviceLimiter::from_config(Arc::new(MemoryStore::new()), &config);

        assert_eq!(limiter.policy(), OverflowPolicy::EvictOldest);
        assert_eq!(limiter.limit_for(DeviceType::Web), 2);
        assert_eq!(limiter.limit_for(DeviceType::Mobile), 1);
        assert_eq!(limiter.limit_for(DeviceType::Desktop), 5);
    }
}

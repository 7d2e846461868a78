//! 领域模型

use chrono::{DateTime, Utc};
use iam_common::{DeviceType, SessionId};
use iam_ports::SessionRecord;
use serde::Serialize;

/// 客户端设备信息
#[derive(Debug, Clone, Default)]
pub struct DeviceInfo {
    pub device_type: DeviceType,
    pub device_name: String,
    pub ip: String,
    pub user_agent: String,
}

/// 登录命令
#[derive(Debug, Clone)]
pub struct LoginCommand {
    pub username: String,
    pub password: String,
    pub captcha_id: Option<String>,
    pub captcha_code: Option<String>,
    pub device: DeviceInfo,
}

/// 令牌对
#[derive(Debug, Clone)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    pub access_expires_at: DateTime<Utc>,
    pub refresh_expires_at: DateTime<Utc>,
    pub session_id: SessionId,
}

/// 对外展示的会话信息
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    pub session_id: SessionId,
    pub device_type: DeviceType,
    pub device_name: String,
    pub ip: String,
    pub region: Option<String>,
    pub user_agent: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl From<&SessionRecord> for SessionSummary {
    fn from(record: &SessionRecord) -> Self {
        Self {
            session_id: record.session_id.clone(),
            device_type: record.device_type,
            device_name: record.device_name.clone(),
            ip: record.ip.clone(),
            region: record.region.clone(),
            user_agent: record.user_agent.clone(),
            created_at: record.created_at,
            expires_at: record.expires_at,
        }
    }
}

/// 计数器键使用的用户名形式
pub fn normalize_username(username: &str) -> String {
    username.trim().to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_username() {
        assert_eq!(normalize_username("  Alice "), "alice");
        assert_eq!(normalize_username("ADMIN"), "admin");
        assert_eq!(normalize_username("   "), "");
    }
}

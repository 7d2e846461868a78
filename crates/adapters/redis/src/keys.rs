//! 键命名
//!
//! 所有键共享同一前缀，Lua 脚本内部按相同规则拼接被踢出会话的键。

use iam_common::{DeviceType, SessionId, UserId};

#[derive(Debug, Clone)]
pub struct KeySpace {
    prefix: String,
}

impl KeySpace {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn session(&self, session_id: &SessionId) -> String {
        format!("{}:session:{}", self.prefix, session_id)
    }

    pub fn refresh(&self, refresh_id: &str) -> String {
        format!("{}:refresh:{}", self.prefix, refresh_id)
    }

    /// 已轮换掉的刷新令牌标记
    pub fn retired_refresh(&self, refresh_id: &str) -> String {
        format!("{}:refresh:retired:{}", self.prefix, refresh_id)
    }

    /// (用户, 设备类型) 的会话索引
    pub fn devices(&self, user_id: &UserId, device_type: DeviceType) -> String {
        format!("{}:devices:{}:{}", self.prefix, user_id, device_type)
    }

    pub fn blacklist(&self, token_id: &str) -> String {
        format!("{}:blacklist:{}", self.prefix, token_id)
    }

    pub fn counter(&self, key: &str) -> String {
        format!("{}:{}", self.prefix, key)
    }

    pub fn captcha(&self, captcha_id: &str) -> String {
        format!("{}:captcha:{}", self.prefix, captcha_id)
    }
}

impl Default for KeySpace {
    fn default() -> Self {
        Self::new("auth")
    }
}

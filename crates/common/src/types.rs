//! 通用类型定义

use std::fmt;
use std::str::FromStr;

use derive_more::{Display, From};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// 用户 ID
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Display, From)]
#[display("{_0}")]
pub struct UserId(pub Uuid);

impl UserId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn from_string(s: &str) -> Result<Self, uuid::Error> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

impl Default for UserId {
    fn default() -> Self {
        Self::new()
    }
}

/// 会话 ID
///
/// 使用 UUID v7，同一用户的会话 ID 按创建时间有序。
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Display, From)]
#[display("{_0}")]
pub struct SessionId(pub Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    pub fn from_string(s: &str) -> Result<Self, uuid::Error> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

/// 设备类型
///
/// 并发会话上限按设备类型分别计算。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceType {
    #[default]
    Web,
    Desktop,
    Mobile,
    MiniProgram,
}

impl DeviceType {
    pub const ALL: [DeviceType; 4] = [
        DeviceType::Web,
        DeviceType::Desktop,
        DeviceType::Mobile,
        DeviceType::MiniProgram,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Web => "web",
            Self::Desktop => "desktop",
            Self::Mobile => "mobile",
            Self::MiniProgram => "mini_program",
        }
    }
}

impl fmt::Display for DeviceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 未知设备类型
#[derive(Debug, Clone, PartialEq, Eq, Display)]
#[display("unknown device type: {_0}")]
pub struct UnknownDeviceType(pub String);

impl std::error::Error for UnknownDeviceType {}

impl FromStr for DeviceType {
    type Err = UnknownDeviceType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // 兼容客户端常见的别名
        match s.trim().to_ascii_lowercase().as_str() {
            "web" | "browser" => Ok(Self::Web),
            "desktop" | "pc" => Ok(Self::Desktop),
            "mobile" | "app" | "android" | "ios" => Ok(Self::Mobile),
            "mini_program" | "mini-program" | "miniprogram" | "xcx" => Ok(Self::MiniProgram),
            other => Err(UnknownDeviceType(other.to_string())),
        }
    }
}

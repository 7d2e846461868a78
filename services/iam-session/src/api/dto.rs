//! 请求与响应结构

use chrono::{DateTime, Utc};
use iam_common::{DeviceType, SessionId};
use serde::{Deserialize, Serialize};

use crate::domain::{DeviceInfo, LoginCommand, SessionSummary, TokenPair};
use crate::error::{AuthError, AuthResult};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
    #[serde(default)]
    pub captcha_code: Option<String>,
    #[serde(default)]
    pub captcha_id: Option<String>,
    #[serde(default)]
    pub device_type: Option<String>,
    #[serde(default)]
    pub device_name: Option<String>,
}

impl LoginRequest {
    /// 转换为登录命令；未提供设备类型时按 web 处理
    pub fn into_command(self, ip: String, user_agent: String) -> AuthResult<LoginCommand> {
        let device_type = match self.device_type.as_deref().map(str::trim) {
            None | Some("") => DeviceType::Web,
            Some(raw) => raw
                .parse()
                .map_err(|e: iam_common::UnknownDeviceType| AuthError::InvalidRequest(e.to_string()))?,
        };
        let device_name = self
            .device_name
            .filter(|name| !name.trim().is_empty())
            .unwrap_or_else(|| device_type.to_string());

        Ok(LoginCommand {
            username: self.username,
            password: self.password,
            captcha_id: self.captcha_id,
            captcha_code: self.captcha_code,
            device: DeviceInfo {
                device_type,
                device_name,
                ip,
                user_agent,
            },
        })
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenResponse {
    pub access_token: String,
    pub refresh_token: String,
    pub access_expiry: DateTime<Utc>,
    pub refresh_expiry: DateTime<Utc>,
    pub session_id: SessionId,
    pub token_type: &'static str,
    /// 访问令牌剩余秒数
    pub expires_in: i64,
}

impl From<TokenPair> for TokenResponse {
    fn from(pair: TokenPair) -> Self {
        let expires_in = (pair.access_expires_at - Utc::now()).num_seconds().max(0);
        Self {
            access_token: pair.access_token,
            refresh_token: pair.refresh_token,
            access_expiry: pair.access_expires_at,
            refresh_expiry: pair.refresh_expires_at,
            session_id: pair.session_id,
            token_type: "Bearer",
            expires_in,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshRequest {
    pub refresh_token: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionResponse {
    #[serde(flatten)]
    pub session: SessionSummary,
    /// 是否为发起请求的会话
    pub current: bool,
}

#[derive(Debug, Serialize)]
pub struct RevokeAllResponse {
    pub revoked: usize,
}

#[derive(Debug, Serialize)]
pub struct SuccessResponse {
    pub success: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(device_type: Option<&str>, device_name: Option<&str>) -> LoginRequest {
        LoginRequest {
            username: "alice".into(),
            password: "pw".into(),
            captcha_code: None,
            captcha_id: None,
            device_type: device_type.map(Into::into),
            device_name: device_name.map(Into::into),
        }
    }

    #[test]
    fn test_login_request_defaults_to_web() {
        let command = request(None, None)
            .into_command("10.0.0.1".into(), "curl/8".into())
            .unwrap();
        assert_eq!(command.device.device_type, DeviceType::Web);
        assert_eq!(command.device.device_name, "web");
        assert_eq!(command.device.ip, "10.0.0.1");
    }

    #[test]
    fn test_login_request_parses_device_alias() {
        let command = request(Some("ios"), Some("iPhone 15"))
            .into_command(String::new(), String::new())
            .unwrap();
        assert_eq!(command.device.device_type, DeviceType::Mobile);
        assert_eq!(command.device.device_name, "iPhone 15");
    }

    #[test]
    fn test_unknown_device_type_rejected() {
        let err = request(Some("toaster"), None)
            .into_command(String::new(), String::new())
            .unwrap_err();
        assert!(matches!(err, AuthError::InvalidRequest(_)));
    }

    #[test]
    fn test_login_request_accepts_camel_case() {
        let request: LoginRequest = serde_json::from_str(
            r#"{"username":"a","password":"b","captchaId":"c1","captchaCode":"x7","deviceType":"pc"}"#,
        )
        .unwrap();
        assert_eq!(request.captcha_id.as_deref(), Some("c1"));
        assert_eq!(request.captcha_code.as_deref(), Some("x7"));
        assert_eq!(request.device_type.as_deref(), Some("pc"));
    }
}

//! 认证主体

use chrono::{DateTime, Utc};
use iam_common::{DeviceType, SessionId, UserId};
use iam_errors::AppResult;
use serde::Serialize;

use crate::Claims;

/// 通过访问令牌验证后的请求主体
///
/// 由认证中间件显式传递给后续处理器，下游授权无需再查询业务数据。
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Principal {
    pub user_id: UserId,
    pub username: String,
    pub session_id: SessionId,
    pub device_type: DeviceType,
    /// 访问令牌 ID
    pub token_id: String,
    pub expires_at: DateTime<Utc>,
    pub roles: Vec<String>,
    pub permissions: Vec<String>,
}

impl Principal {
    pub fn from_claims(claims: Claims) -> AppResult<Self> {
        Ok(Self {
            user_id: claims.user_id()?,
            session_id: claims.session_id()?,
            expires_at: claims.expires_at(),
            username: claims.username,
            device_type: claims.device,
            token_id: claims.jti,
            roles: claims.roles,
            permissions: claims.permissions,
        })
    }

    pub fn has_permission(&self, permission: &str) -> bool {
        self.permissions.iter().any(|p| p == permission)
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }

    pub fn has_any_permission(&self, permissions: &[&str]) -> bool {
        permissions.iter().any(|p| self.has_permission(p))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ACCESS_TOKEN_TYPE, Claims};

    fn claims() -> Claims {
        Claims {
            sub: UserId::new().to_string(),
            username: "bob".to_string(),
            sid: SessionId::new().to_string(),
            device: DeviceType::Mobile,
            exp: Utc::now().timestamp() + 60,
            iat: Utc::now().timestamp(),
            jti: "jti-1".to_string(),
            iss: "iam-session".to_string(),
            aud: "admin-console".to_string(),
            token_type: ACCESS_TOKEN_TYPE.to_string(),
            permissions: vec!["auth:session:revoke".to_string()],
            roles: vec!["ops".to_string()],
        }
    }

    #[test]
    fn test_principal_from_claims() {
        let claims = claims();
        let principal = Principal::from_claims(claims.clone()).unwrap();

        assert_eq!(principal.user_id.to_string(), claims.sub);
        assert_eq!(principal.session_id.to_string(), claims.sid);
        assert_eq!(principal.device_type, DeviceType::Mobile);
        assert_eq!(principal.token_id, "jti-1");
        assert!(principal.has_permission("auth:session:revoke"));
        assert!(principal.has_role("ops"));
        assert!(!principal.has_any_permission(&["system:user:delete"]));
    }

    #[test]
    fn test_malformed_subject_rejected() {
        let mut claims = claims();
        claims.sub = "42".to_string();
        assert!(Principal::from_claims(claims).is_err());
    }
}

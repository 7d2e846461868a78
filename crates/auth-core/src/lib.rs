//! iam-auth-core - 认证核心库
//!
//! 访问令牌（JWT）、刷新令牌与认证主体

mod principal;
mod refresh;

pub use principal::*;
pub use refresh::*;

use chrono::{DateTime, Duration, TimeZone, Utc};
use iam_common::{DeviceType, SessionId, UserId};
use iam_errors::{AppError, AppResult};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// 访问令牌类型标识
pub const ACCESS_TOKEN_TYPE: &str = "access";

/// JWT Claims
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (user ID)
    pub sub: String,
    /// 登录用户名
    pub username: String,
    /// 会话 ID
    pub sid: String,
    /// 设备类型
    pub device: DeviceType,
    /// Expiration time
    pub exp: i64,
    /// Issued at
    pub iat: i64,
    /// JWT ID，即访问令牌 ID
    pub jti: String,
    /// Issuer
    #[serde(default)]
    pub iss: String,
    /// Audience
    #[serde(default)]
    pub aud: String,
    /// Token type
    #[serde(default)]
    pub token_type: String,
    /// Permissions
    #[serde(default)]
    pub permissions: Vec<String>,
    /// Roles
    #[serde(default)]
    pub roles: Vec<String>,
}

impl Claims {
    pub fn user_id(&self) -> AppResult<UserId> {
        UserId::from_string(&self.sub)
            .map_err(|_| AppError::unauthorized("Invalid user ID in token"))
    }

    pub fn session_id(&self) -> AppResult<SessionId> {
        SessionId::from_string(&self.sid)
            .map_err(|_| AppError::unauthorized("Invalid session ID in token"))
    }

    /// 过期时间
    pub fn expires_at(&self) -> DateTime<Utc> {
        Utc.timestamp_opt(self.exp, 0).single().unwrap_or_else(Utc::now)
    }

    pub fn is_access_token(&self) -> bool {
        self.token_type == ACCESS_TOKEN_TYPE
    }
}

/// 签发访问令牌所需的主体信息
#[derive(Debug, Clone)]
pub struct TokenSubject {
    pub user_id: UserId,
    pub username: String,
    pub session_id: SessionId,
    pub device_type: DeviceType,
    pub roles: Vec<String>,
    pub permissions: Vec<String>,
}

/// 已签发的访问令牌
#[derive(Debug, Clone)]
pub struct IssuedAccessToken {
    pub token: String,
    /// 令牌 ID（jti）
    pub token_id: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// Token 服务
#[derive(Clone)]
pub struct TokenService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    access_token_expires_in: i64,
    issuer: String,
    audience: String,
}

impl TokenService {
    pub fn new(
        secret: &str,
        access_token_expires_in: i64,
        issuer: impl Into<String>,
        audience: impl Into<String>,
    ) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            access_token_expires_in,
            issuer: issuer.into(),
            audience: audience.into(),
        }
    }

    /// 生成访问令牌
    pub fn issue_access_token(&self, subject: &TokenSubject) -> AppResult<IssuedAccessToken> {
        let issued_at = Utc::now();
        let expires_at = issued_at + Duration::seconds(self.access_token_expires_in);
        let token_id = Uuid::now_v7().to_string();

        let claims = Claims {
            sub: subject.user_id.to_string(),
            username: subject.username.clone(),
            sid: subject.session_id.to_string(),
            device: subject.device_type,
            exp: expires_at.timestamp(),
            iat: issued_at.timestamp(),
            jti: token_id.clone(),
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
            token_type: ACCESS_TOKEN_TYPE.to_string(),
            permissions: subject.permissions.clone(),
            roles: subject.roles.clone(),
        };

        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| AppError::internal(format!("Failed to generate token: {}", e)))?;

        Ok(IssuedAccessToken {
            token,
            token_id,
            issued_at,
            expires_at,
        })
    }

    fn validation(&self, validate_exp: bool) -> Validation {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[&self.issuer]);
        validation.set_audience(&[&self.audience]);
        validation.set_required_spec_claims(&["exp", "iss", "aud", "sub"]);
        validation.validate_exp = validate_exp;
        validation.validate_nbf = false;
        validation.leeway = 0; // 不允许时间偏差
        validation
    }

    fn decode_with(&self, token: &str, validation: &Validation) -> AppResult<Claims> {
        let claims = decode::<Claims>(token, &self.decoding_key, validation)
            .map_err(|e| AppError::unauthorized(format!("Invalid token: {}", e)))?
            .claims;

        if !claims.is_access_token() {
            return Err(AppError::unauthorized("Not an access token"));
        }
        if claims.jti.is_empty() {
            return Err(AppError::unauthorized("Token ID (jti) missing"));
        }
        if claims.sid.is_empty() {
            return Err(AppError::unauthorized("Session ID (sid) missing"));
        }

        Ok(claims)
    }

    /// 验证访问令牌的签名、签发方、受众与有效期
    pub fn validate_access_token(&self, token: &str) -> AppResult<Claims> {
        self.decode_with(token, &self.validation(true))
    }

    /// 验证签名但忽略过期时间
    ///
    /// 用于登出：过期的令牌仍然可以用来结束它所属的会话。
    pub fn decode_ignoring_expiry(&self, token: &str) -> AppResult<Claims> {
        self.decode_with(token, &self.validation(false))
    }

    /// 获取访问令牌过期时间（秒）
    pub fn access_token_expires_in(&self) -> i64 {
        self.access_token_expires_in
    }
}

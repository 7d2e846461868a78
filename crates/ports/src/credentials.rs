//! 凭证校验 trait 定义

use async_trait::async_trait;
use iam_common::UserId;
use iam_errors::AppResult;

/// 凭证校验通过后的用户信息
#[derive(Debug, Clone)]
pub struct CredentialPrincipal {
    pub user_id: UserId,
    pub username: String,
    /// 账号被管理员锁定
    pub locked: bool,
    pub roles: Vec<String>,
    pub permissions: Vec<String>,
}

/// 凭证校验器
#[async_trait]
pub trait CredentialVerifier: Send + Sync {
    /// 校验用户名和密码
    ///
    /// 用户不存在或密码错误都返回 `Ok(None)`，调用方不区分两者。
    async fn verify(&self, username: &str, password: &str)
        -> AppResult<Option<CredentialPrincipal>>;
}

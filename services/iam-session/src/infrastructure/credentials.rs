//! 配置文件中的用户目录
//!
//! 密码以 Argon2 PHC 字符串保存，校验在阻塞线程池中执行。
//! 用户不存在时同样执行一次哈希比对，响应耗时不暴露账号是否存在。

use std::collections::HashMap;

use argon2::{
    Argon2,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString, rand_core::OsRng},
};
use async_trait::async_trait;
use iam_common::UserId;
use iam_config::DirectoryConfig;
use iam_errors::{AppError, AppResult};
use iam_ports::{CredentialPrincipal, CredentialVerifier};
use tracing::debug;

use crate::domain::normalize_username;

#[derive(Debug, Clone)]
struct DirectoryEntry {
    principal: CredentialPrincipal,
    password_hash: String,
}

/// 不存在的用户参与比对的口令
const UNKNOWN_USER_PASSWORD: &str = "unknown-user-placeholder";

/// 基于配置的凭证校验器
#[derive(Debug, Clone)]
pub struct DirectoryCredentialVerifier {
    users: HashMap<String, DirectoryEntry>,
    /// 用户不存在时比对的哈希
    unknown_user_hash: String,
}

impl DirectoryCredentialVerifier {
    /// 加载用户目录；用户 ID 或密码哈希格式错误时返回错误
    pub fn from_config(config: &DirectoryConfig) -> AppResult<Self> {
        let mut users = HashMap::with_capacity(config.users.len());

        for user in &config.users {
            let user_id = UserId::from_string(&user.id).map_err(|e| {
                AppError::validation(format!("Invalid id for user '{}': {}", user.username, e))
            })?;
            PasswordHash::new(&user.password_hash).map_err(|e| {
                AppError::validation(format!(
                    "Invalid password hash for user '{}': {}",
                    user.username, e
                ))
            })?;

            let key = normalize_username(&user.username);
            if users.contains_key(&key) {
                return Err(AppError::validation(format!(
                    "Duplicate user '{}' in directory",
                    user.username
                )));
            }

            users.insert(
                key,
                DirectoryEntry {
                    principal: CredentialPrincipal {
                        user_id,
                        username: user.username.clone(),
                        locked: user.locked,
                        roles: user.roles.clone(),
                        permissions: user.permissions.clone(),
                    },
                    password_hash: user.password_hash.clone(),
                },
            );
        }

        Ok(Self {
            users,
            unknown_user_hash: hash_password(UNKNOWN_USER_PASSWORD)?,
        })
    }

    /// 待比对的哈希与对应主体，用户不存在时返回占位哈希
    fn lookup(&self, username: &str) -> (&str, Option<&CredentialPrincipal>) {
        match self.users.get(&normalize_username(username)) {
            Some(entry) => (&entry.password_hash, Some(&entry.principal)),
            None => (&self.unknown_user_hash, None),
        }
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}

/// 生成 Argon2 密码哈希
pub fn hash_password(password: &str) -> AppResult<String> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| AppError::internal(format!("Failed to hash password: {}", e)))?;
    Ok(hash.to_string())
}

fn verify_password(password: &str, password_hash: &str) -> AppResult<bool> {
    let parsed_hash = PasswordHash::new(password_hash)
        .map_err(|e| AppError::internal(format!("Invalid password hash: {}", e)))?;

    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed_hash)
        .is_ok())
}

#[async_trait]
impl CredentialVerifier for DirectoryCredentialVerifier {
    async fn verify(
        &self,
        username: &str,
        password: &str,
    ) -> AppResult<Option<CredentialPrincipal>> {
        let (hash, principal) = self.lookup(username);
        if principal.is_none() {
            debug!(username = %username, "Unknown user");
        }
        let principal = principal.cloned();

        let password = password.to_string();
        let hash = hash.to_string();
        let matched = tokio::task::spawn_blocking(move || verify_password(&password, &hash))
            .await
            .map_err(|e| AppError::internal(format!("Password verification task failed: {}", e)))??;

        Ok(principal.filter(|_| matched))
    }
}

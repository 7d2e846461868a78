//! iam-config - 配置加载库

use std::collections::HashMap;

use figment::{
    Figment,
    providers::{Env, Format, Toml},
};
use secrecy::{ExposeSecret, Secret};
use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load config: {0}")]
    Load(#[from] figment::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// 服务器配置
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// 遥测配置
#[derive(Debug, Clone, Deserialize)]
pub struct TelemetryConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// 输出 JSON 格式日志
    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            json: false,
        }
    }
}

/// 共享存储后端
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Redis,
    /// 进程内存储，仅适用于单节点开发与测试
    Memory,
}

/// 存储配置
#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub backend: StoreBackend,
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
}

fn default_key_prefix() -> String {
    "auth".to_string()
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            key_prefix: default_key_prefix(),
        }
    }
}

/// Redis 配置
#[derive(Debug, Deserialize)]
pub struct RedisConfig {
    pub url: Secret<String>,
    /// 单次命令超时（毫秒）
    #[serde(default = "default_command_timeout_ms")]
    pub command_timeout_ms: u64,
    /// 启动时连接重试次数
    #[serde(default = "default_connect_retries")]
    pub connect_retries: u32,
}

fn default_command_timeout_ms() -> u64 {
    250
}

fn default_connect_retries() -> u32 {
    3
}

/// JWT 配置
#[derive(Debug, Deserialize)]
pub struct JwtConfig {
    pub secret: Secret<String>,
    /// 访问令牌有效期（秒）
    #[serde(default = "default_expires_in")]
    pub expires_in: u64,
    /// 刷新令牌有效期（秒），同时也是会话的生命周期
    #[serde(default = "default_refresh_expires_in")]
    pub refresh_expires_in: u64,
    #[serde(default = "default_issuer")]
    pub issuer: String,
    #[serde(default = "default_audience")]
    pub audience: String,
}

fn default_expires_in() -> u64 {
    1800
}

fn default_refresh_expires_in() -> u64 {
    604800
}

fn default_issuer() -> String {
    "iam-session".to_string()
}

fn default_audience() -> String {
    "admin-console".to_string()
}

/// 超出并发上限时的准入策略
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdmissionPolicy {
    /// 拒绝新登录，返回现有会话列表
    #[default]
    RejectNew,
    /// 踢出最早创建的会话
    EvictOldest,
}

/// 会话配置
#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    #[serde(default)]
    pub policy: AdmissionPolicy,
    /// 未单独配置的设备类型的上限，0 表示不限制
    #[serde(default)]
    pub default_max_sessions: u32,
    /// 按设备类型配置的上限（键为 web / desktop / mobile / mini_program）
    #[serde(default)]
    pub max_sessions: HashMap<String, u32>,
    /// 刷新时轮换刷新令牌
    #[serde(default = "default_true")]
    pub rotate_refresh_token: bool,
    /// 检测到刷新令牌重放时踢出该用户的全部会话
    #[serde(default)]
    pub revoke_all_on_refresh_reuse: bool,
    /// 允许强制下线他人会话的权限标识
    #[serde(default = "default_admin_permission")]
    pub admin_permission: String,
}

fn default_true() -> bool {
    true
}

fn default_admin_permission() -> String {
    "auth:session:revoke".to_string()
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            policy: AdmissionPolicy::default(),
            default_max_sessions: 0,
            max_sessions: HashMap::new(),
            rotate_refresh_token: true,
            revoke_all_on_refresh_reuse: false,
            admin_permission: default_admin_permission(),
        }
    }
}

impl SessionConfig {
    /// 指定设备类型的会话上限，0 表示不限制
    pub fn max_sessions_for(&self, device_type: &str) -> u32 {
        self.max_sessions
            .get(device_type)
            .copied()
            .unwrap_or(self.default_max_sessions)
    }
}

/// 登录防护配置
#[derive(Debug, Clone, Deserialize)]
pub struct LoginConfig {
    /// 连续失败多少次后锁定，0 表示关闭
    #[serde(default = "default_max_failed_attempts")]
    pub max_failed_attempts: u32,
    /// 锁定时长（秒），每次新的失败都会重置
    #[serde(default = "default_lockout_secs")]
    pub lockout_secs: u64,
    /// 窗口内允许的成功登录次数，0 表示关闭
    #[serde(default = "default_frequency_max_logins")]
    pub frequency_max_logins: u32,
    #[serde(default = "default_frequency_window_secs")]
    pub frequency_window_secs: u64,
    #[serde(default)]
    pub captcha_enabled: bool,
}

fn default_max_failed_attempts() -> u32 {
    5
}

fn default_lockout_secs() -> u64 {
    900
}

fn default_frequency_max_logins() -> u32 {
    10
}

fn default_frequency_window_secs() -> u64 {
    60
}

impl Default for LoginConfig {
    fn default() -> Self {
        Self {
            max_failed_attempts: default_max_failed_attempts(),
            lockout_secs: default_lockout_secs(),
            frequency_max_logins: default_frequency_max_logins(),
            frequency_window_secs: default_frequency_window_secs(),
            captcha_enabled: false,
        }
    }
}

/// 限流键的命名空间
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RateLimitScope {
    #[default]
    Ip,
    User,
    Custom,
}

/// 单条限流规则
#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitRuleConfig {
    pub name: String,
    /// 路径模式（`*` 匹配一段，`**` 匹配任意后缀）
    pub path: String,
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default)]
    pub scope: RateLimitScope,
    /// `custom` 命名空间使用的键，缺省为规则名
    #[serde(default)]
    pub key: Option<String>,
    pub max_requests: u64,
    pub window_secs: u64,
}

/// 限流配置
#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub rules: Vec<RateLimitRuleConfig>,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            rules: Vec::new(),
        }
    }
}

/// 安全配置
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SecurityConfig {
    /// 无需认证的路径模式
    #[serde(default)]
    pub public_paths: Vec<String>,
}

/// 内置用户目录中的账号
#[derive(Debug, Clone, Deserialize)]
pub struct DirectoryUserConfig {
    pub id: String,
    pub username: String,
    /// Argon2 PHC 格式哈希
    pub password_hash: String,
    #[serde(default)]
    pub locked: bool,
    #[serde(default)]
    pub roles: Vec<String>,
    #[serde(default)]
    pub permissions: Vec<String>,
}

/// 内置用户目录
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DirectoryConfig {
    #[serde(default)]
    pub users: Vec<DirectoryUserConfig>,
}

/// 应用配置
#[derive(Debug, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_app_name")]
    pub app_name: String,
    #[serde(default = "default_app_env")]
    pub app_env: String,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
    #[serde(default)]
    pub store: StoreConfig,
    pub redis: Option<RedisConfig>,
    pub jwt: JwtConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub login: LoginConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub security: SecurityConfig,
    #[serde(default)]
    pub directory: DirectoryConfig,
}

fn default_app_name() -> String {
    "iam-session".to_string()
}

fn default_app_env() -> String {
    "development".to_string()
}

impl AppConfig {
    /// 从配置文件和环境变量加载配置
    ///
    /// 依次合并 `default.toml`、`{APP_ENV}.toml` 和 `IAM__` 前缀的环境变量
    /// （双下划线表示层级，例如 `IAM__JWT__SECRET`）。
    pub fn load(config_dir: &str) -> Result<Self, ConfigError> {
        let env = std::env::var("APP_ENV").unwrap_or_else(|_| "development".to_string());

        let config: Self = Figment::new()
            .merge(Toml::file(format!("{}/default.toml", config_dir)))
            .merge(Toml::file(format!("{}/{}.toml", config_dir, env)))
            .merge(Env::prefixed("IAM__").split("__"))
            .extract()?;

        config.validate()?;
        Ok(config)
    }

    /// 校验跨字段约束
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.jwt.secret.expose_secret().trim().is_empty() {
            return Err(ConfigError::Invalid("jwt.secret must not be empty".into()));
        }
        if self.jwt.expires_in == 0 || self.jwt.refresh_expires_in == 0 {
            return Err(ConfigError::Invalid("token lifetimes must be positive".into()));
        }
        if self.jwt.refresh_expires_in < self.jwt.expires_in {
            return Err(ConfigError::Invalid(
                "jwt.refresh_expires_in must not be shorter than jwt.expires_in".into(),
            ));
        }
        if self.store.backend == StoreBackend::Redis && self.redis.is_none() {
            return Err(ConfigError::Invalid(
                "store.backend = \"redis\" requires a [redis] section".into(),
            ));
        }
        for rule in &self.rate_limit.rules {
            if rule.window_secs == 0 {
                return Err(ConfigError::Invalid(format!(
                    "rate_limit rule '{}' has a zero window",
                    rule.name
                )));
            }
        }
        Ok(())
    }

    /// 是否为生产环境
    pub fn is_production(&self) -> bool {
        self.app_env == "production"
    }

    /// 是否为开发环境
    pub fn is_development(&self) -> bool {
        self.app_env == "development"
    }
}

//! 组件装配
//!
//! 所有共享客户端在进程启动时显式创建，通过构造函数注入各组件。

use std::sync::Arc;
use std::time::Duration;

use iam_auth_core::TokenService;
use iam_config::AppConfig;
use iam_errors::AppResult;
use iam_ports::{
    CaptchaStore, CounterStore, CredentialVerifier, LoginAuditSink, RegionResolver, SessionStore,
};
use secrecy::ExposeSecret;
use tracing::info;

use crate::api::AppState;
use crate::api::middleware::{PublicPaths, RateLimitRules};
use crate::application::services::{
    BruteForceGuard, DeviceLimiter, LifecycleComponents, LifecyclePolicy, LoginFrequencyGuard,
    RateLimiter, TokenLifecycleManager,
};
use crate::infrastructure::LocalRegionResolver;

/// 共享存储句柄
#[derive(Clone)]
pub struct Stores {
    pub counters: Arc<dyn CounterStore>,
    pub sessions: Arc<dyn SessionStore>,
    pub captcha: Arc<dyn CaptchaStore>,
}

impl Stores {
    /// 同一个后端同时提供三种存储
    pub fn from_store<S>(store: S) -> Self
    where
        S: CounterStore + SessionStore + CaptchaStore + 'static,
    {
        let store = Arc::new(store);
        Self {
            counters: store.clone(),
            sessions: store.clone(),
            captcha: store,
        }
    }
}

/// 外部协作方
#[derive(Clone)]
pub struct Collaborators {
    pub credentials: Arc<dyn CredentialVerifier>,
    pub audit: Arc<dyn LoginAuditSink>,
    pub region: Arc<dyn RegionResolver>,
}

impl Collaborators {
    pub fn new(credentials: Arc<dyn CredentialVerifier>, audit: Arc<dyn LoginAuditSink>) -> Self {
        Self {
            credentials,
            audit,
            region: Arc::new(LocalRegionResolver),
        }
    }

    pub fn with_region(mut self, region: Arc<dyn RegionResolver>) -> Self {
        self.region = region;
        self
    }
}

pub fn build_lifecycle(
    config: &AppConfig,
    stores: &Stores,
    collaborators: Collaborators,
) -> TokenLifecycleManager {
    let tokens = TokenService::new(
        config.jwt.secret.expose_secret(),
        i64::try_from(config.jwt.expires_in).unwrap_or(i64::MAX),
        config.jwt.issuer.clone(),
        config.jwt.audience.clone(),
    );

    let components = LifecycleComponents {
        tokens,
        sessions: stores.sessions.clone(),
        captcha: stores.captcha.clone(),
        credentials: collaborators.credentials,
        audit: collaborators.audit,
        region: collaborators.region,
        device_limiter: DeviceLimiter::from_config(stores.sessions.clone(), &config.session),
        brute_force: BruteForceGuard::new(
            stores.counters.clone(),
            config.login.max_failed_attempts,
            Duration::from_secs(config.login.lockout_secs),
        ),
        frequency: LoginFrequencyGuard::new(
            stores.counters.clone(),
            config.login.frequency_max_logins,
            Duration::from_secs(config.login.frequency_window_secs),
        ),
    };
    let policy = LifecyclePolicy {
        refresh_token_expires_in: i64::try_from(config.jwt.refresh_expires_in).unwrap_or(i64::MAX),
        rotate_refresh_token: config.session.rotate_refresh_token,
        revoke_all_on_reuse: config.session.revoke_all_on_refresh_reuse,
        captcha_enabled: config.login.captcha_enabled,
        admin_permission: config.session.admin_permission.clone(),
    };

    TokenLifecycleManager::new(components, policy)
}

/// 构建 HTTP 层状态
pub fn build_state(
    config: &AppConfig,
    stores: &Stores,
    collaborators: Collaborators,
) -> AppResult<AppState> {
    let lifecycle = build_lifecycle(config, stores, collaborators);
    let rate_limit_rules = RateLimitRules::from_config(&config.rate_limit)?;
    let public_paths = PublicPaths::new(&config.security.public_paths)?;

    info!(
        rate_limit_rules = rate_limit_rules.len(),
        public_paths = config.security.public_paths.len(),
        rotate_refresh_token = config.session.rotate_refresh_token,
        "Application state built"
    );

    Ok(AppState::new(
        lifecycle,
        RateLimiter::new(stores.counters.clone()),
        rate_limit_rules,
        public_paths,
    ))
}

//! 集成测试公共设施
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use iam_adapter_memory::MemoryStore;
use iam_common::{DeviceType, SessionId, UserId};
use iam_config::{
    AppConfig, DirectoryConfig, JwtConfig, LoginConfig, RateLimitConfig, SecurityConfig,
    ServerConfig, SessionConfig, StoreConfig, TelemetryConfig,
};
use iam_errors::{AppError, AppResult};
use iam_ports::{
    AccessState, Admission, CaptchaStore, CounterStore, CredentialPrincipal, CredentialVerifier,
    DeviceLimit, LoginAuditSink, LoginEvent, PermitDecision, RefreshLookup, RefreshRotation,
    RegionResolver, SessionRecord, SessionStore,
};
use iam_session::application::services::TokenLifecycleManager;
use iam_session::domain::{DeviceInfo, LoginCommand, TokenPair};
use iam_session::{AuthResult, Collaborators, Stores, build_lifecycle};
use secrecy::Secret;
use uuid::Uuid;

pub const ALICE: &str = "alice";
pub const BOB: &str = "bob";
pub const ADMIN: &str = "admin";
pub const LOCKED: &str = "carol";
pub const ADMIN_PERMISSION: &str = "auth:session:revoke";

pub fn password_for(username: &str) -> String {
    format!("{}-password", username)
}

pub fn user_id_for(username: &str) -> UserId {
    let n = match username {
        ALICE => 1,
        BOB => 2,
        ADMIN => 3,
        _ => 4,
    };
    UserId::from_uuid(Uuid::from_u128(n))
}

pub fn base_config() -> AppConfig {
    AppConfig {
        app_name: "iam-session-test".to_string(),
        app_env: "test".to_string(),
        server: ServerConfig::default(),
        telemetry: TelemetryConfig::default(),
        store: StoreConfig::default(),
        redis: None,
        jwt: JwtConfig {
            secret: Secret::new("integration-test-secret".to_string()),
            expires_in: 1800,
            refresh_expires_in: 604800,
            issuer: "iam-session".to_string(),
            audience: "admin-console".to_string(),
        },
        session: SessionConfig::default(),
        login: LoginConfig::default(),
        rate_limit: RateLimitConfig::default(),
        security: SecurityConfig::default(),
        directory: DirectoryConfig::default(),
    }
}

/// 明文比对的凭证校验器，记录调用次数
#[derive(Default)]
pub struct StubVerifier {
    users: HashMap<String, (String, CredentialPrincipal)>,
    calls: AtomicUsize,
}

impl StubVerifier {
    pub fn with_default_users() -> Self {
        let mut verifier = Self::default();
        verifier.add(ALICE, vec![], false);
        verifier.add(BOB, vec![], false);
        verifier.add(ADMIN, vec![ADMIN_PERMISSION.to_string()], false);
        verifier.add(LOCKED, vec![], true);
        verifier
    }

    fn add(&mut self, username: &str, permissions: Vec<String>, locked: bool) {
        self.users.insert(
            username.to_string(),
            (
                password_for(username),
                CredentialPrincipal {
                    user_id: user_id_for(username),
                    username: username.to_string(),
                    locked,
                    roles: vec!["user".to_string()],
                    permissions,
                },
            ),
        );
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CredentialVerifier for StubVerifier {
    async fn verify(
        &self,
        username: &str,
        password: &str,
    ) -> AppResult<Option<CredentialPrincipal>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .users
            .get(&username.to_lowercase())
            .filter(|(expected, _)| expected == password)
            .map(|(_, principal)| principal.clone()))
    }
}

/// 记录所有登录事件
#[derive(Default)]
pub struct RecordingAuditSink {
    events: Mutex<Vec<LoginEvent>>,
}

impl RecordingAuditSink {
    pub fn events(&self) -> Vec<LoginEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    /// 审计是异步投递的，等待至少 `count` 条事件
    pub async fn wait_for(&self, count: usize) -> Vec<LoginEvent> {
        for _ in 0..100 {
            let events = self.events();
            if events.len() >= count {
                return events;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        self.events()
    }
}

#[async_trait]
impl LoginAuditSink for RecordingAuditSink {
    async fn record_login_event(&self, event: LoginEvent) -> AppResult<()> {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
        Ok(())
    }
}

/// 模拟有网络延迟的地区解析
pub struct SlowRegionResolver(pub Duration);

#[async_trait]
impl RegionResolver for SlowRegionResolver {
    async fn resolve(&self, _ip: &str) -> Option<String> {
        tokio::time::sleep(self.0).await;
        Some("Remote".to_string())
    }
}

pub struct Harness {
    pub store: MemoryStore,
    pub verifier: Arc<StubVerifier>,
    pub audit: Arc<RecordingAuditSink>,
    pub lifecycle: TokenLifecycleManager,
}

impl Harness {
    pub fn new(config: AppConfig) -> Self {
        Self::build(config, None)
    }

    pub fn with_region(config: AppConfig, region: Arc<dyn RegionResolver>) -> Self {
        Self::build(config, Some(region))
    }

    fn build(config: AppConfig, region: Option<Arc<dyn RegionResolver>>) -> Self {
        let store = MemoryStore::new();
        let verifier = Arc::new(StubVerifier::with_default_users());
        let audit = Arc::new(RecordingAuditSink::default());
        let mut collaborators = Collaborators::new(verifier.clone(), audit.clone());
        if let Some(region) = region {
            collaborators = collaborators.with_region(region);
        }
        let lifecycle = build_lifecycle(&config, &Stores::from_store(store.clone()), collaborators);
        Self {
            store,
            verifier,
            audit,
            lifecycle,
        }
    }

    pub async fn login(&self, username: &str, device_type: DeviceType) -> AuthResult<TokenPair> {
        self.lifecycle
            .login(command(username, &password_for(username), device_type))
            .await
    }

    pub async fn login_with_password(&self, username: &str, password: &str) -> AuthResult<TokenPair> {
        self.lifecycle
            .login(command(username, password, DeviceType::Web))
            .await
    }

    pub async fn failed_attempts(&self, username: &str) -> u64 {
        CounterStore::count(&self.store, &format!("login:failed:{}", username))
            .await
            .unwrap_or_default()
    }
}

pub fn command(username: &str, password: &str, device_type: DeviceType) -> LoginCommand {
    LoginCommand {
        username: username.to_string(),
        password: password.to_string(),
        captcha_id: None,
        captcha_code: None,
        device: DeviceInfo {
            device_type,
            device_name: format!("{} device", device_type),
            ip: "10.0.0.8".to_string(),
            user_agent: "integration-test".to_string(),
        },
    }
}

/// 所有操作都返回连接错误的存储
#[derive(Clone, Default)]
pub struct FailingStore;

fn unavailable<T>() -> AppResult<T> {
    Err(AppError::external_service("Redis connection refused"))
}

#[async_trait]
impl CounterStore for FailingStore {
    async fn acquire_permit(&self, _: &str, _: u64, _: Duration) -> AppResult<PermitDecision> {
        unavailable()
    }
    async fn increment_sliding(&self, _: &str, _: Duration) -> AppResult<u64> {
        unavailable()
    }
    async fn count(&self, _: &str) -> AppResult<u64> {
        unavailable()
    }
    async fn ttl(&self, _: &str) -> AppResult<Option<Duration>> {
        unavailable()
    }
    async fn reset(&self, _: &str) -> AppResult<()> {
        unavailable()
    }
    async fn try_record_event(&self, _: &str, _: u64, _: Duration) -> AppResult<Option<String>> {
        unavailable()
    }
    async fn remove_event(&self, _: &str, _: &str) -> AppResult<()> {
        unavailable()
    }
}

#[async_trait]
impl SessionStore for FailingStore {
    async fn create(&self, _: &SessionRecord) -> AppResult<SessionId> {
        unavailable()
    }
    async fn create_bounded(&self, _: &SessionRecord, _: DeviceLimit) -> AppResult<Admission> {
        unavailable()
    }
    async fn get(&self, _: &SessionId) -> AppResult<Option<SessionRecord>> {
        unavailable()
    }
    async fn find_by_refresh(&self, _: &str) -> AppResult<RefreshLookup> {
        unavailable()
    }
    async fn rotate_refresh(&self, _: &RefreshRotation) -> AppResult<bool> {
        unavailable()
    }
    async fn touch(&self, _: &SessionId, _: &str, _: DateTime<Utc>) -> AppResult<bool> {
        unavailable()
    }
    async fn delete(&self, _: &SessionId) -> AppResult<bool> {
        unavailable()
    }
    async fn delete_current(&self, _: &SessionId, _: &str) -> AppResult<bool> {
        unavailable()
    }
    async fn list_by_user(
        &self,
        _: &UserId,
        _: Option<DeviceType>,
    ) -> AppResult<Vec<SessionRecord>> {
        unavailable()
    }
    async fn inspect_access(&self, _: &SessionId, _: &str) -> AppResult<AccessState> {
        unavailable()
    }
    async fn blacklist(&self, _: &str, _: Duration) -> AppResult<()> {
        unavailable()
    }
    async fn is_blacklisted(&self, _: &str) -> AppResult<bool> {
        unavailable()
    }
}

#[async_trait]
impl CaptchaStore for FailingStore {
    async fn take(&self, _: &str) -> AppResult<Option<String>> {
        unavailable()
    }
}

pub fn failing_lifecycle(config: &AppConfig) -> TokenLifecycleManager {
    build_lifecycle(
        config,
        &Stores::from_store(FailingStore),
        Collaborators::new(
            Arc::new(StubVerifier::with_default_users()),
            Arc::new(RecordingAuditSink::default()),
        ),
    )
}

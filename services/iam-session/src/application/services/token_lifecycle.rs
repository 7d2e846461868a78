//! 令牌生命周期管理
//!
//! 会话状态：未登录 -> 登录 -> 活跃 -> (刷新)* -> 活跃 -> 登出 / 撤销 / 过期 / 踢出 -> 终止。
//! 所有跨请求的状态都在共享存储中，本服务不缓存会话有效性。

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use iam_auth_core::{Principal, RefreshToken, TokenService, TokenSubject};
use iam_common::{SessionId, UserId};
use iam_ports::{
    AccessState, CaptchaStore, CredentialPrincipal, CredentialVerifier, LoginAuditSink,
    LoginEvent, RefreshLookup, RefreshRotation, RegionResolver, SessionRecord, SessionStore,
};
use metrics::counter;
use tracing::{debug, info, warn};

use super::{AdmissionOutcome, BruteForceGuard, DeviceLimiter, LoginFrequencyGuard};
use crate::domain::{DeviceInfo, LoginCommand, SessionSummary, TokenPair};
use crate::error::{AuthError, AuthResult};

/// 生命周期管理器依赖的组件
pub struct LifecycleComponents {
    pub tokens: TokenService,
    pub sessions: Arc<dyn SessionStore>,
    pub captcha: Arc<dyn CaptchaStore>,
    pub credentials: Arc<dyn CredentialVerifier>,
    pub audit: Arc<dyn LoginAuditSink>,
    pub region: Arc<dyn RegionResolver>,
    pub device_limiter: DeviceLimiter,
    pub brute_force: BruteForceGuard,
    pub frequency: LoginFrequencyGuard,
}

/// 令牌策略
#[derive(Debug, Clone)]
pub struct LifecyclePolicy {
    /// 刷新令牌（即会话）有效期，秒
    pub refresh_token_expires_in: i64,
    /// 每次刷新都更换刷新令牌
    pub rotate_refresh_token: bool,
    /// 检测到刷新令牌重放时撤销该用户的全部会话
    pub revoke_all_on_reuse: bool,
    pub captcha_enabled: bool,
    /// 可以管理他人会话的权限
    pub admin_permission: String,
}

#[derive(Clone)]
pub struct TokenLifecycleManager {
    tokens: TokenService,
    sessions: Arc<dyn SessionStore>,
    captcha: Arc<dyn CaptchaStore>,
    credentials: Arc<dyn CredentialVerifier>,
    audit: Arc<dyn LoginAuditSink>,
    region: Arc<dyn RegionResolver>,
    device_limiter: DeviceLimiter,
    brute_force: BruteForceGuard,
    frequency: LoginFrequencyGuard,
    policy: LifecyclePolicy,
}

impl TokenLifecycleManager {
    pub fn new(components: LifecycleComponents, policy: LifecyclePolicy) -> Self {
        Self {
            tokens: components.tokens,
            sessions: components.sessions,
            captcha: components.captcha,
            credentials: components.credentials,
            audit: components.audit,
            region: components.region,
            device_limiter: components.device_limiter,
            brute_force: components.brute_force,
            frequency: components.frequency,
            policy,
        }
    }

    pub fn tokens(&self) -> &TokenService {
        &self.tokens
    }

    pub fn policy(&self) -> &LifecyclePolicy {
        &self.policy
    }

    /// 登录
    ///
    /// 顺序固定：失败锁定检查、验证码、凭证校验、登录频率检查、签发令牌、并发准入。
    /// 准入被拒绝时新令牌直接丢弃，不写入任何数据，占用的频率配额也会归还。
    pub async fn login(&self, command: LoginCommand) -> AuthResult<TokenPair> {
        let result = self.authenticate(&command).await;

        let outcome = match &result {
            Ok(_) => "success",
            Err(e) => e.code(),
        };
        counter!("auth_login_total", "outcome" => outcome).increment(1);

        let username = command.username.trim();
        let event = match &result {
            Ok(_) => LoginEvent::success(username, &command.device.ip, &command.device.user_agent),
            Err(e) => LoginEvent::failure(
                username,
                &command.device.ip,
                &command.device.user_agent,
                e.code(),
            ),
        };
        self.emit_audit(event);

        result
    }

    async fn authenticate(&self, command: &LoginCommand) -> AuthResult<TokenPair> {
        let username = command.username.trim();
        if username.is_empty() || command.password.is_empty() {
            return Err(AuthError::InvalidRequest(
                "username and password are required".into(),
            ));
        }

        self.brute_force.allow_login(username).await?;

        if self.policy.captcha_enabled {
            self.verify_captcha(command).await?;
        }

        let Some(principal) = self.credentials.verify(username, &command.password).await? else {
            let failures = self.brute_force.record_failure(username).await?;
            warn!(
                username = %username,
                ip = %command.device.ip,
                failures,
                "Login failed: invalid credentials"
            );
            return Err(AuthError::InvalidCredentials);
        };

        if principal.locked {
            warn!(user_id = %principal.user_id, username = %username, "Login rejected: account disabled");
            return Err(AuthError::AccountLocked {
                retry_after_secs: None,
            });
        }

        let slot = self.frequency.check_frequency_limit(username).await?;

        let (session, pair) = match self.open_session(&principal, &command.device).await {
            Ok(opened) => opened,
            Err(e) => {
                // 未建立会话的登录不占用频率配额
                if let Some(slot) = slot {
                    if let Err(release_err) = self.frequency.release(slot).await {
                        warn!(username = %username, error = %release_err, "Failed to release login frequency slot");
                    }
                }
                return Err(e);
            }
        };

        // 会话已经写入，以下记账失败不再回滚登录
        if let Err(e) = self.brute_force.clear_record(username).await {
            warn!(username = %username, error = %e, "Failed to clear login failure record");
        }

        info!(
            user_id = %session.user_id,
            session_id = %session.session_id,
            device_type = %session.device_type,
            ip = %session.ip,
            "Login succeeded"
        );
        Ok(pair)
    }

    /// 签发令牌并申请并发准入，被拒绝时不写入任何数据
    async fn open_session(
        &self,
        principal: &CredentialPrincipal,
        device: &DeviceInfo,
    ) -> AuthResult<(SessionRecord, TokenPair)> {
        let (session, pair) = self.mint_session(principal, device).await?;

        if let AdmissionOutcome::Rejected { existing } = self.device_limiter.admit(&session).await? {
            return Err(AuthError::TooManyDevices {
                device_type: session.device_type,
                sessions: existing.iter().map(SessionSummary::from).collect(),
            });
        }
        Ok((session, pair))
    }

    async fn verify_captcha(&self, command: &LoginCommand) -> AuthResult<()> {
        let (Some(captcha_id), Some(code)) = (
            command.captcha_id.as_deref().filter(|id| !id.is_empty()),
            command.captcha_code.as_deref().filter(|code| !code.is_empty()),
        ) else {
            return Err(AuthError::InvalidCaptcha);
        };

        match self.captcha.take(captcha_id).await? {
            Some(answer) if answer.trim().eq_ignore_ascii_case(code.trim()) => Ok(()),
            _ => {
                debug!(captcha_id = %captcha_id, "Captcha mismatch or expired");
                Err(AuthError::InvalidCaptcha)
            }
        }
    }

    async fn mint_session(
        &self,
        principal: &CredentialPrincipal,
        device: &DeviceInfo,
    ) -> AuthResult<(SessionRecord, TokenPair)> {
        let session_id = SessionId::new();
        let access = self.tokens.issue_access_token(&TokenSubject {
            user_id: principal.user_id.clone(),
            username: principal.username.clone(),
            session_id: session_id.clone(),
            device_type: device.device_type,
            roles: principal.roles.clone(),
            permissions: principal.permissions.clone(),
        })?;
        let refresh = RefreshToken::generate();

        let created_at = access.issued_at;
        let expires_at =
            created_at + chrono::Duration::seconds(self.policy.refresh_token_expires_in);
        let region = self.region.resolve(&device.ip).await;

        let session = SessionRecord {
            session_id: session_id.clone(),
            user_id: principal.user_id.clone(),
            username: principal.username.clone(),
            device_type: device.device_type,
            device_name: device.device_name.clone(),
            ip: device.ip.clone(),
            region,
            user_agent: device.user_agent.clone(),
            created_at,
            expires_at,
            refresh_token_id: refresh.id,
            access_token_id: access.token_id,
            access_expires_at: access.expires_at,
            roles: principal.roles.clone(),
            permissions: principal.permissions.clone(),
        };
        let pair = TokenPair {
            access_token: access.token,
            refresh_token: refresh.token,
            access_expires_at: access.expires_at,
            refresh_expires_at: expires_at,
            session_id,
        };
        Ok((session, pair))
    }

    fn emit_audit(&self, event: LoginEvent) {
        let audit = self.audit.clone();
        tokio::spawn(async move {
            if let Err(e) = audit.record_login_event(event).await {
                warn!(error = %e, "Failed to record login event");
            }
        });
    }

    /// 校验访问令牌
    ///
    /// 签名与有效期之外，令牌必须是所属会话当前的访问令牌且未被拉黑。
    /// 存储只访问一次。
    pub async fn validate(&self, access_token: &str) -> AuthResult<Principal> {
        let claims = self
            .tokens
            .validate_access_token(access_token)
            .map_err(|_| AuthError::InvalidAccessToken)?;
        let principal = Principal::from_claims(claims).map_err(|_| AuthError::InvalidAccessToken)?;

        match self
            .sessions
            .inspect_access(&principal.session_id, &principal.token_id)
            .await?
        {
            AccessState::Active { user_id } if user_id == principal.user_id => Ok(principal),
            AccessState::Active { user_id } => {
                warn!(
                    session_id = %principal.session_id,
                    token_user_id = %principal.user_id,
                    session_user_id = %user_id,
                    "Access token subject does not match session owner"
                );
                Err(AuthError::InvalidAccessToken)
            }
            AccessState::Revoked | AccessState::SessionMissing => {
                debug!(session_id = %principal.session_id, "Access token revoked or session gone");
                Err(AuthError::InvalidAccessToken)
            }
        }
    }

    /// 用刷新令牌换取新令牌
    ///
    /// 已被轮换掉的刷新令牌再次出现视为被盗，所属会话立即终止。
    /// 并发刷新同一令牌时只有一方成功，另一方得到 `InvalidRefreshToken`。
    pub async fn refresh(&self, refresh_token: &str) -> AuthResult<TokenPair> {
        if !RefreshToken::is_well_formed(refresh_token) {
            return Err(AuthError::InvalidRefreshToken);
        }
        let refresh_id = RefreshToken::fingerprint(refresh_token);

        let session = match self.sessions.find_by_refresh(&refresh_id).await? {
            RefreshLookup::Active(session) => session,
            RefreshLookup::Retired(session_id) => {
                self.handle_refresh_reuse(&session_id).await?;
                return Err(AuthError::InvalidRefreshToken);
            }
            RefreshLookup::Unknown => return Err(AuthError::InvalidRefreshToken),
        };
        if session.is_expired(Utc::now()) {
            return Err(AuthError::InvalidRefreshToken);
        }

        let access = self.tokens.issue_access_token(&TokenSubject {
            user_id: session.user_id.clone(),
            username: session.username.clone(),
            session_id: session.session_id.clone(),
            device_type: session.device_type,
            roles: session.roles.clone(),
            permissions: session.permissions.clone(),
        })?;

        let refresh_token = if self.policy.rotate_refresh_token {
            let next = RefreshToken::generate();
            let rotated = self
                .sessions
                .rotate_refresh(&RefreshRotation {
                    session_id: session.session_id.clone(),
                    old_refresh_id: refresh_id,
                    new_refresh_id: next.id,
                    new_access_token_id: access.token_id.clone(),
                    new_access_expires_at: access.expires_at,
                })
                .await?;
            if !rotated {
                debug!(session_id = %session.session_id, "Refresh token already rotated by a concurrent request");
                return Err(AuthError::InvalidRefreshToken);
            }
            next.token
        } else {
            let touched = self
                .sessions
                .touch(&session.session_id, &access.token_id, access.expires_at)
                .await?;
            if !touched {
                return Err(AuthError::InvalidRefreshToken);
            }
            refresh_token.to_string()
        };

        info!(
            user_id = %session.user_id,
            session_id = %session.session_id,
            rotated = self.policy.rotate_refresh_token,
            "Tokens refreshed"
        );
        Ok(TokenPair {
            access_token: access.token,
            refresh_token,
            access_expires_at: access.expires_at,
            refresh_expires_at: session.expires_at,
            session_id: session.session_id,
        })
    }

    async fn handle_refresh_reuse(&self, session_id: &SessionId) -> AuthResult<()> {
        counter!("auth_refresh_reuse_total").increment(1);

        let owner = self.sessions.get(session_id).await?.map(|s| s.user_id);
        warn!(
            session_id = %session_id,
            user_id = ?owner.as_ref().map(ToString::to_string),
            revoke_all = self.policy.revoke_all_on_reuse,
            "Refresh token reuse detected, terminating session"
        );

        match owner {
            Some(user_id) if self.policy.revoke_all_on_reuse => {
                self.revoke_all(&user_id).await?;
            }
            _ => {
                self.sessions.delete(session_id).await?;
            }
        }
        Ok(())
    }

    /// 登出
    ///
    /// 已过期但签名有效的令牌同样可以登出；重复登出不报错。
    pub async fn logout(&self, access_token: &str) -> AuthResult<()> {
        let claims = self
            .tokens
            .decode_ignoring_expiry(access_token)
            .map_err(|_| AuthError::InvalidAccessToken)?;
        let session_id = claims
            .session_id()
            .map_err(|_| AuthError::InvalidAccessToken)?;

        let ttl = (claims.expires_at() - Utc::now())
            .to_std()
            .unwrap_or(Duration::ZERO)
            .max(Duration::from_secs(1));
        self.sessions.blacklist(&claims.jti, ttl).await?;
        let ended = self
            .sessions
            .delete_current(&session_id, &claims.jti)
            .await?;

        info!(
            user_id = %claims.sub,
            session_id = %session_id,
            ended,
            "Logged out"
        );
        Ok(())
    }

    /// 终止用户的全部会话，返回终止数量
    pub async fn revoke_all(&self, user_id: &UserId) -> AuthResult<usize> {
        let sessions = self.sessions.list_by_user(user_id, None).await?;

        let mut revoked = 0;
        for session in &sessions {
            if self.sessions.delete(&session.session_id).await? {
                revoked += 1;
            }
        }

        info!(user_id = %user_id, revoked, "All sessions revoked");
        Ok(revoked)
    }

    /// 当前用户的会话，按创建时间从早到晚
    pub async fn list_sessions(&self, principal: &Principal) -> AuthResult<Vec<SessionRecord>> {
        Ok(self.sessions.list_by_user(&principal.user_id, None).await?)
    }

    fn is_admin(&self, principal: &Principal) -> bool {
        principal.has_permission(&self.policy.admin_permission)
    }

    /// 强制终止指定会话：本人或管理员
    pub async fn terminate_session(
        &self,
        principal: &Principal,
        session_id: &SessionId,
    ) -> AuthResult<()> {
        let Some(session) = self.sessions.get(session_id).await? else {
            return Err(AuthError::SessionNotFound);
        };

        if session.user_id != principal.user_id && !self.is_admin(principal) {
            warn!(
                user_id = %principal.user_id,
                session_id = %session_id,
                "Attempt to terminate another user's session"
            );
            return Err(AuthError::Forbidden(
                "cannot terminate another user's session".into(),
            ));
        }

        self.sessions.delete(session_id).await?;
        info!(
            operator_id = %principal.user_id,
            user_id = %session.user_id,
            session_id = %session_id,
            "Session terminated"
        );
        Ok(())
    }

    /// 终止指定用户的全部会话：本人或管理员
    pub async fn revoke_user_sessions(
        &self,
        principal: &Principal,
        user_id: &UserId,
    ) -> AuthResult<usize> {
        if &principal.user_id != user_id && !self.is_admin(principal) {
            warn!(
                user_id = %principal.user_id,
                target_user_id = %user_id,
                "Attempt to revoke another user's sessions"
            );
            return Err(AuthError::Forbidden(
                "cannot revoke another user's sessions".into(),
            ));
        }
        self.revoke_all(user_id).await
    }
}

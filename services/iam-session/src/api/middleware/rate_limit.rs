//! 请求限流中间件

use axum::{
    extract::{Request, State},
    http::{HeaderValue, Method},
    middleware::Next,
    response::{IntoResponse, Response},
};
use iam_auth_core::Principal;
use iam_config::{RateLimitConfig, RateLimitScope};
use iam_errors::{AppError, AppResult};
use regex::Regex;
use tracing::warn;

use super::compile_path_pattern;
use crate::api::extract::client_ip;
use crate::api::state::AppState;
use crate::application::services::{RateLimitDecision, RateLimitKey};
use crate::error::AuthError;

/// 编译后的限流规则
#[derive(Debug, Clone)]
pub struct RateLimitRule {
    pub name: String,
    path: Regex,
    method: Option<Method>,
    pub scope: RateLimitScope,
    /// custom 作用域的固定键，缺省为规则名
    pub key: Option<String>,
    pub max_requests: u64,
    pub window_secs: u64,
}

/// 限流在认证链中的位置
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitPhase {
    /// ip 与 custom 作用域，携带无效令牌的请求同样计数
    BeforeAuth,
    /// user 作用域，需要认证得到的主体
    AfterAuth,
}

impl RateLimitRule {
    pub fn matches(&self, method: &Method, path: &str) -> bool {
        self.method.as_ref().is_none_or(|m| m == method) && self.path.is_match(path)
    }

    pub fn phase(&self) -> RateLimitPhase {
        match self.scope {
            RateLimitScope::User => RateLimitPhase::AfterAuth,
            RateLimitScope::Ip | RateLimitScope::Custom => RateLimitPhase::BeforeAuth,
        }
    }

    /// 计数器键带上规则名，不同规则互不影响
    fn key_for(&self, ip: &str, principal: Option<&Principal>) -> RateLimitKey {
        match (self.scope, principal) {
            (RateLimitScope::User, Some(principal)) => {
                RateLimitKey::User(format!("{}:{}", self.name, principal.user_id))
            }
            (RateLimitScope::Custom, _) => {
                RateLimitKey::Custom(self.key.clone().unwrap_or_else(|| self.name.clone()))
            }
            // 未认证请求的 user 规则按 IP 计
            _ => RateLimitKey::Ip(format!("{}:{}", self.name, ip)),
        }
    }
}

/// 限流规则集合
#[derive(Debug, Clone, Default)]
pub struct RateLimitRules {
    enabled: bool,
    rules: Vec<RateLimitRule>,
}

impl RateLimitRules {
    pub fn from_config(config: &RateLimitConfig) -> AppResult<Self> {
        let rules = config
            .rules
            .iter()
            .map(|rule| {
                let method = rule
                    .method
                    .as_deref()
                    .map(|m| {
                        Method::from_bytes(m.trim().to_ascii_uppercase().as_bytes()).map_err(|e| {
                            AppError::validation(format!(
                                "Invalid method in rate limit rule '{}': {}",
                                rule.name, e
                            ))
                        })
                    })
                    .transpose()?;

                Ok(RateLimitRule {
                    name: rule.name.clone(),
                    path: compile_path_pattern(&rule.path)?,
                    method,
                    scope: rule.scope,
                    key: rule.key.clone(),
                    max_requests: rule.max_requests,
                    window_secs: rule.window_secs,
                })
            })
            .collect::<AppResult<Vec<_>>>()?;

        Ok(Self {
            enabled: config.enabled,
            rules,
        })
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled && !self.rules.is_empty()
    }

    pub fn matching<'a>(
        &'a self,
        method: &'a Method,
        path: &'a str,
    ) -> impl Iterator<Item = &'a RateLimitRule> + 'a {
        self.rules.iter().filter(move |rule| rule.matches(method, path))
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

/// 写入限流响应头；已有更紧的配额时保留原值
fn merge_rate_limit_headers(response: &mut Response, decision: &RateLimitDecision) {
    let headers = response.headers_mut();
    let existing = headers
        .get("X-RateLimit-Remaining")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok());
    if existing.is_some_and(|remaining| remaining <= decision.remaining) {
        return;
    }
    headers.insert("X-RateLimit-Limit", HeaderValue::from(decision.limit));
    headers.insert("X-RateLimit-Remaining", HeaderValue::from(decision.remaining));
}

/// 认证之前执行 ip 与 custom 规则
pub async fn rate_limit_before_auth(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    enforce(&state, RateLimitPhase::BeforeAuth, request, next).await
}

/// 认证之后执行 user 规则
pub async fn rate_limit_after_auth(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    enforce(&state, RateLimitPhase::AfterAuth, request, next).await
}

async fn enforce(state: &AppState, phase: RateLimitPhase, request: Request, next: Next) -> Response {
    if !state.rate_limit_rules.is_enabled() {
        return next.run(request).await;
    }

    let path = request.uri().path().to_string();
    let method = request.method().clone();
    let ip = client_ip(request.headers(), request.extensions());
    let principal = request.extensions().get::<Principal>();

    // 匹配到多条规则时，响应头取剩余配额最少的一条
    let mut tightest: Option<RateLimitDecision> = None;
    for rule in state
        .rate_limit_rules
        .matching(&method, &path)
        .filter(|rule| rule.phase() == phase)
    {
        let key = rule.key_for(&ip, principal);
        let decision = state
            .rate_limiter
            .acquire(&key, rule.max_requests, rule.window_secs)
            .await;

        if decision.is_limited() {
            warn!(
                rule = %rule.name,
                key = %key,
                path = %path,
                method = %method,
                "Rate limit exceeded"
            );
            let mut response = AuthError::RateLimited {
                retry_after_secs: decision.retry_after_secs.max(1),
            }
            .into_response();
            merge_rate_limit_headers(&mut response, &decision);
            return response;
        }

        if tightest.is_none_or(|t| decision.remaining < t.remaining) {
            tightest = Some(decision);
        }
    }

    let mut response = next.run(request).await;
    if let Some(decision) = tightest {
        merge_rate_limit_headers(&mut response, &decision);
    }
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use iam_common::{DeviceType, SessionId, UserId};
    use iam_config::RateLimitRuleConfig;

    fn principal() -> Principal {
        Principal {
            user_id: UserId::new(),
            username: "alice".into(),
            session_id: SessionId::new(),
            device_type: DeviceType::Web,
            token_id: "jti".into(),
            expires_at: Utc::now(),
            roles: vec![],
            permissions: vec![],
        }
    }

    fn config(rules: Vec<RateLimitRuleConfig>) -> RateLimitConfig {
        RateLimitConfig {
            enabled: true,
            rules,
        }
    }

    fn rule(name: &str, path: &str, method: Option<&str>, scope: RateLimitScope) -> RateLimitRuleConfig {
        RateLimitRuleConfig {
            name: name.into(),
            path: path.into(),
            method: method.map(Into::into),
            scope,
            key: None,
            max_requests: 5,
            window_secs: 60,
        }
    }

    #[test]
    fn test_rules_match_method_and_path() {
        let rules = RateLimitRules::from_config(&config(vec![
            rule("login", "/auth/login", Some("post"), RateLimitScope::Ip),
            rule("api", "/auth/**", None, RateLimitScope::User),
        ]))
        .unwrap();

        let names: Vec<_> = rules
            .matching(&Method::POST, "/auth/login")
            .map(|r| r.name.as_str())
            .collect();
        assert_eq!(names, vec!["login", "api"]);

        let names: Vec<_> = rules
            .matching(&Method::GET, "/auth/login")
            .map(|r| r.name.as_str())
            .collect();
        assert_eq!(names, vec!["api"]);

        assert_eq!(rules.matching(&Method::GET, "/health").count(), 0);
    }

    #[test]
    fn test_keys_per_scope() {
        let rules = RateLimitRules::from_config(&config(vec![
            rule("login", "/auth/login", None, RateLimitScope::Ip),
            rule("me", "/auth/me", None, RateLimitScope::User),
            rule("export", "/export", None, RateLimitScope::Custom),
            rule("sessions", "/auth/sessions", None, RateLimitScope::User),
        ]))
        .unwrap();
        let [login, me, export, sessions] = [0, 1, 2, 3].map(|i| rules.rules[i].clone());

        assert_eq!(
            login.key_for("1.2.3.4", None).storage_key(),
            "ratelimit:ip:login:1.2.3.4"
        );
        // 未认证时退回 IP
        assert_eq!(me.key_for("1.2.3.4", None).storage_key(), "ratelimit:ip:me:1.2.3.4");
        assert_eq!(export.key_for("1.2.3.4", None).storage_key(), "ratelimit:custom:export");

        // 两条 user 规则各自计数
        let principal = principal();
        let me_key = me.key_for("1.2.3.4", Some(&principal)).storage_key();
        let sessions_key = sessions.key_for("1.2.3.4", Some(&principal)).storage_key();
        assert_eq!(me_key, format!("ratelimit:user:me:{}", principal.user_id));
        assert_eq!(sessions_key, format!("ratelimit:user:sessions:{}", principal.user_id));
    }

    #[test]
    fn test_user_rules_run_after_auth() {
        let rules = RateLimitRules::from_config(&config(vec![
            rule("login", "/auth/login", None, RateLimitScope::Ip),
            rule("me", "/auth/me", None, RateLimitScope::User),
            rule("export", "/export", None, RateLimitScope::Custom),
        ]))
        .unwrap();
        let phases: Vec<_> = rules.rules.iter().map(RateLimitRule::phase).collect();
        assert_eq!(
            phases,
            vec![
                RateLimitPhase::BeforeAuth,
                RateLimitPhase::AfterAuth,
                RateLimitPhase::BeforeAuth
            ]
        );
    }

    #[test]
    fn test_invalid_method_rejected() {
        let result =
            RateLimitRules::from_config(&config(vec![rule("bad", "/x", Some("GE T"), RateLimitScope::Ip)]));
        assert!(result.is_err());
    }
}

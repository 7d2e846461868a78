//! Redis 会话存储
//!
//! 会话记录存为 HASH，时间字段为毫秒时间戳；设备索引为 LIST，
//! 按创建顺序 RPUSH，队首即最早的会话。

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use iam_common::{DeviceType, SessionId, UserId};
use iam_errors::{AppError, AppResult};
use iam_ports::{
    AccessState, Admission, DeviceLimit, OverflowPolicy, RefreshLookup, RefreshRotation,
    SessionRecord, SessionStore,
};
use redis::AsyncCommands;
use tracing::debug;

use crate::scripts::{
    CREATE_SESSION, DELETE_SESSION, FIND_BY_REFRESH, INSPECT_ACCESS, ROTATE_REFRESH,
    TOUCH_SESSION,
};
use crate::store::{RedisStore, millis};

fn encode(session: &SessionRecord) -> Vec<(&'static str, String)> {
    vec![
        ("session_id", session.session_id.to_string()),
        ("user_id", session.user_id.to_string()),
        ("username", session.username.clone()),
        ("device_type", session.device_type.to_string()),
        ("device_name", session.device_name.clone()),
        ("ip", session.ip.clone()),
        ("region", session.region.clone().unwrap_or_default()),
        ("user_agent", session.user_agent.clone()),
        ("created_at", session.created_at.timestamp_millis().to_string()),
        ("expires_at", session.expires_at.timestamp_millis().to_string()),
        ("refresh_token_id", session.refresh_token_id.clone()),
        ("access_token_id", session.access_token_id.clone()),
        (
            "access_expires_at",
            session.access_expires_at.timestamp_millis().to_string(),
        ),
        ("roles", session.roles.join(LIST_SEPARATOR)),
        ("permissions", session.permissions.join(LIST_SEPARATOR)),
    ]
}

/// 角色、权限标识中不会出现的分隔符
const LIST_SEPARATOR: &str = ",";

fn list(data: &HashMap<String, String>, name: &str) -> Vec<String> {
    data.get(name)
        .map(|raw| {
            raw.split(LIST_SEPARATOR)
                .filter(|item| !item.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

fn field<'a>(data: &'a HashMap<String, String>, name: &str) -> AppResult<&'a str> {
    data.get(name)
        .map(String::as_str)
        .ok_or_else(|| AppError::internal(format!("Session record is missing field {}", name)))
}

fn timestamp(data: &HashMap<String, String>, name: &str) -> AppResult<DateTime<Utc>> {
    field(data, name)?
        .parse::<i64>()
        .ok()
        .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
        .ok_or_else(|| AppError::internal(format!("Session field {} is not a timestamp", name)))
}

fn session_id(raw: &str) -> AppResult<SessionId> {
    SessionId::from_string(raw)
        .map_err(|e| AppError::internal(format!("Malformed session id {}: {}", raw, e)))
}

fn decode(data: &HashMap<String, String>) -> AppResult<SessionRecord> {
    let user_id = field(data, "user_id")?;
    let device_type = field(data, "device_type")?;
    let region = field(data, "region").unwrap_or_default();

    Ok(SessionRecord {
        session_id: session_id(field(data, "session_id")?)?,
        user_id: UserId::from_string(user_id)
            .map_err(|e| AppError::internal(format!("Malformed user id {}: {}", user_id, e)))?,
        username: field(data, "username")?.to_string(),
        device_type: device_type
            .parse()
            .map_err(|e| AppError::internal(format!("Malformed session record: {}", e)))?,
        device_name: field(data, "device_name")?.to_string(),
        ip: field(data, "ip")?.to_string(),
        region: (!region.is_empty()).then(|| region.to_string()),
        user_agent: field(data, "user_agent")?.to_string(),
        created_at: timestamp(data, "created_at")?,
        expires_at: timestamp(data, "expires_at")?,
        refresh_token_id: field(data, "refresh_token_id")?.to_string(),
        access_token_id: field(data, "access_token_id")?.to_string(),
        access_expires_at: timestamp(data, "access_expires_at")?,
        roles: list(data, "roles"),
        permissions: list(data, "permissions"),
    })
}

/// 脚本返回的 [k1, v1, k2, v2, ...] 转为字段表
fn pairs(values: &[String]) -> HashMap<String, String> {
    values
        .chunks_exact(2)
        .map(|pair| (pair[0].clone(), pair[1].clone()))
        .collect()
}

fn tag(result: &[String]) -> AppResult<&str> {
    result
        .first()
        .map(String::as_str)
        .ok_or_else(|| AppError::internal("Empty script result"))
}

impl RedisStore {
    async fn insert(
        &self,
        session: &SessionRecord,
        max_sessions: u32,
        policy: OverflowPolicy,
    ) -> AppResult<Vec<String>> {
        let mut conn = self.connection();
        let ttl = session.remaining_ttl(Utc::now());
        if ttl.is_zero() {
            return Err(AppError::validation("Session is already expired"));
        }

        let policy = match policy {
            OverflowPolicy::RejectNew => "reject",
            OverflowPolicy::EvictOldest => "evict",
        };

        let mut invocation = CREATE_SESSION.prepare_invoke();
        invocation
            .key(self.keys.devices(&session.user_id, session.device_type))
            .key(self.keys.session(&session.session_id))
            .key(self.keys.refresh(&session.refresh_token_id))
            .arg(self.keys.prefix())
            .arg(max_sessions)
            .arg(policy)
            .arg(Utc::now().timestamp_millis())
            .arg(millis(ttl))
            .arg(session.session_id.to_string());
        for (name, value) in encode(session) {
            invocation.arg(name).arg(value);
        }

        self.run("create_session", invocation.invoke_async(&mut conn))
            .await
    }

    /// `expected_access` 为空时无条件删除
    async fn remove(&self, session_id: &SessionId, expected_access: &str) -> AppResult<bool> {
        let mut conn = self.connection();

        let deleted: i64 = self
            .run(
                "delete_session",
                DELETE_SESSION
                    .key(self.keys.session(session_id))
                    .arg(self.keys.prefix())
                    .arg(session_id.to_string())
                    .arg(Utc::now().timestamp_millis())
                    .arg(expected_access)
                    .invoke_async(&mut conn),
            )
            .await?;

        Ok(deleted == 1)
    }
}

#[async_trait]
impl SessionStore for RedisStore {
    async fn create(&self, session: &SessionRecord) -> AppResult<SessionId> {
        self.insert(session, 0, OverflowPolicy::RejectNew).await?;
        Ok(session.session_id.clone())
    }

    async fn create_bounded(
        &self,
        session: &SessionRecord,
        limit: DeviceLimit,
    ) -> AppResult<Admission> {
        let result = self
            .insert(session, limit.max_sessions, limit.policy)
            .await?;

        let ids = result
            .iter()
            .skip(1)
            .map(String::as_str)
            .map(session_id)
            .collect::<AppResult<Vec<_>>>()?;

        match tag(&result)? {
            "admitted" => {
                if !ids.is_empty() {
                    debug!(
                        user_id = %session.user_id,
                        device_type = %session.device_type,
                        evicted = ids.len(),
                        "Evicted oldest sessions"
                    );
                }
                Ok(Admission::Admitted { evicted: ids })
            }
            "rejected" => Ok(Admission::Rejected { active: ids }),
            other => Err(AppError::internal(format!(
                "Unexpected admission result {}",
                other
            ))),
        }
    }

    async fn get(&self, session_id: &SessionId) -> AppResult<Option<SessionRecord>> {
        let mut conn = self.connection();
        let key = self.keys.session(session_id);

        let data: HashMap<String, String> = self.run("get_session", conn.hgetall(&key)).await?;
        if data.is_empty() {
            return Ok(None);
        }
        decode(&data).map(Some)
    }

    async fn find_by_refresh(&self, refresh_id: &str) -> AppResult<RefreshLookup> {
        let mut conn = self.connection();

        let result: Vec<String> = self
            .run(
                "find_by_refresh",
                FIND_BY_REFRESH
                    .key(self.keys.refresh(refresh_id))
                    .key(self.keys.retired_refresh(refresh_id))
                    .arg(self.keys.prefix())
                    .invoke_async(&mut conn),
            )
            .await?;

        match tag(&result)? {
            "active" => decode(&pairs(result.get(1..).unwrap_or_default())).map(RefreshLookup::Active),
            "retired" => {
                let id = result
                    .get(1)
                    .ok_or_else(|| AppError::internal("Retired marker without session id"))?;
                Ok(RefreshLookup::Retired(session_id(id)?))
            }
            _ => Ok(RefreshLookup::Unknown),
        }
    }

    async fn rotate_refresh(&self, rotation: &RefreshRotation) -> AppResult<bool> {
        let mut conn = self.connection();

        let rotated: i64 = self
            .run(
                "rotate_refresh",
                ROTATE_REFRESH
                    .key(self.keys.session(&rotation.session_id))
                    .key(self.keys.refresh(&rotation.old_refresh_id))
                    .key(self.keys.refresh(&rotation.new_refresh_id))
                    .key(self.keys.retired_refresh(&rotation.old_refresh_id))
                    .arg(self.keys.prefix())
                    .arg(rotation.session_id.to_string())
                    .arg(&rotation.old_refresh_id)
                    .arg(&rotation.new_refresh_id)
                    .arg(&rotation.new_access_token_id)
                    .arg(rotation.new_access_expires_at.timestamp_millis())
                    .arg(Utc::now().timestamp_millis())
                    .invoke_async(&mut conn),
            )
            .await?;

        Ok(rotated == 1)
    }

    async fn touch(
        &self,
        session_id: &SessionId,
        access_token_id: &str,
        access_expires_at: DateTime<Utc>,
    ) -> AppResult<bool> {
        let mut conn = self.connection();

        let touched: i64 = self
            .run(
                "touch_session",
                TOUCH_SESSION
                    .key(self.keys.session(session_id))
                    .arg(self.keys.prefix())
                    .arg(access_token_id)
                    .arg(access_expires_at.timestamp_millis())
                    .arg(Utc::now().timestamp_millis())
                    .invoke_async(&mut conn),
            )
            .await?;

        Ok(touched == 1)
    }

    async fn delete(&self, session_id: &SessionId) -> AppResult<bool> {
        self.remove(session_id, "").await
    }

    async fn delete_current(
        &self,
        session_id: &SessionId,
        access_token_id: &str,
    ) -> AppResult<bool> {
        self.remove(session_id, access_token_id).await
    }

    async fn list_by_user(
        &self,
        user_id: &UserId,
        device_type: Option<DeviceType>,
    ) -> AppResult<Vec<SessionRecord>> {
        let device_types = match device_type {
            Some(device_type) => vec![device_type],
            None => DeviceType::ALL.to_vec(),
        };

        let mut sessions = Vec::new();
        for device_type in device_types {
            let mut conn = self.connection();
            let key = self.keys.devices(user_id, device_type);
            let ids: Vec<String> = self
                .run("list_sessions", conn.lrange(&key, 0, -1))
                .await?;

            for id in ids {
                // 索引中可能残留已过期会话，以记录为准
                if let Some(session) = self.get(&session_id(&id)?).await? {
                    sessions.push(session);
                }
            }
        }

        sessions.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.session_id.0.cmp(&b.session_id.0))
        });
        Ok(sessions)
    }

    async fn inspect_access(
        &self,
        session_id: &SessionId,
        token_id: &str,
    ) -> AppResult<AccessState> {
        let mut conn = self.connection();

        let result: Vec<String> = self
            .run(
                "inspect_access",
                INSPECT_ACCESS
                    .key(self.keys.blacklist(token_id))
                    .key(self.keys.session(session_id))
                    .arg(token_id)
                    .invoke_async(&mut conn),
            )
            .await?;

        match (tag(&result)?, result.get(1)) {
            ("active", Some(user_id)) => Ok(AccessState::Active {
                user_id: UserId::from_string(user_id).map_err(|e| {
                    AppError::internal(format!("Malformed user id {}: {}", user_id, e))
                })?,
            }),
            ("missing", _) => Ok(AccessState::SessionMissing),
            _ => Ok(AccessState::Revoked),
        }
    }

    async fn blacklist(&self, token_id: &str, ttl: Duration) -> AppResult<()> {
        let mut conn = self.connection();
        let key = self.keys.blacklist(token_id);

        let _: () = self
            .run("blacklist", conn.pset_ex(&key, "1", millis(ttl)))
            .await?;
        Ok(())
    }

    async fn is_blacklisted(&self, token_id: &str) -> AppResult<bool> {
        let mut conn = self.connection();
        let key = self.keys.blacklist(token_id);

        self.run("is_blacklisted", conn.exists(&key)).await
    }
}

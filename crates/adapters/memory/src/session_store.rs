//! 内存会话存储

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use iam_common::{DeviceType, SessionId, UserId};
use iam_errors::{AppError, AppResult};
use iam_ports::{
    AccessState, Admission, DeviceLimit, OverflowPolicy, RefreshLookup, RefreshRotation,
    SessionRecord, SessionStore,
};
use tokio::time::Instant;
use tracing::debug;

use crate::store::{Expiring, MemoryStore, State};

impl State {
    fn blacklist_access(&mut self, token_id: &str, expires_at: DateTime<Utc>) {
        let ttl = (expires_at - Utc::now())
            .to_std()
            .unwrap_or(Duration::ZERO)
            .max(Duration::from_secs(1));
        self.blacklist
            .insert(token_id.to_string(), Expiring::new((), ttl));
    }

    /// 设备索引中仍然存在的会话，顺带清理失效条目
    fn live_ids(&mut self, user_id: &UserId, device_type: DeviceType, now: Instant) -> Vec<SessionId> {
        let index = self
            .devices
            .remove(&(user_id.clone(), device_type))
            .unwrap_or_default();
        let live: Vec<SessionId> = index
            .into_iter()
            .filter(|id| self.live_session(id, now).is_some())
            .collect();

        if !live.is_empty() {
            self.devices
                .insert((user_id.clone(), device_type), live.clone());
        }
        live
    }

    fn insert_session(&mut self, session: &SessionRecord, ttl: Duration) {
        let id = session.session_id.clone();
        self.sessions
            .insert(id.clone(), Expiring::new(session.clone(), ttl));
        self.refresh.insert(
            session.refresh_token_id.clone(),
            Expiring::new(id.clone(), ttl),
        );
        self.devices
            .entry((session.user_id.clone(), session.device_type))
            .or_default()
            .push(id);
    }

    fn remove_session(&mut self, session_id: &SessionId, now: Instant) -> bool {
        let Some(entry) = self.sessions.remove(session_id) else {
            return false;
        };
        if !entry.is_live(now) {
            return false;
        }

        let record = entry.value;
        self.blacklist_access(&record.access_token_id, record.access_expires_at);
        self.refresh.remove(&record.refresh_token_id);
        if let Some(index) = self
            .devices
            .get_mut(&(record.user_id.clone(), record.device_type))
        {
            index.retain(|id| id != session_id);
        }
        true
    }
}

fn session_ttl(session: &SessionRecord) -> AppResult<Duration> {
    let ttl = session.remaining_ttl(Utc::now());
    if ttl.is_zero() {
        return Err(AppError::validation("Session is already expired"));
    }
    Ok(ttl)
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn create(&self, session: &SessionRecord) -> AppResult<SessionId> {
        let ttl = session_ttl(session)?;
        let mut state = self.state.lock();
        state.insert_session(session, ttl);
        state.record_write(Instant::now());
        Ok(session.session_id.clone())
    }

    async fn create_bounded(
        &self,
        session: &SessionRecord,
        limit: DeviceLimit,
    ) -> AppResult<Admission> {
        let ttl = session_ttl(session)?;
        let now = Instant::now();
        let mut state = self.state.lock();
        state.record_write(now);

        let live = state.live_ids(&session.user_id, session.device_type, now);
        let max = limit.max_sessions as usize;
        let mut evicted = Vec::new();

        if max > 0 && live.len() >= max {
            match limit.policy {
                OverflowPolicy::RejectNew => return Ok(Admission::Rejected { active: live }),
                OverflowPolicy::EvictOldest => {
                    let excess = live.len() + 1 - max;
                    for victim in live.into_iter().take(excess) {
                        state.remove_session(&victim, now);
                        evicted.push(victim);
                    }
                    debug!(
                        user_id = %session.user_id,
                        device_type = %session.device_type,
                        evicted = evicted.len(),
                        "Evicted oldest sessions"
                    );
                }
            }
        }

        state.insert_session(session, ttl);
        Ok(Admission::Admitted { evicted })
    }

    async fn get(&self, session_id: &SessionId) -> AppResult<Option<SessionRecord>> {
        let now = Instant::now();
        Ok(self.state.lock().live_session(session_id, now).cloned())
    }

    async fn find_by_refresh(&self, refresh_id: &str) -> AppResult<RefreshLookup> {
        let now = Instant::now();
        let mut state = self.state.lock();

        let pointer = state
            .refresh
            .get(refresh_id)
            .filter(|entry| entry.is_live(now))
            .map(|entry| entry.value.clone());
        if let Some(session) = pointer.and_then(|id| state.live_session(&id, now).cloned()) {
            return Ok(RefreshLookup::Active(session));
        }

        Ok(state
            .retired
            .get(refresh_id)
            .filter(|entry| entry.is_live(now))
            .map_or(RefreshLookup::Unknown, |entry| {
                RefreshLookup::Retired(entry.value.clone())
            }))
    }

    async fn rotate_refresh(&self, rotation: &RefreshRotation) -> AppResult<bool> {
        let now = Instant::now();
        let mut state = self.state.lock();
        state.record_write(now);

        let pointer_matches = state
            .refresh
            .get(&rotation.old_refresh_id)
            .is_some_and(|entry| entry.is_live(now) && entry.value == rotation.session_id);
        if !pointer_matches {
            return Ok(false);
        }

        let Some(current) = state.live_session(&rotation.session_id, now).cloned() else {
            return Ok(false);
        };
        if current.refresh_token_id != rotation.old_refresh_id {
            return Ok(false);
        }
        let remaining = state
            .sessions
            .get(&rotation.session_id)
            .and_then(|entry| entry.remaining(now))
            .unwrap_or(Duration::ZERO);
        if remaining.is_zero() {
            return Ok(false);
        }

        state.blacklist_access(&current.access_token_id, current.access_expires_at);
        state.refresh.remove(&rotation.old_refresh_id);
        state.retired.insert(
            rotation.old_refresh_id.clone(),
            Expiring::new(rotation.session_id.clone(), remaining),
        );
        state.refresh.insert(
            rotation.new_refresh_id.clone(),
            Expiring::new(rotation.session_id.clone(), remaining),
        );
        if let Some(entry) = state.sessions.get_mut(&rotation.session_id) {
            entry.value.refresh_token_id = rotation.new_refresh_id.clone();
            entry.value.access_token_id = rotation.new_access_token_id.clone();
            entry.value.access_expires_at = rotation.new_access_expires_at;
        }
        Ok(true)
    }

    async fn touch(
        &self,
        session_id: &SessionId,
        access_token_id: &str,
        access_expires_at: DateTime<Utc>,
    ) -> AppResult<bool> {
        let now = Instant::now();
        let mut state = self.state.lock();
        state.record_write(now);

        let Some(current) = state.live_session(session_id, now).cloned() else {
            return Ok(false);
        };
        if current.access_token_id != access_token_id {
            state.blacklist_access(&current.access_token_id, current.access_expires_at);
        }
        if let Some(entry) = state.sessions.get_mut(session_id) {
            entry.value.access_token_id = access_token_id.to_string();
            entry.value.access_expires_at = access_expires_at;
        }
        Ok(true)
    }

    async fn delete(&self, session_id: &SessionId) -> AppResult<bool> {
        let now = Instant::now();
        let mut state = self.state.lock();
        state.record_write(now);
        Ok(state.remove_session(session_id, now))
    }

    async fn delete_current(
        &self,
        session_id: &SessionId,
        access_token_id: &str,
    ) -> AppResult<bool> {
        let now = Instant::now();
        let mut state = self.state.lock();
        state.record_write(now);

        let is_current = state
            .live_session(session_id, now)
            .is_some_and(|session| session.access_token_id == access_token_id);
        Ok(is_current && state.remove_session(session_id, now))
    }

    async fn list_by_user(
        &self,
        user_id: &UserId,
        device_type: Option<DeviceType>,
    ) -> AppResult<Vec<SessionRecord>> {
        let now = Instant::now();
        let mut state = self.state.lock();

        let device_types = match device_type {
            Some(device_type) => vec![device_type],
            None => DeviceType::ALL.to_vec(),
        };

        let mut sessions = Vec::new();
        for device_type in device_types {
            for id in state.live_ids(user_id, device_type, now) {
                if let Some(session) = state.live_session(&id, now) {
                    sessions.push(session.clone());
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
        let now = Instant::now();
        let mut state = self.state.lock();

        if state.is_blacklisted(token_id, now) {
            return Ok(AccessState::Revoked);
        }
        match state.live_session(session_id, now) {
            None => Ok(AccessState::SessionMissing),
            Some(session) if session.access_token_id != token_id => Ok(AccessState::Revoked),
            Some(session) => Ok(AccessState::Active {
                user_id: session.user_id.clone(),
            }),
        }
    }

    async fn blacklist(&self, token_id: &str, ttl: Duration) -> AppResult<()> {
        let mut state = self.state.lock();
        state
            .blacklist
            .insert(token_id.to_string(), Expiring::new((), ttl));
        state.record_write(Instant::now());
        Ok(())
    }

    async fn is_blacklisted(&self, token_id: &str) -> AppResult<bool> {
        let now = Instant::now();
        Ok(self.state.lock().is_blacklisted(token_id, now))
    }
}

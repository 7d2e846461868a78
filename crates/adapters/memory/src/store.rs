//! 内存存储句柄

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use iam_common::{DeviceType, SessionId, UserId};
use iam_errors::AppResult;
use iam_ports::{CaptchaStore, SessionRecord};
use parking_lot::Mutex;
use tokio::time::Instant;

/// 带过期时间的值
#[derive(Debug, Clone)]
pub(crate) struct Expiring<T> {
    pub value: T,
    pub expires_at: Option<Instant>,
}

impl<T> Expiring<T> {
    pub fn new(value: T, ttl: Duration) -> Self {
        Self {
            value,
            expires_at: Some(Instant::now() + ttl),
        }
    }

    pub fn is_live(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|at| at > now)
    }

    pub fn remaining(&self, now: Instant) -> Option<Duration> {
        self.expires_at.map(|at| at.saturating_duration_since(now))
    }
}

/// 每隔多少次写操作清理一次全部过期数据
pub(crate) const SWEEP_INTERVAL: u64 = 256;

/// 滑动窗口事件
#[derive(Debug)]
pub(crate) struct EventLog {
    pub window: Duration,
    pub entries: VecDeque<(Instant, String)>,
}

impl EventLog {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            entries: VecDeque::new(),
        }
    }

    pub fn prune(&mut self, now: Instant) {
        while self
            .entries
            .front()
            .is_some_and(|(at, _)| now.duration_since(*at) >= self.window)
        {
            self.entries.pop_front();
        }
    }
}

#[derive(Debug, Default)]
pub(crate) struct State {
    pub counters: HashMap<String, Expiring<u64>>,
    pub events: HashMap<String, EventLog>,
    pub sessions: HashMap<SessionId, Expiring<SessionRecord>>,
    pub refresh: HashMap<String, Expiring<SessionId>>,
    pub retired: HashMap<String, Expiring<SessionId>>,
    /// (用户, 设备类型) 索引，按创建顺序排列
    pub devices: HashMap<(UserId, DeviceType), Vec<SessionId>>,
    pub blacklist: HashMap<String, Expiring<()>>,
    pub captcha: HashMap<String, Expiring<String>>,
    pub next_event_id: u64,
    writes: u64,
}

impl State {
    /// 记一次写操作，达到间隔时清理过期数据
    pub fn record_write(&mut self, now: Instant) {
        self.writes += 1;
        if self.writes % SWEEP_INTERVAL == 0 {
            self.sweep(now);
        }
    }

    /// 删除所有已过期的条目、空的事件窗口和指向已删除会话的索引
    pub fn sweep(&mut self, now: Instant) {
        self.counters.retain(|_, entry| entry.is_live(now));
        self.sessions.retain(|_, entry| entry.is_live(now));
        self.refresh.retain(|_, entry| entry.is_live(now));
        self.retired.retain(|_, entry| entry.is_live(now));
        self.blacklist.retain(|_, entry| entry.is_live(now));
        self.captcha.retain(|_, entry| entry.is_live(now));
        self.events.retain(|_, log| {
            log.prune(now);
            !log.entries.is_empty()
        });

        let sessions = &self.sessions;
        self.devices.retain(|_, ids| {
            ids.retain(|id| sessions.contains_key(id));
            !ids.is_empty()
        });
    }

    pub fn live_session(&mut self, session_id: &SessionId, now: Instant) -> Option<&SessionRecord> {
        if self
            .sessions
            .get(session_id)
            .is_some_and(|entry| !entry.is_live(now))
        {
            self.sessions.remove(session_id);
        }
        self.sessions.get(session_id).map(|entry| &entry.value)
    }

    pub fn live_counter(&mut self, key: &str, now: Instant) -> Option<&mut Expiring<u64>> {
        if self.counters.get(key).is_some_and(|c| !c.is_live(now)) {
            self.counters.remove(key);
        }
        self.counters.get_mut(key)
    }

    pub fn is_blacklisted(&mut self, token_id: &str, now: Instant) -> bool {
        match self.blacklist.get(token_id) {
            Some(entry) if entry.is_live(now) => true,
            Some(_) => {
                self.blacklist.remove(token_id);
                false
            }
            None => false,
        }
    }
}

/// 进程内共享存储
///
/// 所有操作都在同一把锁内完成，因此与 Redis 脚本一样是原子的。
#[derive(Clone, Default)]
pub struct MemoryStore {
    pub(crate) state: Arc<Mutex<State>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 写入验证码答案
    pub fn put_captcha(&self, captcha_id: &str, answer: &str, ttl: Duration) {
        let mut state = self.state.lock();
        state
            .captcha
            .insert(captcha_id.to_string(), Expiring::new(answer.to_string(), ttl));
        state.record_write(Instant::now());
    }
}

#[async_trait]
impl CaptchaStore for MemoryStore {
    async fn take(&self, captcha_id: &str) -> AppResult<Option<String>> {
        let now = Instant::now();
        let mut state = self.state.lock();
        let entry = state.captcha.remove(captcha_id);
        state.record_write(now);
        Ok(entry.filter(|e| e.is_live(now)).map(|e| e.value))
    }
}

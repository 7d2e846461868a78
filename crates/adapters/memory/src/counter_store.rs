//! 内存计数器存储

use std::time::Duration;

use async_trait::async_trait;
use iam_errors::AppResult;
use iam_ports::{CounterStore, PermitDecision};
use tokio::time::Instant;

use crate::store::{EventLog, Expiring, MemoryStore};

fn ceil_secs(duration: Duration) -> u64 {
    (duration.as_millis() as u64).div_ceil(1000)
}

#[async_trait]
impl CounterStore for MemoryStore {
    async fn acquire_permit(
        &self,
        key: &str,
        max: u64,
        window: Duration,
    ) -> AppResult<PermitDecision> {
        let now = Instant::now();
        let mut state = self.state.lock();

        // 先清理已过期的窗口
        let _ = state.live_counter(key, now);
        let counter = state
            .counters
            .entry(key.to_string())
            .or_insert_with(|| Expiring::new(0, window));

        let allowed = counter.value < max;
        if allowed {
            counter.value += 1;
        }
        let remaining = counter.remaining(now).unwrap_or(window);
        let decision = PermitDecision {
            allowed,
            count: counter.value,
            retry_after_secs: ceil_secs(remaining),
        };

        if counter.value == 0 {
            state.counters.remove(key);
        }
        state.record_write(now);
        Ok(decision)
    }

    async fn increment_sliding(&self, key: &str, ttl: Duration) -> AppResult<u64> {
        let now = Instant::now();
        let mut state = self.state.lock();

        let value = state.live_counter(key, now).map_or(0, |c| c.value) + 1;
        state
            .counters
            .insert(key.to_string(), Expiring::new(value, ttl));
        state.record_write(now);
        Ok(value)
    }

    async fn count(&self, key: &str) -> AppResult<u64> {
        let now = Instant::now();
        Ok(self.state.lock().live_counter(key, now).map_or(0, |c| c.value))
    }

    async fn ttl(&self, key: &str) -> AppResult<Option<Duration>> {
        let now = Instant::now();
        Ok(self
            .state
            .lock()
            .live_counter(key, now)
            .and_then(|c| c.remaining(now)))
    }

    async fn reset(&self, key: &str) -> AppResult<()> {
        let mut state = self.state.lock();
        state.counters.remove(key);
        state.events.remove(key);
        state.record_write(Instant::now());
        Ok(())
    }

    async fn try_record_event(
        &self,
        key: &str,
        max: u64,
        window: Duration,
    ) -> AppResult<Option<String>> {
        let now = Instant::now();
        let mut state = self.state.lock();
        state.record_write(now);

        state.next_event_id += 1;
        let event_id = state.next_event_id.to_string();

        let log = state
            .events
            .entry(key.to_string())
            .or_insert_with(|| EventLog::new(window));
        log.window = window;
        log.prune(now);

        if log.entries.len() as u64 >= max {
            if log.entries.is_empty() {
                state.events.remove(key);
            }
            return Ok(None);
        }
        log.entries.push_back((now, event_id.clone()));
        Ok(Some(event_id))
    }

    async fn remove_event(&self, key: &str, event_id: &str) -> AppResult<()> {
        let mut state = self.state.lock();
        state.record_write(Instant::now());

        if let Some(log) = state.events.get_mut(key) {
            log.entries.retain(|(_, id)| id != event_id);
            if log.entries.is_empty() {
                state.events.remove(key);
            }
        }
        Ok(())
    }
}

//! Redis 计数器存储

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use iam_errors::AppResult;
use iam_ports::{CounterStore, PermitDecision};
use redis::AsyncCommands;
use uuid::Uuid;

use crate::scripts::{ACQUIRE_PERMIT, INCREMENT_SLIDING, TRY_RECORD_EVENT};
use crate::store::{RedisStore, millis};

#[async_trait]
impl CounterStore for RedisStore {
    async fn acquire_permit(
        &self,
        key: &str,
        max: u64,
        window: Duration,
    ) -> AppResult<PermitDecision> {
        let mut conn = self.connection();
        let key = self.keys.counter(key);

        let result: (i64, u64, i64) = self
            .run(
                "acquire_permit",
                ACQUIRE_PERMIT
                    .key(&key)
                    .arg(max)
                    .arg(millis(window))
                    .invoke_async(&mut conn),
            )
            .await?;

        let (allowed, count, ttl_ms) = result;
        Ok(PermitDecision {
            allowed: allowed == 1,
            count,
            retry_after_secs: (ttl_ms.max(0) as u64).div_ceil(1000),
        })
    }

    async fn increment_sliding(&self, key: &str, ttl: Duration) -> AppResult<u64> {
        let mut conn = self.connection();
        let key = self.keys.counter(key);

        self.run(
            "increment_sliding",
            INCREMENT_SLIDING
                .key(&key)
                .arg(millis(ttl))
                .invoke_async(&mut conn),
        )
        .await
    }

    async fn count(&self, key: &str) -> AppResult<u64> {
        let mut conn = self.connection();
        let key = self.keys.counter(key);

        let value: Option<u64> = self.run("count", conn.get(&key)).await?;
        Ok(value.unwrap_or(0))
    }

    async fn ttl(&self, key: &str) -> AppResult<Option<Duration>> {
        let mut conn = self.connection();
        let key = self.keys.counter(key);

        let ttl_ms: i64 = self.run("ttl", conn.pttl(&key)).await?;

        // -2 表示键不存在，-1 表示没有过期时间
        match ttl_ms {
            t if t < 0 => Ok(None),
            t => Ok(Some(Duration::from_millis(t as u64))),
        }
    }

    async fn reset(&self, key: &str) -> AppResult<()> {
        let mut conn = self.connection();
        let key = self.keys.counter(key);

        let _: i64 = self.run("reset", conn.del(&key)).await?;
        Ok(())
    }

    async fn try_record_event(
        &self,
        key: &str,
        max: u64,
        window: Duration,
    ) -> AppResult<Option<String>> {
        let mut conn = self.connection();
        let key = self.keys.counter(key);
        let now = Utc::now().timestamp_millis();
        let member = format!("{}-{}", now, Uuid::new_v4().simple());

        let recorded: i64 = self
            .run(
                "try_record_event",
                TRY_RECORD_EVENT
                    .key(&key)
                    .arg(now)
                    .arg(millis(window))
                    .arg(max)
                    .arg(&member)
                    .invoke_async(&mut conn),
            )
            .await?;

        Ok((recorded == 1).then_some(member))
    }

    async fn remove_event(&self, key: &str, event_id: &str) -> AppResult<()> {
        let mut conn = self.connection();
        let key = self.keys.counter(key);

        let _: i64 = self.run("remove_event", conn.zrem(&key, event_id)).await?;
        Ok(())
    }
}

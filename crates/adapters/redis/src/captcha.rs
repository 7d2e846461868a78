//! Redis 验证码存储

use std::time::Duration;

use async_trait::async_trait;
use iam_errors::AppResult;
use iam_ports::CaptchaStore;
use redis::AsyncCommands;

use crate::store::{RedisStore, millis};

impl RedisStore {
    /// 写入验证码答案
    pub async fn put_captcha(&self, captcha_id: &str, answer: &str, ttl: Duration) -> AppResult<()> {
        let mut conn = self.connection();
        let key = self.keys.captcha(captcha_id);

        let _: () = self
            .run("put_captcha", conn.pset_ex(&key, answer, millis(ttl)))
            .await?;
        Ok(())
    }
}

#[async_trait]
impl CaptchaStore for RedisStore {
    async fn take(&self, captcha_id: &str) -> AppResult<Option<String>> {
        let mut conn = self.connection();
        let key = self.keys.captcha(captcha_id);

        // GETDEL 保证同一个验证码只能使用一次
        self.run(
            "take_captcha",
            redis::cmd("GETDEL").arg(&key).query_async(&mut conn),
        )
        .await
    }
}

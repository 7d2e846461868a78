//! 验证码存储 trait 定义

use async_trait::async_trait;
use iam_errors::AppResult;

/// 验证码存储
///
/// 验证码由独立的签发服务写入，这里只负责一次性读取。
#[async_trait]
pub trait CaptchaStore: Send + Sync {
    /// 读取并删除验证码答案，不存在或已过期时返回 None
    async fn take(&self, captcha_id: &str) -> AppResult<Option<String>>;
}

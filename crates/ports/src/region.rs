//! 地区解析 trait 定义

use async_trait::async_trait;

/// 根据客户端 IP 解析地区
///
/// 解析失败不影响登录，返回 None 即可。
#[async_trait]
pub trait RegionResolver: Send + Sync {
    async fn resolve(&self, ip: &str) -> Option<String>;
}

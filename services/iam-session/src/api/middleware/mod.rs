//! 中间件
//!
//! 顺序：请求追踪 -> 认证 -> 限流 -> 处理器。

mod auth;
mod rate_limit;

pub use auth::*;
pub use rate_limit::*;

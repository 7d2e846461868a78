//! iam-adapter-redis - Redis 适配器
//!
//! 多实例部署时共享的计数器、会话与验证码存储

mod captcha;
mod connection;
mod counter_store;
mod keys;
mod scripts;
mod session_store;
mod store;

pub use connection::*;
pub use keys::KeySpace;
pub use store::{DEFAULT_COMMAND_TIMEOUT, RedisStore};

//! iam-session - 分布式会话与访问控制服务
//!
//! 登录、令牌校验、刷新与登出，设备并发限制、暴力破解防护与通用限流。
//! 跨进程的协调全部依赖共享存储中的原子操作。

pub mod api;
pub mod application;
pub mod bootstrap;
pub mod domain;
pub mod error;
pub mod infrastructure;

pub use api::{AppState, build_router};
pub use bootstrap::{Collaborators, Stores, build_lifecycle, build_state};
pub use error::{AuthError, AuthResult};

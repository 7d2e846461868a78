//! iam-adapter-memory - 进程内存储
//!
//! 与 Redis 适配器语义一致的单节点实现，用于本地开发和测试。
//! 多实例部署必须使用 Redis。

mod counter_store;
mod session_store;
mod store;

pub use store::MemoryStore;

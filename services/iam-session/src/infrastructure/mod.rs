//! 基础设施层

pub mod audit;
pub mod credentials;
pub mod region;

pub use audit::TracingAuditSink;
pub use credentials::{DirectoryCredentialVerifier, hash_password};
pub use region::LocalRegionResolver;

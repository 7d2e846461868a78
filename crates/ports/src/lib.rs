//! iam-ports - 抽象 trait 层
//!
//! 定义共享存储与外部协作方的抽象接口

mod audit;
mod captcha;
mod counter_store;
mod credentials;
mod region;
mod session_store;

pub use audit::*;
pub use captcha::*;
pub use counter_store::*;
pub use credentials::*;
pub use region::*;
pub use session_store::*;

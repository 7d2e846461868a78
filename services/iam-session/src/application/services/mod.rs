//! 应用服务

mod brute_force_guard;
mod device_limiter;
mod login_frequency_guard;
mod rate_limiter;
mod token_lifecycle;

pub use brute_force_guard::*;
pub use device_limiter::*;
pub use login_frequency_guard::*;
pub use rate_limiter::*;
pub use token_lifecycle::*;

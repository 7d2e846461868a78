//! 应用状态

use std::sync::Arc;

use metrics_exporter_prometheus::PrometheusHandle;

use super::middleware::{PublicPaths, RateLimitRules};
use crate::application::services::{RateLimiter, TokenLifecycleManager};

#[derive(Clone)]
pub struct AppState {
    pub lifecycle: Arc<TokenLifecycleManager>,
    pub rate_limiter: RateLimiter,
    pub rate_limit_rules: Arc<RateLimitRules>,
    pub public_paths: Arc<PublicPaths>,
    pub metrics: Option<PrometheusHandle>,
}

impl AppState {
    pub fn new(
        lifecycle: TokenLifecycleManager,
        rate_limiter: RateLimiter,
        rate_limit_rules: RateLimitRules,
        public_paths: PublicPaths,
    ) -> Self {
        Self {
            lifecycle: Arc::new(lifecycle),
            rate_limiter,
            rate_limit_rules: Arc::new(rate_limit_rules),
            public_paths: Arc::new(public_paths),
            metrics: None,
        }
    }

    /// 挂载 Prometheus 输出
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }
}

// =============================================================================
// Central Application State
// =============================================================================
//
// Built once in main and handed to every HTTP and WebSocket handler through
// axum's `State` extractor. Handlers never reach for globals: the feed
// manager and settings they use are the ones stored here.
// =============================================================================

use std::sync::Arc;
use std::time::Instant;

use crate::analytics::AnalyticsSettings;
use crate::market_data::LiveFeedManager;
use crate::runtime_config::RuntimeConfig;

pub struct AppState {
    pub config: RuntimeConfig,
    pub feed: Arc<LiveFeedManager>,
    pub analytics: AnalyticsSettings,
    /// Instant when the service was started. Used for uptime reporting.
    pub start_time: Instant,
}

impl AppState {
    pub fn new(config: RuntimeConfig, feed: Arc<LiveFeedManager>) -> Self {
        let analytics = config.analytics_settings();
        Self {
            config,
            feed,
            analytics,
            start_time: Instant::now(),
        }
    }

    pub fn uptime_secs(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

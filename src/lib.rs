pub mod error;
pub mod logging;
pub mod model;
pub mod sampling;
pub mod service;
pub mod tracker;
pub mod validation;

pub use error::{PointCountError, PointCountResult};
pub use model::{
    Credentials, EstimationReport, FieldDescriptor, FieldType, PeriodCount, SamplingFrequency,
    TimeSample,
};
pub use service::{EstimationService, ReportRequest};

use chrono::Weekday;

#[derive(Debug, Clone)]
pub struct PointCountConfig {
    pub bind_address: String,
    /// `{account}` is replaced by the request's account name.
    pub tracker_base_url: String,
    pub max_concurrent_queries: usize,
    pub request_timeout_seconds: u64,
    pub http_timeout_seconds: u64,
    pub max_period_count: u32,
    pub week_start: Weekday,
    pub search_page_size: usize,
}

impl Default for PointCountConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1:8080".to_string(),
            tracker_base_url: "https://{account}.atlassian.net".to_string(),
            max_concurrent_queries: 4,
            request_timeout_seconds: 60,
            http_timeout_seconds: 30,
            max_period_count: 520, // ten years of weeks
            week_start: Weekday::Mon,
            search_page_size: 100,
        }
    }
}

impl PointCountConfig {
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(bind_addr) = std::env::var("BIND_ADDRESS") {
            config.bind_address = bind_addr;
        }

        if let Ok(base_url) = std::env::var("TRACKER_BASE_URL") {
            config.tracker_base_url = base_url;
        }

        if let Ok(max_queries) = std::env::var("MAX_CONCURRENT_QUERIES") {
            config.max_concurrent_queries = max_queries
                .parse()
                .ok()
                .filter(|n| *n > 0)
                .unwrap_or(config.max_concurrent_queries);
        }

        if let Ok(timeout) = std::env::var("REQUEST_TIMEOUT_SECONDS") {
            config.request_timeout_seconds = timeout.parse().unwrap_or(config.request_timeout_seconds);
        }

        if let Ok(timeout) = std::env::var("HTTP_TIMEOUT_SECONDS") {
            config.http_timeout_seconds = timeout.parse().unwrap_or(config.http_timeout_seconds);
        }

        if let Ok(max_periods) = std::env::var("MAX_PERIOD_COUNT") {
            config.max_period_count = max_periods.parse().unwrap_or(config.max_period_count);
        }

        if let Ok(week_start) = std::env::var("WEEK_START") {
            config.week_start = week_start.trim().parse().unwrap_or(config.week_start);
        }

        if let Ok(page_size) = std::env::var("SEARCH_PAGE_SIZE") {
            config.search_page_size = page_size
                .parse()
                .ok()
                .filter(|n| *n > 0)
                .unwrap_or(config.search_page_size);
        }

        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = PointCountConfig::default();
        assert_eq!(config.max_concurrent_queries, 4);
        assert_eq!(config.week_start, Weekday::Mon);
        assert!(config.tracker_base_url.contains("{account}"));
    }
}

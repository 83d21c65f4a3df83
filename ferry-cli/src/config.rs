//! CLI settings resolved from flags and environment

use std::time::Duration;

use ferry_client::OrchestratorClient;

#[derive(Debug, Clone)]
pub struct Config {
    pub orchestrator_url: String,
    /// Delay between polls of `build logs --follow`
    pub follow_interval: Duration,
}

impl Config {
    pub fn new(orchestrator_url: String, follow_interval_ms: u64) -> Self {
        Self {
            orchestrator_url: orchestrator_url.trim_end_matches('/').to_string(),
            follow_interval: Duration::from_millis(follow_interval_ms.max(100)),
        }
    }

    pub fn client(&self) -> OrchestratorClient {
        OrchestratorClient::new(&self.orchestrator_url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trailing_slash_is_dropped() {
        let config = Config::new("http://ferry:8080/".to_string(), 1000);
        assert_eq!(config.orchestrator_url, "http://ferry:8080");
        assert_eq!(config.client().base_url(), "http://ferry:8080");
    }

    #[test]
    fn test_follow_interval_has_a_floor() {
        let config = Config::new("http://ferry".to_string(), 0);
        assert_eq!(config.follow_interval, Duration::from_millis(100));
    }
}

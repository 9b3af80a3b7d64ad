use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Timing and discovery settings for the loading phase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoaderConfig {
    /// Completion is forced after this long, whatever is still outstanding.
    pub max_loading_time_ms: u64,
    /// First completion check after discovery, for pages that were already loaded.
    pub initial_check_delay_ms: u64,
    /// Pause between reaching completion and notifying listeners.
    pub completion_delay_ms: u64,
    /// Same pause when completion was forced by the timeout.
    pub forced_completion_delay_ms: u64,
    /// Grace period before signalling a page with nothing to track, so the
    /// loading screen does not flash.
    pub empty_page_grace_ms: u64,
    /// Font readiness is given up on after this long.
    pub font_timeout_ms: u64,
    /// Register the web font bundle as a tracked resource.
    pub track_fonts: bool,
    /// Image always tracked, even when no element references it yet.
    pub avatar_path: String,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            max_loading_time_ms: 10_000,
            initial_check_delay_ms: 500,
            completion_delay_ms: 300,
            forced_completion_delay_ms: 100,
            empty_page_grace_ms: 1_000,
            font_timeout_ms: 2_000,
            track_fonts: false,
            avatar_path: "assets/avatar.jpg".into(),
        }
    }
}

impl LoaderConfig {
    pub fn max_loading_time(&self) -> Duration {
        Duration::from_millis(self.max_loading_time_ms)
    }

    pub fn initial_check_delay(&self) -> Duration {
        Duration::from_millis(self.initial_check_delay_ms)
    }

    pub fn completion_delay(&self) -> Duration {
        Duration::from_millis(self.completion_delay_ms)
    }

    pub fn forced_completion_delay(&self) -> Duration {
        Duration::from_millis(self.forced_completion_delay_ms)
    }

    pub fn empty_page_grace(&self) -> Duration {
        Duration::from_millis(self.empty_page_grace_ms)
    }

    pub fn font_timeout(&self) -> Duration {
        Duration::from_millis(self.font_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config_keeps_defaults() {
        let config: LoaderConfig =
            serde_json::from_str(r#"{ "max_loading_time_ms": 4000, "track_fonts": true }"#).unwrap();
        assert_eq!(config.max_loading_time(), Duration::from_secs(4));
        assert!(config.track_fonts);
        assert_eq!(config.completion_delay(), Duration::from_millis(300));
        assert_eq!(config.avatar_path, "assets/avatar.jpg");
    }
}

//! Configuration for the sync engine.

use chrono::Duration;
use tabsync_model::ResolutionStrategy;

/// Engine-wide tuning knobs.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Number of records processed per batch during a run.
    pub batch_size: usize,
    /// Maximum change-log entries kept per entity type. When the log would
    /// exceed this cap, the oldest entries are evicted first; this is a
    /// lossy but bounded retention policy, not an error.
    pub max_log_entries: usize,
    /// Whether conflict detection runs on updates by default.
    pub detect_conflicts: bool,
}

impl EngineConfig {
    /// Creates a configuration with the default knobs.
    pub fn new() -> Self {
        Self {
            batch_size: 100,
            max_log_entries: 500,
            detect_conflicts: true,
        }
    }

    /// Sets the batch size.
    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = size;
        self
    }

    /// Sets the change-log cap per entity type.
    pub fn with_max_log_entries(mut self, max: usize) -> Self {
        self.max_log_entries = max;
        self
    }

    /// Enables or disables conflict detection by default.
    pub fn with_detect_conflicts(mut self, detect: bool) -> Self {
        self.detect_conflicts = detect;
        self
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Process-wide conflict resolution policy.
#[derive(Debug, Clone)]
pub struct ResolverConfig {
    /// Strategy applied when a run does not override it.
    pub default_strategy: ResolutionStrategy,
    /// Emit a log line for every detected conflict.
    pub log_conflicts: bool,
    /// Notify the configured alert target for every detected conflict.
    pub notify_on_conflict: bool,
    /// How recently a local record must have been modified to count as a
    /// concurrent edit. Records with no last-modified timestamp are treated
    /// as recently modified (conservative default, biased toward detecting
    /// conflicts).
    pub recency_window: Duration,
}

impl ResolverConfig {
    /// Creates the default policy: remote wins, conflicts logged.
    pub fn new() -> Self {
        Self {
            default_strategy: ResolutionStrategy::RemoteWins,
            log_conflicts: true,
            notify_on_conflict: false,
            recency_window: Duration::minutes(5),
        }
    }

    /// Sets the default strategy.
    pub fn with_default_strategy(mut self, strategy: ResolutionStrategy) -> Self {
        self.default_strategy = strategy;
        self
    }

    /// Enables or disables per-conflict logging.
    pub fn with_log_conflicts(mut self, log: bool) -> Self {
        self.log_conflicts = log;
        self
    }

    /// Enables or disables per-conflict notification.
    pub fn with_notify_on_conflict(mut self, notify: bool) -> Self {
        self.notify_on_conflict = notify;
        self
    }

    /// Sets the recency window for the modified-recently heuristic.
    pub fn with_recency_window(mut self, window: Duration) -> Self {
        self.recency_window = window;
        self
    }
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn engine_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.batch_size, 100);
        assert_eq!(config.max_log_entries, 500);
        assert!(config.detect_conflicts);
    }

    #[test]
    fn engine_builder() {
        let config = EngineConfig::new()
            .with_batch_size(25)
            .with_max_log_entries(50)
            .with_detect_conflicts(false);

        assert_eq!(config.batch_size, 25);
        assert_eq!(config.max_log_entries, 50);
        assert!(!config.detect_conflicts);
    }

    #[test]
    fn resolver_defaults() {
        let config = ResolverConfig::default();
        assert_eq!(config.default_strategy, ResolutionStrategy::RemoteWins);
        assert!(config.log_conflicts);
        assert!(!config.notify_on_conflict);
        assert_eq!(config.recency_window, Duration::minutes(5));
    }
}

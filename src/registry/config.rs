//! Registry configuration

use std::time::Duration;

/// What happens to a stream directory once its entry is removed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetentionPolicy {
    /// Delete the directory together with the entry
    Remove,
    /// Leave the directory on disk
    Keep,
}

/// Stream registry options
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// How often the cleanup task runs
    pub cleanup_interval: Duration,

    /// How long an exited or failed entry stays registered
    ///
    /// Viewers still fetching the last segments are served during this time.
    pub exited_linger: Duration,

    /// Directory handling for removed entries
    pub retention: RetentionPolicy,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            cleanup_interval: Duration::from_secs(5),
            exited_linger: Duration::from_secs(10),
            retention: RetentionPolicy::Remove,
        }
    }
}

impl RegistryConfig {
    /// Set the cleanup interval
    pub fn cleanup_interval(mut self, interval: Duration) -> Self {
        self.cleanup_interval = interval;
        self
    }

    /// Set the linger of exited entries
    pub fn exited_linger(mut self, linger: Duration) -> Self {
        self.exited_linger = linger;
        self
    }

    /// Set the retention policy
    pub fn retention(mut self, retention: RetentionPolicy) -> Self {
        self.retention = retention;
        self
    }
}

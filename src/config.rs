use std::collections::HashMap;
use std::time::Duration;

use crate::error::{Result, TriageError};
use crate::queue::QueueSettings;

/// Runtime configuration for the orchestration core.
///
/// Defaults suit an embedded deployment; every field can be overridden
/// through `TRIAGE_*` environment variables via [`TriageConfig::from_env`].
#[derive(Debug, Clone)]
pub struct TriageConfig {
    pub worker_count: usize,
    pub lease_duration_ms: u64,
    pub queue_max_depth: usize,
    pub queue_max_payload_bytes: usize,
    pub queue_poll_timeout_ms: u64,
    pub aging_threshold_ms: u64,
    pub event_channel_capacity: usize,
    pub webhook_url: Option<String>,
    pub webhook_max_attempts: u32,
    pub webhook_timeout_ms: u64,
    pub custom_settings: HashMap<String, String>,
}

impl Default for TriageConfig {
    fn default() -> Self {
        Self {
            worker_count: 4,
            lease_duration_ms: 30_000,
            queue_max_depth: 10_000,
            queue_max_payload_bytes: 256 * 1024,
            queue_poll_timeout_ms: 500,
            aging_threshold_ms: 60_000,
            event_channel_capacity: 1024,
            webhook_url: None,
            webhook_max_attempts: 3,
            webhook_timeout_ms: 5_000,
            custom_settings: HashMap::new(),
        }
    }
}

impl TriageConfig {
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(worker_count) = std::env::var("TRIAGE_WORKER_COUNT") {
            config.worker_count = worker_count.parse().map_err(|e| {
                TriageError::ConfigurationError(format!("Invalid worker_count: {e}"))
            })?;
        }

        if let Ok(max_depth) = std::env::var("TRIAGE_QUEUE_MAX_DEPTH") {
            config.queue_max_depth = max_depth.parse().map_err(|e| {
                TriageError::ConfigurationError(format!("Invalid queue_max_depth: {e}"))
            })?;
        }

        if let Ok(lease_ms) = std::env::var("TRIAGE_LEASE_DURATION_MS") {
            config.lease_duration_ms = lease_ms.parse().map_err(|e| {
                TriageError::ConfigurationError(format!("Invalid lease_duration_ms: {e}"))
            })?;
        }

        if let Ok(aging_ms) = std::env::var("TRIAGE_AGING_THRESHOLD_MS") {
            config.aging_threshold_ms = aging_ms.parse().map_err(|e| {
                TriageError::ConfigurationError(format!("Invalid aging_threshold_ms: {e}"))
            })?;
        }

        if let Ok(url) = std::env::var("TRIAGE_WEBHOOK_URL") {
            if !url.is_empty() {
                config.webhook_url = Some(url);
            }
        }

        Ok(config)
    }

    pub fn queue_settings(&self) -> QueueSettings {
        QueueSettings {
            max_depth: self.queue_max_depth,
            max_payload_bytes: self.queue_max_payload_bytes,
            poll_timeout: Duration::from_millis(self.queue_poll_timeout_ms),
            aging_threshold: Duration::from_millis(self.aging_threshold_ms),
        }
    }

    pub fn lease_duration(&self) -> Duration {
        Duration::from_millis(self.lease_duration_ms)
    }

    pub fn webhook_timeout(&self) -> Duration {
        Duration::from_millis(self.webhook_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // Tests mutating process environment must not interleave.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    #[test]
    fn test_defaults() {
        let config = TriageConfig::default();
        assert_eq!(config.worker_count, 4);
        assert_eq!(config.queue_settings().max_depth, 10_000);
        assert_eq!(config.lease_duration(), Duration::from_secs(30));
        assert!(config.webhook_url.is_none());
    }

    #[test]
    fn test_env_override() {
        let _guard = ENV_LOCK.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        std::env::set_var("TRIAGE_WORKER_COUNT", "9");
        let config = TriageConfig::from_env().unwrap();
        assert_eq!(config.worker_count, 9);
        std::env::remove_var("TRIAGE_WORKER_COUNT");
    }

    #[test]
    fn test_invalid_env_value_is_a_configuration_error() {
        let _guard = ENV_LOCK.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        std::env::set_var("TRIAGE_QUEUE_MAX_DEPTH", "not-a-number");
        let err = TriageConfig::from_env().unwrap_err();
        assert!(matches!(err, TriageError::ConfigurationError(_)));
        std::env::remove_var("TRIAGE_QUEUE_MAX_DEPTH");
    }
}

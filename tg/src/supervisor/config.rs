//! Supervisor configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Supervisor configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SupervisorConfig {
    /// How often workers are expected to heartbeat
    #[serde(rename = "heartbeat-interval-secs", default = "default_heartbeat_interval_secs")]
    pub heartbeat_interval_secs: u64,

    /// A heartbeat at least this old marks the worker stale
    #[serde(rename = "heartbeat-timeout-secs", default = "default_heartbeat_timeout_secs")]
    pub heartbeat_timeout_secs: u64,

    /// Restarts allowed before a worker is terminated
    #[serde(rename = "max-restarts", default = "default_max_restarts")]
    pub max_restarts: u32,

    /// Delay handed to the restart hook when the caller gives none
    #[serde(rename = "restart-delay-secs", default = "default_restart_delay_secs")]
    pub restart_delay_secs: u64,

    /// Polling interval of the monitor loop
    #[serde(rename = "monitor-interval-secs", default = "default_monitor_interval_secs")]
    pub monitor_interval_secs: u64,

    /// Event log entries older than this are pruned
    #[serde(rename = "log-retention-secs", default = "default_log_retention_secs")]
    pub log_retention_secs: u64,

    /// Hard ceiling on retained event log entries
    #[serde(rename = "max-log-entries", default = "default_max_log_entries")]
    pub max_log_entries: usize,

    /// Restart stale or failed workers during health checks
    #[serde(rename = "auto-restart", default = "default_auto_restart")]
    pub auto_restart: bool,

    /// Shell command the CLI runs to respawn a worker
    #[serde(rename = "restart-command", default)]
    pub restart_command: Option<String>,
}

fn default_heartbeat_interval_secs() -> u64 {
    30
}

fn default_heartbeat_timeout_secs() -> u64 {
    600
}

fn default_max_restarts() -> u32 {
    3
}

fn default_restart_delay_secs() -> u64 {
    5
}

fn default_monitor_interval_secs() -> u64 {
    30
}

fn default_log_retention_secs() -> u64 {
    86_400
}

fn default_max_log_entries() -> usize {
    10_000
}

fn default_auto_restart() -> bool {
    true
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_secs: default_heartbeat_interval_secs(),
            heartbeat_timeout_secs: default_heartbeat_timeout_secs(),
            max_restarts: default_max_restarts(),
            restart_delay_secs: default_restart_delay_secs(),
            monitor_interval_secs: default_monitor_interval_secs(),
            log_retention_secs: default_log_retention_secs(),
            max_log_entries: default_max_log_entries(),
            auto_restart: default_auto_restart(),
            restart_command: None,
        }
    }
}

impl SupervisorConfig {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    /// Staleness threshold, as a signed delta for timestamp arithmetic
    pub fn heartbeat_timeout(&self) -> chrono::Duration {
        secs_to_delta(self.heartbeat_timeout_secs)
    }

    pub fn restart_delay(&self) -> Duration {
        Duration::from_secs(self.restart_delay_secs)
    }

    pub fn monitor_interval(&self) -> Duration {
        Duration::from_secs(self.monitor_interval_secs)
    }

    pub fn log_retention(&self) -> chrono::Duration {
        secs_to_delta(self.log_retention_secs)
    }

    /// Check value combinations that would make supervision meaningless
    pub fn validate(&self) -> Result<(), String> {
        if self.heartbeat_timeout_secs == 0 {
            return Err("heartbeat-timeout-secs must be greater than zero".to_string());
        }
        if self.heartbeat_interval_secs >= self.heartbeat_timeout_secs {
            return Err(format!(
                "heartbeat-interval-secs ({}) must be shorter than heartbeat-timeout-secs ({})",
                self.heartbeat_interval_secs, self.heartbeat_timeout_secs
            ));
        }
        if self.monitor_interval_secs == 0 {
            return Err("monitor-interval-secs must be greater than zero".to_string());
        }
        if self.max_log_entries == 0 {
            return Err("max-log-entries must be greater than zero".to_string());
        }
        Ok(())
    }
}

fn secs_to_delta(secs: u64) -> chrono::Duration {
    i64::try_from(secs)
        .ok()
        .and_then(chrono::Duration::try_seconds)
        .unwrap_or(chrono::Duration::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = SupervisorConfig::default();
        assert_eq!(config.heartbeat_timeout_secs, 600);
        assert_eq!(config.max_restarts, 3);
        assert!(config.auto_restart);
        assert!(config.restart_command.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_durations() {
        let config = SupervisorConfig {
            heartbeat_timeout_secs: 90,
            monitor_interval_secs: 2,
            ..Default::default()
        };
        assert_eq!(config.heartbeat_timeout(), chrono::Duration::seconds(90));
        assert_eq!(config.monitor_interval(), Duration::from_secs(2));
        assert_eq!(config.restart_delay(), Duration::from_secs(5));
    }

    #[test]
    fn test_huge_values_saturate() {
        let config = SupervisorConfig {
            heartbeat_timeout_secs: u64::MAX,
            ..Default::default()
        };
        assert_eq!(config.heartbeat_timeout(), chrono::Duration::MAX);
    }

    #[test]
    fn test_validate_rejects_interval_not_shorter_than_timeout() {
        let config = SupervisorConfig {
            heartbeat_interval_secs: 600,
            heartbeat_timeout_secs: 600,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_monitor_interval() {
        let config = SupervisorConfig {
            monitor_interval_secs: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_yaml_uses_defaults() {
        let yaml = r#"
max-restarts: 5
auto-restart: false
restart-command: "systemctl restart worker@$TG_WORKER_ID"
"#;
        let config: SupervisorConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.max_restarts, 5);
        assert!(!config.auto_restart);
        assert!(config.restart_command.is_some());
        assert_eq!(config.heartbeat_timeout_secs, 600);
    }
}

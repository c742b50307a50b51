//! Synchronization configuration.
//!
//! Durations are written as milliseconds so the configuration stays plain
//! JSON/YAML-friendly data.
//!
//! ```rust
//! use cloudsync_agent::SyncConfig;
//! use std::time::Duration;
//!
//! let config = SyncConfig::new()
//!     .account("prod", ["us-east-1", "eu-west-1"])
//!     .scan_interval(Duration::from_secs(30));
//!
//! config.validate().unwrap();
//! assert_eq!(config.scopes().len(), 2);
//! ```

use std::time::Duration;

use cloudsync_core::{Scope, SyncError, SyncResult};
use serde::{Deserialize, Serialize};

/// One account and the regions to synchronize it in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountConfig {
    /// Account name.
    pub name: String,
    /// Regions.
    pub regions: Vec<String>,
}

/// How the upsert engine polls remote tasks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskPollConfig {
    /// Sleep between polls.
    pub interval_ms: u64,
    /// Polls before giving up.
    pub max_attempts: u32,
}

impl Default for TaskPollConfig {
    fn default() -> Self {
        Self {
            interval_ms: 2_000,
            max_attempts: 30,
        }
    }
}

impl TaskPollConfig {
    /// The poll interval.
    #[must_use]
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

/// Configuration for a set of synchronization pipelines.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Accounts to synchronize.
    pub accounts: Vec<AccountConfig>,
    /// Time between full-scan cycles.
    pub scan_interval_ms: u64,
    /// Task polling.
    pub task_poll: TaskPollConfig,
    /// Whether on-demand refreshes are accepted.
    pub on_demand_enabled: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            accounts: Vec::new(),
            scan_interval_ms: 60_000,
            task_poll: TaskPollConfig::default(),
            on_demand_enabled: true,
        }
    }
}

impl SyncConfig {
    /// Create a configuration with defaults and no accounts.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an account.
    #[must_use]
    pub fn account<I, S>(mut self, name: impl Into<String>, regions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.accounts.push(AccountConfig {
            name: name.into(),
            regions: regions.into_iter().map(Into::into).collect(),
        });
        self
    }

    /// Set the scan interval.
    #[must_use]
    pub fn scan_interval(mut self, interval: Duration) -> Self {
        self.scan_interval_ms = interval.as_millis() as u64;
        self
    }

    /// Set task polling.
    #[must_use]
    pub fn task_poll(mut self, interval: Duration, max_attempts: u32) -> Self {
        self.task_poll = TaskPollConfig {
            interval_ms: interval.as_millis() as u64,
            max_attempts,
        };
        self
    }

    /// Enable or disable on-demand refreshes.
    #[must_use]
    pub fn on_demand(mut self, enabled: bool) -> Self {
        self.on_demand_enabled = enabled;
        self
    }

    /// The scan interval.
    #[must_use]
    pub fn scan_interval_duration(&self) -> Duration {
        Duration::from_millis(self.scan_interval_ms)
    }

    /// Check the configuration for values no pipeline can run with.
    pub fn validate(&self) -> SyncResult<()> {
        if self.accounts.is_empty() {
            return Err(SyncError::Configuration("no accounts configured".into()));
        }
        for account in &self.accounts {
            if account.name.trim().is_empty() {
                return Err(SyncError::Configuration("account name cannot be empty".into()));
            }
            if account.regions.is_empty() {
                return Err(SyncError::Configuration(format!(
                    "account {} has no regions",
                    account.name
                )));
            }
            if account.regions.iter().any(|r| r.trim().is_empty()) {
                return Err(SyncError::Configuration(format!(
                    "account {} has an empty region name",
                    account.name
                )));
            }
        }
        if self.scan_interval_ms == 0 {
            return Err(SyncError::Configuration("scan interval must be positive".into()));
        }
        if self.task_poll.interval_ms == 0 {
            return Err(SyncError::Configuration(
                "task poll interval must be positive".into(),
            ));
        }
        if self.task_poll.max_attempts == 0 {
            return Err(SyncError::Configuration(
                "task poll attempts must be positive".into(),
            ));
        }
        Ok(())
    }

    /// One scope per (account, region), in configuration order.
    pub fn scopes(&self) -> Vec<Scope> {
        self.accounts
            .iter()
            .flat_map(|a| a.regions.iter().map(|r| Scope::new(&a.name, r)))
            .collect()
    }
}

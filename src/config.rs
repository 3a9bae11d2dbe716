use std::path::Path;
use std::time::Duration;

use anyhow::{Context as _, Result};
use bitcoin::Network;
use serde::{Deserialize, Serialize};

use crate::retry::RetryPolicy;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SwapConfig {
    pub network: Network,
    /// How often time-based transitions are evaluated.
    pub tick_interval: Duration,
    /// How often every live, pending swap is fully reconciled.
    pub sync_interval: Duration,
    /// Period of the watchdog that races state-change notifications.
    pub watchdog_interval: Duration,
    pub retry: RetryPolicy,
    /// Once the first quote arrives, how long to wait for the others.
    pub quote_race_bound: Duration,
    pub max_price_difference_ppm: u64,
    pub max_security_deposit: Option<u64>,
    /// Quote-expired, never-initiated records older than this are pruned.
    pub retention: Duration,
    pub event_channel_capacity: usize,
}

impl Default for SwapConfig {
    fn default() -> Self {
        Self {
            network: Network::Bitcoin,
            tick_interval: Duration::from_secs(1),
            sync_interval: Duration::from_secs(30),
            watchdog_interval: Duration::from_secs(5),
            retry: RetryPolicy::default(),
            quote_race_bound: Duration::from_secs(2),
            max_price_difference_ppm: 10_000,
            max_security_deposit: None,
            retention: Duration::from_secs(7 * 24 * 3600),
            event_channel_capacity: 256,
        }
    }
}

impl SwapConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("read config {}", path.display()))?;
        let cfg: Self = serde_json::from_str(&raw)
            .with_context(|| format!("parse config {}", path.display()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(!self.tick_interval.is_zero(), "tick_interval must be > 0");
        anyhow::ensure!(!self.sync_interval.is_zero(), "sync_interval must be > 0");
        anyhow::ensure!(
            !self.watchdog_interval.is_zero(),
            "watchdog_interval must be > 0"
        );
        anyhow::ensure!(self.retry.attempts > 0, "retry.attempts must be > 0");
        anyhow::ensure!(
            self.event_channel_capacity > 0,
            "event_channel_capacity must be > 0"
        );
        Ok(())
    }
}

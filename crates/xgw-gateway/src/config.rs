//! Application configuration.

use crate::error::{GatewayError, GatewayResult};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use xgw_orders::{JournalConfig, StoreConfig};
use xgw_session::{ChannelConfig, ChannelRegistry, Subscription};
use xgw_telemetry::LoggingConfig;

/// `[[order_channels]]` entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderChannelConfig {
    pub tag: String,
    /// Route new orders here. At most one channel may set it; otherwise the
    /// first order channel is the default.
    #[serde(default)]
    pub default: bool,
    #[serde(flatten)]
    pub channel: ChannelConfig,
}

/// `[[report_channels]]` entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportChannelConfig {
    pub tag: String,
    #[serde(flatten)]
    pub channel: ChannelConfig,
    #[serde(flatten)]
    pub subscription: Subscription,
}

/// `[queue]` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Handoff ring capacity, rounded up to a power of two.
    #[serde(default = "default_queue_capacity")]
    pub capacity: usize,
}

fn default_queue_capacity() -> usize {
    4_096
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            capacity: default_queue_capacity(),
        }
    }
}

/// `[reconcile]` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileConfig {
    /// Query a snapshot whenever a report channel logs in.
    #[serde(default = "default_on_reconnect")]
    pub on_reconnect: bool,
    /// Timed sweep period. None disables timed sweeps.
    #[serde(default)]
    pub interval_ms: Option<u64>,
    /// Period of deferred-event expiry and terminal eviction.
    #[serde(default = "default_tick_ms")]
    pub tick_ms: u64,
}

fn default_on_reconnect() -> bool {
    true
}

fn default_tick_ms() -> u64 {
    50
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            on_reconnect: default_on_reconnect(),
            interval_ms: None,
            tick_ms: default_tick_ms(),
        }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub order_channels: Vec<OrderChannelConfig>,
    #[serde(default)]
    pub report_channels: Vec<ReportChannelConfig>,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub reconcile: ReconcileConfig,
    #[serde(default)]
    pub journal: JournalConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Load and validate configuration from a TOML file.
    pub fn from_file(path: &str) -> GatewayResult<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| GatewayError::Config(format!("Failed to read config: {e}")))?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> GatewayResult<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| GatewayError::Config(format!("Failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> GatewayResult<()> {
        if self.order_channels.is_empty() {
            return Err(GatewayError::Config(
                "at least one [[order_channels]] entry is required".to_string(),
            ));
        }
        let defaults = self.order_channels.iter().filter(|c| c.default).count();
        if defaults > 1 {
            return Err(GatewayError::Config(format!(
                "{defaults} order channels are marked default"
            )));
        }

        let mut tags = HashSet::new();
        let all_tags = self
            .order_channels
            .iter()
            .map(|c| &c.tag)
            .chain(self.report_channels.iter().map(|c| &c.tag));
        for tag in all_tags {
            if !tags.insert(tag) {
                return Err(GatewayError::Config(format!("duplicate channel tag {tag}")));
            }
        }
        for c in &self.order_channels {
            c.channel.validate()?;
        }
        for c in &self.report_channels {
            c.channel.validate()?;
        }

        self.store.validate().map_err(GatewayError::Config)?;
        if self.queue.capacity == 0 {
            return Err(GatewayError::Config(
                "queue.capacity must be greater than zero".to_string(),
            ));
        }
        if self.reconcile.tick_ms == 0 {
            return Err(GatewayError::Config(
                "reconcile.tick_ms must be greater than zero".to_string(),
            ));
        }
        if self.reconcile.interval_ms == Some(0) {
            return Err(GatewayError::Config(
                "reconcile.interval_ms must be greater than zero when set".to_string(),
            ));
        }
        Ok(())
    }

    /// Build the channel registry described by this configuration.
    pub fn build_registry(&self) -> GatewayResult<ChannelRegistry> {
        let mut registry = ChannelRegistry::new();
        registry.set_snapshot_on_connect(self.reconcile.on_reconnect);
        for c in &self.order_channels {
            let handle = registry.add_order_channel(&c.tag, c.channel.clone())?;
            if c.default {
                registry.set_default_order_channel(handle)?;
            }
        }
        for c in &self.report_channels {
            registry.add_report_channel(&c.tag, c.channel.clone(), c.subscription.clone())?;
        }
        Ok(registry)
    }
}

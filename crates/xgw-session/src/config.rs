//! Channel configuration.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Connection settings for one session channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelConfig {
    /// Transport endpoint (e.g. `ws://host:port/path`).
    pub endpoint: String,
    /// Idle time before a heartbeat is sent.
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,
    /// How long to wait for any inbound frame after a heartbeat.
    #[serde(default = "default_heartbeat_timeout_ms")]
    pub heartbeat_timeout_ms: u64,
    /// Base delay for exponential backoff.
    #[serde(default = "default_reconnect_base_delay_ms")]
    pub reconnect_base_delay_ms: u64,
    /// Maximum delay for exponential backoff.
    #[serde(default = "default_reconnect_max_delay_ms")]
    pub reconnect_max_delay_ms: u64,
    /// Reconnects tried after consecutive failures before giving up (0 = infinite).
    #[serde(default)]
    pub max_reconnect_attempts: u32,
    #[serde(default = "default_login_timeout_ms")]
    pub login_timeout_ms: u64,
    /// Capacity of the live link's outbound buffer.
    #[serde(default = "default_outbound_buffer")]
    pub outbound_buffer: usize,
}

fn default_heartbeat_interval_ms() -> u64 {
    30_000
}

fn default_heartbeat_timeout_ms() -> u64 {
    10_000
}

fn default_reconnect_base_delay_ms() -> u64 {
    1_000
}

fn default_reconnect_max_delay_ms() -> u64 {
    60_000
}

fn default_login_timeout_ms() -> u64 {
    5_000
}

fn default_outbound_buffer() -> usize {
    1_024
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            heartbeat_timeout_ms: default_heartbeat_timeout_ms(),
            reconnect_base_delay_ms: default_reconnect_base_delay_ms(),
            reconnect_max_delay_ms: default_reconnect_max_delay_ms(),
            max_reconnect_attempts: 0,
            login_timeout_ms: default_login_timeout_ms(),
            outbound_buffer: default_outbound_buffer(),
        }
    }
}

impl ChannelConfig {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.endpoint.trim().is_empty() {
            return Err(ConfigError::Missing("endpoint"));
        }
        let positive = [
            ("heartbeat_interval_ms", self.heartbeat_interval_ms),
            ("heartbeat_timeout_ms", self.heartbeat_timeout_ms),
            ("reconnect_base_delay_ms", self.reconnect_base_delay_ms),
            ("login_timeout_ms", self.login_timeout_ms),
        ];
        for (field, value) in positive {
            if value == 0 {
                return Err(ConfigError::Invalid {
                    field,
                    reason: "must be greater than zero".to_string(),
                });
            }
        }
        if self.reconnect_max_delay_ms < self.reconnect_base_delay_ms {
            return Err(ConfigError::Invalid {
                field: "reconnect_max_delay_ms",
                reason: format!(
                    "{} is below reconnect_base_delay_ms {}",
                    self.reconnect_max_delay_ms, self.reconnect_base_delay_ms
                ),
            });
        }
        if self.outbound_buffer == 0 {
            return Err(ConfigError::Invalid {
                field: "outbound_buffer",
                reason: "must be greater than zero".to_string(),
            });
        }
        Ok(())
    }
}

/// Role of a session channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelKind {
    /// Carries requests; receives their acknowledgements.
    Order,
    /// Receives report streams and snapshot answers only.
    Report,
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Order => write!(f, "order"),
            Self::Report => write!(f, "report"),
        }
    }
}

/// Where a report channel starts its stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResumeFrom {
    /// After the last acknowledged inbound sequence.
    #[default]
    LastAcked,
    /// Replay everything the server retains.
    Beginning,
    /// Only events produced after login.
    Newest,
}

impl fmt::Display for ResumeFrom {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LastAcked => write!(f, "last_acked"),
            Self::Beginning => write!(f, "beginning"),
            Self::Newest => write!(f, "newest"),
        }
    }
}

/// Report streams and start point for a report channel.
///
/// `start` governs the first connection only; every reconnect resumes from
/// the last acknowledged inbound sequence.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Subscription {
    #[serde(default)]
    pub streams: Vec<String>,
    #[serde(default)]
    pub start: ResumeFrom,
}

impl Subscription {
    pub fn new(streams: Vec<String>) -> Self {
        Self {
            streams,
            start: ResumeFrom::default(),
        }
    }

    pub fn starting_at(mut self, start: ResumeFrom) -> Self {
        self.start = start;
        self
    }
}

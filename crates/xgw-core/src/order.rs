//! Order-related identifiers and enums.
//!
//! Provides order side, order kind, the gateway-assigned order reference
//! and the channel handle used to address session channels.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Order side: buy or sell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    /// Returns the opposite side.
    pub fn opposite(&self) -> Self {
        match self {
            Self::Buy => Self::Sell,
            Self::Sell => Self::Buy,
        }
    }

    /// Returns 1 for buy, -1 for sell (for position calculations).
    pub fn sign(&self) -> i8 {
        match self {
            Self::Buy => 1,
            Self::Sell => -1,
        }
    }
}

impl fmt::Display for OrderSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Buy => write!(f, "buy"),
            Self::Sell => write!(f, "sell"),
        }
    }
}

/// Order kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderKind {
    /// Resting limit order.
    #[default]
    Limit,
    /// Market order. Carries no meaningful price.
    Market,
    /// Fill-and-kill: execute what is available, cancel the rest.
    Fak,
    /// Fill-or-kill: execute everything immediately or nothing.
    Fok,
}

impl OrderKind {
    /// Whether the order must carry a positive limit price.
    pub fn requires_price(&self) -> bool {
        !matches!(self, Self::Market)
    }

    /// Whether the venue cancels any unfilled remainder on its own.
    pub fn is_immediate(&self) -> bool {
        matches!(self, Self::Fak | Self::Fok)
    }
}

impl fmt::Display for OrderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Limit => write!(f, "limit"),
            Self::Market => write!(f, "market"),
            Self::Fak => write!(f, "fak"),
            Self::Fok => write!(f, "fok"),
        }
    }
}

/// Gateway-assigned order reference.
///
/// Derived from the owning channel's tag and the client sequence number
/// assigned at submission, so it is unique for the lifetime of the process
/// and usable as the correlation id for cancel requests.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrderRef(String);

impl OrderRef {
    /// Build the reference for `client_seq` on the channel tagged `channel_tag`.
    ///
    /// Format: `{channel_tag}-{client_seq:012}`
    pub fn new(channel_tag: &str, client_seq: u64) -> Self {
        Self(format!("{channel_tag}-{client_seq:012}"))
    }

    /// Wrap an existing string (for parsing responses).
    pub fn from_string(s: String) -> Self {
        Self(s)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OrderRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for OrderRef {
    fn from(s: String) -> Self {
        Self::from_string(s)
    }
}

impl From<&str> for OrderRef {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl AsRef<str> for OrderRef {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Index of a session channel inside the channel registry's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChannelHandle(pub u16);

impl ChannelHandle {
    #[inline]
    pub fn index(&self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for ChannelHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ch#{}", self.0)
    }
}

/// Source of client sequence numbers for new requests.
///
/// Implemented by order channels; each call must return a value strictly
/// greater than every value previously returned by the same source.
pub trait ClientSeqSource: Send + Sync {
    /// Handle of the channel that owns the sequence.
    fn handle(&self) -> ChannelHandle;

    /// Channel tag used when deriving order references.
    fn tag(&self) -> &str;

    /// Allocate the next client sequence number.
    fn next_client_seq(&self) -> u64;
}

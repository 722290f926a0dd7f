//! Transport seam between session channels and the wire.
//!
//! A transport turns a channel's endpoint into a [`RawLink`]: a pair of
//! typed mpsc channels carrying [`OutboundFrame`]s and [`InboundFrame`]s.
//! Framing and encoding live entirely behind this trait.

use crate::config::{ChannelConfig, ChannelKind};
use crate::error::SessionResult;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;
use tokio::sync::mpsc;
use xgw_core::{RejectInfo, ServerSnapshot, VenueEvent, WireRequest};

/// Boxed future type for dyn-compatible async trait methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// How a channel re-establishes its session after connecting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", content = "seq", rename_all = "snake_case")]
pub enum ReconnectAction {
    /// Ask the server to resume after inbound sequence `seq`.
    ResumeAt(u64),
    /// Fresh login; the server reports its sequence numbers.
    Relogin,
}

/// Sequence numbers reported by the server in its login acknowledgement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LoginInfo {
    /// Last sequence the server sent on this channel.
    #[serde(default)]
    pub last_out_seq: u64,
    /// Last client sequence the server received on this channel.
    #[serde(default)]
    pub last_in_seq: u64,
}

/// Frame written by a channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundFrame {
    Login {
        kind: ChannelKind,
        action: ReconnectAction,
        #[serde(default)]
        streams: Vec<String>,
    },
    Request {
        request: WireRequest,
    },
    SnapshotQuery {
        query_id: u64,
    },
    Heartbeat,
    Logout,
}

impl OutboundFrame {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Login { .. } => "login",
            Self::Request { .. } => "request",
            Self::SnapshotQuery { .. } => "snapshot_query",
            Self::Heartbeat => "heartbeat",
            Self::Logout => "logout",
        }
    }
}

/// Frame delivered to a channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundFrame {
    LoginAck(LoginInfo),
    LoginReject {
        error: RejectInfo,
    },
    /// Sequenced venue event.
    Event {
        seq: u64,
        event: VenueEvent,
    },
    Snapshot {
        query_id: u64,
        snapshot: ServerSnapshot,
    },
    Heartbeat,
    /// The link ended; never produced by the remote side.
    Closed {
        reason: String,
    },
}

/// Live link produced by a successful connect.
///
/// Dropping either half ends the link.
pub struct RawLink {
    pub outbound: mpsc::Sender<OutboundFrame>,
    pub inbound: mpsc::Receiver<InboundFrame>,
}

/// Connects session channels to their endpoints.
pub trait SessionTransport: Send + Sync + 'static {
    fn connect<'a>(
        &'a self,
        tag: &'a str,
        config: &'a ChannelConfig,
    ) -> BoxFuture<'a, SessionResult<RawLink>>;
}

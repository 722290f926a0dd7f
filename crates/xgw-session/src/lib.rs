//! Sequenced session channels for the xgw execution gateway.
//!
//! Provides:
//! - `ChannelRegistry`: a fixed arena of order and report channels
//! - Per-channel run loops with login, resume and heartbeat monitoring
//! - Reconnection with exponential backoff and jitter
//! - Epoch and sequence filtering of inbound frames
//! - `WsTransport` (JSON over WebSocket) and `LoopbackTransport` (in-process)

pub mod backoff;
pub mod channel;
pub mod config;
mod connection;
pub mod error;
pub mod heartbeat;
pub mod loopback;
pub mod registry;
pub mod sink;
pub mod transport;
pub mod ws_transport;

pub use channel::{Buffered, ChannelState, ConnectionStatus, SessionChannel};
pub use config::{ChannelConfig, ChannelKind, ResumeFrom, Subscription};
pub use error::{ConfigError, SendError, SessionError, SessionResult};
pub use loopback::{LoopbackEndpoint, LoopbackSession, LoopbackTransport};
pub use registry::{ChannelRegistry, Dispatch};
pub use sink::EventSink;
pub use transport::{
    BoxFuture, InboundFrame, LoginInfo, OutboundFrame, RawLink, ReconnectAction, SessionTransport,
};
pub use ws_transport::WsTransport;

use std::sync::Once;

static INIT_CRYPTO: Once = Once::new();

/// Install the TLS crypto provider. Call before any `wss://` connect.
pub fn init_crypto() {
    INIT_CRYPTO.call_once(|| {
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}

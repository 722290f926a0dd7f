//! In-process transport.
//!
//! Endpoints are registered by name; every connect to a registered endpoint
//! yields a [`LoopbackSession`] on that endpoint's accept queue, which plays
//! the server side of the link. Used by integration tests and dry runs.

use crate::config::{ChannelConfig, ChannelKind};
use crate::error::{SessionError, SessionResult};
use crate::transport::{
    BoxFuture, InboundFrame, LoginInfo, OutboundFrame, RawLink, ReconnectAction, SessionTransport,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;
use xgw_core::{VenueEvent, WireRequest};

#[derive(Clone, Default)]
pub struct LoopbackTransport {
    endpoints: Arc<Mutex<HashMap<String, mpsc::UnboundedSender<LoopbackSession>>>>,
}

impl LoopbackTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `endpoint`, replacing any earlier registration.
    pub fn endpoint(&self, endpoint: &str) -> LoopbackEndpoint {
        let (tx, rx) = mpsc::unbounded_channel();
        self.endpoints.lock().insert(endpoint.to_string(), tx);
        LoopbackEndpoint { accept: rx }
    }

    /// Refuse further connects to `endpoint`.
    pub fn remove(&self, endpoint: &str) {
        self.endpoints.lock().remove(endpoint);
    }
}

impl SessionTransport for LoopbackTransport {
    fn connect<'a>(
        &'a self,
        tag: &'a str,
        config: &'a ChannelConfig,
    ) -> BoxFuture<'a, SessionResult<RawLink>> {
        Box::pin(async move {
            let acceptor = self
                .endpoints
                .lock()
                .get(&config.endpoint)
                .cloned()
                .ok_or_else(|| {
                    SessionError::ConnectionFailed(format!("no endpoint {}", config.endpoint))
                })?;

            let (outbound_tx, outbound_rx) = mpsc::channel(config.outbound_buffer);
            let (inbound_tx, inbound_rx) = mpsc::channel(config.outbound_buffer);
            let session = LoopbackSession {
                tag: tag.to_string(),
                from_client: outbound_rx,
                to_client: inbound_tx,
            };
            acceptor.send(session).map_err(|_| {
                SessionError::ConnectionFailed(format!("endpoint {} not accepting", config.endpoint))
            })?;
            debug!(channel = %tag, endpoint = %config.endpoint, "Loopback connected");

            Ok(RawLink {
                outbound: outbound_tx,
                inbound: inbound_rx,
            })
        })
    }
}

/// Accept queue of one registered endpoint.
pub struct LoopbackEndpoint {
    accept: mpsc::UnboundedReceiver<LoopbackSession>,
}

impl LoopbackEndpoint {
    /// Wait for the next client connection.
    pub async fn accept(&mut self) -> Option<LoopbackSession> {
        self.accept.recv().await
    }
}

/// Server side of one loopback link. Dropping it ends the link.
pub struct LoopbackSession {
    tag: String,
    from_client: mpsc::Receiver<OutboundFrame>,
    to_client: mpsc::Sender<InboundFrame>,
}

impl LoopbackSession {
    /// Tag of the channel that connected.
    pub fn tag(&self) -> &str {
        &self.tag
    }

    pub async fn recv(&mut self) -> Option<OutboundFrame> {
        self.from_client.recv().await
    }

    /// Next application request, skipping heartbeats and queries.
    pub async fn recv_request(&mut self) -> Option<WireRequest> {
        loop {
            match self.from_client.recv().await? {
                OutboundFrame::Request { request } => return Some(request),
                OutboundFrame::Logout => return None,
                _ => {}
            }
        }
    }

    /// Returns false once the client side is gone.
    pub async fn send(&self, frame: InboundFrame) -> bool {
        self.to_client.send(frame).await.is_ok()
    }

    pub async fn send_event(&self, seq: u64, event: VenueEvent) -> bool {
        self.send(InboundFrame::Event { seq, event }).await
    }

    /// Wait for the login frame and acknowledge it with `info`.
    pub async fn accept_login(
        &mut self,
        info: LoginInfo,
    ) -> Option<(ChannelKind, ReconnectAction, Vec<String>)> {
        loop {
            if let OutboundFrame::Login {
                kind,
                action,
                streams,
            } = self.from_client.recv().await?
            {
                if !self.send(InboundFrame::LoginAck(info)).await {
                    return None;
                }
                return Some((kind, action, streams));
            }
        }
    }

    /// End the link with a reason the client logs.
    pub async fn close(self, reason: &str) {
        let _ = self
            .to_client
            .send(InboundFrame::Closed {
                reason: reason.to_string(),
            })
            .await;
    }
}

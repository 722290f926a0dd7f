//! JSON-over-WebSocket transport.
//!
//! Each [`OutboundFrame`] is one text message; each text message received is
//! parsed as one [`InboundFrame`]. WebSocket pings are answered here and
//! never reach the session.

use crate::config::ChannelConfig;
use crate::error::{SessionError, SessionResult};
use crate::transport::{BoxFuture, InboundFrame, OutboundFrame, RawLink, SessionTransport};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::{
    connect_async_tls_with_config, tungstenite::Message, MaybeTlsStream, WebSocketStream,
};
use tracing::{debug, info, warn};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Inbound frames buffered between the socket and the session loop.
const INBOUND_BUFFER: usize = 1024;

#[derive(Debug, Clone, Copy, Default)]
pub struct WsTransport;

impl WsTransport {
    pub fn new() -> Self {
        Self
    }
}

impl SessionTransport for WsTransport {
    fn connect<'a>(
        &'a self,
        tag: &'a str,
        config: &'a ChannelConfig,
    ) -> BoxFuture<'a, SessionResult<RawLink>> {
        Box::pin(async move {
            // TCP_NODELAY on
            let (ws, _response) =
                connect_async_tls_with_config(config.endpoint.as_str(), None, true, None)
                    .await
                    .map_err(|e| SessionError::ConnectionFailed(e.to_string()))?;
            info!(channel = %tag, endpoint = %config.endpoint, "WebSocket connected");

            let (outbound_tx, outbound_rx) = mpsc::channel(config.outbound_buffer);
            let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_BUFFER);
            tokio::spawn(pump(tag.to_string(), ws, outbound_rx, inbound_tx));

            Ok(RawLink {
                outbound: outbound_tx,
                inbound: inbound_rx,
            })
        })
    }
}

/// Move frames between the socket and the session until either side ends.
async fn pump(
    tag: String,
    ws: WsStream,
    mut outbound: mpsc::Receiver<OutboundFrame>,
    inbound: mpsc::Sender<InboundFrame>,
) {
    let (mut write, mut read) = ws.split();

    let reason = loop {
        tokio::select! {
            frame = outbound.recv() => {
                let Some(frame) = frame else {
                    let _ = write.send(Message::Close(None)).await;
                    break "session released link".to_string();
                };
                let logout = matches!(frame, OutboundFrame::Logout);
                let text = match serde_json::to_string(&frame) {
                    Ok(text) => text,
                    Err(e) => {
                        warn!(channel = %tag, ?e, kind = frame.kind(), "Failed to encode frame");
                        continue;
                    }
                };
                if let Err(e) = write.send(Message::Text(text)).await {
                    break format!("write failed: {e}");
                }
                if logout {
                    let _ = write.send(Message::Close(None)).await;
                    break "logout".to_string();
                }
            }

            msg = read.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<InboundFrame>(&text) {
                            Ok(frame) => {
                                if inbound.send(frame).await.is_err() {
                                    break "session released link".to_string();
                                }
                            }
                            Err(e) => warn!(channel = %tag, ?e, "Undecodable inbound frame"),
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        debug!(channel = %tag, "Received ping, sending pong");
                        if let Err(e) = write.send(Message::Pong(data)).await {
                            break format!("pong failed: {e}");
                        }
                    }
                    Some(Ok(Message::Close(frame))) => {
                        let (code, reason) = frame
                            .map(|f| (u16::from(f.code), f.reason.to_string()))
                            .unwrap_or((1000, "Normal close".to_string()));
                        warn!(channel = %tag, code, %reason, "WebSocket closed by server");
                        break format!("closed by server ({code}): {reason}");
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => break format!("read error: {e}"),
                    None => break "stream ended".to_string(),
                }
            }
        }
    };

    debug!(channel = %tag, %reason, "WebSocket pump finished");
    let _ = inbound.send(InboundFrame::Closed { reason }).await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_connect_refused_is_connection_failed() {
        crate::init_crypto();
        let config = ChannelConfig::new("ws://127.0.0.1:1");
        let result = WsTransport::new().connect("ord", &config).await;
        assert!(matches!(result, Err(SessionError::ConnectionFailed(_))));
    }
}

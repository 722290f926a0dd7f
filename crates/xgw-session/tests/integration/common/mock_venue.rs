//! Mock WebSocket venue for integration tests.
//!
//! Speaks the JSON frame protocol:
//! - Acknowledges every login with a fixed `login_ack`
//! - Answers each new order with a sequenced `broker_ack`
//! - Records every text message received

use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Mutex};
use tokio_tungstenite::{accept_async, tungstenite::Message};

pub struct MockVenue {
    addr: SocketAddr,
    shutdown_tx: mpsc::Sender<()>,
    messages: Arc<Mutex<Vec<serde_json::Value>>>,
    connections: Arc<Mutex<u32>>,
}

impl MockVenue {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let messages = Arc::new(Mutex::new(Vec::new()));
        let connections = Arc::new(Mutex::new(0));
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);

        let messages_clone = messages.clone();
        let connections_clone = connections.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    Ok((stream, _)) = listener.accept() => {
                        tokio::spawn(handle_connection(
                            stream,
                            messages_clone.clone(),
                            connections_clone.clone(),
                        ));
                    }
                    _ = shutdown_rx.recv() => break,
                }
            }
        });

        Self {
            addr,
            shutdown_tx,
            messages,
            connections,
        }
    }

    pub fn url(&self) -> String {
        format!("ws://{}", self.addr)
    }

    pub async fn connection_count(&self) -> u32 {
        *self.connections.lock().await
    }

    /// Received messages whose `type` equals `kind`.
    pub async fn received(&self, kind: &str) -> Vec<serde_json::Value> {
        self.messages
            .lock()
            .await
            .iter()
            .filter(|m| m["type"] == kind)
            .cloned()
            .collect()
    }

    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(()).await;
    }
}

async fn handle_connection(
    stream: TcpStream,
    messages: Arc<Mutex<Vec<serde_json::Value>>>,
    connections: Arc<Mutex<u32>>,
) {
    *connections.lock().await += 1;

    let ws_stream = match accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            eprintln!("WebSocket handshake failed: {}", e);
            return;
        }
    };
    let (mut write, mut read) = ws_stream.split();
    let mut seq = 0u64;

    while let Some(msg) = read.next().await {
        match msg {
            Ok(Message::Text(text)) => {
                let Ok(parsed) = serde_json::from_str::<serde_json::Value>(&text) else {
                    continue;
                };
                messages.lock().await.push(parsed.clone());

                let reply = match parsed["type"].as_str() {
                    Some("login") => Some(json!({
                        "type": "login_ack",
                        "last_out_seq": 0,
                        "last_in_seq": 0
                    })),
                    Some("request") if parsed["request"]["type"] == "new_order" => {
                        seq += 1;
                        Some(json!({
                            "type": "event",
                            "seq": seq,
                            "event": {
                                "type": "broker_ack",
                                "order_ref": parsed["request"]["order_ref"],
                                "broker_order_id": format!("B{seq}")
                            }
                        }))
                    }
                    Some("heartbeat") => Some(json!({"type": "heartbeat"})),
                    Some("logout") => break,
                    _ => None,
                };
                if let Some(reply) = reply {
                    let _ = write.send(Message::Text(reply.to_string())).await;
                }
            }
            Ok(Message::Ping(data)) => {
                let _ = write.send(Message::Pong(data)).await;
            }
            Ok(Message::Close(_)) => break,
            Err(_) => break,
            _ => {}
        }
    }
}

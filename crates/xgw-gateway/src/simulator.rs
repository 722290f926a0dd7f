//! Simulated venue for `--dry-run`.
//!
//! Registers every configured endpoint on a [`LoopbackTransport`]. Order
//! endpoints acknowledge and fully fill each new order; cancels are refused
//! because nothing rests. Report endpoints answer snapshot queries with a
//! fixed cash balance.

use crate::config::AppConfig;
use rust_decimal::Decimal;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use xgw_core::{CashSnapshot, RejectInfo, ServerSnapshot, VenueEvent, WireRequest};
use xgw_session::{
    InboundFrame, LoginInfo, LoopbackEndpoint, LoopbackSession, LoopbackTransport, OutboundFrame,
};

const SIM_CURRENCY: &str = "USD";
const SIM_CASH: i64 = 1_000_000;
const CANCEL_REJECT_CODE: i32 = 1;

/// Server-side sequence state of one endpoint, kept across reconnects.
#[derive(Default)]
struct EndpointState {
    out_seq: AtomicU64,
    in_seq: AtomicU64,
    orders: AtomicU64,
}

impl EndpointState {
    fn login_info(&self) -> LoginInfo {
        LoginInfo {
            last_out_seq: self.out_seq.load(Ordering::Acquire),
            last_in_seq: self.in_seq.load(Ordering::Acquire),
        }
    }

    fn next_seq(&self) -> u64 {
        self.out_seq.fetch_add(1, Ordering::AcqRel) + 1
    }
}

pub struct SimulatedVenue {
    transport: LoopbackTransport,
    tasks: Vec<JoinHandle<()>>,
}

impl SimulatedVenue {
    pub fn spawn(config: &AppConfig, shutdown: CancellationToken) -> Self {
        let transport = LoopbackTransport::new();
        let mut tasks = Vec::new();

        let endpoints = config
            .order_channels
            .iter()
            .map(|c| c.channel.endpoint.clone())
            .chain(
                config
                    .report_channels
                    .iter()
                    .map(|c| c.channel.endpoint.clone()),
            );
        for endpoint in endpoints {
            let acceptor = transport.endpoint(&endpoint);
            tasks.push(tokio::spawn(accept_loop(
                endpoint,
                acceptor,
                shutdown.clone(),
            )));
        }

        info!(endpoints = tasks.len(), "Simulated venue listening");
        Self { transport, tasks }
    }

    pub fn transport(&self) -> LoopbackTransport {
        self.transport.clone()
    }

    pub async fn join(self) {
        for task in self.tasks {
            let _ = task.await;
        }
    }
}

async fn accept_loop(endpoint: String, mut acceptor: LoopbackEndpoint, shutdown: CancellationToken) {
    let state = Arc::new(EndpointState::default());
    loop {
        tokio::select! {
            biased;
            () = shutdown.cancelled() => break,
            session = acceptor.accept() => {
                let Some(session) = session else { break };
                debug!(endpoint = %endpoint, channel = %session.tag(), "Simulated session accepted");
                tokio::spawn(serve(session, Arc::clone(&state)));
            }
        }
    }
}

async fn serve(mut session: LoopbackSession, state: Arc<EndpointState>) {
    if session.accept_login(state.login_info()).await.is_none() {
        return;
    }

    while let Some(frame) = session.recv().await {
        let delivered = match frame {
            OutboundFrame::Request { request } => {
                state
                    .in_seq
                    .fetch_max(request.client_seq(), Ordering::AcqRel);
                answer_request(&session, &state, request).await
            }
            OutboundFrame::SnapshotQuery { query_id } => {
                let snapshot = ServerSnapshot {
                    cash: vec![CashSnapshot {
                        currency: SIM_CURRENCY.to_string(),
                        balance: Decimal::from(SIM_CASH),
                        available: Decimal::from(SIM_CASH),
                    }],
                    ..ServerSnapshot::default()
                };
                session
                    .send(InboundFrame::Snapshot { query_id, snapshot })
                    .await
            }
            OutboundFrame::Heartbeat => session.send(InboundFrame::Heartbeat).await,
            OutboundFrame::Logout => break,
            OutboundFrame::Login { .. } => true,
        };
        if !delivered {
            break;
        }
    }
    debug!(channel = %session.tag(), "Simulated session ended");
}

async fn answer_request(session: &LoopbackSession, state: &EndpointState, request: WireRequest) -> bool {
    let events = match request {
        WireRequest::NewOrder {
            order_ref, request, ..
        } => {
            let n = state.orders.fetch_add(1, Ordering::AcqRel) + 1;
            vec![
                VenueEvent::BrokerAck {
                    order_ref: order_ref.clone(),
                    broker_order_id: format!("SIM-B{n}"),
                },
                VenueEvent::VenueAck {
                    order_ref: order_ref.clone(),
                    venue_order_id: format!("SIM-V{n}"),
                },
                VenueEvent::Fill {
                    order_ref,
                    qty: request.qty,
                    price: request.price,
                    trade_id: Some(format!("SIM-T{n}")),
                },
            ]
        }
        WireRequest::Cancel(cancel) => vec![VenueEvent::CancelReject {
            order_ref: cancel.order_ref,
            error: RejectInfo::new(CANCEL_REJECT_CODE, "order already filled"),
        }],
    };

    for event in events {
        if !session.send_event(state.next_seq(), event).await {
            return false;
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use xgw_session::{ChannelConfig, ChannelKind, ReconnectAction, SessionTransport};

    #[tokio::test]
    async fn test_new_order_is_acked_and_filled() {
        let config = AppConfig::from_toml(
            r#"
[[order_channels]]
tag = "ord"
endpoint = "sim://ord"
"#,
        )
        .unwrap();
        let shutdown = CancellationToken::new();
        let venue = SimulatedVenue::spawn(&config, shutdown.clone());
        let transport = venue.transport();

        let mut link = transport
            .connect("ord", &ChannelConfig::new("sim://ord"))
            .await
            .unwrap();
        link.outbound
            .send(OutboundFrame::Login {
                kind: ChannelKind::Order,
                action: ReconnectAction::Relogin,
                streams: Vec::new(),
            })
            .await
            .unwrap();
        assert_eq!(
            link.inbound.recv().await,
            Some(InboundFrame::LoginAck(LoginInfo::default()))
        );

        let request = xgw_core::OrderRequest {
            side: xgw_core::OrderSide::Buy,
            instrument: "IF2412".to_string(),
            qty: xgw_core::Quantity::new(Decimal::from(5)),
            price: xgw_core::Price::new(Decimal::from(3500)),
            order_kind: xgw_core::OrderKind::Limit,
        };
        link.outbound
            .send(OutboundFrame::Request {
                request: WireRequest::NewOrder {
                    order_ref: xgw_core::OrderRef::new("ord", 1),
                    client_seq: 1,
                    request,
                },
            })
            .await
            .unwrap();

        let mut kinds = Vec::new();
        for expected_seq in 1..=3 {
            match link.inbound.recv().await {
                Some(InboundFrame::Event { seq, event }) => {
                    assert_eq!(seq, expected_seq);
                    kinds.push(event.kind());
                }
                other => panic!("unexpected frame {other:?}"),
            }
        }
        assert_eq!(kinds, vec!["broker_ack", "venue_ack", "fill"]);

        shutdown.cancel();
        drop(link);
        venue.join().await;
    }
}

//! Gateway harness over the loopback transport.
//!
//! The test plays the venue: it accepts each channel's session from the
//! loopback endpoints and scripts the frames the gateway sees.

use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, timeout, Instant};
use xgw_core::{OrderRecord, OrderRef, OrderStatus, ServerSnapshot};
use xgw_gateway::{AppConfig, Gateway};
use xgw_session::{
    ConnectionStatus, InboundFrame, LoginInfo, LoopbackEndpoint, LoopbackSession,
    LoopbackTransport, OutboundFrame,
};

pub const WAIT: Duration = Duration::from_secs(5);
const POLL: Duration = Duration::from_millis(5);

pub const ORDER_ENDPOINT: &str = "loop://orders";
pub const REPORT_ENDPOINT: &str = "loop://reports";

fn config_toml(with_report: bool) -> String {
    let mut toml = format!(
        r#"
[[order_channels]]
tag = "ord"
endpoint = "{ORDER_ENDPOINT}"
reconnect_base_delay_ms = 10
reconnect_max_delay_ms = 50
"#
    );
    if with_report {
        toml.push_str(&format!(
            r#"
[[report_channels]]
tag = "rpt"
endpoint = "{REPORT_ENDPOINT}"
reconnect_base_delay_ms = 10
reconnect_max_delay_ms = 50
streams = ["orders"]
"#
        ));
    }
    toml.push_str(
        r#"
[reconcile]
tick_ms = 10

[journal]
dir = "target/test-journal"
"#,
    );
    toml
}

pub struct Harness {
    pub gateway: Gateway,
    pub orders: LoopbackEndpoint,
    pub reports: Option<LoopbackEndpoint>,
}

impl Harness {
    /// Gateway with one order channel and, optionally, one report channel.
    pub fn start(with_report: bool) -> Self {
        let config = AppConfig::from_toml(&config_toml(with_report)).unwrap();
        let transport = LoopbackTransport::new();
        let orders = transport.endpoint(ORDER_ENDPOINT);
        let reports = with_report.then(|| transport.endpoint(REPORT_ENDPOINT));

        let mut gateway = Gateway::new(config).unwrap();
        gateway.start(Arc::new(transport)).unwrap();
        Self {
            gateway,
            orders,
            reports,
        }
    }

    /// Accept the order channel and acknowledge its login.
    pub async fn accept_orders(&mut self, info: LoginInfo) -> LoopbackSession {
        let mut session = timeout(WAIT, self.orders.accept())
            .await
            .expect("order channel did not connect")
            .unwrap();
        session.accept_login(info).await.unwrap();
        session
    }

    /// Accept the report channel, acknowledge its login and answer the
    /// snapshot query it issues on login.
    pub async fn accept_reports(&mut self, snapshot: ServerSnapshot) -> LoopbackSession {
        let endpoint = self.reports.as_mut().expect("no report channel");
        let mut session = timeout(WAIT, endpoint.accept())
            .await
            .expect("report channel did not connect")
            .unwrap();
        session.accept_login(LoginInfo::default()).await.unwrap();
        answer_snapshot(&mut session, snapshot).await;
        session
    }

    pub async fn wait_connected(&self, tag: &str) {
        wait_until(&format!("{tag} connected"), || {
            self.gateway
                .channel_states()
                .iter()
                .any(|s| s.tag == tag && s.status == ConnectionStatus::Connected)
        })
        .await;
    }

    pub async fn wait_for_status(&self, order_ref: &OrderRef, status: OrderStatus) -> OrderRecord {
        wait_until(&format!("{order_ref} reaching {status}"), || {
            self.gateway
                .lookup(order_ref)
                .is_some_and(|r| r.status == status)
        })
        .await;
        self.gateway.lookup(order_ref).unwrap()
    }
}

/// Wait for the next snapshot query and answer it.
pub async fn answer_snapshot(session: &mut LoopbackSession, snapshot: ServerSnapshot) {
    loop {
        match timeout(WAIT, session.recv()).await.expect("no snapshot query") {
            Some(OutboundFrame::SnapshotQuery { query_id }) => {
                assert!(session.send(InboundFrame::Snapshot { query_id, snapshot }).await);
                return;
            }
            Some(_) => continue,
            None => panic!("report session closed before snapshot query"),
        }
    }
}

pub async fn wait_until(what: &str, mut done: impl FnMut() -> bool) {
    let deadline = Instant::now() + WAIT;
    while !done() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        sleep(POLL).await;
    }
}

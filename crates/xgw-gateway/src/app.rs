//! Application facade.
//!
//! Wires the channel registry, order store, reconciliation sweep and
//! publisher together and exposes the application-facing order API:
//! - `submit_order` / `cancel_order`
//! - `query_snapshot`, `positions`, `cash`
//! - `subscribe` for the per-transition record feed

use crate::config::AppConfig;
use crate::dispatcher::Dispatcher;
use crate::error::{GatewayError, GatewayResult};
use crate::maintenance::Maintenance;
use crate::publisher::Publisher;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use xgw_core::{
    CancelRequest, CashSnapshot, ChannelHandle, ClientSeqSource, OrderKind, OrderRecord, OrderRef,
    OrderRequest, OrderSide, PositionSnapshot, Price, Quantity, RejectInfo, VenueEvent,
    WireRequest,
};
use xgw_orders::{
    AccountBook, CancelError, JournalWriter, OrderStateStore, ReconciliationSweep, SnapshotHandoff,
};
use xgw_session::{Buffered, ChannelRegistry, ChannelState, SendError, SessionTransport};

/// Reject code for requests refused before reaching the wire.
pub const LOCAL_REJECT_CODE: i32 = -2;

/// Capacity of the broadcast feed per subscriber.
const UPDATE_FEED_CAPACITY: usize = 4_096;

pub struct Gateway {
    config: AppConfig,
    registry: Arc<ChannelRegistry>,
    store: Arc<OrderStateStore>,
    account: Arc<AccountBook>,
    sweep: Arc<ReconciliationSweep>,
    handoff: Arc<SnapshotHandoff>,
    updates: broadcast::Sender<OrderRecord>,
    shutdown: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
    publisher: Option<Publisher>,
}

impl Gateway {
    /// Build every component. Nothing runs until [`Gateway::start`].
    pub fn new(config: AppConfig) -> GatewayResult<Self> {
        config.validate()?;
        let registry = Arc::new(config.build_registry()?);
        let handoff = Arc::new(SnapshotHandoff::new(config.queue.capacity));
        let store = Arc::new(OrderStateStore::new(
            config.store.clone(),
            Arc::clone(&handoff),
        ));
        let account = Arc::new(AccountBook::new());
        let sweep = Arc::new(ReconciliationSweep::new(
            Arc::clone(&store),
            Arc::clone(&account),
        ));
        let (updates, _) = broadcast::channel(UPDATE_FEED_CAPACITY);

        Ok(Self {
            config,
            registry,
            store,
            account,
            sweep,
            handoff,
            updates,
            shutdown: CancellationToken::new(),
            tasks: Vec::new(),
            publisher: None,
        })
    }

    /// Start the publisher thread, the maintenance task and every channel.
    pub fn start(&mut self, transport: Arc<dyn SessionTransport>) -> GatewayResult<()> {
        if self.publisher.is_some() {
            return Err(GatewayError::Config("gateway already started".to_string()));
        }
        self.publisher = Some(Publisher::spawn(
            Arc::clone(&self.handoff),
            self.updates.clone(),
        )?);

        let maintenance = Maintenance::new(
            Arc::clone(&self.store),
            Arc::clone(&self.registry),
            JournalWriter::new(&self.config.journal),
            self.config.reconcile.clone(),
        );
        self.tasks
            .push(tokio::spawn(maintenance.run(self.shutdown.clone())));

        let sink = Arc::new(Dispatcher::new(
            Arc::clone(&self.store),
            Arc::clone(&self.sweep),
        ));
        let channels = Arc::clone(&self.registry).start(transport, sink, self.shutdown.clone());
        self.tasks.extend(channels);

        info!(
            order_channels = self.config.order_channels.len(),
            report_channels = self.config.report_channels.len(),
            queue_capacity = self.handoff.capacity(),
            "Gateway started"
        );
        Ok(())
    }

    // ========================================================================
    // Order API
    // ========================================================================

    /// Create and send a new order on the default order channel.
    ///
    /// The order reference is returned once the record exists, whether the
    /// request went out now or was buffered for the next login.
    pub fn submit_order(
        &self,
        side: OrderSide,
        instrument: &str,
        qty: Quantity,
        price: Price,
        order_kind: OrderKind,
    ) -> GatewayResult<OrderRef> {
        let request = OrderRequest {
            side,
            instrument: instrument.to_string(),
            qty,
            price,
            order_kind,
        };
        request.validate().map_err(GatewayError::InvalidRequest)?;

        let channel = self
            .registry
            .default_order_channel()
            .ok_or(GatewayError::NoOrderChannel)?;
        let order_ref = self.store.create(&**channel, &request)?;
        let client_seq = self
            .store
            .lookup(&order_ref)
            .map(|r| r.client_seq)
            .ok_or_else(|| xgw_orders::StoreError::UnknownOrder(order_ref.clone()))?;

        let wire = WireRequest::NewOrder {
            order_ref: order_ref.clone(),
            client_seq,
            request,
        };
        match self.deliver(channel.handle(), wire) {
            Ok(true) => {
                self.store.mark_submitted(&order_ref)?;
            }
            Ok(false) => {
                info!(order_ref = %order_ref, channel = %channel.tag(), "Order queued behind unavailable link");
            }
            Err(e) => return Err(self.fail_submit(order_ref, e)),
        }
        Ok(order_ref)
    }

    /// Record a local reject for an order whose request cannot be sent.
    fn fail_submit(&self, order_ref: OrderRef, error: SendError) -> GatewayError {
        let reject = VenueEvent::BrokerReject {
            order_ref: order_ref.clone(),
            error: RejectInfo::new(LOCAL_REJECT_CODE, error.to_string()),
        };
        if let Err(err) = self.store.apply_conclusive(reject) {
            warn!(order_ref = %order_ref, error = %err, "Failed to record local reject");
        }
        GatewayError::SubmitFailed {
            order_ref,
            source: error,
        }
    }

    /// Request cancellation of a live order on the channel it was sent on.
    pub fn cancel_order(&self, order_ref: &OrderRef) -> Result<(), CancelError> {
        let record = self.store.mark_cancel_pending(order_ref)?;
        let Some(channel) = self.registry.channel(record.channel) else {
            warn!(order_ref = %order_ref, channel = %record.channel, "Order channel missing, cancel not sent");
            return Ok(());
        };

        let wire = WireRequest::Cancel(CancelRequest {
            order_ref: order_ref.clone(),
            client_seq: channel.next_client_seq(),
            instrument: record.instrument.clone(),
            venue_order_id: record.venue_order_id.clone(),
        });
        match self.deliver(channel.handle(), wire) {
            Ok(true) => info!(order_ref = %order_ref, "Cancel sent"),
            Ok(false) => info!(order_ref = %order_ref, "Cancel queued behind unavailable link"),
            Err(e) => warn!(order_ref = %order_ref, error = %e, "Cancel not sent"),
        }
        Ok(())
    }

    /// Send now, or buffer on transient failure. `Ok(true)` when sent.
    fn deliver(&self, channel: ChannelHandle, wire: WireRequest) -> Result<bool, SendError> {
        match self.registry.send(channel, wire.clone()) {
            Ok(()) => Ok(true),
            Err(e) if e.is_transient() => {
                let outcome = self.registry.buffer_for_reconnect(channel, wire)?;
                Ok(outcome == Buffered::SentLive)
            }
            Err(e) => Err(e),
        }
    }

    // ========================================================================
    // Queries
    // ========================================================================

    pub fn query_snapshot(&self) -> Vec<OrderRecord> {
        self.store.snapshot()
    }

    pub fn lookup(&self, order_ref: &OrderRef) -> Option<OrderRecord> {
        self.store.lookup(order_ref)
    }

    pub fn positions(&self) -> Vec<PositionSnapshot> {
        self.account.positions()
    }

    pub fn cash(&self) -> Vec<CashSnapshot> {
        self.account.cash()
    }

    /// Feed of full records, one per transition.
    pub fn subscribe(&self) -> broadcast::Receiver<OrderRecord> {
        self.updates.subscribe()
    }

    pub fn channel_states(&self) -> Vec<ChannelState> {
        self.registry.states()
    }

    pub fn registry(&self) -> &Arc<ChannelRegistry> {
        &self.registry
    }

    pub fn store(&self) -> &Arc<OrderStateStore> {
        &self.store
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Stop channels and maintenance, then drain the publisher.
    pub async fn shutdown(mut self) {
        info!("Gateway shutdown requested");
        self.shutdown.cancel();
        for task in self.tasks.drain(..) {
            if let Err(e) = task.await {
                warn!(error = %e, "Gateway task ended abnormally");
            }
        }
        if let Some(publisher) = self.publisher.take() {
            publisher.stop();
        }
        info!(live_orders = self.store.len(), "Gateway stopped");
    }
}

impl Drop for Gateway {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

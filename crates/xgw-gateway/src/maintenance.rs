//! Periodic store upkeep: expire held events, evict terminal records into
//! the journal, and run timed reconciliation sweeps.

use crate::config::ReconcileConfig;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use xgw_orders::{JournalWriter, OrderStateStore};
use xgw_session::ChannelRegistry;

pub struct Maintenance {
    store: Arc<OrderStateStore>,
    registry: Arc<ChannelRegistry>,
    journal: JournalWriter,
    reconcile: ReconcileConfig,
}

impl Maintenance {
    pub fn new(
        store: Arc<OrderStateStore>,
        registry: Arc<ChannelRegistry>,
        journal: JournalWriter,
        reconcile: ReconcileConfig,
    ) -> Self {
        Self {
            store,
            registry,
            journal,
            reconcile,
        }
    }

    /// One maintenance pass. Returns the number of records evicted.
    pub fn tick(&mut self) -> usize {
        let expired = self.store.expire_deferred();
        if expired > 0 {
            debug!(expired, "Applied expired held events");
        }

        let linger = self.store.config().evict_linger_ms;
        let evicted = self.store.evict_terminal(linger);
        let count = evicted.len();
        if count > 0 {
            if let Err(e) = self.journal.append_all(evicted) {
                warn!(error = %e, "Failed to journal evicted records");
            } else if let Err(e) = self.journal.flush() {
                warn!(error = %e, "Failed to flush order journal");
            }
        }
        count
    }

    /// Request a snapshot on every connected report channel.
    pub fn sweep_now(&self) -> usize {
        let mut requested = 0;
        for channel in self.registry.report_channels().filter(|c| c.is_connected()) {
            match self.registry.request_snapshot(channel.handle()) {
                Ok(_) => requested += 1,
                Err(e) => warn!(channel = %channel.tag(), error = %e, "Timed sweep request failed"),
            }
        }
        requested
    }

    pub async fn run(mut self, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(Duration::from_millis(self.reconcile.tick_ms));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let sweep_every = self.reconcile.interval_ms.map(Duration::from_millis);
        let mut last_sweep = Instant::now();

        info!(
            tick_ms = self.reconcile.tick_ms,
            sweep_interval_ms = ?self.reconcile.interval_ms,
            "Maintenance task started"
        );

        loop {
            tokio::select! {
                () = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    self.tick();
                    if let Some(every) = sweep_every {
                        if last_sweep.elapsed() >= every {
                            last_sweep = Instant::now();
                            let requested = self.sweep_now();
                            debug!(requested, "Timed reconciliation sweep requested");
                        }
                    }
                }
            }
        }

        if let Err(e) = self.journal.close() {
            warn!(error = %e, "Failed to close order journal");
        }
        info!("Maintenance task stopped");
    }
}

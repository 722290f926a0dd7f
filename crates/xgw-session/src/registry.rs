//! Channel registry.
//!
//! Owns the fixed set of session channels. Channels are added while the
//! registry is still exclusively owned; [`ChannelRegistry::start`] consumes an
//! `Arc<Self>`, after which the set never changes and lookups by handle index
//! straight into the arena.

use crate::channel::{Buffered, ChannelState, SessionChannel};
use crate::config::{ChannelConfig, ChannelKind, Subscription};
use crate::connection::run_channel;
use crate::error::{ConfigError, SendError};
use crate::sink::EventSink;
use crate::transport::{InboundFrame, LoginInfo, OutboundFrame, ReconnectAction, SessionTransport};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use xgw_core::{ChannelHandle, WireRequest};
use xgw_telemetry::Metrics;

const MAX_CHANNELS: usize = u16::MAX as usize;

/// What [`ChannelRegistry::dispatch`] did with a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// Passed to the sink.
    Delivered,
    /// Arrived on a link from an earlier epoch.
    Stale,
    /// Sequence already applied.
    Duplicate,
    /// Control frame with nothing to deliver.
    Ignored,
}

#[derive(Default)]
pub struct ChannelRegistry {
    channels: Vec<Arc<SessionChannel>>,
    by_tag: HashMap<String, ChannelHandle>,
    default_order: Option<ChannelHandle>,
    snapshot_on_connect: bool,
}

impl ChannelRegistry {
    pub fn new() -> Self {
        Self {
            snapshot_on_connect: true,
            ..Self::default()
        }
    }

    // ========================================================================
    // Setup (before start)
    // ========================================================================

    pub fn add_order_channel(
        &mut self,
        tag: &str,
        config: ChannelConfig,
    ) -> Result<ChannelHandle, ConfigError> {
        let handle = self.add_channel(tag, ChannelKind::Order, config, Subscription::default())?;
        if self.default_order.is_none() {
            self.default_order = Some(handle);
        }
        Ok(handle)
    }

    pub fn add_report_channel(
        &mut self,
        tag: &str,
        config: ChannelConfig,
        subscription: Subscription,
    ) -> Result<ChannelHandle, ConfigError> {
        self.add_channel(tag, ChannelKind::Report, config, subscription)
    }

    fn add_channel(
        &mut self,
        tag: &str,
        kind: ChannelKind,
        config: ChannelConfig,
        subscription: Subscription,
    ) -> Result<ChannelHandle, ConfigError> {
        if tag.trim().is_empty() {
            return Err(ConfigError::Missing("tag"));
        }
        if self.by_tag.contains_key(tag) {
            return Err(ConfigError::DuplicateTag(tag.to_string()));
        }
        if self.channels.len() >= MAX_CHANNELS {
            return Err(ConfigError::TooManyChannels(MAX_CHANNELS));
        }
        config.validate()?;

        let handle = ChannelHandle(self.channels.len() as u16);
        self.channels.push(Arc::new(SessionChannel::new(
            handle,
            tag.to_string(),
            kind,
            config,
            subscription,
        )));
        self.by_tag.insert(tag.to_string(), handle);
        info!(channel = %tag, %handle, %kind, "Registered session channel");
        Ok(handle)
    }

    pub fn set_default_order_channel(&mut self, handle: ChannelHandle) -> Result<(), ConfigError> {
        match self.channels.get(handle.index()) {
            Some(ch) if ch.kind() == ChannelKind::Order => {
                self.default_order = Some(handle);
                Ok(())
            }
            _ => Err(ConfigError::NotOrderChannel(handle)),
        }
    }

    /// Issue a snapshot query whenever a report channel logs in. On by default.
    pub fn set_snapshot_on_connect(&mut self, enabled: bool) {
        self.snapshot_on_connect = enabled;
    }

    /// Spawn one run loop per channel.
    pub fn start(
        self: Arc<Self>,
        transport: Arc<dyn SessionTransport>,
        sink: Arc<dyn EventSink>,
        shutdown: CancellationToken,
    ) -> Vec<JoinHandle<()>> {
        info!(channels = self.channels.len(), "Starting session channels");
        self.channels
            .iter()
            .map(|channel| {
                tokio::spawn(run_channel(
                    Arc::clone(&self),
                    Arc::clone(channel),
                    Arc::clone(&transport),
                    Arc::clone(&sink),
                    shutdown.clone(),
                ))
            })
            .collect()
    }

    // ========================================================================
    // Queries
    // ========================================================================

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    pub fn channel(&self, handle: ChannelHandle) -> Option<&Arc<SessionChannel>> {
        self.channels.get(handle.index())
    }

    pub fn handle_by_tag(&self, tag: &str) -> Option<ChannelHandle> {
        self.by_tag.get(tag).copied()
    }

    pub fn default_order_channel(&self) -> Option<&Arc<SessionChannel>> {
        self.default_order.and_then(|h| self.channel(h))
    }

    pub fn snapshot_on_connect(&self) -> bool {
        self.snapshot_on_connect
    }

    pub fn order_channels(&self) -> impl Iterator<Item = &Arc<SessionChannel>> {
        self.channels.iter().filter(|c| c.kind() == ChannelKind::Order)
    }

    pub fn report_channels(&self) -> impl Iterator<Item = &Arc<SessionChannel>> {
        self.channels.iter().filter(|c| c.kind() == ChannelKind::Report)
    }

    pub fn state(&self, handle: ChannelHandle) -> Option<ChannelState> {
        self.channel(handle).map(|c| c.state())
    }

    pub fn states(&self) -> Vec<ChannelState> {
        self.channels.iter().map(|c| c.state()).collect()
    }

    fn require(&self, handle: ChannelHandle) -> Result<&Arc<SessionChannel>, SendError> {
        self.channel(handle).ok_or(SendError::UnknownChannel(handle))
    }

    // ========================================================================
    // Outbound
    // ========================================================================

    /// Hand a request to an order channel's live link.
    ///
    /// Never retries. On `Disconnected` or `Backpressure` the caller decides
    /// whether to [`buffer_for_reconnect`](Self::buffer_for_reconnect).
    /// `Backpressure` is also returned while earlier buffered requests are
    /// still waiting, so buffering keeps wire order.
    pub fn send(&self, handle: ChannelHandle, request: WireRequest) -> Result<(), SendError> {
        let channel = self.require(handle)?;
        request.validate().map_err(SendError::Invalid)?;
        if channel.kind() != ChannelKind::Order {
            return Err(SendError::Invalid(format!(
                "{} is a report channel",
                channel.tag()
            )));
        }
        channel.send_request(request)
    }

    /// Keep a request for replay, in order: flushed by the run loop once a
    /// live link has room, or replayed after the next login.
    pub fn buffer_for_reconnect(
        &self,
        handle: ChannelHandle,
        request: WireRequest,
    ) -> Result<Buffered, SendError> {
        let channel = self.require(handle)?;
        request.validate().map_err(SendError::Invalid)?;
        let outcome = channel.buffer(request);
        debug!(
            channel = %channel.tag(),
            ?outcome,
            pending = channel.pending_len(),
            "Buffered request for reconnect"
        );
        Ok(outcome)
    }

    /// Issue a full-state query on a connected report channel.
    pub fn request_snapshot(&self, handle: ChannelHandle) -> Result<u64, SendError> {
        let channel = self.require(handle)?;
        if channel.kind() != ChannelKind::Report {
            return Err(SendError::Invalid(format!(
                "{} is not a report channel",
                channel.tag()
            )));
        }
        if !channel.is_connected() {
            return Err(SendError::Disconnected);
        }
        let (query_id, epoch) = channel.begin_query();
        match channel.try_send(OutboundFrame::SnapshotQuery { query_id }) {
            Ok(()) => {
                info!(channel = %channel.tag(), query_id, epoch, "Requested server snapshot");
                Ok(query_id)
            }
            Err(e) => {
                channel.abandon_query(query_id);
                Err(e)
            }
        }
    }

    /// Ask for reconciliation after a gap on `origin`.
    fn request_reconciliation(&self, origin: &SessionChannel) {
        let target = if origin.kind() == ChannelKind::Report {
            Some(origin.handle())
        } else {
            self.report_channels()
                .find(|c| c.is_connected())
                .map(|c| c.handle())
        };
        match target.map(|h| self.request_snapshot(h)) {
            Some(Ok(_)) => {}
            Some(Err(e)) => {
                warn!(channel = %origin.tag(), ?e, "Reconciliation request failed")
            }
            None => warn!(
                channel = %origin.tag(),
                "No connected report channel for reconciliation"
            ),
        }
    }

    // ========================================================================
    // Session lifecycle
    // ========================================================================

    pub fn on_connect(&self, handle: ChannelHandle) -> Result<ReconnectAction, SendError> {
        Ok(self.require(handle)?.on_connect())
    }

    pub fn on_login(
        &self,
        handle: ChannelHandle,
        info: LoginInfo,
        action: ReconnectAction,
    ) -> Result<(), SendError> {
        self.require(handle)?.on_login(info, action);
        Ok(())
    }

    /// Returns whether the channel was connected.
    pub fn on_disconnect(&self, handle: ChannelHandle) -> Result<bool, SendError> {
        let channel = self.require(handle)?;
        let was_connected = channel.on_disconnect();
        if was_connected {
            Metrics::channel_connected(channel.tag(), false);
            info!(
                channel = %channel.tag(),
                epoch = channel.epoch(),
                pending = channel.pending_len(),
                "Session channel disconnected"
            );
        }
        Ok(was_connected)
    }

    // ========================================================================
    // Inbound
    // ========================================================================

    /// Filter one inbound frame and deliver it to the sink.
    ///
    /// `link_epoch` is the epoch of the link the frame arrived on.
    pub(crate) fn dispatch(
        &self,
        channel: &SessionChannel,
        link_epoch: u64,
        frame: InboundFrame,
        sink: &dyn EventSink,
    ) -> Dispatch {
        let tag = channel.tag();
        let current = channel.epoch();
        if link_epoch != current {
            debug!(channel = %tag, link_epoch, current, "Discarded frame from stale epoch");
            Metrics::stale_epoch_discard(tag);
            return Dispatch::Stale;
        }

        match frame {
            InboundFrame::Event { seq, event } => {
                let last = channel.inbound_seq();
                if seq <= last {
                    debug!(channel = %tag, seq, last, "Dropped already-applied event");
                    Metrics::duplicate_seq_discard(tag);
                    return Dispatch::Duplicate;
                }
                channel.advance_inbound(seq);
                if seq > last + 1 {
                    warn!(
                        channel = %tag,
                        expected = last + 1,
                        seq,
                        missing = seq - last - 1,
                        "Inbound sequence gap"
                    );
                    Metrics::sequence_gap(tag);
                    self.request_reconciliation(channel);
                }
                sink.on_event(channel.handle(), event);
                Dispatch::Delivered
            }
            InboundFrame::Snapshot { query_id, snapshot } => {
                if !channel.complete_query(query_id) {
                    debug!(channel = %tag, query_id, "Discarded unsolicited or stale snapshot");
                    Metrics::stale_epoch_discard(tag);
                    return Dispatch::Stale;
                }
                info!(
                    channel = %tag,
                    query_id,
                    orders = snapshot.orders.len(),
                    positions = snapshot.positions.len(),
                    cash = snapshot.cash.len(),
                    "Received server snapshot"
                );
                sink.on_snapshot(channel.handle(), snapshot);
                Dispatch::Delivered
            }
            InboundFrame::Heartbeat => Dispatch::Ignored,
            other => {
                debug!(channel = %tag, frame = ?other, "Ignored control frame on live link");
                Dispatch::Ignored
            }
        }
    }
}

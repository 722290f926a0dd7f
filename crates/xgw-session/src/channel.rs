//! One sequenced session channel.
//!
//! Holds the per-channel counters that survive reconnects for the process
//! lifetime: `outbound_seq`, `inbound_seq` and `epoch`. The live link is
//! swapped in and out by the channel's run loop.

use crate::config::{ChannelConfig, ChannelKind, ResumeFrom, Subscription};
use crate::error::SendError;
use crate::transport::{LoginInfo, OutboundFrame, ReconnectAction};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::Notify;
use tracing::debug;
use xgw_core::{ChannelHandle, ClientSeqSource, WireRequest};

/// Connection state of a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
}

impl ConnectionStatus {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => Self::Connecting,
            2 => Self::Connected,
            _ => Self::Disconnected,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            Self::Disconnected => 0,
            Self::Connecting => 1,
            Self::Connected => 2,
        }
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnected"),
            Self::Connecting => write!(f, "connecting"),
            Self::Connected => write!(f, "connected"),
        }
    }
}

/// Point-in-time view of a channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChannelState {
    pub handle: ChannelHandle,
    pub tag: String,
    pub kind: ChannelKind,
    pub status: ConnectionStatus,
    pub epoch: u64,
    pub outbound_seq: u64,
    pub inbound_seq: u64,
    pub pending_on_disconnect: usize,
}

/// Result of [`SessionChannel::buffer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Buffered {
    /// Held for replay after the next login.
    Queued,
    /// A link came up in the meantime; the request went straight out.
    SentLive,
}

struct LiveLink {
    epoch: u64,
    sender: mpsc::Sender<OutboundFrame>,
}

pub struct SessionChannel {
    handle: ChannelHandle,
    tag: String,
    kind: ChannelKind,
    config: ChannelConfig,
    subscription: Subscription,

    status: AtomicU8,
    epoch: AtomicU64,
    outbound_seq: AtomicU64,
    inbound_seq: AtomicU64,
    connected_once: AtomicBool,

    link: RwLock<Option<LiveLink>>,
    pending_on_disconnect: Mutex<VecDeque<WireRequest>>,
    /// Wakes the run loop when requests are queued behind a live link.
    pending_ready: Notify,
    /// Action decided for the current epoch.
    action: Mutex<Option<(u64, ReconnectAction)>>,
    next_query_id: AtomicU64,
    /// Outstanding snapshot queries: query id -> epoch issued in.
    pending_queries: Mutex<HashMap<u64, u64>>,
}

impl SessionChannel {
    pub(crate) fn new(
        handle: ChannelHandle,
        tag: String,
        kind: ChannelKind,
        config: ChannelConfig,
        subscription: Subscription,
    ) -> Self {
        Self {
            handle,
            tag,
            kind,
            config,
            subscription,
            status: AtomicU8::new(ConnectionStatus::Disconnected.as_u8()),
            epoch: AtomicU64::new(0),
            outbound_seq: AtomicU64::new(0),
            inbound_seq: AtomicU64::new(0),
            connected_once: AtomicBool::new(false),
            link: RwLock::new(None),
            pending_on_disconnect: Mutex::new(VecDeque::new()),
            pending_ready: Notify::new(),
            action: Mutex::new(None),
            next_query_id: AtomicU64::new(1),
            pending_queries: Mutex::new(HashMap::new()),
        }
    }

    pub fn handle(&self) -> ChannelHandle {
        self.handle
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    pub fn kind(&self) -> ChannelKind {
        self.kind
    }

    pub fn config(&self) -> &ChannelConfig {
        &self.config
    }

    pub fn subscription(&self) -> &Subscription {
        &self.subscription
    }

    pub fn status(&self) -> ConnectionStatus {
        ConnectionStatus::from_u8(self.status.load(Ordering::Acquire))
    }

    pub(crate) fn set_status(&self, status: ConnectionStatus) {
        self.status.store(status.as_u8(), Ordering::Release);
    }

    pub fn is_connected(&self) -> bool {
        self.status() == ConnectionStatus::Connected
    }

    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::Acquire)
    }

    /// Last client sequence allocated on this channel.
    pub fn outbound_seq(&self) -> u64 {
        self.outbound_seq.load(Ordering::Acquire)
    }

    /// Last inbound sequence applied on this channel.
    pub fn inbound_seq(&self) -> u64 {
        self.inbound_seq.load(Ordering::Acquire)
    }

    pub fn pending_len(&self) -> usize {
        self.pending_on_disconnect.lock().len()
    }

    pub fn state(&self) -> ChannelState {
        ChannelState {
            handle: self.handle,
            tag: self.tag.clone(),
            kind: self.kind,
            status: self.status(),
            epoch: self.epoch(),
            outbound_seq: self.outbound_seq(),
            inbound_seq: self.inbound_seq(),
            pending_on_disconnect: self.pending_len(),
        }
    }

    // ========================================================================
    // Session lifecycle
    // ========================================================================

    /// Decide how to (re)establish the session. Cached per epoch.
    pub(crate) fn on_connect(&self) -> ReconnectAction {
        let epoch = self.epoch();
        let mut cached = self.action.lock();
        if let Some((cached_epoch, action)) = *cached {
            if cached_epoch == epoch {
                return action;
            }
        }

        let action = if self.connected_once.load(Ordering::Acquire) {
            ReconnectAction::ResumeAt(self.inbound_seq())
        } else {
            match (self.kind, self.subscription.start) {
                (ChannelKind::Order, _) => ReconnectAction::Relogin,
                (ChannelKind::Report, ResumeFrom::LastAcked) => {
                    ReconnectAction::ResumeAt(self.inbound_seq())
                }
                (ChannelKind::Report, ResumeFrom::Beginning) => ReconnectAction::ResumeAt(0),
                (ChannelKind::Report, ResumeFrom::Newest) => ReconnectAction::Relogin,
            }
        };
        *cached = Some((epoch, action));
        action
    }

    /// Apply the server's login report.
    ///
    /// `info.last_in_seq` is the last client sequence the server received:
    /// order channels never reuse a sequence at or below it. On a fresh
    /// login the inbound stream continues after `info.last_out_seq`.
    pub(crate) fn on_login(&self, info: LoginInfo, action: ReconnectAction) {
        if self.kind == ChannelKind::Order {
            let prev = self.outbound_seq.fetch_max(info.last_in_seq, Ordering::AcqRel);
            if info.last_in_seq > prev {
                debug!(
                    channel = %self.tag,
                    from = prev,
                    to = info.last_in_seq,
                    "Fast-forwarded outbound sequence"
                );
            }
        }
        if action == ReconnectAction::Relogin {
            self.inbound_seq.fetch_max(info.last_out_seq, Ordering::AcqRel);
        }
        self.connected_once.store(true, Ordering::Release);
    }

    /// Install the link unless buffered requests still wait for replay.
    ///
    /// Returns the link epoch once installed, or the requests to replay
    /// first. Holding the buffer lock while installing keeps buffered
    /// requests ahead of anything sent on the new link.
    pub(crate) fn install_link_or_drain(
        &self,
        sender: &mpsc::Sender<OutboundFrame>,
    ) -> Result<u64, Vec<WireRequest>> {
        let mut pending = self.pending_on_disconnect.lock();
        if !pending.is_empty() {
            return Err(pending.drain(..).collect());
        }
        let epoch = self.epoch();
        *self.link.write() = Some(LiveLink {
            epoch,
            sender: sender.clone(),
        });
        self.set_status(ConnectionStatus::Connected);
        Ok(epoch)
    }

    /// Put unsent requests back at the head of the replay buffer.
    pub(crate) fn requeue_front(&self, requests: Vec<WireRequest>) {
        let mut pending = self.pending_on_disconnect.lock();
        for request in requests.into_iter().rev() {
            pending.push_front(request);
        }
    }

    /// Tear down the live link. Returns whether the channel was connected.
    pub(crate) fn on_disconnect(&self) -> bool {
        let was_connected = self.status() == ConnectionStatus::Connected;
        *self.link.write() = None;
        self.pending_queries.lock().clear();
        if was_connected {
            self.epoch.fetch_add(1, Ordering::AcqRel);
        }
        self.set_status(ConnectionStatus::Disconnected);
        was_connected
    }

    // ========================================================================
    // Outbound
    // ========================================================================

    /// Hand a frame to the live link without waiting.
    pub(crate) fn try_send(&self, frame: OutboundFrame) -> Result<(), SendError> {
        let link = self.link.read();
        let live = link.as_ref().ok_or(SendError::Disconnected)?;
        live.sender.try_send(frame).map_err(|e| match e {
            TrySendError::Full(_) => SendError::Backpressure,
            TrySendError::Closed(_) => SendError::Disconnected,
        })
    }

    /// Send a request on the live link.
    ///
    /// Refused with `Backpressure` while earlier requests are still queued,
    /// so a request never overtakes one accepted before it.
    pub(crate) fn send_request(&self, request: WireRequest) -> Result<(), SendError> {
        let pending = self.pending_on_disconnect.lock();
        if !pending.is_empty() {
            return Err(SendError::Backpressure);
        }
        self.try_send(OutboundFrame::Request { request })
    }

    /// Buffer a request behind any already queued, or send it when the link
    /// is up and nothing is queued.
    ///
    /// Requests queued behind a live link are flushed by the run loop as soon
    /// as the link has capacity; otherwise they wait for the next login.
    pub(crate) fn buffer(&self, request: WireRequest) -> Buffered {
        let mut pending = self.pending_on_disconnect.lock();
        let link = self.link.read();
        let request = match (pending.is_empty(), link.as_ref()) {
            (true, Some(live)) => match live.sender.try_send(OutboundFrame::Request { request }) {
                Ok(()) => return Buffered::SentLive,
                Err(TrySendError::Full(frame)) | Err(TrySendError::Closed(frame)) => {
                    match frame {
                        OutboundFrame::Request { request } => request,
                        _ => return Buffered::Queued,
                    }
                }
            },
            _ => request,
        };
        pending.push_back(request);
        if link.is_some() {
            self.pending_ready.notify_one();
        }
        Buffered::Queued
    }

    pub(crate) fn has_pending(&self) -> bool {
        !self.pending_on_disconnect.lock().is_empty()
    }

    /// Resolves once a request was queued behind the live link.
    pub(crate) async fn pending_queued(&self) {
        self.pending_ready.notified().await;
    }

    /// Send the oldest queued request through a reserved slot.
    ///
    /// The buffer lock is held across the send so no live send can slip in
    /// between taking the request and enqueueing it.
    pub(crate) fn send_pending_front(
        &self,
        permit: mpsc::Permit<'_, OutboundFrame>,
    ) -> Option<WireRequest> {
        let mut pending = self.pending_on_disconnect.lock();
        let request = pending.pop_front()?;
        permit.send(OutboundFrame::Request {
            request: request.clone(),
        });
        Some(request)
    }

    /// Register a snapshot query in the current epoch.
    pub(crate) fn begin_query(&self) -> (u64, u64) {
        let query_id = self.next_query_id.fetch_add(1, Ordering::AcqRel);
        let epoch = self.epoch();
        self.pending_queries.lock().insert(query_id, epoch);
        (query_id, epoch)
    }

    pub(crate) fn abandon_query(&self, query_id: u64) {
        self.pending_queries.lock().remove(&query_id);
    }

    /// Whether `query_id` was issued in the current epoch. Consumes it.
    pub(crate) fn complete_query(&self, query_id: u64) -> bool {
        let issued_in = self.pending_queries.lock().remove(&query_id);
        issued_in == Some(self.epoch())
    }

    // ========================================================================
    // Inbound
    // ========================================================================

    /// Advance `inbound_seq`. Returns the previous value.
    pub(crate) fn advance_inbound(&self, seq: u64) -> u64 {
        self.inbound_seq.fetch_max(seq, Ordering::AcqRel)
    }
}

impl ClientSeqSource for SessionChannel {
    fn handle(&self) -> ChannelHandle {
        self.handle
    }

    fn tag(&self) -> &str {
        &self.tag
    }

    fn next_client_seq(&self) -> u64 {
        self.outbound_seq.fetch_add(1, Ordering::AcqRel) + 1
    }
}

impl fmt::Debug for SessionChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionChannel")
            .field("handle", &self.handle)
            .field("tag", &self.tag)
            .field("kind", &self.kind)
            .field("status", &self.status())
            .field("epoch", &self.epoch())
            .finish()
    }
}

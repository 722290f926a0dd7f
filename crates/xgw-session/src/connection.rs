//! Per-channel run loop.
//!
//! Connect, log in, replay buffered requests, then multiplex inbound frames,
//! queued-request flushes and heartbeats in one `select!` until the link ends. Reconnects with
//! exponential backoff and jitter until shutdown.

use crate::backoff::Backoff;
use crate::channel::{ConnectionStatus, SessionChannel};
use crate::config::ChannelKind;
use crate::error::{SessionError, SessionResult};
use crate::heartbeat::HeartbeatMonitor;
use crate::registry::ChannelRegistry;
use crate::sink::EventSink;
use crate::transport::{InboundFrame, LoginInfo, OutboundFrame, RawLink, SessionTransport};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use xgw_telemetry::Metrics;

/// How a session ended without an error.
#[derive(Debug)]
enum SessionEnd {
    Shutdown,
    Closed(String),
}

pub(crate) async fn run_channel(
    registry: Arc<ChannelRegistry>,
    channel: Arc<SessionChannel>,
    transport: Arc<dyn SessionTransport>,
    sink: Arc<dyn EventSink>,
    shutdown: CancellationToken,
) {
    let tag = channel.tag().to_string();
    let config = channel.config();
    let mut backoff = Backoff::new(config.reconnect_base_delay_ms, config.reconnect_max_delay_ms);

    loop {
        if shutdown.is_cancelled() {
            break;
        }

        channel.set_status(ConnectionStatus::Connecting);
        let result = run_session(
            &registry,
            &channel,
            transport.as_ref(),
            sink.as_ref(),
            &shutdown,
        )
        .await;

        let was_connected = match registry.on_disconnect(channel.handle()) {
            Ok(was_connected) => was_connected,
            Err(e) => {
                error!(channel = %tag, ?e, "Channel missing from registry");
                break;
            }
        };
        if was_connected {
            sink.on_disconnected(channel.handle());
            backoff.reset();
        }

        let reason = match result {
            Ok(SessionEnd::Shutdown) => {
                info!(channel = %tag, "Shutdown requested, exiting channel loop");
                break;
            }
            Ok(SessionEnd::Closed(reason)) => {
                warn!(channel = %tag, %reason, "Session link closed");
                "closed"
            }
            Err(e) => {
                error!(channel = %tag, error = %e, "Session error");
                e.reason()
            }
        };

        if shutdown.is_cancelled() {
            break;
        }

        let delay = backoff.next_delay();
        let attempt = backoff.attempt();
        if config.max_reconnect_attempts > 0 && attempt > config.max_reconnect_attempts {
            error!(channel = %tag, attempt, "Max reconnection attempts reached");
            break;
        }

        Metrics::channel_reconnect(&tag, reason);
        warn!(
            channel = %tag,
            attempt,
            delay_ms = delay.as_millis() as u64,
            "Reconnecting"
        );

        tokio::select! {
            () = tokio::time::sleep(delay) => {}
            () = shutdown.cancelled() => {
                info!(channel = %tag, "Shutdown requested during backoff, exiting");
                break;
            }
        }
    }

    channel.set_status(ConnectionStatus::Disconnected);
}

async fn run_session(
    registry: &ChannelRegistry,
    channel: &SessionChannel,
    transport: &dyn SessionTransport,
    sink: &dyn EventSink,
    shutdown: &CancellationToken,
) -> SessionResult<SessionEnd> {
    let tag = channel.tag();
    let config = channel.config();
    info!(channel = %tag, endpoint = %config.endpoint, "Connecting");

    let RawLink {
        outbound,
        mut inbound,
    } = tokio::select! {
        biased;
        () = shutdown.cancelled() => return Ok(SessionEnd::Shutdown),
        link = transport.connect(tag, config) => link?,
    };

    let action = channel.on_connect();
    let streams = match channel.kind() {
        ChannelKind::Order => Vec::new(),
        ChannelKind::Report => channel.subscription().streams.clone(),
    };
    outbound
        .send(OutboundFrame::Login {
            kind: channel.kind(),
            action,
            streams,
        })
        .await
        .map_err(|_| SessionError::ConnectionClosed("link closed before login".to_string()))?;

    let login_timeout = Duration::from_millis(config.login_timeout_ms);
    let info = tokio::select! {
        biased;
        () = shutdown.cancelled() => return Ok(SessionEnd::Shutdown),
        login = tokio::time::timeout(login_timeout, wait_for_login(tag, &mut inbound)) => {
            login.map_err(|_| SessionError::LoginTimeout(config.login_timeout_ms))??
        }
    };
    channel.on_login(info, action);

    let epoch = replay_and_install(channel, &outbound, sink).await?;
    Metrics::channel_connected(tag, true);
    info!(
        channel = %tag,
        epoch,
        ?action,
        outbound_seq = channel.outbound_seq(),
        inbound_seq = channel.inbound_seq(),
        "Session established"
    );
    sink.on_connected(channel.handle());

    if channel.kind() == ChannelKind::Report && registry.snapshot_on_connect() {
        if let Err(e) = registry.request_snapshot(channel.handle()) {
            warn!(channel = %tag, ?e, "Failed to request snapshot after login");
        }
    }

    let mut heartbeat =
        HeartbeatMonitor::new(config.heartbeat_interval_ms, config.heartbeat_timeout_ms);
    let mut ticker = tokio::time::interval(heartbeat.check_period());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;

            () = shutdown.cancelled() => {
                info!(channel = %tag, "Shutdown signal received in session loop");
                if outbound.try_send(OutboundFrame::Logout).is_err() {
                    debug!(channel = %tag, "Logout not sent");
                }
                return Ok(SessionEnd::Shutdown);
            }

            frame = inbound.recv() => {
                match frame {
                    None => return Ok(SessionEnd::Closed("link dropped".to_string())),
                    Some(InboundFrame::Closed { reason }) => return Ok(SessionEnd::Closed(reason)),
                    Some(frame) => {
                        heartbeat.record_received();
                        registry.dispatch(channel, epoch, frame, sink);
                    }
                }
            }

            permit = outbound.reserve(), if channel.has_pending() => {
                let Ok(permit) = permit else {
                    return Ok(SessionEnd::Closed("outbound closed".to_string()));
                };
                if let Some(request) = channel.send_pending_front(permit) {
                    debug!(channel = %tag, client_seq = request.client_seq(), "Flushed queued request");
                    sink.on_replayed(channel.handle(), &request);
                }
            }

            () = channel.pending_queued() => {}

            _ = ticker.tick() => {
                if heartbeat.is_timed_out() {
                    return Err(SessionError::HeartbeatTimeout);
                }
                if heartbeat.should_send() {
                    match outbound.try_send(OutboundFrame::Heartbeat) {
                        Ok(()) => {
                            heartbeat.record_sent();
                            debug!(channel = %tag, "Sent heartbeat");
                        }
                        Err(mpsc::error::TrySendError::Full(_)) => {
                            debug!(channel = %tag, "Outbound busy, heartbeat skipped");
                        }
                        Err(mpsc::error::TrySendError::Closed(_)) => {
                            return Ok(SessionEnd::Closed("outbound closed".to_string()));
                        }
                    }
                }
            }
        }
    }
}

async fn wait_for_login(
    tag: &str,
    inbound: &mut mpsc::Receiver<InboundFrame>,
) -> SessionResult<LoginInfo> {
    loop {
        match inbound.recv().await {
            Some(InboundFrame::LoginAck(info)) => return Ok(info),
            Some(InboundFrame::LoginReject { error }) => {
                return Err(SessionError::LoginRejected(error.to_string()))
            }
            Some(InboundFrame::Closed { reason }) => {
                return Err(SessionError::ConnectionClosed(reason))
            }
            Some(InboundFrame::Heartbeat) => {}
            Some(other) => {
                warn!(channel = %tag, frame = ?other, "Discarded frame received before login");
            }
            None => {
                return Err(SessionError::ConnectionClosed(
                    "link dropped during login".to_string(),
                ))
            }
        }
    }
}

/// Replay buffered requests in order, then install the link.
async fn replay_and_install(
    channel: &SessionChannel,
    outbound: &mpsc::Sender<OutboundFrame>,
    sink: &dyn EventSink,
) -> SessionResult<u64> {
    loop {
        let batch = match channel.install_link_or_drain(outbound) {
            Ok(epoch) => return Ok(epoch),
            Err(batch) => batch,
        };
        info!(channel = %channel.tag(), count = batch.len(), "Replaying buffered requests");

        let mut remaining = batch.into_iter();
        while let Some(request) = remaining.next() {
            let frame = OutboundFrame::Request {
                request: request.clone(),
            };
            if outbound.send(frame).await.is_err() {
                let mut unsent = vec![request];
                unsent.extend(remaining);
                let count = unsent.len();
                channel.requeue_front(unsent);
                return Err(SessionError::ConnectionClosed(format!(
                    "link closed during replay, {count} requests kept"
                )));
            }
            sink.on_replayed(channel.handle(), &request);
        }
    }
}

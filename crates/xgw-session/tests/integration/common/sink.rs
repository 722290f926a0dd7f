//! Event sink forwarding everything to an unbounded channel.

use tokio::sync::mpsc;
use xgw_core::{ChannelHandle, ServerSnapshot, VenueEvent, WireRequest};
use xgw_session::EventSink;

#[derive(Debug)]
pub enum Delivered {
    Event(ChannelHandle, VenueEvent),
    Snapshot(ChannelHandle, ServerSnapshot),
    Replayed(ChannelHandle, WireRequest),
    Connected(ChannelHandle),
    Disconnected(ChannelHandle),
}

pub struct ChannelSink {
    tx: mpsc::UnboundedSender<Delivered>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Delivered>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl EventSink for ChannelSink {
    fn on_event(&self, channel: ChannelHandle, event: VenueEvent) {
        let _ = self.tx.send(Delivered::Event(channel, event));
    }

    fn on_snapshot(&self, channel: ChannelHandle, snapshot: ServerSnapshot) {
        let _ = self.tx.send(Delivered::Snapshot(channel, snapshot));
    }

    fn on_replayed(&self, channel: ChannelHandle, request: &WireRequest) {
        let _ = self.tx.send(Delivered::Replayed(channel, request.clone()));
    }

    fn on_connected(&self, channel: ChannelHandle) {
        let _ = self.tx.send(Delivered::Connected(channel));
    }

    fn on_disconnected(&self, channel: ChannelHandle) {
        let _ = self.tx.send(Delivered::Disconnected(channel));
    }
}

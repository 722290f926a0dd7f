//! Consumer of everything a session channel delivers.

use xgw_core::{ChannelHandle, ServerSnapshot, VenueEvent, WireRequest};

/// Receives inbound traffic in wire order per channel.
///
/// Called from channel tasks; implementations must not block.
pub trait EventSink: Send + Sync + 'static {
    /// A sequenced event passed epoch and duplicate filtering.
    fn on_event(&self, channel: ChannelHandle, event: VenueEvent);

    /// Answer to a snapshot query issued in the current epoch.
    fn on_snapshot(&self, channel: ChannelHandle, snapshot: ServerSnapshot);

    /// A request buffered while disconnected was written to the new link.
    fn on_replayed(&self, channel: ChannelHandle, request: &WireRequest);

    fn on_connected(&self, _channel: ChannelHandle) {}

    fn on_disconnected(&self, _channel: ChannelHandle) {}
}

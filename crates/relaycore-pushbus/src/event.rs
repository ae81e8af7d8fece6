//! Events fanned out on the bus and the narrow set of messages a
//! subscriber is allowed to send back (spec §4.7: "Inbound messages from
//! subscribers are limited to subscribe/unsubscribe/ping").

use relaycore_model::{MetricSample, TunnelId, TunnelState};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PushEvent {
    StateChanged { tunnel_id: TunnelId, state: TunnelState },
    MetricsUpdate(MetricSample),
    /// Heartbeat probe sent to an idle subscriber (spec §4.7: every 54s).
    Heartbeat,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundMessage {
    Subscribe,
    Unsubscribe,
    Ping,
}

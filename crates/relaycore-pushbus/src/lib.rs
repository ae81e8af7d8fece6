//! Push Bus (C7): fan-out of tunnel-state and metric events to
//! authenticated subscribers, with per-subscriber backpressure and
//! stale-connection reaping.

mod bus;
mod error;
mod event;

pub use bus::{PushBus, SubscriptionHandle, HEARTBEAT_PERIOD, SUBSCRIBER_CHANNEL_DEPTH};
pub use error::{PushBusError, PushBusResult};
pub use event::{InboundMessage, PushEvent};

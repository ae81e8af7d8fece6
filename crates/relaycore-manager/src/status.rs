use chrono::{DateTime, Utc};
use relaycore_model::{Counters, MetricSample, TunnelState};

/// Result of the `status(id)` operation (spec §4.5).
#[derive(Debug, Clone)]
pub struct TunnelStatus {
    pub state: TunnelState,
    pub last_ping: Option<DateTime<Utc>>,
    pub counters: Counters,
    /// Most recent Metrics Collector sample, if any has been taken yet.
    pub performance: Option<MetricSample>,
}

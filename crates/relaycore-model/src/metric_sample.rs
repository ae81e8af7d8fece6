//! A single Metrics Collector sample (spec §4.6), appended to durable
//! history and published on the Push Bus.

use crate::ids::TunnelId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricSample {
    pub tunnel_id: TunnelId,
    pub taken_at: DateTime<Utc>,
    pub bytes_in: u64,
    pub bytes_out: u64,
    pub connection_count: u64,
    pub last_ping: Option<DateTime<Utc>>,
    /// Derived: (bytes_in + bytes_out) delta since the previous sample,
    /// divided by the sample interval in seconds.
    pub bytes_per_second: f64,
    /// Derived: whether the instance answered a ping within this interval.
    pub live: bool,
}

//! Shared data model for the tunnel core: records, state machine, quotas
//! and the error-kind taxonomy every other crate's error type plugs into.

mod atomic_counters;
mod error;
mod ids;
mod metric_sample;
mod quota;
mod transport;
mod tunnel;

pub use atomic_counters::AtomicCounters;
pub use error::ErrorKind;
pub use ids::{OwnerId, TunnelId};
pub use metric_sample::MetricSample;
pub use quota::{Quota, Role, UserRecord};
pub use transport::{MuxParams, TlsParams, TlsVersion, Transport};
pub use tunnel::{Counters, Endpoint, TunnelRecord, TunnelState};

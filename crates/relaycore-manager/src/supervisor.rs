//! Manager-internal orchestration state for one running tunnel. Separate
//! from [`relaycore_registry::DataPlaneInstance`]: the registry only
//! records the instance fields spec §3 names (tunnel id, started-at,
//! last-ping, counters, acceptor handle); the cancellation token and
//! task bookkeeping needed to drive start/stop belong to the Manager,
//! which is the only component allowed to start or stop instances
//! (spec §4.4: "the registry does not start or stop instances").

use std::sync::Arc;
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;

pub(crate) struct Supervisor {
    pub(crate) cancel: CancellationToken,
    pub(crate) accept_task: JoinHandle<()>,
    /// Tracks every spawned relay (or UDP forwarder) task for this
    /// tunnel so stop can wait for drain and force-abort on timeout.
    pub(crate) relay_tasks: Arc<AsyncMutex<JoinSet<()>>>,
}

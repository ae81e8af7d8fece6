use std::time::Duration;

/// Not hard-coded: constructed by the composition root from CLI flags/env.
#[derive(Debug, Clone, Copy)]
pub struct ManagerConfig {
    /// Spec §4.5/§5: "wait up to 10 seconds for the accept loop and all
    /// active relays to drain; force-close on timeout."
    pub stop_grace: Duration,
    /// Spec §5: "Global shutdown cancels all tokens and waits up to 30
    /// seconds for quiescence before force-close."
    pub global_shutdown_grace: Duration,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            stop_grace: Duration::from_secs(10),
            global_shutdown_grace: Duration::from_secs(30),
        }
    }
}

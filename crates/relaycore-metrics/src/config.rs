use std::time::Duration;

/// Not hard-coded (spec §9 open question): constructed by the composition
/// root from CLI flags/env.
#[derive(Debug, Clone, Copy)]
pub struct MetricsConfig {
    /// Sample interval (spec §4.6: "every 10 seconds").
    pub sample_interval: Duration,
    /// History retention window (spec §4.6: "older than 30 days").
    pub retention: chrono::Duration,
    /// Retention GC cadence (spec §4.6: "once an hour").
    pub retention_check_interval: Duration,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            sample_interval: Duration::from_secs(10),
            retention: chrono::Duration::days(30),
            retention_check_interval: Duration::from_secs(3600),
        }
    }
}

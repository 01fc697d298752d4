use serde::Deserialize;

/// Tuning knobs for the `TaskScheduler`.
///
/// Every field has a default, so a partial JSON object is a valid config.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Lower bound on the worker count of each of the small and large pools.
    pub min_threads_per_pool: usize,
    /// Cores reserved for named threads (the main thread) when sizing pools.
    pub named_threads: usize,
    /// Worker threads are named `<prefix>-<category>-<index>`.
    pub thread_name_prefix: String,
    /// A frame barrier wait longer than this is logged.
    pub barrier_warn_threshold_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            min_threads_per_pool: 2,
            named_threads: 1,
            thread_name_prefix: "frame-engine".to_string(),
            barrier_warn_threshold_ms: 16,
        }
    }
}

impl SchedulerConfig {
    /// Worker count for each pool: the free cores, but never fewer than the minimum.
    pub fn threads_per_pool(&self, cpu_cores: usize) -> usize {
        cpu_cores
            .saturating_sub(self.named_threads)
            .max(self.min_threads_per_pool)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pools_reserve_the_main_thread_core() {
        let config = SchedulerConfig::default();
        assert_eq!(config.threads_per_pool(8), 7);
        assert_eq!(config.threads_per_pool(3), 2);
        assert_eq!(config.threads_per_pool(1), 2);
        assert_eq!(config.threads_per_pool(0), 2);
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let config: SchedulerConfig =
            serde_json::from_str(r#"{ "min_threads_per_pool": 4 }"#).unwrap();
        assert_eq!(config.min_threads_per_pool, 4);
        assert_eq!(config.named_threads, 1);
        assert_eq!(config.thread_name_prefix, "frame-engine");
    }
}

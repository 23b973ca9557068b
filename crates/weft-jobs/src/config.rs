use serde::{Deserialize, Serialize};

use crate::error::SchedulerError;

/// Configuration for the worker pool.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Number of worker threads. `None` uses the available parallelism.
    pub worker_threads: Option<usize>,
    /// Worker threads are named `{prefix}-{index}`.
    pub thread_name_prefix: String,
    /// Stack size per worker in bytes. `None` keeps rayon's default.
    pub stack_size: Option<usize>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            worker_threads: None,
            thread_name_prefix: "weft-worker".into(),
            stack_size: None,
        }
    }
}

impl SchedulerConfig {
    /// A config with a fixed number of workers.
    pub fn with_workers(workers: usize) -> Self {
        Self {
            worker_threads: Some(workers),
            ..Self::default()
        }
    }

    /// The worker count this config resolves to on the current machine.
    pub fn resolved_workers(&self) -> Result<usize, SchedulerError> {
        match self.worker_threads {
            Some(0) => Err(SchedulerError::InvalidConfig(
                "worker_threads must be at least 1".into(),
            )),
            Some(n) => Ok(n),
            None => Ok(std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_workers_rejected() {
        let config = SchedulerConfig::with_workers(0);
        assert!(matches!(
            config.resolved_workers(),
            Err(SchedulerError::InvalidConfig(_))
        ));
    }

    #[test]
    fn default_uses_available_parallelism() {
        assert!(SchedulerConfig::default().resolved_workers().unwrap() >= 1);
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let config: SchedulerConfig = toml::from_str("worker_threads = 3").unwrap();
        assert_eq!(config.worker_threads, Some(3));
        assert_eq!(config.thread_name_prefix, "weft-worker");
        assert!(config.stack_size.is_none());
    }
}

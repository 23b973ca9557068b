use std::path::Path;

use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};
use weft_driver::ContextRegistry;
use weft_jobs::{BatchStrategy, SchedulerConfig};

use crate::cli::Overrides;

/// Shape of a timer simulation.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    pub drivers: usize,
    /// Child drivers under each top-level driver. Children own no timers;
    /// they only receive their parent's cancellation requests.
    pub children: usize,
    pub timers: usize,
    pub passes: u64,
    pub min_ticks: u32,
    pub max_ticks: u32,
    /// Every n-th timer of each driver is cancelled. 0 disables.
    pub cancel_every: usize,
    pub seed: u64,
    pub batch: BatchStrategy,
    pub scheduler: SchedulerConfig,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            drivers: 4,
            children: 1,
            timers: 1_000,
            passes: 16,
            min_ticks: 1,
            max_ticks: 12,
            cancel_every: 10,
            seed: 7,
            batch: BatchStrategy::MaximizeThreads,
            scheduler: SchedulerConfig::default(),
        }
    }
}

impl SimConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
        toml::from_str(&text).with_context(|| format!("parsing {}", path.display()))
    }

    /// Load the file named in `overrides` (or the defaults), apply the
    /// command-line values, and validate the result.
    pub fn resolve(overrides: &Overrides) -> anyhow::Result<Self> {
        let mut config = match &overrides.config {
            Some(path) => Self::load(path)?,
            None => Self::default(),
        };
        if let Some(drivers) = overrides.drivers {
            config.drivers = drivers;
        }
        if let Some(children) = overrides.children {
            config.children = children;
        }
        if let Some(timers) = overrides.timers {
            config.timers = timers;
        }
        if let Some(passes) = overrides.passes {
            config.passes = passes;
        }
        if let Some(workers) = overrides.workers {
            config.scheduler.worker_threads = Some(workers);
        }
        if let Some(cancel_every) = overrides.cancel_every {
            config.cancel_every = cancel_every;
        }
        if let Some(seed) = overrides.seed {
            config.seed = seed;
        }
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.drivers == 0 {
            bail!("at least one driver is required");
        }
        let contexts = self.drivers * (1 + self.children);
        if contexts > ContextRegistry::CAPACITY {
            bail!(
                "{} drivers with {} children each need {contexts} contexts; at most {} are available",
                self.drivers,
                self.children,
                ContextRegistry::CAPACITY
            );
        }
        if self.min_ticks == 0 || self.min_ticks > self.max_ticks {
            bail!("timer ticks must satisfy 1 <= min_ticks <= max_ticks");
        }
        self.scheduler
            .resolved_workers()
            .context("invalid scheduler configuration")?;
        Ok(())
    }

    pub fn to_toml(&self) -> anyhow::Result<String> {
        toml::to_string_pretty(self).context("serializing configuration")
    }
}

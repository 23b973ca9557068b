use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "weft",
    about = "weft: lane-parallel instance streams with declarative resource scheduling",
    version,
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,
}

#[derive(Clone, Copy, Debug, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run a timer workload through a task system
    Simulate(SimulateArgs),
    /// Print the effective simulation configuration as TOML
    Config(ConfigArgs),
}

/// Overrides applied on top of the configuration file.
#[derive(Args, Clone, Debug, Default)]
pub struct Overrides {
    /// TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,
    /// Number of top-level drivers
    #[arg(long)]
    pub drivers: Option<usize>,
    /// Child drivers under each top-level driver
    #[arg(long)]
    pub children: Option<usize>,
    /// Timers seeded by each top-level driver
    #[arg(long)]
    pub timers: Option<usize>,
    /// Passes to run
    #[arg(long)]
    pub passes: Option<u64>,
    /// Worker threads (defaults to available parallelism)
    #[arg(long)]
    pub workers: Option<usize>,
    /// Cancel every n-th timer (0 disables cancellation)
    #[arg(long)]
    pub cancel_every: Option<usize>,
    /// Seed for timer durations
    #[arg(long)]
    pub seed: Option<u64>,
}

#[derive(Args)]
pub struct SimulateArgs {
    #[command(flatten)]
    pub overrides: Overrides,
}

#[derive(Args)]
pub struct ConfigArgs {
    #[command(flatten)]
    pub overrides: Overrides,
}

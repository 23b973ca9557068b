use colored::Colorize;

use crate::cli::*;
use crate::config::SimConfig;
use crate::sim::{self, SimReport};

pub fn run_command(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Command::Simulate(args) => cmd_simulate(args, cli.format),
        Command::Config(args) => cmd_config(args, cli.format),
    }
}

fn cmd_simulate(args: SimulateArgs, format: OutputFormat) -> anyhow::Result<()> {
    let config = SimConfig::resolve(&args.overrides)?;
    let report = sim::run(&config)?;
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
        OutputFormat::Text => print_report(&report),
    }
    Ok(())
}

fn print_report(report: &SimReport) {
    let top_level = report.drivers.iter().filter(|d| d.parent.is_none()).count();
    println!(
        "{} Ran {} passes over {} drivers on {} workers in {} ms",
        "✓".green().bold(),
        report.passes.to_string().bold(),
        top_level,
        report.workers,
        report.elapsed_ms
    );
    println!("  Started:    {}", report.started.to_string().bold());
    println!("  Completed:  {}", report.completed.to_string().green());
    println!("  Cancelled:  {}", report.cancelled.to_string().yellow());
    println!("  Unfinished: {}", report.unfinished.to_string().dimmed());
    println!();

    for driver in &report.drivers {
        match driver.parent {
            None => println!(
                "  {} (ctx {})  started {}  completed {}  cancelled {}/{} requested",
                driver.name.cyan().bold(),
                driver.context,
                driver.started,
                driver.completed.to_string().green(),
                driver.cancelled.to_string().yellow(),
                driver.cancel_requests
            ),
            Some(parent) => println!(
                "    {} (ctx {}, parent {})  received {} requests",
                driver.name.cyan(),
                driver.context,
                parent,
                driver.requests_seen
            ),
        }
    }
}

fn cmd_config(args: ConfigArgs, format: OutputFormat) -> anyhow::Result<()> {
    let config = SimConfig::resolve(&args.overrides)?;
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&config)?),
        OutputFormat::Text => print!("{}", config.to_toml()?),
    }
    Ok(())
}

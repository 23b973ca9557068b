//! Timer simulation.
//!
//! Each top-level driver seeds timers into one system-wide task stream and
//! asks to cancel every n-th of them. The system's update ledger counts
//! timers down and resolves finished ones back to the driver that started
//! them; its cancel ledger reports the cancelled ones. Each driver collects
//! its results into a shared report. Child drivers record how many of
//! their parent's requests reached them.

use std::collections::BTreeMap;
use std::time::Instant;

use anyhow::Context;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use tracing::info;
use weft_access::{AccessControlledValue, AccessType};
use weft_driver::{TaskDriver, TaskSystem};
use weft_jobs::{JobHandle, JobScheduler};
use weft_ledger::{
    cancel_ledger, update_ledger, RequirementKey, RequirementLedger, SingleJob, TaskCanceller, TaskUpdater, Usage,
};
use weft_stream::{InstanceStream, ResolveTargets, TaskStream};
use weft_types::{DriverContext, Instance, OwnerKey};

use crate::config::SimConfig;

#[derive(Clone, Copy, Debug)]
pub struct Timer {
    pub ticks: u32,
    pub remaining: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TimerOutcome {
    Completed { ticks: u32 },
    Cancelled { remaining: u32 },
}

#[derive(Clone, Debug, Serialize)]
pub struct DriverReport {
    pub name: String,
    pub context: DriverContext,
    pub parent: Option<DriverContext>,
    pub started: u64,
    pub cancel_requests: u64,
    pub completed: u64,
    pub cancelled: u64,
    /// Cancellation requests seen in this driver's lookup, summed over passes.
    pub requests_seen: u64,
}

impl DriverReport {
    fn new(name: &str, context: DriverContext, parent: Option<DriverContext>) -> Self {
        Self {
            name: name.to_string(),
            context,
            parent,
            started: 0,
            cancel_requests: 0,
            completed: 0,
            cancelled: 0,
            requests_seen: 0,
        }
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct SimReport {
    pub passes: u64,
    pub workers: usize,
    pub elapsed_ms: u128,
    pub started: u64,
    pub completed: u64,
    pub cancelled: u64,
    /// Timers still counting down, plus results not yet collected.
    pub unfinished: u64,
    pub drivers: Vec<DriverReport>,
}

type Reports = AccessControlledValue<BTreeMap<DriverContext, DriverReport>>;

/// Build the system described by `config`, run it, and report.
pub fn run(config: &SimConfig) -> anyhow::Result<SimReport> {
    let scheduler = JobScheduler::new(config.scheduler.clone()).context("starting job scheduler")?;
    let mut system = TaskSystem::new("timers", scheduler.lane_count());
    let timers = system.create_task_stream::<Timer>("timers")?;
    let reports: Reports = AccessControlledValue::new("reports", BTreeMap::new());
    let mut targets = ResolveTargets::new("timer-results");

    for d in 0..config.drivers {
        let driver = system.create_driver(&format!("driver-{d}"))?;
        build_driver(driver, config, &timers, &reports, &mut targets)?;
    }

    let update = update_ledger(
        "timers:update",
        &timers,
        system.cancel_requests(),
        &targets,
        config.batch,
        |timer: &Timer, task: &TaskUpdater<'_, Timer, TimerOutcome>| {
            if timer.remaining <= 1 {
                task.resolve(TimerOutcome::Completed { ticks: timer.ticks })
            } else {
                task.continue_with(Timer {
                    remaining: timer.remaining - 1,
                    ..*timer
                })
            }
        },
    )?;
    let cancel = cancel_ledger(
        "timers:cancel",
        &timers,
        &targets,
        config.batch,
        |timer: &Timer, task: &TaskCanceller<'_, TimerOutcome>| {
            task.resolve(TimerOutcome::Cancelled {
                remaining: timer.remaining,
            })
        },
    )?;
    system.add_ledger(update)?;
    system.add_ledger(cancel)?;
    system.harden()?;

    let start = Instant::now();
    let mut token = JobHandle::completed();
    for _ in 0..config.passes {
        token = system.run_pass(&token, &scheduler)?;
        token.wait().with_context(|| format!("pass {} failed", system.pass_count()))?;
    }
    let elapsed_ms = start.elapsed().as_millis();

    let drivers: Vec<DriverReport> = reports.with_read(|r| r.values().cloned().collect())?;
    system.dispose()?;

    let started = drivers.iter().map(|d| d.started).sum::<u64>();
    let completed = drivers.iter().map(|d| d.completed).sum::<u64>();
    let cancelled = drivers.iter().map(|d| d.cancelled).sum::<u64>();
    let report = SimReport {
        passes: config.passes,
        workers: scheduler.worker_count(),
        elapsed_ms,
        started,
        completed,
        cancelled,
        unfinished: started.saturating_sub(completed + cancelled),
        drivers,
    };
    info!(
        passes = report.passes,
        started = report.started,
        completed = report.completed,
        cancelled = report.cancelled,
        "simulation finished"
    );
    Ok(report)
}

fn build_driver(
    driver: &mut TaskDriver,
    config: &SimConfig,
    timers: &TaskStream<Timer>,
    reports: &Reports,
    targets: &mut ResolveTargets<TimerOutcome>,
) -> anyhow::Result<()> {
    let context = driver.context();
    let name = driver.name().to_string();
    let results = driver.create_stream::<Instance<TimerOutcome>>("results")?;
    targets.register(context, results.clone());

    driver.add_ledger(seed_ledger(&name, context, config, timers, reports)?)?;
    if config.cancel_every > 0 {
        let requests = cancel_request_ledger(&name, context, config, driver, reports)?;
        driver.add_ledger(requests)?;
    }
    driver.add_ledger(collect_ledger(&name, context, &results, reports)?)?;

    for c in 0..config.children {
        let child = driver.create_child(&format!("{name}.{c}"))?;
        let child_name = child.name().to_string();
        let child_context = child.context();
        let watch = watch_ledger(&child_name, child_context, child, reports)?;
        child.add_ledger(watch)?;
        register_report(reports, &child_name, child_context, Some(context))?;
    }
    register_report(reports, &name, context, None)
}

fn register_report(
    reports: &Reports,
    name: &str,
    context: DriverContext,
    parent: Option<DriverContext>,
) -> anyhow::Result<()> {
    let (grant, view) = reports.acquire_async(AccessType::ExclusiveWrite)?;
    grant.dependency().wait()?;
    view.write()?.insert(context, DriverReport::new(name, context, parent));
    grant.release(&JobHandle::completed());
    Ok(())
}

/// Seed this driver's timers on the first pass.
fn seed_ledger(
    name: &str,
    context: DriverContext,
    config: &SimConfig,
    timers: &TaskStream<Timer>,
    reports: &Reports,
) -> anyhow::Result<RequirementLedger> {
    let count = config.timers;
    let (min, max) = (config.min_ticks, config.max_ticks);
    let seed = config.seed ^ u64::from(context.raw());
    let label = format!("{name}:seed");

    let job = label.clone();
    let binding = SingleJob::new(label.clone(), move |data, ctx| {
        let writer = data.task_writer::<Timer>().map_err(|e| e.into_job_error(&job))?;
        let report = data
            .value::<BTreeMap<DriverContext, DriverReport>>(Usage::ExclusiveWrite)
            .map_err(|e| e.into_job_error(&job))?;
        let mut rng = StdRng::seed_from_u64(seed);
        let seeded = (0..count).map(|n| {
            let ticks = rng.gen_range(min..=max);
            Instance::new(OwnerKey(n as u64), context, Timer { ticks, remaining: ticks })
        });
        writer
            .append_all(ctx.lane(), seeded)
            .map_err(|e| e.into_job_error(&job))?;
        let mut report = report.write().map_err(|_| ctx.fail("reports poisoned"))?;
        if let Some(entry) = report.get_mut(&context) {
            entry.started += count as u64;
        }
        Ok(())
    })
    .expecting(RequirementKey::of::<TaskStream<Timer>>(Usage::Write));

    let mut ledger = RequirementLedger::new(label, context, binding).run_once();
    ledger
        .require_task_stream_for_write(timers)?
        .require_value(reports, Usage::ExclusiveWrite)?;
    Ok(ledger)
}

/// Ask to cancel every n-th timer on the first pass.
fn cancel_request_ledger(
    name: &str,
    context: DriverContext,
    config: &SimConfig,
    driver: &TaskDriver,
    reports: &Reports,
) -> anyhow::Result<RequirementLedger> {
    let every = config.cancel_every;
    let count = config.timers;
    let label = format!("{name}:cancel-requests");

    let job = label.clone();
    let binding = SingleJob::new(label.clone(), move |data, ctx| {
        let writer = data.cancel_writer().map_err(|e| e.into_job_error(&job))?;
        let report = data
            .value::<BTreeMap<DriverContext, DriverReport>>(Usage::ExclusiveWrite)
            .map_err(|e| e.into_job_error(&job))?;
        let mut requested = 0u64;
        for n in (0..count).step_by(every) {
            writer
                .request_cancel(ctx.lane(), OwnerKey(n as u64))
                .map_err(|e| e.into_job_error(&job))?;
            requested += 1;
        }
        let mut report = report.write().map_err(|_| ctx.fail("reports poisoned"))?;
        if let Some(entry) = report.get_mut(&context) {
            entry.cancel_requests += requested;
        }
        Ok(())
    });

    let mut ledger = RequirementLedger::new(label, context, binding).run_once();
    ledger
        .require_cancel_requests_for_write(driver.cancel_requests())?
        .require_value(reports, Usage::ExclusiveWrite)?;
    Ok(ledger)
}

/// Tally the results resolved back to this driver.
fn collect_ledger(
    name: &str,
    context: DriverContext,
    results: &InstanceStream<Instance<TimerOutcome>>,
    reports: &Reports,
) -> anyhow::Result<RequirementLedger> {
    let label = format!("{name}:collect");
    let job = label.clone();
    let binding = SingleJob::new(label.clone(), move |data, ctx| {
        let results = data
            .stream_reader::<Instance<TimerOutcome>>()
            .and_then(|r| Ok(r.current()?))
            .map_err(|e| e.into_job_error(&job))?;
        if results.is_empty() {
            return Ok(());
        }
        let (completed, cancelled) = results.iter().fold((0u64, 0u64), |(done, gone), r| match r.payload {
            TimerOutcome::Completed { .. } => (done + 1, gone),
            TimerOutcome::Cancelled { .. } => (done, gone + 1),
        });
        let report = data
            .value::<BTreeMap<DriverContext, DriverReport>>(Usage::ExclusiveWrite)
            .map_err(|e| e.into_job_error(&job))?;
        let mut report = report.write().map_err(|_| ctx.fail("reports poisoned"))?;
        if let Some(entry) = report.get_mut(&context) {
            entry.completed += completed;
            entry.cancelled += cancelled;
        }
        Ok(())
    })
    .expecting(RequirementKey::of::<InstanceStream<Instance<TimerOutcome>>>(Usage::Read));

    let mut ledger = RequirementLedger::new(label, context, binding);
    ledger
        .require_stream_for_read(results)?
        .require_value(reports, Usage::ExclusiveWrite)?;
    Ok(ledger)
}

/// Record how many requests reached a child driver's lookup each pass.
fn watch_ledger(
    name: &str,
    context: DriverContext,
    child: &TaskDriver,
    reports: &Reports,
) -> anyhow::Result<RequirementLedger> {
    let label = format!("{name}:watch");
    let job = label.clone();
    let binding = SingleJob::new(label.clone(), move |data, ctx| {
        let seen = data
            .cancel_reader()
            .and_then(|r| Ok(r.len()?))
            .map_err(|e| e.into_job_error(&job))?;
        if seen == 0 {
            return Ok(());
        }
        let report = data
            .value::<BTreeMap<DriverContext, DriverReport>>(Usage::ExclusiveWrite)
            .map_err(|e| e.into_job_error(&job))?;
        let mut report = report.write().map_err(|_| ctx.fail("reports poisoned"))?;
        if let Some(entry) = report.get_mut(&context) {
            entry.requests_seen += seen as u64;
        }
        Ok(())
    });

    let mut ledger = RequirementLedger::new(label, context, binding);
    ledger
        .require_cancel_requests_for_read(child.cancel_requests())?
        .require_value(reports, Usage::ExclusiveWrite)?;
    Ok(ledger)
}

#[cfg(test)]
mod tests {
    use super::*;
    use weft_jobs::SchedulerConfig;

    fn small(cancel_every: usize) -> SimConfig {
        SimConfig {
            drivers: 3,
            children: 2,
            timers: 200,
            passes: 20,
            min_ticks: 1,
            max_ticks: 5,
            cancel_every,
            scheduler: SchedulerConfig::with_workers(2),
            ..SimConfig::default()
        }
    }

    #[test]
    fn every_timer_finishes_given_enough_passes() {
        let report = run(&small(0)).unwrap();
        assert_eq!(report.started, 600);
        assert_eq!(report.completed, 600);
        assert_eq!(report.cancelled, 0);
        assert_eq!(report.unfinished, 0);
    }

    #[test]
    fn requested_timers_are_cancelled_not_completed() {
        let report = run(&small(10)).unwrap();
        // Requests reach the system the pass after seeding, before any
        // timer can finish.
        assert_eq!(report.cancelled, 3 * 20);
        assert_eq!(report.completed, 600 - 60);

        let children: Vec<_> = report.drivers.iter().filter(|d| d.parent.is_some()).collect();
        assert_eq!(children.len(), 6);
        assert!(children.iter().all(|c| c.requests_seen == 20 && c.started == 0));
        let parents: Vec<_> = report.drivers.iter().filter(|d| d.parent.is_none()).collect();
        assert!(parents.iter().all(|p| p.cancel_requests == 20 && p.cancelled == 20));
    }
}

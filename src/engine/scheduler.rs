//! Cycle scheduler.
//!
//! Fires a cycle at each configured local time of day. Exactly one cycle
//! runs at a time: the scheduler is `Idle` or `Running`, and a trigger that
//! arrives while `Running` is dropped. A failed (or panicking) cycle is
//! logged and the scheduler returns to `Idle`. Shutdown is only observed
//! between cycles.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{Local, NaiveDateTime, NaiveTime, Timelike};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use super::cycle::CycleReport;
use crate::types::TradeError;

/// Something the scheduler can run.
#[async_trait]
pub trait Cycle: Send + Sync + 'static {
    async fn run(&self) -> Result<CycleReport, TradeError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    Running,
}

/// Result of one trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FireResult {
    Completed,
    Failed,
    /// A cycle was already running; this trigger did nothing.
    Dropped,
}

// ---------------------------------------------------------------------------
// Trigger times
// ---------------------------------------------------------------------------

/// Daily trigger times in local time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TriggerSchedule {
    times: Vec<NaiveTime>,
}

impl TriggerSchedule {
    /// Parse `HH:MM` or `HH:MM:SS` entries. Duplicates collapse.
    pub fn parse<S: AsRef<str>>(entries: &[S]) -> Result<Self> {
        let mut times = entries
            .iter()
            .map(|e| {
                let e = e.as_ref().trim();
                NaiveTime::parse_from_str(e, "%H:%M:%S")
                    .or_else(|_| NaiveTime::parse_from_str(e, "%H:%M"))
                    .with_context(|| format!("Invalid trigger time {e:?} (expected HH:MM)"))
            })
            .collect::<Result<Vec<_>>>()?;

        if times.is_empty() {
            anyhow::bail!("Schedule has no trigger times");
        }
        times.sort();
        times.dedup();
        Ok(Self { times })
    }

    pub fn times(&self) -> &[NaiveTime] {
        &self.times
    }

    /// First trigger strictly after `now`, rolling over to tomorrow.
    pub fn next_after(&self, now: NaiveDateTime) -> NaiveDateTime {
        let today = now.date();
        let current = now.time();
        match self.times.iter().find(|t| **t > current) {
            Some(t) => today.and_time(*t),
            None => {
                let tomorrow = today.succ_opt().unwrap_or(today);
                tomorrow.and_time(self.times[0])
            }
        }
    }
}

impl std::fmt::Display for TriggerSchedule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let list: Vec<String> = self
            .times
            .iter()
            .map(|t| format!("{:02}:{:02}", t.hour(), t.minute()))
            .collect();
        write!(f, "{}", list.join(", "))
    }
}

// ---------------------------------------------------------------------------
// Scheduler
// ---------------------------------------------------------------------------

/// Source of local wall-clock time.
pub type Clock = Arc<dyn Fn() -> NaiveDateTime + Send + Sync>;

fn local_clock() -> Clock {
    Arc::new(|| Local::now().naive_local())
}

/// Clears the running flag when dropped. Owned by the task running the
/// cycle, so the flag outlives a cancelled `fire`.
struct RunningGuard(Arc<AtomicBool>);

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

pub struct Scheduler<C: Cycle> {
    cycle: Arc<C>,
    running: Arc<AtomicBool>,
    schedule: TriggerSchedule,
    poll_interval: Duration,
    clock: Clock,
}

impl<C: Cycle> Scheduler<C> {
    pub fn new(cycle: Arc<C>, schedule: TriggerSchedule, poll_interval: Duration) -> Self {
        Self {
            cycle,
            running: Arc::new(AtomicBool::new(false)),
            schedule,
            poll_interval,
            clock: local_clock(),
        }
    }

    /// Replace the wall clock used to decide when a trigger is due.
    pub fn with_clock<F>(mut self, clock: F) -> Self
    where
        F: Fn() -> NaiveDateTime + Send + Sync + 'static,
    {
        self.clock = Arc::new(clock);
        self
    }

    pub fn state(&self) -> SchedulerState {
        if self.running.load(Ordering::SeqCst) {
            SchedulerState::Running
        } else {
            SchedulerState::Idle
        }
    }

    /// Trigger one cycle: run it to completion if `Idle`, drop the trigger
    /// if `Running`. Dropping the returned future leaves the cycle running,
    /// and the scheduler stays `Running` until it ends.
    pub async fn fire(&self) -> FireResult {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            warn!("Trigger fired while a cycle is running — dropped");
            return FireResult::Dropped;
        }
        let guard = RunningGuard(Arc::clone(&self.running));

        // Separate task so a panic inside the cycle surfaces as a JoinError.
        // The guard lives in the task, so the flag clears when the cycle
        // ends, not when this future is dropped.
        let cycle = Arc::clone(&self.cycle);
        let task = tokio::spawn(async move {
            let _guard = guard;
            cycle.run().await
        });
        match task.await {
            Ok(Ok(_report)) => FireResult::Completed,
            Ok(Err(e)) => {
                error!(kind = e.kind(), error = %e, "Cycle failed — continuing");
                FireResult::Failed
            }
            Err(e) => {
                error!(error = %e, "Cycle panicked — continuing");
                FireResult::Failed
            }
        }
    }

    /// Poll the clock until `shutdown` resolves, firing a cycle whenever a
    /// trigger time has passed.
    pub async fn run_until<F>(&self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        let mut next_due = self.schedule.next_after((self.clock)());
        info!(
            triggers = %self.schedule,
            next = %next_due,
            poll_secs = self.poll_interval.as_secs(),
            "Scheduler started"
        );

        let mut interval = tokio::time::interval(self.poll_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let now = (self.clock)();
                    if now < next_due {
                        continue;
                    }
                    info!(due = %next_due, "Trigger time reached");
                    self.fire().await;
                    next_due = self.schedule.next_after((self.clock)());
                    info!(next = %next_due, "Next cycle scheduled");
                }
                _ = &mut shutdown => {
                    info!("Shutdown signal received.");
                    break;
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

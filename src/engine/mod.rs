//! Core engine: the collect → decide → size → execute → persist cycle and
//! the scheduler that drives it.

pub mod collector;
pub mod cycle;
pub mod executor;
pub mod scheduler;

pub use cycle::{CycleConfig, CycleReport, TradingCycle};
pub use scheduler::{Clock, Cycle, FireResult, Scheduler, SchedulerState, TriggerSchedule};

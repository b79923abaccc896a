pub mod collectors;
pub mod failure;
pub mod runner;
pub mod season_manager;

pub use collectors::{Collector, CycleContext};
pub use failure::{FailureRecord, FailureTracker, SourceStats};
pub use runner::{CycleResult, CycleRunner, CycleStatus, RunnerError, RunnerSettings, RunnerState};
pub use season_manager::{SeasonError, SeasonManager, SeasonTransition};

//! Cycle Runner
//!
//! Orchestrates collection cycles: resolve the active season, discover the
//! tracked models, fetch every source for every model on a small worker pool,
//! then hand each (model, source) batch to persistence.
//!
//! ## State machine
//! `Idle -> Collecting -> Persisting -> Idle`, with `Error` as a side state
//! that always falls back to `Idle`. A single cycle failing never stops the
//! runner.
//!
//! ## Non-overlap
//! Only one cycle runs at a time. `run_once` refuses to start while another
//! cycle holds the guard, and the continuous loop skips ticks that fire
//! while the previous cycle is still running.

use chrono::{DateTime, Utc};
use futures_util::stream::{self, StreamExt};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{watch, Mutex, OwnedMutexGuard};
use tokio::task::JoinHandle;
use tokio::time::{interval, timeout, MissedTickBehavior};
use tracing::{debug, error, info, info_span, warn, Instrument};

use super::collectors::{
    default_collectors, wait_for_shutdown, Collector, CycleContext, LeaderboardCollector,
};
use super::failure::{FailureRecord, FailureTracker, SourceStats};
use super::season_manager::{SeasonError, SeasonManager};
use crate::config::TrackerConfig;
use crate::domain::entities::{ModelRef, RawRecord, SourceKind};
use crate::domain::errors::{CollectError, CollectResult};
use crate::domain::repositories::PageSource;
use crate::persistence::DataPersistence;
use crate::rate_limit::SourceRateLimiter;
use crate::task_runner::RetryPolicy;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunnerState {
    Idle,
    Collecting,
    Persisting,
    Error,
}

#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("A collection cycle is already in progress")]
    CycleInProgress,

    #[error("Season resolution failed: {0}")]
    Season(#[from] SeasonError),

    #[error("Model discovery failed: {0}")]
    Discovery(CollectError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleStatus {
    /// Every source of every model succeeded
    Success,
    /// Some sources failed, at least one persisted data
    Partial,
    /// Nothing was persisted
    Failed,
    /// Shutdown arrived mid-cycle; only cleanly completed fetches were kept
    Cancelled,
}

impl CycleStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CycleStatus::Success => "success",
            CycleStatus::Partial => "partial",
            CycleStatus::Failed => "failed",
            CycleStatus::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for CycleStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Summary of one cycle
#[derive(Debug, Clone)]
pub struct CycleResult {
    pub cycle_id: u64,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub season: String,
    pub status: CycleStatus,
    pub models_succeeded: usize,
    pub models_failed: usize,
    pub sources: BTreeMap<SourceKind, SourceStats>,
    pub model_failures: BTreeMap<String, usize>,
    pub errors: Vec<FailureRecord>,
}

impl CycleResult {
    pub fn is_success(&self) -> bool {
        matches!(self.status, CycleStatus::Success | CycleStatus::Partial)
    }

    pub fn source(&self, kind: SourceKind) -> SourceStats {
        self.sources.get(&kind).copied().unwrap_or_default()
    }
}

/// Scheduling knobs taken from configuration
#[derive(Debug, Clone)]
pub struct RunnerSettings {
    pub season_label: String,
    pub max_models: usize,
    pub worker_pool_size: usize,
    pub model_fetch_timeout: Duration,
    pub cycle_timeout: Duration,
    pub shutdown_grace: Duration,
    pub chat_limit: usize,
    pub retry: RetryPolicy,
}

impl From<&TrackerConfig> for RunnerSettings {
    fn from(config: &TrackerConfig) -> Self {
        Self {
            season_label: config.season_label.clone(),
            max_models: config.max_models,
            worker_pool_size: config.worker_pool_size,
            model_fetch_timeout: config.model_fetch_timeout(),
            cycle_timeout: config.cycle_timeout(),
            shutdown_grace: config.shutdown_grace(),
            chat_limit: config.chat_limit,
            retry: config.retry_policy(),
        }
    }
}

/// Everything fetched for one model, in collector order
struct ModelHarvest {
    index: usize,
    model: ModelRef,
    results: Vec<(SourceKind, CollectResult<Vec<RawRecord>>)>,
}

/// Held for the duration of a cycle; returns the runner to `Idle` when
/// dropped, including when the cycle future is aborted
struct CycleGuard {
    _lock: OwnedMutexGuard<()>,
    state: Arc<watch::Sender<RunnerState>>,
}

impl Drop for CycleGuard {
    fn drop(&mut self) {
        self.state.send_replace(RunnerState::Idle);
    }
}

pub struct CycleRunner {
    source: Arc<dyn PageSource>,
    limiter: SourceRateLimiter,
    persistence: Arc<DataPersistence>,
    seasons: Arc<SeasonManager>,
    collectors: Vec<Arc<dyn Collector>>,
    settings: RunnerSettings,
    cycle_lock: Arc<Mutex<()>>,
    state: Arc<watch::Sender<RunnerState>>,
    cycle_seq: AtomicU64,
    skipped_ticks: AtomicU64,
}

impl CycleRunner {
    pub fn new(
        source: Arc<dyn PageSource>,
        limiter: SourceRateLimiter,
        persistence: Arc<DataPersistence>,
        seasons: Arc<SeasonManager>,
        settings: RunnerSettings,
    ) -> Self {
        let (state, _) = watch::channel(RunnerState::Idle);
        Self {
            source,
            limiter,
            persistence,
            seasons,
            collectors: default_collectors(),
            settings,
            cycle_lock: Arc::new(Mutex::new(())),
            state: Arc::new(state),
            cycle_seq: AtomicU64::new(0),
            skipped_ticks: AtomicU64::new(0),
        }
    }

    /// Replace the collector set (persistence order follows this order)
    pub fn with_collectors(mut self, collectors: Vec<Arc<dyn Collector>>) -> Self {
        self.collectors = collectors;
        self
    }

    pub fn state(&self) -> RunnerState {
        *self.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<RunnerState> {
        self.state.subscribe()
    }

    /// Ticks skipped because the previous cycle was still running
    pub fn skipped_ticks(&self) -> u64 {
        self.skipped_ticks.load(Ordering::Relaxed)
    }

    /// Execute exactly one collection cycle.
    ///
    /// # Errors
    /// `CycleInProgress` if another cycle is running; `Season` or `Discovery`
    /// when the cycle cannot start collecting. Source-level failures are
    /// reported in the returned `CycleResult`, not as errors.
    pub async fn run_once(
        &self,
        shutdown: watch::Receiver<bool>,
    ) -> Result<CycleResult, RunnerError> {
        let lock = self
            .cycle_lock
            .clone()
            .try_lock_owned()
            .map_err(|_| RunnerError::CycleInProgress)?;
        let _guard = CycleGuard {
            _lock: lock,
            state: self.state.clone(),
        };

        let cycle_id = self.cycle_seq.fetch_add(1, Ordering::Relaxed) + 1;
        let span = info_span!("cycle", id = cycle_id);

        let result = self.execute(cycle_id, shutdown).instrument(span).await;
        if result.is_err() {
            self.state.send_replace(RunnerState::Error);
        }
        result
    }

    async fn execute(
        &self,
        cycle_id: u64,
        shutdown: watch::Receiver<bool>,
    ) -> Result<CycleResult, RunnerError> {
        let started_at = Utc::now();
        let season = self
            .seasons
            .get_or_create_active(&self.settings.season_label)
            .await
            .map_err(|e| {
                error!("Cannot resolve season {}: {}", self.settings.season_label, e);
                e
            })?;

        self.state.send_replace(RunnerState::Collecting);
        info!("Cycle started for season {}", season.label);

        let ctx = CycleContext::new(
            self.source.clone(),
            self.limiter.clone(),
            self.settings.retry.clone(),
            shutdown,
            self.settings.chat_limit,
        );

        let models = LeaderboardCollector::discover(&ctx, self.settings.max_models)
            .await
            .map_err(|e| {
                error!(
                    source = %SourceKind::Leaderboard,
                    "Discovery failed, nothing collected this cycle: {}",
                    e
                );
                RunnerError::Discovery(e)
            })?;

        let pool_size = self.settings.worker_pool_size.max(1);
        let mut harvests: Vec<ModelHarvest> = stream::iter(models.into_iter().enumerate())
            .map(|(index, model)| self.harvest(index, model, &ctx))
            .buffer_unordered(pool_size)
            .collect()
            .await;
        harvests.sort_by_key(|h| h.index);

        self.state.send_replace(RunnerState::Persisting);
        let mut tracker = FailureTracker::new();
        let mut models_succeeded = 0;
        let mut models_failed = 0;

        for harvest in &harvests {
            let mut model_ok = true;
            for (kind, result) in &harvest.results {
                match result {
                    Ok(records) => {
                        tracker.fetch_succeeded(*kind);
                        match self.persistence.persist(&season, *kind, records).await {
                            Ok(outcome) => tracker.persisted(*kind, outcome),
                            Err(e) => {
                                tracker.persist_failed(*kind, &harvest.model, &e);
                                model_ok = false;
                            }
                        }
                    }
                    Err(e) => {
                        tracker.fetch_failed(*kind, &harvest.model, e);
                        model_ok = false;
                    }
                }
            }
            if model_ok {
                models_succeeded += 1;
            } else {
                models_failed += 1;
            }
        }

        let cancelled = harvests.iter().any(|h| {
            h.results
                .iter()
                .any(|(_, r)| matches!(r, Err(CollectError::Cancelled)))
        });
        let status = if cancelled {
            CycleStatus::Cancelled
        } else if !tracker.has_failures() {
            CycleStatus::Success
        } else if tracker.any_persisted() {
            CycleStatus::Partial
        } else {
            CycleStatus::Failed
        };

        let (sources, model_failures, errors) = tracker.into_parts();
        let result = CycleResult {
            cycle_id,
            started_at,
            finished_at: Utc::now(),
            season: season.label,
            status,
            models_succeeded,
            models_failed,
            sources,
            model_failures,
            errors,
        };
        log_summary(&result);
        Ok(result)
    }

    /// Run every collector for one model under the per-model time bound
    async fn harvest(&self, index: usize, model: ModelRef, ctx: &CycleContext) -> ModelHarvest {
        let bound = self.settings.model_fetch_timeout;
        let fetch_all = async {
            let mut results = Vec::with_capacity(self.collectors.len());
            for collector in &self.collectors {
                let result = collector.collect(&model, ctx).await;
                if let Ok(records) = &result {
                    debug!(
                        source = %collector.source(),
                        model = %model,
                        "Fetched {} records",
                        records.len()
                    );
                }
                results.push((collector.source(), result));
            }
            results
        };

        let results = match timeout(bound, fetch_all).await {
            Ok(results) => results,
            Err(_) => {
                warn!(
                    model = %model,
                    "Fetches did not finish within {:?}; discarding this model",
                    bound
                );
                self.collectors
                    .iter()
                    .map(|c| {
                        let err = CollectError::transient(format!("timed out after {:?}", bound));
                        (c.source(), Err(err))
                    })
                    .collect()
            }
        };

        ModelHarvest {
            index,
            model,
            results,
        }
    }

    /// Run cycles every `every` until `shutdown` flips to true.
    ///
    /// Each cycle is bounded by the cycle timeout. On shutdown no new cycle
    /// starts; the in-flight one gets the grace period and is then aborted.
    pub async fn run_continuous(self: Arc<Self>, every: Duration, shutdown: watch::Receiver<bool>) {
        info!("Continuous collection every {:?}", every);

        let mut ticker = interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut in_flight: Option<JoinHandle<()>> = None;

        loop {
            tokio::select! {
                biased;
                _ = wait_for_shutdown(shutdown.clone()) => {
                    info!("Shutdown requested; no new cycles will start");
                    break;
                }
                _ = ticker.tick() => {
                    if in_flight.as_ref().is_some_and(|h| !h.is_finished()) {
                        let skipped = self.skipped_ticks.fetch_add(1, Ordering::Relaxed) + 1;
                        warn!(
                            "Previous cycle still running; skipping tick ({} skipped so far)",
                            skipped
                        );
                        continue;
                    }
                    in_flight = Some(self.clone().spawn_cycle(shutdown.clone()));
                }
            }
        }

        if let Some(mut handle) = in_flight {
            if handle.is_finished() {
                return;
            }
            info!(
                "Waiting up to {:?} for the in-flight cycle",
                self.settings.shutdown_grace
            );
            if timeout(self.settings.shutdown_grace, &mut handle).await.is_err() {
                warn!("In-flight cycle did not finish within grace period; aborting");
                handle.abort();
            }
        }
    }

    fn spawn_cycle(self: Arc<Self>, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let bound = self.settings.cycle_timeout;
            match timeout(bound, self.run_once(shutdown)).await {
                Ok(Ok(_)) => {}
                Ok(Err(RunnerError::CycleInProgress)) => {
                    let skipped = self.skipped_ticks.fetch_add(1, Ordering::Relaxed) + 1;
                    warn!("Cycle already in progress; tick skipped ({} so far)", skipped);
                }
                Ok(Err(e)) => error!("Cycle failed: {}", e),
                Err(_) => error!("Cycle exceeded {:?} and was aborted", bound),
            }
        })
    }
}

fn log_summary(result: &CycleResult) {
    for (kind, stats) in &result.sources {
        debug!(
            source = %kind,
            "fetched_ok={} fetch_failed={} persist_failed={} inserted={} updated={} skipped={} failed={}",
            stats.fetched_ok,
            stats.fetch_failed,
            stats.persist_failed,
            stats.inserted,
            stats.updated,
            stats.skipped,
            stats.failed
        );
    }

    let elapsed = result.finished_at - result.started_at;
    let line = format!(
        "Cycle {} {} in {}ms: {} models ok, {} failed, {} errors",
        result.cycle_id,
        result.status,
        elapsed.num_milliseconds(),
        result.models_succeeded,
        result.models_failed,
        result.errors.len()
    );
    if result.is_success() {
        info!("{}", line);
    } else {
        warn!("{}", line);
    }
}

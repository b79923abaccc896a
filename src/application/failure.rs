//! Failure Handler
//!
//! Classifies what went wrong during a cycle and keeps the per-source and
//! per-model counts that end up in the cycle summary.

use std::collections::BTreeMap;
use tracing::warn;

use crate::domain::entities::{ModelRef, SourceKind};
use crate::domain::errors::{CollectError, FailureClass};
use crate::persistence::{PersistOutcome, PersistenceError};

/// Counters for one source over one cycle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SourceStats {
    /// Models whose fetch completed and parsed
    pub fetched_ok: usize,
    /// Models whose fetch failed
    pub fetch_failed: usize,
    /// Fetched batches that were rolled back or refused by persistence
    pub persist_failed: usize,
    pub inserted: usize,
    pub updated: usize,
    pub skipped: usize,
    /// Records rejected by persistence
    pub failed: usize,
}

impl SourceStats {
    pub fn persisted(&self) -> usize {
        self.inserted + self.updated + self.skipped
    }
}

/// One failure line for the cycle summary
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailureRecord {
    pub source: SourceKind,
    pub model: String,
    pub code: &'static str,
    pub message: String,
    pub class: FailureClass,
}

pub fn classify_persistence(error: &PersistenceError) -> FailureClass {
    match error {
        PersistenceError::Database(_) => FailureClass::Retryable,
        PersistenceError::Integrity { .. }
        | PersistenceError::KindMismatch { .. }
        | PersistenceError::SeasonNotActive { .. }
        | PersistenceError::Serialization(_) => FailureClass::NonRetryable,
    }
}

fn persistence_code(error: &PersistenceError) -> &'static str {
    match error {
        PersistenceError::Integrity { .. } => "ERR_INTEGRITY",
        PersistenceError::KindMismatch { .. } => "ERR_KIND_MISMATCH",
        PersistenceError::SeasonNotActive { .. } => "ERR_SEASON_NOT_ACTIVE",
        PersistenceError::Serialization(_) => "ERR_SERIALIZATION",
        PersistenceError::Database(_) => "ERR_DATABASE",
    }
}

/// Per-cycle failure bookkeeping
#[derive(Debug, Default)]
pub struct FailureTracker {
    sources: BTreeMap<SourceKind, SourceStats>,
    models: BTreeMap<String, usize>,
    errors: Vec<FailureRecord>,
}

impl FailureTracker {
    pub fn new() -> Self {
        let mut tracker = Self::default();
        for kind in SourceKind::ALL {
            tracker.sources.insert(kind, SourceStats::default());
        }
        tracker
    }

    pub fn fetch_succeeded(&mut self, source: SourceKind) {
        self.sources.entry(source).or_default().fetched_ok += 1;
    }

    pub fn fetch_failed(&mut self, source: SourceKind, model: &ModelRef, error: &CollectError) {
        match error.class() {
            FailureClass::Retryable => warn!(
                source = %source,
                model = %model,
                "Fetch failed after retries: {}",
                error
            ),
            FailureClass::NonRetryable => warn!(
                source = %source,
                model = %model,
                code = error.error_code(),
                "Skipping source for this cycle: {}",
                error
            ),
        }
        self.sources.entry(source).or_default().fetch_failed += 1;
        self.push(FailureRecord {
            source,
            model: model.name.clone(),
            code: error.error_code(),
            message: error.to_string(),
            class: error.class(),
        });
    }

    pub fn persisted(&mut self, source: SourceKind, outcome: PersistOutcome) {
        let stats = self.sources.entry(source).or_default();
        stats.inserted += outcome.inserted;
        stats.updated += outcome.updated;
        stats.skipped += outcome.skipped;
        stats.failed += outcome.failed;
    }

    pub fn persist_failed(
        &mut self,
        source: SourceKind,
        model: &ModelRef,
        error: &PersistenceError,
    ) {
        warn!(
            source = %source,
            model = %model,
            "Batch rolled back: {}",
            error
        );
        self.sources.entry(source).or_default().persist_failed += 1;
        self.push(FailureRecord {
            source,
            model: model.name.clone(),
            code: persistence_code(error),
            message: error.to_string(),
            class: classify_persistence(error),
        });
    }

    fn push(&mut self, record: FailureRecord) {
        *self.models.entry(record.model.clone()).or_default() += 1;
        self.errors.push(record);
    }

    pub fn failures_for(&self, model: &str) -> usize {
        self.models.get(model).copied().unwrap_or(0)
    }

    pub fn has_failures(&self) -> bool {
        !self.errors.is_empty()
    }

    /// Whether any source wrote (or confirmed) at least one batch
    pub fn any_persisted(&self) -> bool {
        self.sources.values().any(|s| s.persisted() > 0)
    }

    pub fn into_parts(
        self,
    ) -> (
        BTreeMap<SourceKind, SourceStats>,
        BTreeMap<String, usize>,
        Vec<FailureRecord>,
    ) {
        (self.sources, self.models, self.errors)
    }
}

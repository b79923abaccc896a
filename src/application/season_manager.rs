//! Season Manager
//!
//! Owns season identity for the process. Cycles ask it for the active season
//! once per run; operators switch seasons through [`SeasonManager::transition`].
//! The active season is cached in memory and the cache starts empty with
//! every new manager. A cached season is only trusted after its status has
//! been confirmed against the store, since another process may have
//! completed it.

use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::domain::entities::{Season, SeasonStatus};
use crate::persistence::season_repository::is_unique_violation;
use crate::persistence::{DbPool, SeasonRepository};

#[derive(Debug, Error)]
pub enum SeasonError {
    #[error("Season {0} not found")]
    NotFound(String),

    #[error("Season {0} already exists")]
    AlreadyExists(String),

    #[error("Season {label} exists but is {status}")]
    NotActive { label: String, status: String },

    #[error("Season {active} is active; transition explicitly to open {requested}")]
    ActiveConflict { active: String, requested: String },

    #[error("Season storage error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Result of an operator season switch
#[derive(Debug, Clone)]
pub struct SeasonTransition {
    pub completed: Option<Season>,
    pub active: Season,
}

pub struct SeasonManager {
    repository: SeasonRepository,
    initial_capital: f64,
    active: RwLock<Option<Season>>,
}

impl SeasonManager {
    pub fn new(pool: DbPool, initial_capital: f64) -> Self {
        Self {
            repository: SeasonRepository::new(pool),
            initial_capital,
            active: RwLock::new(None),
        }
    }

    /// Resolve the season labelled `label`, creating it as active when no
    /// season exists yet.
    ///
    /// A season that exists but is no longer active is an error, and so is a
    /// new label while another season is active: switching seasons is only
    /// done through [`transition`](Self::transition).
    pub async fn get_or_create_active(&self, label: &str) -> Result<Season, SeasonError> {
        let cached = self.active.read().await.clone();
        if let Some(season) = cached.filter(|s| s.label == label) {
            if self.still_active(&season).await? {
                return Ok(season);
            }
        }

        let mut cache = self.active.write().await;

        let season = match self.repository.find_by_label(label).await? {
            Some(season) if season.is_active() => season,
            Some(season) => {
                return Err(SeasonError::NotActive {
                    label: season.label,
                    status: season.status.to_string(),
                })
            }
            None => {
                if let Some(active) = self.repository.find_active().await? {
                    return Err(SeasonError::ActiveConflict {
                        active: active.label,
                        requested: label.to_string(),
                    });
                }
                match self
                    .repository
                    .create_active(label, self.initial_capital)
                    .await
                {
                    Ok(season) => season,
                    Err(e) if is_unique_violation(&e) => {
                        warn!("Season {} was created concurrently; reloading", label);
                        self.repository
                            .find_by_label(label)
                            .await?
                            .filter(Season::is_active)
                            .ok_or_else(|| SeasonError::NotFound(label.to_string()))?
                    }
                    Err(e) => return Err(e.into()),
                }
            }
        };

        *cache = Some(season.clone());
        Ok(season)
    }

    /// Complete the active season and open `label` as the new active one
    pub async fn transition(&self, label: &str) -> Result<SeasonTransition, SeasonError> {
        let label = label.trim();
        if self.repository.find_by_label(label).await?.is_some() {
            return Err(SeasonError::AlreadyExists(label.to_string()));
        }

        let mut cache = self.active.write().await;
        let (completed, active) = self
            .repository
            .transition(label, self.initial_capital)
            .await
            .map_err(|e| {
                if is_unique_violation(&e) {
                    SeasonError::AlreadyExists(label.to_string())
                } else {
                    SeasonError::Database(e)
                }
            })?;

        match &completed {
            Some(previous) => info!(
                "Season transition: {} completed, {} active",
                previous.label, active.label
            ),
            None => info!("Season transition: {} active (no previous season)", active.label),
        }

        *cache = Some(active.clone());
        Ok(SeasonTransition { completed, active })
    }

    /// The currently active season, if any
    pub async fn active(&self) -> Result<Option<Season>, SeasonError> {
        let cached = self.active.read().await.clone();
        if let Some(season) = cached {
            if self.still_active(&season).await? {
                return Ok(Some(season));
            }
        }
        let current = self.repository.find_active().await?;
        *self.active.write().await = current.clone();
        Ok(current)
    }

    /// Confirm a cached season against the store; drops it from the cache
    /// when it was completed elsewhere
    async fn still_active(&self, season: &Season) -> Result<bool, SeasonError> {
        if self.repository.status_of(season.id).await? == Some(SeasonStatus::Active) {
            return Ok(true);
        }
        info!("Season {} is no longer active in the store", season.label);
        let mut cache = self.active.write().await;
        if cache.as_ref().map(|s| s.id) == Some(season.id) {
            *cache = None;
        }
        Ok(false)
    }

    pub async fn list(&self) -> Result<Vec<Season>, SeasonError> {
        Ok(self.repository.list().await?)
    }
}

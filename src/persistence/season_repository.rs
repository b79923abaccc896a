//! Season storage
//!
//! Seasons are looked up by label. Creation and transition both go through
//! the partial unique index on active seasons, so the store itself refuses a
//! second active row even if two writers race.

use chrono::{DateTime, Utc};
use sqlx::{Sqlite, Transaction};
use tracing::info;

use super::models::SeasonRecord;
use super::DbPool;
use crate::domain::entities::{Season, SeasonStatus};

const SEASON_COLUMNS: &str = "id, label, status, start_date, end_date, initial_capital";

/// Raw data access for the `seasons` table
#[derive(Clone)]
pub struct SeasonRepository {
    pool: DbPool,
}

impl SeasonRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn find_by_label(&self, label: &str) -> Result<Option<Season>, sqlx::Error> {
        let record = sqlx::query_as::<_, SeasonRecord>(&format!(
            "SELECT {} FROM seasons WHERE label = ?1",
            SEASON_COLUMNS
        ))
        .bind(label)
        .fetch_optional(&self.pool)
        .await?;

        record.map(into_season).transpose()
    }

    pub async fn find_active(&self) -> Result<Option<Season>, sqlx::Error> {
        let record = sqlx::query_as::<_, SeasonRecord>(&format!(
            "SELECT {} FROM seasons WHERE status = 'active'",
            SEASON_COLUMNS
        ))
        .fetch_optional(&self.pool)
        .await?;

        record.map(into_season).transpose()
    }

    /// Current status of a season row, `None` if the row is gone
    pub async fn status_of(&self, id: i64) -> Result<Option<SeasonStatus>, sqlx::Error> {
        let status: Option<(String,)> = sqlx::query_as("SELECT status FROM seasons WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        status
            .map(|(s,)| s.parse::<SeasonStatus>().map_err(|e| sqlx::Error::Decode(e.into())))
            .transpose()
    }

    /// All seasons, oldest first
    pub async fn list(&self) -> Result<Vec<Season>, sqlx::Error> {
        let records = sqlx::query_as::<_, SeasonRecord>(&format!(
            "SELECT {} FROM seasons ORDER BY start_date ASC, id ASC",
            SEASON_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;

        records.into_iter().map(into_season).collect()
    }

    /// Insert a new active season starting now
    pub async fn create_active(
        &self,
        label: &str,
        initial_capital: f64,
    ) -> Result<Season, sqlx::Error> {
        let mut tx = self.pool.begin().await?;
        let season = insert_active(&mut tx, label, initial_capital, Utc::now()).await?;
        tx.commit().await?;

        info!("Created active season {}", season.label);
        Ok(season)
    }

    /// Complete the active season (if any) and open `label` in one transaction.
    ///
    /// Returns the completed season, if there was one, and the new season.
    pub async fn transition(
        &self,
        label: &str,
        initial_capital: f64,
    ) -> Result<(Option<Season>, Season), sqlx::Error> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        let previous = sqlx::query_as::<_, SeasonRecord>(&format!(
            "SELECT {} FROM seasons WHERE status = 'active'",
            SEASON_COLUMNS
        ))
        .fetch_optional(&mut *tx)
        .await?;

        let completed = match previous {
            Some(record) => {
                sqlx::query(
                    "UPDATE seasons SET status = 'completed', end_date = ?1, updated_at = ?1 \
                     WHERE id = ?2",
                )
                .bind(now)
                .bind(record.id)
                .execute(&mut *tx)
                .await?;

                let mut season = into_season(record)?;
                season.status = SeasonStatus::Completed;
                season.end_date = Some(now);
                Some(season)
            }
            None => None,
        };

        let season = insert_active(&mut tx, label, initial_capital, now).await?;
        tx.commit().await?;

        Ok((completed, season))
    }

    /// Number of seasons currently marked active (0 or 1 when healthy)
    pub async fn count_active(&self) -> Result<i64, sqlx::Error> {
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM seasons WHERE status = 'active'")
                .fetch_one(&self.pool)
                .await?;
        Ok(count)
    }
}

async fn insert_active(
    tx: &mut Transaction<'_, Sqlite>,
    label: &str,
    initial_capital: f64,
    now: DateTime<Utc>,
) -> Result<Season, sqlx::Error> {
    let (id,): (i64,) = sqlx::query_as(
        r#"
        INSERT INTO seasons (label, status, start_date, initial_capital, created_at, updated_at)
        VALUES (?1, 'active', ?2, ?3, ?2, ?2)
        RETURNING id
        "#,
    )
    .bind(label)
    .bind(now)
    .bind(initial_capital)
    .fetch_one(&mut **tx)
    .await?;

    Ok(Season {
        id,
        label: label.to_string(),
        status: SeasonStatus::Active,
        start_date: now,
        end_date: None,
        initial_capital,
    })
}

fn into_season(record: SeasonRecord) -> Result<Season, sqlx::Error> {
    Season::try_from(record).map_err(|e| sqlx::Error::Decode(e.into()))
}

/// True when the error is a unique constraint violation
pub(crate) fn is_unique_violation(error: &sqlx::Error) -> bool {
    matches!(error, sqlx::Error::Database(db) if db.is_unique_violation())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::init_database;

    async fn repo() -> SeasonRepository {
        SeasonRepository::new(init_database("sqlite::memory:").await.unwrap())
    }

    #[tokio::test]
    async fn test_create_and_find() {
        let repo = repo().await;
        let created = repo.create_active("1", 10_000.0).await.unwrap();

        let found = repo.find_by_label("1").await.unwrap().unwrap();
        assert_eq!(found.id, created.id);
        assert!(found.is_active());
        assert_eq!(repo.find_active().await.unwrap().unwrap().label, "1");
        assert!(repo.find_by_label("2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_status_follows_transition() {
        let repo = repo().await;
        let first = repo.create_active("1", 10_000.0).await.unwrap();
        assert_eq!(repo.status_of(first.id).await.unwrap(), Some(SeasonStatus::Active));

        repo.transition("2", 10_000.0).await.unwrap();
        assert_eq!(repo.status_of(first.id).await.unwrap(), Some(SeasonStatus::Completed));
        assert_eq!(repo.status_of(first.id + 100).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_store_refuses_second_active_season() {
        let repo = repo().await;
        repo.create_active("1", 10_000.0).await.unwrap();

        let err = repo.create_active("2", 10_000.0).await.unwrap_err();
        assert!(is_unique_violation(&err));
        assert_eq!(repo.count_active().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_transition_completes_previous() {
        let repo = repo().await;
        repo.create_active("1", 10_000.0).await.unwrap();

        let (completed, next) = repo.transition("2", 20_000.0).await.unwrap();
        let completed = completed.unwrap();
        assert_eq!(completed.label, "1");
        assert_eq!(completed.status, SeasonStatus::Completed);
        assert!(next.is_active());

        let stored = repo.find_by_label("1").await.unwrap().unwrap();
        assert_eq!(stored.status, SeasonStatus::Completed);
        assert!(stored.end_date.is_some());
        assert_eq!(repo.count_active().await.unwrap(), 1);
        assert_eq!(repo.list().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_transition_to_existing_label_rolls_back() {
        let repo = repo().await;
        repo.create_active("1", 10_000.0).await.unwrap();
        repo.transition("2", 10_000.0).await.unwrap();

        let err = repo.transition("1", 10_000.0).await.unwrap_err();
        assert!(is_unique_violation(&err));

        // "2" is still the active season
        let active = repo.find_active().await.unwrap().unwrap();
        assert_eq!(active.label, "2");
    }
}

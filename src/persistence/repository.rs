//! Database Repository
//!
//! `DataPersistence` is the only writer for models, snapshots, trades and
//! chats. Each call to [`DataPersistence::persist`] writes one batch inside a
//! single transaction: a database failure rolls back that batch and nothing
//! else, while integrity violations only reject the offending record.

use chrono::{DateTime, Utc};
use lru::LruCache;
use sqlx::{Sqlite, Transaction};
use std::num::NonZeroUsize;
use std::sync::Mutex;
use thiserror::Error;
use tracing::{debug, error, warn};

use super::models::*;
use super::DbPool;
use crate::domain::entities::{
    ChatEntry, ModelRef, RawRecord, RecordPayload, Season, SeasonStatus, SourceKind, Standing,
    TradeFill, TradeStatus,
};

const MODEL_CACHE_CAPACITY: usize = 256;

/// Errors raised while writing a batch
#[derive(Debug, Error)]
pub enum PersistenceError {
    /// A write would reopen or rewrite a settled trade
    #[error("Integrity violation for {key}: {reason}")]
    Integrity { key: String, reason: String },

    #[error("Batch for {expected} contains a {found} record")]
    KindMismatch {
        expected: SourceKind,
        found: SourceKind,
    },

    #[error("Season {label} is not active")]
    SeasonNotActive { label: String },

    #[error("Failed to serialize raw payload: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Counts for one persisted batch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PersistOutcome {
    pub inserted: usize,
    pub updated: usize,
    pub skipped: usize,
    pub failed: usize,
}

enum WriteResult {
    Inserted,
    Updated,
    Skipped,
}

/// Mutable fields of a stored trade
#[derive(Debug, Clone, PartialEq)]
struct TradeExit {
    exit_price: Option<f64>,
    pnl: Option<f64>,
    pnl_percent: Option<f64>,
    status: TradeStatus,
    closed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, PartialEq)]
enum TradePlan {
    Insert,
    Update(TradeExit),
    Unchanged,
    Reject(String),
}

/// Persistence handle, built once at startup and shared by every cycle
pub struct DataPersistence {
    pool: DbPool,
    model_ids: Mutex<LruCache<String, i64>>,
}

impl DataPersistence {
    pub fn new(pool: DbPool) -> Self {
        let capacity = NonZeroUsize::new(MODEL_CACHE_CAPACITY).unwrap_or(NonZeroUsize::MIN);
        Self {
            pool,
            model_ids: Mutex::new(LruCache::new(capacity)),
        }
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    /// Persist one batch of records of a single kind.
    ///
    /// A batch mixing kinds is refused before anything is written. The whole
    /// batch is one transaction; any database error rolls it back and is
    /// returned.
    pub async fn persist(
        &self,
        season: &Season,
        kind: SourceKind,
        records: &[RawRecord],
    ) -> Result<PersistOutcome, PersistenceError> {
        if !season.is_active() {
            return Err(PersistenceError::SeasonNotActive {
                label: season.label.clone(),
            });
        }

        if let Some(stray) = records.iter().find(|r| r.kind() != kind) {
            return Err(PersistenceError::KindMismatch {
                expected: kind,
                found: stray.kind(),
            });
        }

        let mut outcome = PersistOutcome::default();
        if records.is_empty() {
            return Ok(outcome);
        }

        let mut tx = self.pool.begin().await?;

        // Another process may have completed the season since it was resolved
        let status: Option<(String,)> = sqlx::query_as("SELECT status FROM seasons WHERE id = ?1")
            .bind(season.id)
            .fetch_optional(&mut *tx)
            .await?;
        if status.as_ref().map(|(s,)| s.as_str()) != Some(SeasonStatus::Active.as_str()) {
            return Err(PersistenceError::SeasonNotActive {
                label: season.label.clone(),
            });
        }

        let mut created_models: Vec<(String, i64)> = Vec::new();

        for record in records {
            let model_id = self
                .model_id(&mut tx, &record.model, &mut created_models)
                .await?;

            let raw = serde_json::to_string(&record.raw)?;
            let written = match &record.payload {
                RecordPayload::Standing(standing) => {
                    insert_snapshot(&mut tx, season.id, model_id, standing, &raw).await
                }
                RecordPayload::Trade(trade) => {
                    upsert_trade(&mut tx, season.id, model_id, trade, &raw).await
                }
                RecordPayload::Chat(chat) => {
                    insert_chat(&mut tx, season.id, model_id, chat, &raw).await
                }
            };

            match written {
                Ok(WriteResult::Inserted) => outcome.inserted += 1,
                Ok(WriteResult::Updated) => outcome.updated += 1,
                Ok(WriteResult::Skipped) => outcome.skipped += 1,
                Err(PersistenceError::Integrity { key, reason }) => {
                    warn!(
                        source = %kind,
                        model = %record.model,
                        "Rejected write for {}: {}",
                        key,
                        reason
                    );
                    outcome.failed += 1;
                }
                Err(e) => {
                    error!(
                        source = %kind,
                        model = %record.model,
                        "Batch write failed on {}: {}; rolling back",
                        record.key,
                        e
                    );
                    return Err(e);
                }
            }
        }

        tx.commit().await?;

        // Only ids that survived the commit are worth remembering
        if !created_models.is_empty() {
            if let Ok(mut cache) = self.model_ids.lock() {
                for (name, id) in created_models {
                    cache.put(name, id);
                }
            }
        }

        debug!(
            "Persisted {} batch: {} inserted, {} updated, {} skipped, {} failed",
            kind, outcome.inserted, outcome.updated, outcome.skipped, outcome.failed
        );
        Ok(outcome)
    }

    /// Resolve a model row id, creating the row on first sighting
    async fn model_id(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        model: &ModelRef,
        created: &mut Vec<(String, i64)>,
    ) -> Result<i64, PersistenceError> {
        let cached = self
            .model_ids
            .lock()
            .ok()
            .and_then(|mut cache| cache.get(&model.name).copied());
        if let Some(id) = cached {
            return Ok(id);
        }
        if let Some((_, id)) = created.iter().find(|(name, _)| *name == model.name) {
            return Ok(*id);
        }

        sqlx::query(
            r#"
            INSERT INTO llm_models (name, provider, model_id, is_active, created_at)
            VALUES (?1, ?2, ?3, 1, ?4)
            ON CONFLICT(name) DO NOTHING
            "#,
        )
        .bind(&model.name)
        .bind(&model.provider)
        .bind(&model.external_id)
        .bind(Utc::now())
        .execute(&mut **tx)
        .await?;

        let (id,): (i64,) = sqlx::query_as("SELECT id FROM llm_models WHERE name = ?1")
            .bind(&model.name)
            .fetch_one(&mut **tx)
            .await?;

        created.push((model.name.clone(), id));
        Ok(id)
    }

    /// Look up a stored trade by its natural key
    pub async fn get_trade(&self, trade_id: &str) -> Result<Option<TradeRecord>, PersistenceError> {
        let record = sqlx::query_as::<_, TradeRecord>("SELECT * FROM trades WHERE trade_id = ?1")
            .bind(trade_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(record)
    }

    /// Look up a tracked model by display name
    pub async fn get_model(&self, name: &str) -> Result<Option<ModelRecord>, PersistenceError> {
        let record = sqlx::query_as::<_, ModelRecord>("SELECT * FROM llm_models WHERE name = ?1")
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;
        Ok(record)
    }

    /// Snapshots of one model, oldest first
    pub async fn snapshots_for_model(
        &self,
        name: &str,
    ) -> Result<Vec<SnapshotRecord>, PersistenceError> {
        let records = sqlx::query_as::<_, SnapshotRecord>(
            r#"
            SELECT s.* FROM leaderboard_snapshots s
            JOIN llm_models m ON m.id = s.model_id
            WHERE m.name = ?1
            ORDER BY s.timestamp ASC
            "#,
        )
        .bind(name)
        .fetch_all(&self.pool)
        .await?;
        Ok(records)
    }

    /// Chats of one model, oldest first
    pub async fn chats_for_model(&self, name: &str) -> Result<Vec<ChatRecord>, PersistenceError> {
        let records = sqlx::query_as::<_, ChatRecord>(
            r#"
            SELECT c.* FROM model_chats c
            JOIN llm_models m ON m.id = c.model_id
            WHERE m.name = ?1
            ORDER BY c.timestamp ASC
            "#,
        )
        .bind(name)
        .fetch_all(&self.pool)
        .await?;
        Ok(records)
    }

    /// Row count of one entity table
    pub async fn count(&self, kind: SourceKind) -> Result<i64, PersistenceError> {
        let sql = match kind {
            SourceKind::Leaderboard => "SELECT COUNT(*) FROM leaderboard_snapshots",
            SourceKind::TradeHistory => "SELECT COUNT(*) FROM trades",
            SourceKind::ModelChat => "SELECT COUNT(*) FROM model_chats",
        };
        let (count,): (i64,) = sqlx::query_as(sql).fetch_one(&self.pool).await?;
        Ok(count)
    }

    /// Explicit teardown; waits for checked-out connections to return
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

async fn insert_snapshot(
    tx: &mut Transaction<'_, Sqlite>,
    season_id: i64,
    model_id: i64,
    standing: &Standing,
    raw: &str,
) -> Result<WriteResult, PersistenceError> {
    let rows = sqlx::query(
        r#"
        INSERT INTO leaderboard_snapshots (
            season_id, model_id, timestamp, rank, total_assets, pnl, pnl_percent,
            win_rate, total_trades, sharpe_ratio, fees, raw_data, created_at
        )
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
        ON CONFLICT(model_id, timestamp) DO NOTHING
        "#,
    )
    .bind(season_id)
    .bind(model_id)
    .bind(standing.timestamp)
    .bind(standing.rank)
    .bind(standing.total_assets)
    .bind(standing.pnl)
    .bind(standing.pnl_percent)
    .bind(standing.win_rate)
    .bind(standing.total_trades)
    .bind(standing.sharpe_ratio)
    .bind(standing.fees)
    .bind(raw)
    .bind(Utc::now())
    .execute(&mut **tx)
    .await?
    .rows_affected();

    Ok(if rows == 0 {
        WriteResult::Skipped
    } else {
        WriteResult::Inserted
    })
}

async fn insert_chat(
    tx: &mut Transaction<'_, Sqlite>,
    season_id: i64,
    model_id: i64,
    chat: &ChatEntry,
    raw: &str,
) -> Result<WriteResult, PersistenceError> {
    let rows = sqlx::query(
        r#"
        INSERT INTO model_chats (
            season_id, model_id, timestamp, content, decision, symbol, confidence,
            raw_data, created_at
        )
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
        ON CONFLICT(model_id, timestamp, content) DO NOTHING
        "#,
    )
    .bind(season_id)
    .bind(model_id)
    .bind(chat.timestamp)
    .bind(&chat.content)
    .bind(chat.decision.as_str())
    .bind(&chat.symbol)
    .bind(chat.confidence)
    .bind(raw)
    .bind(Utc::now())
    .execute(&mut **tx)
    .await?
    .rows_affected();

    Ok(if rows == 0 {
        WriteResult::Skipped
    } else {
        WriteResult::Inserted
    })
}

async fn upsert_trade(
    tx: &mut Transaction<'_, Sqlite>,
    season_id: i64,
    model_id: i64,
    trade: &TradeFill,
    raw: &str,
) -> Result<WriteResult, PersistenceError> {
    let existing = sqlx::query_as::<_, TradeRecord>("SELECT * FROM trades WHERE trade_id = ?1")
        .bind(&trade.trade_id)
        .fetch_optional(&mut **tx)
        .await?;

    let now = Utc::now();
    match plan_trade_write(existing.as_ref(), trade) {
        TradePlan::Insert => {
            sqlx::query(
                r#"
                INSERT INTO trades (
                    season_id, model_id, trade_id, symbol, side, entry_price, exit_price,
                    size, leverage, pnl, pnl_percent, status, opened_at, closed_at,
                    raw_data, created_at, updated_at
                )
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?16)
                "#,
            )
            .bind(season_id)
            .bind(model_id)
            .bind(&trade.trade_id)
            .bind(&trade.symbol)
            .bind(trade.side.as_str())
            .bind(trade.entry_price)
            .bind(trade.exit_price)
            .bind(trade.size)
            .bind(trade.leverage)
            .bind(trade.pnl)
            .bind(trade.pnl_percent)
            .bind(trade.status.as_str())
            .bind(trade.opened_at)
            .bind(trade.closed_at)
            .bind(raw)
            .bind(now)
            .execute(&mut **tx)
            .await?;
            Ok(WriteResult::Inserted)
        }
        TradePlan::Update(exit) => {
            sqlx::query(
                r#"
                UPDATE trades
                SET exit_price = ?1, pnl = ?2, pnl_percent = ?3, status = ?4,
                    closed_at = ?5, raw_data = ?6, updated_at = ?7
                WHERE trade_id = ?8
                "#,
            )
            .bind(exit.exit_price)
            .bind(exit.pnl)
            .bind(exit.pnl_percent)
            .bind(exit.status.as_str())
            .bind(exit.closed_at)
            .bind(raw)
            .bind(now)
            .bind(&trade.trade_id)
            .execute(&mut **tx)
            .await?;
            Ok(WriteResult::Updated)
        }
        TradePlan::Unchanged => Ok(WriteResult::Skipped),
        TradePlan::Reject(reason) => Err(PersistenceError::Integrity {
            key: trade.trade_id.clone(),
            reason,
        }),
    }
}

/// Decide how an incoming trade relates to the stored row.
///
/// Open rows take the incoming mutable fields (absent values never erase
/// stored ones). Terminal rows only accept values for fields that are still
/// empty; a differing value or status is rejected.
fn plan_trade_write(existing: Option<&TradeRecord>, incoming: &TradeFill) -> TradePlan {
    let Some(stored) = existing else {
        return TradePlan::Insert;
    };

    let stored_status = match stored.status.parse::<TradeStatus>() {
        Ok(status) => status,
        Err(e) => return TradePlan::Reject(format!("stored row unreadable: {}", e)),
    };

    if !stored_status.can_transition_to(incoming.status) {
        return TradePlan::Reject(format!(
            "illegal status transition {} -> {}",
            stored_status, incoming.status
        ));
    }

    let current = TradeExit {
        exit_price: stored.exit_price,
        pnl: stored.pnl,
        pnl_percent: stored.pnl_percent,
        status: stored_status,
        closed_at: stored.closed_at,
    };

    let merged = if stored_status.is_terminal() {
        if let Some(field) = conflicting_terminal_field(&current, incoming) {
            return TradePlan::Reject(format!("terminal field '{}' differs from stored value", field));
        }
        TradeExit {
            exit_price: current.exit_price.or(incoming.exit_price),
            pnl: current.pnl.or(incoming.pnl),
            pnl_percent: current.pnl_percent.or(incoming.pnl_percent),
            status: stored_status,
            closed_at: current.closed_at.or(incoming.closed_at),
        }
    } else {
        TradeExit {
            exit_price: incoming.exit_price.or(current.exit_price),
            pnl: incoming.pnl.or(current.pnl),
            pnl_percent: incoming.pnl_percent.or(current.pnl_percent),
            status: incoming.status,
            closed_at: incoming.closed_at.or(current.closed_at),
        }
    };

    if same_exit(&merged, &current) {
        TradePlan::Unchanged
    } else {
        TradePlan::Update(merged)
    }
}

fn conflicting_terminal_field(stored: &TradeExit, incoming: &TradeFill) -> Option<&'static str> {
    if !same_value(stored.exit_price, incoming.exit_price) {
        return Some("exit_price");
    }
    if !same_value(stored.pnl, incoming.pnl) {
        return Some("pnl");
    }
    if !same_value(stored.pnl_percent, incoming.pnl_percent) {
        return Some("pnl_percent");
    }
    match (stored.closed_at, incoming.closed_at) {
        (Some(a), Some(b)) if a != b => Some("closed_at"),
        _ => None,
    }
}

/// Two optional values conflict only when both are present and differ
fn same_value(stored: Option<f64>, incoming: Option<f64>) -> bool {
    match (stored, incoming) {
        (Some(a), Some(b)) => approx_eq(a, b),
        _ => true,
    }
}

fn same_exit(a: &TradeExit, b: &TradeExit) -> bool {
    let opt_eq = |x: Option<f64>, y: Option<f64>| match (x, y) {
        (Some(x), Some(y)) => approx_eq(x, y),
        (None, None) => true,
        _ => false,
    };
    a.status == b.status
        && a.closed_at == b.closed_at
        && opt_eq(a.exit_price, b.exit_price)
        && opt_eq(a.pnl, b.pnl)
        && opt_eq(a.pnl_percent, b.pnl_percent)
}

fn approx_eq(a: f64, b: f64) -> bool {
    (a - b).abs() <= 1e-9 * a.abs().max(b.abs()).max(1.0)
}

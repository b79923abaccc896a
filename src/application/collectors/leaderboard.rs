//! Leaderboard collector and model discovery
//!
//! The listing page holds one row per model. It is fetched once per cycle:
//! discovery reads the tracked models from it and the collector then picks
//! each model's own row.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::{debug, warn};

use super::normalize::{self, Row};
use super::{Collector, CycleContext};
use crate::domain::entities::{ModelRef, RawRecord, SourceKind, Standing};
use crate::domain::errors::{CollectError, CollectResult};

const ROW_KEYS: &[&str] = &["leaderboard", "rows", "models"];
const NAME_KEYS: &[&str] = &["model", "name", "model_name"];
const ID_KEYS: &[&str] = &["model_id", "id", "slug"];

pub struct LeaderboardCollector;

impl LeaderboardCollector {
    /// Tracked models for this cycle: the first `max_models` rows by rank.
    ///
    /// A row without a model name is skipped; a row with an unreadable rank
    /// is kept and sorted last.
    pub async fn discover(ctx: &CycleContext, max_models: usize) -> CollectResult<Vec<ModelRef>> {
        let listing = ctx.listing().await?;
        let mut ranked = Vec::new();
        for (index, row) in normalize::rows(listing, ROW_KEYS)?.into_iter().enumerate() {
            let model = match model_ref(row) {
                Ok(model) => model,
                Err(e) => {
                    warn!(
                        source = %SourceKind::Leaderboard,
                        "Skipping leaderboard row {}: {}",
                        index,
                        e
                    );
                    continue;
                }
            };
            let rank = match normalize::opt_i64(row, &["rank"]) {
                Ok(rank) => rank.unwrap_or(i64::MAX),
                Err(e) => {
                    warn!(
                        source = %SourceKind::Leaderboard,
                        model = %model,
                        "Leaderboard row {} has no usable rank: {}",
                        index,
                        e
                    );
                    i64::MAX
                }
            };
            ranked.push((rank, model));
        }
        ranked.sort_by_key(|(rank, _)| *rank);

        let mut models: Vec<ModelRef> = Vec::with_capacity(max_models);
        for (_, model) in ranked {
            if models.len() >= max_models {
                break;
            }
            if !models.iter().any(|m| m.name == model.name) {
                models.push(model);
            }
        }

        debug!("Discovered {} models from leaderboard", models.len());
        Ok(models)
    }
}

#[async_trait]
impl Collector for LeaderboardCollector {
    fn source(&self) -> SourceKind {
        SourceKind::Leaderboard
    }

    async fn collect(&self, model: &ModelRef, ctx: &CycleContext) -> CollectResult<Vec<RawRecord>> {
        let listing = ctx.listing().await?;

        for (index, row) in normalize::rows(listing, ROW_KEYS)?.into_iter().enumerate() {
            match model_ref(row) {
                Ok(found) if found.name == model.name => {}
                Ok(_) => continue,
                Err(e) => {
                    debug!(model = %model, "Ignoring leaderboard row {}: {}", index, e);
                    continue;
                }
            }
            let timestamp = match normalize::opt_timestamp(row, &["timestamp", "updated_at"])? {
                Some(timestamp) => timestamp,
                None => page_time(listing)?.unwrap_or_else(|| ctx.started_at()),
            };
            let standing = parse_standing(row, timestamp).map_err(|e| {
                CollectError::parse(format!("leaderboard row {}: {}", index, reason(&e)))
            })?;
            return Ok(vec![RawRecord::standing(
                model.clone(),
                standing,
                Value::Object(row.clone()),
            )]);
        }

        debug!(model = %model, "No leaderboard row this cycle");
        Ok(Vec::new())
    }
}

/// The page-level `timestamp`, if the listing carries one
fn page_time(listing: &Value) -> CollectResult<Option<DateTime<Utc>>> {
    match listing.get("timestamp") {
        Some(value) if !value.is_null() => normalize::parse_timestamp(value).map(Some),
        _ => Ok(None),
    }
}

fn reason(error: &CollectError) -> String {
    match error {
        CollectError::Parse { reason } => reason.clone(),
        other => other.to_string(),
    }
}

fn model_ref(row: &Row) -> CollectResult<ModelRef> {
    let name = normalize::req_str(row, NAME_KEYS)?;
    let external_id = match normalize::field(row, ID_KEYS) {
        Some(Value::Number(n)) => Some(n.to_string()),
        Some(Value::String(s)) => Some(s.clone()),
        _ => None,
    };
    Ok(ModelRef::new(
        name,
        normalize::opt_str(row, &["provider"]),
        external_id.as_deref(),
    ))
}

fn parse_standing(row: &Row, timestamp: DateTime<Utc>) -> CollectResult<Standing> {
    let rank = normalize::opt_i64(row, &["rank"])?
        .ok_or_else(|| CollectError::parse("missing 'rank'"))?;
    Ok(Standing {
        timestamp,
        rank,
        total_assets: normalize::req_f64(row, &["total_assets", "account_value", "equity"])?,
        pnl: normalize::req_f64(row, &["pnl", "total_pnl"])?,
        pnl_percent: normalize::req_f64(row, &["pnl_percent", "return_pct", "return"])?,
        win_rate: normalize::opt_f64(row, &["win_rate"])?,
        total_trades: normalize::opt_i64(row, &["total_trades", "trades"])?.unwrap_or(0),
        sharpe_ratio: normalize::opt_f64(row, &["sharpe_ratio", "sharpe"])?,
        fees: normalize::opt_f64(row, &["fees"])?,
    })
}

#[cfg(test)]
mod tests {
    use super::super::test_support::{context, CannedSource};
    use super::*;
    use crate::domain::entities::RecordPayload;
    use crate::domain::repositories::PageRequest;
    use serde_json::json;
    use std::sync::Arc;

    fn listing() -> Value {
        json!({
            "timestamp": "2025-11-01T12:00:00Z",
            "leaderboard": [
                { "rank": 2, "model": "GPT-5", "total_assets": "$9,040.57",
                  "pnl": "-$959.43", "pnl_percent": "-9.59%", "total_trades": 40 },
                { "rank": 1, "model": "Claude Sonnet 4.5", "total_assets": 12991.0,
                  "pnl": 2991.0, "pnl_percent": 29.91, "win_rate": "32.3%",
                  "total_trades": 93, "sharpe": 0.022, "fees": "$607.47" },
                { "rank": 3, "model": "Mystery Model", "provider": "Acme", "id": "mm-1",
                  "total_assets": 10000, "pnl": 0, "pnl_percent": 0 }
            ]
        })
    }

    fn ctx_with(page: Value) -> CycleContext {
        let source = CannedSource::new().respond(&PageRequest::Leaderboard, vec![Ok(page)]);
        context(Arc::new(source)).0
    }

    #[tokio::test]
    async fn test_discovery_orders_by_rank_and_caps() {
        let ctx = ctx_with(listing());
        let models = LeaderboardCollector::discover(&ctx, 2).await.unwrap();
        let names: Vec<&str> = models.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, vec!["Claude Sonnet 4.5", "GPT-5"]);
        assert_eq!(models[0].provider, "Anthropic");
    }

    #[tokio::test]
    async fn test_discovery_keeps_source_identity() {
        let ctx = ctx_with(listing());
        let models = LeaderboardCollector::discover(&ctx, 10).await.unwrap();
        assert_eq!(models[2].provider, "Acme");
        assert_eq!(models[2].external_id, "mm-1");
    }

    #[tokio::test]
    async fn test_collect_picks_model_row() {
        let ctx = ctx_with(listing());
        let model = ModelRef::new("GPT-5", None, None);
        let records = LeaderboardCollector.collect(&model, &ctx).await.unwrap();
        assert_eq!(records.len(), 1);

        match &records[0].payload {
            RecordPayload::Standing(standing) => {
                assert_eq!(standing.rank, 2);
                assert_eq!(standing.pnl, -959.43);
                assert_eq!(standing.total_assets, 9_040.57);
                assert_eq!(standing.timestamp.to_rfc3339(), "2025-11-01T12:00:00+00:00");
            }
            other => panic!("unexpected payload {:?}", other),
        }
        assert_eq!(records[0].raw["model"], "GPT-5");
    }

    #[tokio::test]
    async fn test_broken_row_is_parse_error() {
        let ctx = ctx_with(json!({ "leaderboard": [{ "rank": 1, "model": "GPT-5" }] }));
        let model = ModelRef::new("GPT-5", None, None);
        let err = LeaderboardCollector.collect(&model, &ctx).await.unwrap_err();
        assert!(matches!(err, CollectError::Parse { .. }));
    }

    #[tokio::test]
    async fn test_bad_rows_only_affect_their_model() {
        let ctx = ctx_with(json!({
            "timestamp": 1_760_000_000,
            "leaderboard": [
                { "rank": "n/a", "model": "Grok 4", "total_assets": 1, "pnl": 0, "pnl_percent": 0 },
                { "rank": 2, "total_assets": 1, "pnl": 0, "pnl_percent": 0 },
                { "rank": 1, "model": "GPT-5", "total_assets": 1, "pnl": 0, "pnl_percent": 0 }
            ]
        }));

        let models = LeaderboardCollector::discover(&ctx, 10).await.unwrap();
        let names: Vec<&str> = models.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, vec!["GPT-5", "Grok 4"]);

        let gpt = LeaderboardCollector.collect(&models[0], &ctx).await.unwrap();
        assert_eq!(gpt.len(), 1);

        let err = LeaderboardCollector.collect(&models[1], &ctx).await.unwrap_err();
        assert!(matches!(err, CollectError::Parse { ref reason } if reason.starts_with("leaderboard row 0")));
    }

    #[tokio::test]
    async fn test_page_without_timestamp_uses_cycle_start() {
        let ctx = ctx_with(json!([
            { "rank": 1, "model": "GPT-5", "total_assets": 1, "pnl": 0, "pnl_percent": 0 }
        ]));
        let model = ModelRef::new("GPT-5", None, None);
        let records = LeaderboardCollector.collect(&model, &ctx).await.unwrap();
        assert_eq!(records[0].timestamp, ctx.started_at());
    }
}

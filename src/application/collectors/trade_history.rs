use async_trait::async_trait;
use serde_json::Value;

use super::normalize::{self, Row};
use super::{Collector, CycleContext};
use crate::domain::entities::{ModelRef, RawRecord, SourceKind, TradeFill, TradeSide, TradeStatus};
use crate::domain::errors::{CollectError, CollectResult};
use crate::domain::repositories::PageRequest;

const ROW_KEYS: &[&str] = &["trades", "data"];

/// Trade history of one model
pub struct TradeHistoryCollector;

#[async_trait]
impl Collector for TradeHistoryCollector {
    fn source(&self) -> SourceKind {
        SourceKind::TradeHistory
    }

    async fn collect(&self, model: &ModelRef, ctx: &CycleContext) -> CollectResult<Vec<RawRecord>> {
        let page = ctx
            .fetch(&PageRequest::Trades {
                model: model.clone(),
            })
            .await?;

        normalize::rows(&page, ROW_KEYS)?
            .into_iter()
            .enumerate()
            .map(|(i, row)| {
                let fill = parse_trade(model, row).map_err(|e| match e {
                    CollectError::Parse { reason } => {
                        CollectError::parse(format!("trade row {}: {}", i, reason))
                    }
                    other => other,
                })?;
                Ok(RawRecord::trade(model.clone(), fill, Value::Object(row.clone())))
            })
            .collect()
    }
}

fn parse_trade(model: &ModelRef, row: &Row) -> CollectResult<TradeFill> {
    let symbol = normalize::req_str(row, &["symbol", "coin", "asset"])?.to_uppercase();
    let side = normalize::req_str(row, &["side", "direction"])?
        .parse::<TradeSide>()
        .map_err(CollectError::parse)?;
    let opened_at = normalize::req_timestamp(row, &["opened_at", "entry_time", "open_time"])?;
    let closed_at = normalize::opt_timestamp(row, &["closed_at", "exit_time", "close_time"])?;
    let exit_price = normalize::opt_f64(row, &["exit_price", "close_price"])?;

    let status = match normalize::opt_str(row, &["status"]) {
        Some(status) => status.parse::<TradeStatus>().map_err(CollectError::parse)?,
        None if exit_price.is_some() => TradeStatus::Closed,
        None => TradeStatus::Open,
    };

    let trade_id = match normalize::field(row, &["trade_id", "id"]) {
        Some(Value::String(s)) if !s.trim().is_empty() => s.trim().to_string(),
        Some(Value::Number(n)) => n.to_string(),
        _ => format!("{}-{}-{}", model.external_id, symbol, opened_at.to_rfc3339()),
    };

    Ok(TradeFill {
        trade_id,
        symbol,
        side,
        entry_price: normalize::req_f64(row, &["entry_price", "open_price"])?,
        exit_price,
        size: normalize::req_f64(row, &["size", "quantity", "qty"])?,
        leverage: normalize::opt_i64(row, &["leverage"])?.unwrap_or(1),
        pnl: normalize::opt_f64(row, &["pnl", "realized_pnl"])?,
        pnl_percent: normalize::opt_f64(row, &["pnl_percent", "return_pct"])?,
        status,
        opened_at,
        closed_at,
    })
}

#[cfg(test)]
mod tests {
    use super::super::test_support::{context, CannedSource};
    use super::*;
    use crate::domain::entities::RecordPayload;
    use serde_json::json;
    use std::sync::Arc;

    fn model() -> ModelRef {
        ModelRef::new("Grok 4", None, None)
    }

    async fn collect(page: Value) -> CollectResult<Vec<RawRecord>> {
        let request = PageRequest::Trades { model: model() };
        let source = CannedSource::new().respond(&request, vec![Ok(page)]);
        let (ctx, _tx) = context(Arc::new(source));
        TradeHistoryCollector.collect(&model(), &ctx).await
    }

    fn fill(record: &RawRecord) -> &TradeFill {
        match &record.payload {
            RecordPayload::Trade(fill) => fill,
            other => panic!("unexpected payload {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_trade_rows_are_normalised() {
        let records = collect(json!({ "trades": [
            { "trade_id": "abc", "symbol": "btc", "side": "LONG", "entry_price": "$100",
              "size": 0.5, "leverage": "20x", "opened_at": 1_760_000_000 },
            { "id": 77, "symbol": "ETH", "side": "short", "entry_price": 2500,
              "exit_price": 2400, "size": 1, "pnl": "+$100", "opened_at": 1_760_000_000,
              "closed_at": 1_760_003_600 }
        ]}))
        .await
        .unwrap();

        assert_eq!(records.len(), 2);
        let open = fill(&records[0]);
        assert_eq!(open.trade_id, "abc");
        assert_eq!(open.symbol, "BTC");
        assert_eq!(open.side, TradeSide::Buy);
        assert_eq!(open.leverage, 20);
        assert_eq!(open.status, TradeStatus::Open);

        let closed = fill(&records[1]);
        assert_eq!(closed.trade_id, "77");
        assert_eq!(closed.side, TradeSide::Sell);
        assert_eq!(closed.status, TradeStatus::Closed);
        assert_eq!(closed.leverage, 1);
        assert_eq!(closed.pnl, Some(100.0));
        assert!(closed.closed_at.is_some());
    }

    #[tokio::test]
    async fn test_missing_trade_id_is_synthesised() {
        let records = collect(json!([
            { "symbol": "SOL", "side": "buy", "entry_price": 150, "size": 2,
              "opened_at": "2025-11-01T12:00:00Z" }
        ]))
        .await
        .unwrap();
        assert_eq!(
            fill(&records[0]).trade_id,
            "grok-4-SOL-2025-11-01T12:00:00+00:00"
        );
    }

    #[tokio::test]
    async fn test_explicit_status_wins() {
        let records = collect(json!([
            { "trade_id": "liq", "symbol": "DOGE", "side": "buy", "entry_price": 0.2,
              "exit_price": 0.1, "size": 1000, "status": "liquidated",
              "opened_at": 1_760_000_000 }
        ]))
        .await
        .unwrap();
        assert_eq!(fill(&records[0]).status, TradeStatus::Liquidated);
    }

    #[tokio::test]
    async fn test_malformed_row_fails_the_page() {
        let err = collect(json!([
            { "trade_id": "ok", "symbol": "BTC", "side": "buy", "entry_price": 1,
              "size": 1, "opened_at": 1_760_000_000 },
            { "trade_id": "bad", "symbol": "BTC", "side": "sideways", "entry_price": 1,
              "size": 1, "opened_at": 1_760_000_000 }
        ]))
        .await
        .unwrap_err();
        match err {
            CollectError::Parse { reason } => assert!(reason.starts_with("trade row 1")),
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_missing_open_time_is_parse_error() {
        let err = collect(json!([
            { "trade_id": "x", "symbol": "BTC", "side": "buy", "entry_price": 1, "size": 1 }
        ]))
        .await
        .unwrap_err();
        assert!(matches!(err, CollectError::Parse { .. }));
    }
}

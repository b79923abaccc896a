use async_trait::async_trait;
use serde_json::Value;

use super::normalize::{self, Row};
use super::{Collector, CycleContext};
use crate::domain::entities::{ChatDecision, ChatEntry, ModelRef, RawRecord, SourceKind};
use crate::domain::errors::{CollectError, CollectResult};
use crate::domain::repositories::PageRequest;

const ROW_KEYS: &[&str] = &["conversations", "chats", "messages"];

/// Reasoning log of one model, capped at the cycle's chat limit
pub struct ModelChatCollector;

#[async_trait]
impl Collector for ModelChatCollector {
    fn source(&self) -> SourceKind {
        SourceKind::ModelChat
    }

    async fn collect(&self, model: &ModelRef, ctx: &CycleContext) -> CollectResult<Vec<RawRecord>> {
        let page = ctx
            .fetch(&PageRequest::Chats {
                model: model.clone(),
            })
            .await?;

        normalize::rows(&page, ROW_KEYS)?
            .into_iter()
            .take(ctx.chat_limit())
            .enumerate()
            .map(|(i, row)| {
                let entry = parse_chat(row).map_err(|e| match e {
                    CollectError::Parse { reason } => {
                        CollectError::parse(format!("chat row {}: {}", i, reason))
                    }
                    other => other,
                })?;
                Ok(RawRecord::chat(model.clone(), entry, Value::Object(row.clone())))
            })
            .collect()
    }
}

fn parse_chat(row: &Row) -> CollectResult<ChatEntry> {
    let timestamp = normalize::req_timestamp(row, &["timestamp", "created_at", "time"])?;
    let content = normalize::req_str(row, &["content", "message", "reasoning"])?.to_string();

    let decision = normalize::opt_str(row, &["decision", "action"])
        .and_then(|d| d.parse::<ChatDecision>().ok())
        .unwrap_or_else(|| ChatDecision::derive(&content));

    Ok(ChatEntry {
        timestamp,
        decision,
        symbol: normalize::opt_str(row, &["symbol", "coin"]).map(str::to_uppercase),
        confidence: normalize::opt_f64(row, &["confidence"])?,
        content,
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
        ModelRef::new("Qwen3 Max", None, None)
    }

    async fn collect(page: Value) -> CollectResult<Vec<RawRecord>> {
        let request = PageRequest::Chats { model: model() };
        let source = CannedSource::new().respond(&request, vec![Ok(page)]);
        let (ctx, _tx) = context(Arc::new(source));
        ModelChatCollector.collect(&model(), &ctx).await
    }

    fn entry(record: &RawRecord) -> &ChatEntry {
        match &record.payload {
            RecordPayload::Chat(entry) => entry,
            other => panic!("unexpected payload {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_explicit_decision_wins_over_content() {
        let records = collect(json!({ "conversations": [
            { "timestamp": 1_760_000_000, "content": "Time to close BTC",
              "decision": "hold", "symbol": "btc", "confidence": "65%" }
        ]}))
        .await
        .unwrap();
        let chat = entry(&records[0]);
        assert_eq!(chat.decision, ChatDecision::Hold);
        assert_eq!(chat.symbol.as_deref(), Some("BTC"));
        assert_eq!(chat.confidence, Some(65.0));
    }

    #[tokio::test]
    async fn test_decision_derived_when_absent_or_unknown() {
        let records = collect(json!([
            { "timestamp": 1_760_000_000, "content": "Opening a long on ETH" },
            { "timestamp": 1_760_000_060, "content": "Watching", "decision": "maybe" }
        ]))
        .await
        .unwrap();
        assert_eq!(entry(&records[0]).decision, ChatDecision::Buy);
        assert_eq!(entry(&records[1]).decision, ChatDecision::None);
    }

    #[tokio::test]
    async fn test_chat_limit_applies() {
        let rows: Vec<Value> = (0..250)
            .map(|i| json!({ "timestamp": 1_760_000_000 + i, "content": format!("note {}", i) }))
            .collect();
        let records = collect(Value::Array(rows)).await.unwrap();
        assert_eq!(records.len(), 200);
        assert_eq!(entry(&records[0]).content, "note 0");
    }

    #[tokio::test]
    async fn test_missing_content_is_parse_error() {
        let err = collect(json!([{ "timestamp": 1_760_000_000 }])).await.unwrap_err();
        assert!(matches!(err, CollectError::Parse { .. }));
    }
}

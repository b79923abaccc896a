//! Raw records produced by collectors
//!
//! A raw record carries the typed fields persistence needs, the natural key
//! used for deduplication, and the verbatim payload from the source so that
//! fields we do not model yet are never lost.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::chat::ChatEntry;
use super::model::ModelRef;
use super::snapshot::Standing;
use super::trade::TradeFill;

/// The external sources a cycle collects from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Leaderboard,
    TradeHistory,
    ModelChat,
}

impl SourceKind {
    pub const ALL: [SourceKind; 3] = [
        SourceKind::Leaderboard,
        SourceKind::TradeHistory,
        SourceKind::ModelChat,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Leaderboard => "leaderboard",
            SourceKind::TradeHistory => "trade_history",
            SourceKind::ModelChat => "model_chat",
        }
    }
}

impl std::fmt::Display for SourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RecordPayload {
    Standing(Standing),
    Trade(TradeFill),
    Chat(ChatEntry),
}

impl RecordPayload {
    pub fn kind(&self) -> SourceKind {
        match self {
            RecordPayload::Standing(_) => SourceKind::Leaderboard,
            RecordPayload::Trade(_) => SourceKind::TradeHistory,
            RecordPayload::Chat(_) => SourceKind::ModelChat,
        }
    }
}

/// One normalised record fetched for a model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawRecord {
    pub model: ModelRef,
    /// Natural key within its kind (trade id, or model + timestamp)
    pub key: String,
    pub timestamp: DateTime<Utc>,
    pub payload: RecordPayload,
    /// Verbatim payload as delivered by the source
    pub raw: serde_json::Value,
}

impl RawRecord {
    pub fn standing(model: ModelRef, standing: Standing, raw: serde_json::Value) -> Self {
        RawRecord {
            key: format!("{}@{}", model.external_id, standing.timestamp.to_rfc3339()),
            timestamp: standing.timestamp,
            model,
            payload: RecordPayload::Standing(standing),
            raw,
        }
    }

    pub fn trade(model: ModelRef, trade: TradeFill, raw: serde_json::Value) -> Self {
        RawRecord {
            key: trade.trade_id.clone(),
            timestamp: trade.closed_at.unwrap_or(trade.opened_at),
            model,
            payload: RecordPayload::Trade(trade),
            raw,
        }
    }

    pub fn chat(model: ModelRef, chat: ChatEntry, raw: serde_json::Value) -> Self {
        RawRecord {
            key: format!("{}@{}", model.external_id, chat.timestamp.to_rfc3339()),
            timestamp: chat.timestamp,
            model,
            payload: RecordPayload::Chat(chat),
            raw,
        }
    }

    pub fn kind(&self) -> SourceKind {
        self.payload.kind()
    }
}

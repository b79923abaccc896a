//! Database Models
//!
//! Row shapes for seasons, models, snapshots, trades and chats.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::domain::entities::{Season, SeasonStatus};

/// Season record in database
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct SeasonRecord {
    pub id: i64,
    pub label: String,
    pub status: String, // "active", "completed" or "cancelled"
    pub start_date: DateTime<Utc>,
    pub end_date: Option<DateTime<Utc>>,
    pub initial_capital: f64,
}

impl TryFrom<SeasonRecord> for Season {
    type Error = String;

    fn try_from(record: SeasonRecord) -> Result<Self, Self::Error> {
        Ok(Season {
            id: record.id,
            status: record.status.parse::<SeasonStatus>()?,
            label: record.label,
            start_date: record.start_date,
            end_date: record.end_date,
            initial_capital: record.initial_capital,
        })
    }
}

/// Tracked model record in database
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ModelRecord {
    pub id: i64,
    pub name: String,
    pub provider: String,
    pub model_id: String,
    pub is_active: bool,
}

/// Leaderboard snapshot record in database
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct SnapshotRecord {
    pub id: i64,
    pub season_id: i64,
    pub model_id: i64,
    pub timestamp: DateTime<Utc>,
    pub rank: i64,
    pub total_assets: f64,
    pub pnl: f64,
    pub pnl_percent: f64,
    pub win_rate: Option<f64>,
    pub total_trades: i64,
    pub sharpe_ratio: Option<f64>,
    pub fees: Option<f64>,
    pub raw_data: Option<String>, // JSON string
}

/// Trade record in database
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct TradeRecord {
    pub id: i64,
    pub season_id: i64,
    pub model_id: i64,
    pub trade_id: String,
    pub symbol: String,
    pub side: String, // "buy" or "sell"
    pub entry_price: f64,
    pub exit_price: Option<f64>,
    pub size: f64,
    pub leverage: i64,
    pub pnl: Option<f64>,
    pub pnl_percent: Option<f64>,
    pub status: String, // "open", "closed" or "liquidated"
    pub opened_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
    pub raw_data: Option<String>, // JSON string
}

/// Model chat record in database
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ChatRecord {
    pub id: i64,
    pub season_id: i64,
    pub model_id: i64,
    pub timestamp: DateTime<Utc>,
    pub content: String,
    pub decision: String,
    pub symbol: Option<String>,
    pub confidence: Option<f64>,
    pub raw_data: Option<String>, // JSON string
}

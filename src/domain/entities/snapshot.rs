use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Point-in-time leaderboard standing of one model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Standing {
    pub timestamp: DateTime<Utc>,
    pub rank: i64,
    pub total_assets: f64,
    pub pnl: f64,
    pub pnl_percent: f64,
    pub win_rate: Option<f64>,
    pub total_trades: i64,
    pub sharpe_ratio: Option<f64>,
    pub fees: Option<f64>,
}

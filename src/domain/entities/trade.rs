use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeSide {
    Buy,
    Sell,
}

impl TradeSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradeSide::Buy => "buy",
            TradeSide::Sell => "sell",
        }
    }
}

impl FromStr for TradeSide {
    type Err = String;

    /// `long` and `buy` are the same side, as are `short` and `sell`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "buy" | "long" => Ok(TradeSide::Buy),
            "sell" | "short" => Ok(TradeSide::Sell),
            other => Err(format!("unknown trade side: {}", other)),
        }
    }
}

/// Lifecycle status of a position
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeStatus {
    Open,
    Closed,
    Liquidated,
}

impl TradeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradeStatus::Open => "open",
            TradeStatus::Closed => "closed",
            TradeStatus::Liquidated => "liquidated",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TradeStatus::Closed | TradeStatus::Liquidated)
    }

    /// Whether a stored status may be overwritten by `next`.
    ///
    /// Open may move to any status. A terminal status only accepts itself.
    pub fn can_transition_to(&self, next: TradeStatus) -> bool {
        match self {
            TradeStatus::Open => true,
            terminal => *terminal == next,
        }
    }
}

impl std::fmt::Display for TradeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TradeStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "open" => Ok(TradeStatus::Open),
            "closed" => Ok(TradeStatus::Closed),
            "liquidated" => Ok(TradeStatus::Liquidated),
            other => Err(format!("unknown trade status: {}", other)),
        }
    }
}

/// Normalised trade as reported by the source in one fetch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeFill {
    pub trade_id: String,
    pub symbol: String,
    pub side: TradeSide,
    pub entry_price: f64,
    pub exit_price: Option<f64>,
    pub size: f64,
    pub leverage: i64,
    pub pnl: Option<f64>,
    pub pnl_percent: Option<f64>,
    pub status: TradeStatus,
    pub opened_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_side_aliases() {
        assert_eq!("LONG".parse::<TradeSide>().unwrap(), TradeSide::Buy);
        assert_eq!("buy".parse::<TradeSide>().unwrap(), TradeSide::Buy);
        assert_eq!("Short".parse::<TradeSide>().unwrap(), TradeSide::Sell);
        assert!("flat".parse::<TradeSide>().is_err());
    }

    #[test]
    fn test_status_transitions_are_forward_only() {
        use TradeStatus::*;

        assert!(Open.can_transition_to(Open));
        assert!(Open.can_transition_to(Closed));
        assert!(Open.can_transition_to(Liquidated));

        assert!(Closed.can_transition_to(Closed));
        assert!(!Closed.can_transition_to(Open));
        assert!(!Closed.can_transition_to(Liquidated));

        assert!(Liquidated.can_transition_to(Liquidated));
        assert!(!Liquidated.can_transition_to(Open));
        assert!(!Liquidated.can_transition_to(Closed));
    }
}

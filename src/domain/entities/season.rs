use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Lifecycle status of a competition season
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SeasonStatus {
    Active,
    Completed,
    Cancelled,
}

impl SeasonStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SeasonStatus::Active => "active",
            SeasonStatus::Completed => "completed",
            SeasonStatus::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for SeasonStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SeasonStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "active" => Ok(SeasonStatus::Active),
            "completed" => Ok(SeasonStatus::Completed),
            "cancelled" => Ok(SeasonStatus::Cancelled),
            other => Err(format!("unknown season status: {}", other)),
        }
    }
}

/// A bounded competition period with its own standings and trade history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Season {
    pub id: i64,
    pub label: String,
    pub status: SeasonStatus,
    pub start_date: DateTime<Utc>,
    pub end_date: Option<DateTime<Utc>>,
    pub initial_capital: f64,
}

impl Season {
    pub fn is_active(&self) -> bool {
        self.status == SeasonStatus::Active
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trips_through_text() {
        for status in [
            SeasonStatus::Active,
            SeasonStatus::Completed,
            SeasonStatus::Cancelled,
        ] {
            assert_eq!(status.as_str().parse::<SeasonStatus>().unwrap(), status);
        }
        assert!("paused".parse::<SeasonStatus>().is_err());
    }
}

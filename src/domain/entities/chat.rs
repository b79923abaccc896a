use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Decision extracted from a model's reasoning log
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatDecision {
    Buy,
    Sell,
    Hold,
    Close,
    None,
}

impl ChatDecision {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChatDecision::Buy => "buy",
            ChatDecision::Sell => "sell",
            ChatDecision::Hold => "hold",
            ChatDecision::Close => "close",
            ChatDecision::None => "none",
        }
    }

    /// Derive a decision from free text.
    ///
    /// Keywords are matched as whole words in priority order: close, buy/long,
    /// sell/short, hold.
    pub fn derive(content: &str) -> ChatDecision {
        let lowered = content.to_lowercase();
        let words: Vec<&str> = lowered
            .split(|c: char| !c.is_ascii_alphanumeric())
            .filter(|w| !w.is_empty())
            .collect();
        let has = |needle: &str| words.iter().any(|w| *w == needle);

        if has("close") {
            ChatDecision::Close
        } else if has("buy") || has("long") {
            ChatDecision::Buy
        } else if has("sell") || has("short") {
            ChatDecision::Sell
        } else if has("hold") {
            ChatDecision::Hold
        } else {
            ChatDecision::None
        }
    }
}

impl FromStr for ChatDecision {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "buy" => Ok(ChatDecision::Buy),
            "sell" => Ok(ChatDecision::Sell),
            "hold" => Ok(ChatDecision::Hold),
            "close" => Ok(ChatDecision::Close),
            "none" => Ok(ChatDecision::None),
            other => Err(format!("unknown decision: {}", other)),
        }
    }
}

/// Append-only reasoning entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatEntry {
    pub timestamp: DateTime<Utc>,
    pub content: String,
    pub decision: ChatDecision,
    pub symbol: Option<String>,
    pub confidence: Option<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derive_decision_from_content() {
        assert_eq!(
            ChatDecision::derive("Going LONG on BTC, momentum is strong"),
            ChatDecision::Buy
        );
        assert_eq!(
            ChatDecision::derive("I will sell ETH here"),
            ChatDecision::Sell
        );
        assert_eq!(
            ChatDecision::derive("Close the SOL short, target reached"),
            ChatDecision::Close
        );
        assert_eq!(
            ChatDecision::derive("Holding. Nothing to do: hold."),
            ChatDecision::Hold
        );
        assert_eq!(
            ChatDecision::derive("Market is choppy, waiting"),
            ChatDecision::None
        );
    }

    #[test]
    fn test_derive_needs_whole_words() {
        // "buyers" and "closed" are not decisions
        assert_eq!(
            ChatDecision::derive("buyers stepped in after the market closed"),
            ChatDecision::None
        );
    }
}

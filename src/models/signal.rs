//! Chain events and the trade signals classified from them.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Direction of a detected trade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TradeSide {
    Buy,
    Sell,
}

impl TradeSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradeSide::Buy => "BUY",
            TradeSide::Sell => "SELL",
        }
    }
}

impl std::fmt::Display for TradeSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A confirmed, non-failed transaction observed on a tracked wallet.
///
/// Produced by the monitor and handed to the classifier; never persisted.
#[derive(Debug, Clone)]
pub struct ChainEvent {
    /// Transaction signature (the dedup identifier)
    pub signature: String,

    /// Slot the transaction landed in
    pub slot: u64,

    /// Finalized block time; the monitor only emits events that have one
    pub block_time: Option<DateTime<Utc>>,

    /// Raw transaction payload for the classifier
    pub raw: serde_json::Value,
}

/// A normalized trade inferred from a chain event.
///
/// Ephemeral: produced and consumed within one pipeline pass.
#[derive(Debug, Clone)]
pub struct TradeSignal {
    /// Wallet that made the trade
    pub wallet: String,

    /// Token mint address being traded
    pub token_address: String,

    /// Trade direction
    pub side: TradeSide,

    /// Trade size in SOL
    pub sol_amount: Decimal,

    /// When the source trade happened (block time)
    pub observed_at: DateTime<Utc>,
}

//! Position model and its lifecycle states.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::percentage_change;

/// Lifecycle state of a position.
///
/// Transitions only `Open -> PendingClose -> {Open, Closed}`: `PendingClose`
/// is held while an exit execution is in flight and rolls back to `Open` if
/// the execution fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PositionStatus {
    Open,
    PendingClose,
    Closed,
}

/// Why a position was closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CloseReason {
    MaxHoldTime,
    StopLoss,
    TakeProfit,
    TrailingStop,
    Manual,
}

impl CloseReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            CloseReason::MaxHoldTime => "Max hold time",
            CloseReason::StopLoss => "Stop loss",
            CloseReason::TakeProfit => "Take profit",
            CloseReason::TrailingStop => "Trailing stop",
            CloseReason::Manual => "Manual",
        }
    }
}

impl std::fmt::Display for CloseReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A copy-trade position for one token.
///
/// Mutated only by the position manager. Derived values (unrealized PnL,
/// hold time) are computed accessors over the stored fields, never cached.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    /// Unique position id
    pub id: String,

    /// Token mint address
    pub token_address: String,

    /// Price at entry
    pub entry_price: Decimal,

    /// SOL spent to open the position
    pub entry_amount_sol: Decimal,

    /// Tokens received at entry
    pub token_amount: Decimal,

    /// Strategy that opened the position
    pub strategy_id: u32,

    /// Source wallet whose trade was copied
    pub wallet_source: String,

    /// When the position was opened
    pub opened_at: DateTime<Utc>,

    /// Lifecycle state
    pub status: PositionStatus,

    /// Most recent observed price
    pub current_price: Decimal,

    /// Highest price observed since entry; never decreases
    pub highest_price: Decimal,

    /// Trailing-stop price, once activated; ratchets up, never down
    pub trailing_stop_price: Option<Decimal>,

    /// Price at which take-profit triggers
    pub take_profit_price: Decimal,

    /// Price at which stop-loss triggers
    pub stop_loss_price: Decimal,

    // Set on close
    pub exit_price: Option<Decimal>,
    pub exit_amount_sol: Option<Decimal>,
    pub closed_at: Option<DateTime<Utc>>,
    pub pnl_sol: Option<Decimal>,
    pub pnl_percentage: Option<Decimal>,
    pub close_reason: Option<CloseReason>,
}

impl Position {
    /// Unrealized PnL as a percentage of the entry price.
    pub fn unrealized_pnl_pct(&self) -> Decimal {
        if self.entry_price.is_zero() || self.status != PositionStatus::Open {
            return Decimal::ZERO;
        }
        percentage_change(self.entry_price, self.current_price)
    }

    /// Unrealized PnL in SOL, derived from the price ratio.
    pub fn unrealized_pnl_sol(&self) -> Decimal {
        if self.entry_price.is_zero() || self.status != PositionStatus::Open {
            return Decimal::ZERO;
        }
        let current_value = self.entry_amount_sol * (self.current_price / self.entry_price);
        current_value - self.entry_amount_sol
    }

    /// Seconds the position has been (or was) held.
    pub fn hold_time_secs(&self) -> i64 {
        let end = self.closed_at.unwrap_or_else(Utc::now);
        (end - self.opened_at).num_seconds()
    }

    /// Record a new observed price, ratcheting the session high.
    pub fn update_price(&mut self, new_price: Decimal) {
        self.current_price = new_price;
        if new_price > self.highest_price {
            self.highest_price = new_price;
        }
    }

    /// True once the position has reached its terminal state.
    pub fn is_closed(&self) -> bool {
        self.status == PositionStatus::Closed
    }
}

//! Data models for wallets, chain events, signals, and positions.

mod position;
mod signal;
mod wallet;

pub use position::{CloseReason, Position, PositionStatus};
pub use signal::{ChainEvent, TradeSide, TradeSignal};
pub use wallet::{short_address, TrackedWallet};

use rust_decimal::Decimal;

/// Percentage change from `old` to `new`, zero when `old` is zero.
pub fn percentage_change(old: Decimal, new: Decimal) -> Decimal {
    if old.is_zero() {
        return Decimal::ZERO;
    }
    (new - old) / old * Decimal::from(100)
}

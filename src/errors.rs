//! Typed errors for rule violations the caller must be able to match on.
//!
//! Transient upstream failures (RPC, DEX, executor) travel as `anyhow::Error`
//! and are handled at the call site; these enums cover the cases where the
//! core itself rejects an operation and the caller's next step depends on why.

use rust_decimal::Decimal;

use crate::models::PositionStatus;

/// Errors raised by [`crate::trading::BalanceLedger`].
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("insufficient balance: {available} SOL available, {requested} SOL requested")]
    InsufficientBalance {
        available: Decimal,
        requested: Decimal,
    },

    #[error("amount must be positive, got {0} SOL")]
    NonPositiveAmount(Decimal),
}

/// Errors raised by [`crate::trading::PositionManager`].
#[derive(Debug, thiserror::Error)]
pub enum PositionError {
    #[error("position not found: {0}")]
    NotFound(String),

    #[error("position {id} is {status:?}, expected Open")]
    NotOpen { id: String, status: PositionStatus },

    #[error("max positions ({0}) reached")]
    MaxPositionsReached(usize),
}

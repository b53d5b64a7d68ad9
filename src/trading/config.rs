//! Strategy configurations and engine-wide trade limits.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

/// Configuration for one copy-trading strategy.
///
/// Immutable once a strategy engine is running; loaded from a preset or
/// external configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyConfig {
    pub id: u32,
    pub name: String,
    pub description: String,

    // === Entry rules ===
    /// Fraction of current balance to spend per copy trade (0.0 to 1.0)
    pub copy_percentage: Decimal,

    /// Minimum SOL size of a source trade worth copying
    pub min_wallet_trade_size: Decimal,

    // === Exit rules ===
    /// Take-profit threshold as a percentage (e.g. 20.0 = +20%)
    pub take_profit_pct: Decimal,

    /// Stop-loss threshold as a percentage (e.g. 10.0 = -10%)
    pub stop_loss_pct: Decimal,

    // === Position management ===
    /// Maximum concurrent open positions
    pub max_positions: usize,

    /// Cap on a single position as a fraction of balance (0.0 to 1.0)
    pub position_size_pct: Decimal,

    // === Trailing stop ===
    pub use_trailing_stop: bool,

    /// Profit percentage at which the trailing stop arms
    pub trailing_stop_activation: Decimal,

    /// Distance from the peak price, in percent
    pub trailing_stop_distance: Decimal,

    // === Time-based exit ===
    /// Maximum hold time in seconds (0 = unbounded)
    pub max_hold_time_secs: u64,

    // === Risk management ===
    /// Maximum daily loss as a percentage of the reference balance
    pub daily_loss_limit: Decimal,

    /// Maximum acceptable slippage percentage
    pub max_slippage: Decimal,
}

impl StrategyConfig {
    /// Conservative: small gains, tight stop, quick exits.
    pub fn conservative() -> Self {
        Self {
            id: 1,
            name: "Conservative".to_string(),
            description: "Low risk with quick exits - TP 10%, SL 5%".to_string(),
            copy_percentage: dec!(0.15),
            min_wallet_trade_size: dec!(0.5),
            take_profit_pct: dec!(10.0),
            stop_loss_pct: dec!(5.0),
            max_positions: 3,
            position_size_pct: dec!(0.15),
            use_trailing_stop: false,
            trailing_stop_activation: dec!(8.0),
            trailing_stop_distance: dec!(3.0),
            max_hold_time_secs: 3600,
            daily_loss_limit: dec!(10.0),
            max_slippage: dec!(1.0),
        }
    }

    /// Balanced: medium risk/reward with a trailing stop.
    pub fn balanced() -> Self {
        Self {
            id: 2,
            name: "Balanced".to_string(),
            description: "Balanced approach - TP 20%, SL 10%".to_string(),
            copy_percentage: dec!(0.20),
            min_wallet_trade_size: dec!(0.3),
            take_profit_pct: dec!(20.0),
            stop_loss_pct: dec!(10.0),
            max_positions: 5,
            position_size_pct: dec!(0.20),
            use_trailing_stop: true,
            trailing_stop_activation: dec!(15.0),
            trailing_stop_distance: dec!(5.0),
            max_hold_time_secs: 7200,
            daily_loss_limit: dec!(15.0),
            max_slippage: dec!(1.5),
        }
    }

    /// Aggressive: higher risk/reward, wider stops.
    pub fn aggressive() -> Self {
        Self {
            id: 3,
            name: "Aggressive".to_string(),
            description: "High risk/reward - TP 50%, SL 15%".to_string(),
            copy_percentage: dec!(0.25),
            min_wallet_trade_size: dec!(0.2),
            take_profit_pct: dec!(50.0),
            stop_loss_pct: dec!(15.0),
            max_positions: 5,
            position_size_pct: dec!(0.25),
            use_trailing_stop: true,
            trailing_stop_activation: dec!(30.0),
            trailing_stop_distance: dec!(10.0),
            max_hold_time_secs: 14400,
            daily_loss_limit: dec!(20.0),
            max_slippage: dec!(2.0),
        }
    }

    /// Scalper: many small, short-lived positions.
    pub fn scalper() -> Self {
        Self {
            id: 4,
            name: "Scalper".to_string(),
            description: "Quick profits - TP 5%, SL 3%".to_string(),
            copy_percentage: dec!(0.30),
            min_wallet_trade_size: dec!(0.1),
            take_profit_pct: dec!(5.0),
            stop_loss_pct: dec!(3.0),
            max_positions: 8,
            position_size_pct: dec!(0.12),
            use_trailing_stop: false,
            trailing_stop_activation: dec!(4.0),
            trailing_stop_distance: dec!(1.5),
            max_hold_time_secs: 1800,
            daily_loss_limit: dec!(12.0),
            max_slippage: dec!(0.8),
        }
    }

    /// Hodl: long holds, wide stops, no time limit.
    pub fn hodl() -> Self {
        Self {
            id: 5,
            name: "Hodl".to_string(),
            description: "Long-term holds - TP 100%, SL 25%".to_string(),
            copy_percentage: dec!(0.20),
            min_wallet_trade_size: dec!(1.0),
            take_profit_pct: dec!(100.0),
            stop_loss_pct: dec!(25.0),
            max_positions: 3,
            position_size_pct: dec!(0.30),
            use_trailing_stop: true,
            trailing_stop_activation: dec!(50.0),
            trailing_stop_distance: dec!(20.0),
            max_hold_time_secs: 0,
            daily_loss_limit: dec!(25.0),
            max_slippage: dec!(2.5),
        }
    }

    /// Look up a preset by id (1-5).
    pub fn by_id(id: u32) -> Option<Self> {
        match id {
            1 => Some(Self::conservative()),
            2 => Some(Self::balanced()),
            3 => Some(Self::aggressive()),
            4 => Some(Self::scalper()),
            5 => Some(Self::hodl()),
            _ => None,
        }
    }

    /// All presets, by id order.
    pub fn presets() -> Vec<Self> {
        vec![
            Self::conservative(),
            Self::balanced(),
            Self::aggressive(),
            Self::scalper(),
            Self::hodl(),
        ]
    }
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self::balanced()
    }
}

/// Engine-wide limits applied to every strategy's sizing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineSettings {
    /// Smallest copy trade ever placed, in SOL
    pub min_trade_size: Decimal,

    /// Largest copy trade ever placed, in SOL
    pub max_trade_size: Decimal,

    /// Slippage tolerance for execution, in basis points
    pub slippage_bps: u32,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            min_trade_size: dec!(0.01),
            max_trade_size: dec!(1.0),
            slippage_bps: 100,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn presets_resolve_by_id() {
        for preset in StrategyConfig::presets() {
            let looked_up = StrategyConfig::by_id(preset.id).unwrap();
            assert_eq!(looked_up.name, preset.name);
        }
        assert!(StrategyConfig::by_id(0).is_none());
        assert!(StrategyConfig::by_id(6).is_none());
    }
}

//! Swap cost model: network, priority, platform, slippage, and price-impact
//! components for a given trade size.
//!
//! Used by the simulated executor for fills and by PnL accounting; both see
//! the same numbers. Randomness is confined to the slippage and price-impact
//! samples and the generator is seedable, so quotes are reproducible in tests.

use std::sync::Mutex;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

const LAMPORTS_PER_SOL: Decimal = dec!(1_000_000_000);
const BPS_DENOMINATOR: Decimal = dec!(10000);

/// Static fee parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeeConfig {
    /// Base network fee per transaction, in SOL
    pub base_network_fee: Decimal,

    /// Priority fee in lamports
    pub priority_fee_lamports: u64,

    /// Aggregator platform fee in basis points
    pub platform_fee_bps: u32,
}

impl Default for FeeConfig {
    fn default() -> Self {
        Self {
            base_network_fee: dec!(0.000005),
            priority_fee_lamports: 50_000,
            platform_fee_bps: 25,
        }
    }
}

/// Additive cost breakdown for one swap.
#[derive(Debug, Clone, PartialEq)]
pub struct FeeBreakdown {
    pub network_fee: Decimal,
    pub priority_fee: Decimal,
    pub platform_fee: Decimal,
    pub slippage_cost: Decimal,
    pub price_impact_cost: Decimal,
    pub total_fee: Decimal,

    /// Sampled slippage actually charged, in basis points
    pub slippage_bps: Decimal,

    /// Sampled price impact, in basis points
    pub price_impact_bps: Decimal,
}

impl FeeBreakdown {
    pub fn slippage_pct(&self) -> Decimal {
        self.slippage_bps / dec!(100)
    }

    pub fn price_impact_pct(&self) -> Decimal {
        self.price_impact_bps / dec!(100)
    }

    /// Total fee as a percentage of the swap amount.
    pub fn total_fee_pct(&self, amount_sol: Decimal) -> Decimal {
        if amount_sol.is_zero() {
            return Decimal::ZERO;
        }
        self.total_fee / amount_sol * dec!(100)
    }
}

impl std::fmt::Display for FeeBreakdown {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Fee Breakdown:")?;
        writeln!(f, "  Network Fee:   {:.6} SOL", self.network_fee)?;
        writeln!(f, "  Priority Fee:  {:.6} SOL", self.priority_fee)?;
        writeln!(f, "  Platform Fee:  {:.6} SOL", self.platform_fee)?;
        writeln!(
            f,
            "  Slippage Cost: {:.6} SOL ({:.2}%)",
            self.slippage_cost,
            self.slippage_pct()
        )?;
        writeln!(
            f,
            "  Price Impact:  {:.6} SOL ({:.2}%)",
            self.price_impact_cost,
            self.price_impact_pct()
        )?;
        write!(f, "  Total Fees:    {:.6} SOL", self.total_fee)
    }
}

/// Deterministic-given-a-seed swap cost model.
pub struct FeeModel {
    config: FeeConfig,
    rng: Mutex<StdRng>,
}

impl FeeModel {
    /// Production model with entropy-seeded sampling.
    pub fn new(config: FeeConfig) -> Self {
        Self {
            config,
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    /// Fixed-seed model; identical inputs yield identical quotes.
    pub fn with_seed(config: FeeConfig, seed: u64) -> Self {
        Self {
            config,
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    /// Quote the full cost of swapping `amount_sol` at the given slippage
    /// tolerance.
    pub fn quote(&self, amount_sol: Decimal, slippage_bps: u32) -> FeeBreakdown {
        let (actual_slippage_bps, price_impact_bps) = {
            let mut rng = self.rng.lock().expect("fee rng poisoned");
            // Realized slippage runs well under the tolerance ceiling
            let slip = rng.gen_range(0.0..=(slippage_bps as f64 * 0.5));
            let impact = Self::sample_price_impact_bps(&mut rng, amount_sol);
            (decimal_from_f64(slip), decimal_from_f64(impact))
        };

        let network_fee = self.config.base_network_fee;
        let priority_fee = Decimal::from(self.config.priority_fee_lamports) / LAMPORTS_PER_SOL;
        let platform_fee = amount_sol * Decimal::from(self.config.platform_fee_bps) / BPS_DENOMINATOR;
        let slippage_cost = amount_sol * actual_slippage_bps / BPS_DENOMINATOR;
        let price_impact_cost = amount_sol * price_impact_bps / BPS_DENOMINATOR;

        let total_fee =
            network_fee + priority_fee + platform_fee + slippage_cost + price_impact_cost;

        FeeBreakdown {
            network_fee,
            priority_fee,
            platform_fee,
            slippage_cost,
            price_impact_cost,
            total_fee,
            slippage_bps: actual_slippage_bps,
            price_impact_bps,
        }
    }

    /// Amount plus all fees.
    pub fn estimate_total_cost(&self, amount_sol: Decimal, slippage_bps: u32) -> Decimal {
        amount_sol + self.quote(amount_sol, slippage_bps).total_fee
    }

    /// Amount minus all fees.
    pub fn estimate_net_proceeds(&self, amount_sol: Decimal, slippage_bps: u32) -> Decimal {
        amount_sol - self.quote(amount_sol, slippage_bps).total_fee
    }

    /// Price impact grows with trade size through fixed buckets.
    fn sample_price_impact_bps(rng: &mut StdRng, amount_sol: Decimal) -> f64 {
        if amount_sol < dec!(0.1) {
            rng.gen_range(1.0..=5.0)
        } else if amount_sol < dec!(0.5) {
            rng.gen_range(5.0..=15.0)
        } else if amount_sol < dec!(1.0) {
            rng.gen_range(15.0..=30.0)
        } else if amount_sol < dec!(5.0) {
            rng.gen_range(30.0..=60.0)
        } else {
            rng.gen_range(60.0..=100.0)
        }
    }
}

fn decimal_from_f64(value: f64) -> Decimal {
    Decimal::try_from(value).unwrap_or_default()
}

//! Trade execution seam and the simulated implementation.

use std::sync::Arc;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use rust_decimal::Decimal;
use tracing::info;

use crate::api::PriceSource;

use super::fees::{FeeBreakdown, FeeModel};

/// Result of an executed (or simulated) swap.
#[derive(Debug, Clone)]
pub struct Fill {
    /// Tokens received on a buy, tokens sold on a sell
    pub token_amount: Decimal,

    /// SOL spent on a buy, net SOL proceeds on a sell
    pub sol_amount: Decimal,

    /// Quoted price the fill was computed at
    pub price: Decimal,

    /// Price impact of the fill, in percent
    pub price_impact_pct: Decimal,

    /// Cost breakdown applied to the fill
    pub fees: FeeBreakdown,
}

/// Performs or simulates swaps. Fees are netted out of the reported
/// output, so callers must not charge them again.
#[async_trait]
pub trait Executor: Send + Sync {
    /// Spend `sol_amount` SOL buying `token_address`.
    async fn buy(&self, token_address: &str, sol_amount: Decimal) -> Result<Fill>;

    /// Sell `token_amount` of `token_address` back to SOL.
    async fn sell(&self, token_address: &str, token_amount: Decimal) -> Result<Fill>;
}

/// Executor that fills against quoted prices and the fee model instead of
/// sending transactions. Signing and settlement stay outside the crate.
pub struct SimulatedExecutor {
    prices: Arc<dyn PriceSource>,
    fees: Arc<FeeModel>,
    slippage_bps: u32,
}

impl SimulatedExecutor {
    pub fn new(prices: Arc<dyn PriceSource>, fees: Arc<FeeModel>, slippage_bps: u32) -> Self {
        Self {
            prices,
            fees,
            slippage_bps,
        }
    }

    async fn quoted_price(&self, token_address: &str) -> Result<Decimal> {
        self.prices
            .price(token_address)
            .await?
            .filter(|p| !p.is_zero())
            .ok_or_else(|| anyhow!("no quote available for {token_address}"))
    }
}

#[async_trait]
impl Executor for SimulatedExecutor {
    async fn buy(&self, token_address: &str, sol_amount: Decimal) -> Result<Fill> {
        let price = self.quoted_price(token_address).await?;
        let quote = self.fees.quote(sol_amount, self.slippage_bps);

        let net_sol = sol_amount - quote.total_fee;
        if net_sol <= Decimal::ZERO {
            return Err(anyhow!(
                "trade of {sol_amount} SOL would be consumed by {} SOL in fees",
                quote.total_fee
            ));
        }

        let token_amount = net_sol / price;
        info!(
            token = %token_address,
            sol_in = %sol_amount,
            tokens_out = %token_amount,
            price = %price,
            "Simulated buy filled"
        );

        Ok(Fill {
            token_amount,
            sol_amount,
            price,
            price_impact_pct: quote.price_impact_pct(),
            fees: quote,
        })
    }

    async fn sell(&self, token_address: &str, token_amount: Decimal) -> Result<Fill> {
        let price = self.quoted_price(token_address).await?;

        let gross_sol = token_amount * price;
        let quote = self.fees.quote(gross_sol, self.slippage_bps);
        let net_sol = (gross_sol - quote.total_fee).max(Decimal::ZERO);

        info!(
            token = %token_address,
            tokens_in = %token_amount,
            sol_out = %net_sol,
            price = %price,
            "Simulated sell filled"
        );

        Ok(Fill {
            token_amount,
            sol_amount: net_sol,
            price,
            price_impact_pct: quote.price_impact_pct(),
            fees: quote,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trading::fees::FeeConfig;
    use rust_decimal_macros::dec;
    use std::collections::HashMap;

    struct FixedPrices(HashMap<String, Decimal>);

    #[async_trait]
    impl PriceSource for FixedPrices {
        async fn price(&self, token: &str) -> Result<Option<Decimal>> {
            Ok(self.0.get(token).copied())
        }

        async fn prices(&self, tokens: &[String]) -> Result<HashMap<String, Decimal>> {
            Ok(tokens
                .iter()
                .filter_map(|t| self.0.get(t).map(|p| (t.clone(), *p)))
                .collect())
        }
    }

    fn executor_with_price(price: Decimal) -> SimulatedExecutor {
        let mut prices = HashMap::new();
        prices.insert("Mint111".to_string(), price);
        SimulatedExecutor::new(
            Arc::new(FixedPrices(prices)),
            Arc::new(FeeModel::with_seed(FeeConfig::default(), 7)),
            100,
        )
    }

    #[tokio::test]
    async fn buy_nets_fees_out_of_token_output() {
        let executor = executor_with_price(dec!(0.002));
        let fill = executor.buy("Mint111", dec!(1.0)).await.unwrap();

        // Fees reduce the SOL converted, so fewer tokens than amount/price
        assert!(fill.token_amount < dec!(1.0) / dec!(0.002));
        assert!(fill.token_amount > Decimal::ZERO);
        assert_eq!(fill.sol_amount, dec!(1.0));
        assert_eq!(fill.price, dec!(0.002));

        // The fill surfaces the cost model it was priced with
        assert_eq!(fill.price_impact_pct, fill.fees.price_impact_pct());
        assert!(fill.fees.total_fee > Decimal::ZERO);
    }

    #[tokio::test]
    async fn sell_reports_net_proceeds() {
        let executor = executor_with_price(dec!(0.002));
        let fill = executor.sell("Mint111", dec!(500)).await.unwrap();

        // Gross 1.0 SOL minus fees
        assert!(fill.sol_amount < dec!(1.0));
        assert!(fill.sol_amount > Decimal::ZERO);
    }

    #[tokio::test]
    async fn unquoted_token_fails_the_fill() {
        let executor = executor_with_price(dec!(0.002));
        assert!(executor.buy("UnknownMint", dec!(1.0)).await.is_err());
        assert!(executor.sell("UnknownMint", dec!(10)).await.is_err());
    }
}

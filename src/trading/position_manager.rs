//! Position lifecycle management: open, per-tick exit evaluation, close.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tokio::sync::Mutex;
use tokio::time::interval;
use tracing::{debug, error, info, warn};

use crate::errors::PositionError;
use crate::events::{EventBus, TradeEvent};
use crate::models::{percentage_change, CloseReason, Position, PositionStatus};
use crate::monitor::PriceFeed;

use super::config::StrategyConfig;
use super::executor::Executor;
use super::ledger::BalanceLedger;

/// Aggregate results over closed positions.
#[derive(Debug, Clone, Default)]
pub struct PositionStats {
    pub total_trades: usize,
    pub winning_trades: usize,
    pub losing_trades: usize,
    pub win_rate_pct: Decimal,
    pub total_pnl_sol: Decimal,
    pub average_pnl_sol: Decimal,
}

#[derive(Default)]
struct Book {
    open: HashMap<String, Position>,
    closed: Vec<Position>,
}

/// Owns the open positions of one strategy instance and drives them to
/// close through the executor.
///
/// All mutation happens here; the engine only requests opens. The book lock
/// is never held across an executor call: a close marks the position
/// `PendingClose`, sells without the lock, then either finalizes or rolls
/// back to `Open`.
pub struct PositionManager {
    strategy: StrategyConfig,
    price_feed: Arc<PriceFeed>,
    executor: Arc<dyn Executor>,
    ledger: Arc<Mutex<BalanceLedger>>,
    notifications: Arc<EventBus<TradeEvent>>,
    book: Mutex<Book>,
}

impl PositionManager {
    pub fn new(
        strategy: StrategyConfig,
        price_feed: Arc<PriceFeed>,
        executor: Arc<dyn Executor>,
        ledger: Arc<Mutex<BalanceLedger>>,
        notifications: Arc<EventBus<TradeEvent>>,
    ) -> Self {
        Self {
            strategy,
            price_feed,
            executor,
            ledger,
            notifications,
            book: Mutex::new(Book::default()),
        }
    }

    /// Open a position after a successful copy execution.
    ///
    /// This is the authoritative `max_positions` check; the engine's own
    /// check is only an early-out.
    pub async fn open(
        &self,
        token_address: &str,
        entry_price: Decimal,
        sol_amount: Decimal,
        token_amount: Decimal,
        wallet_source: &str,
    ) -> Result<Position, PositionError> {
        let mut book = self.book.lock().await;
        if book.open.len() >= self.strategy.max_positions {
            return Err(PositionError::MaxPositionsReached(
                self.strategy.max_positions,
            ));
        }

        let take_profit_price =
            entry_price * (Decimal::ONE + self.strategy.take_profit_pct / dec!(100));
        let stop_loss_price =
            entry_price * (Decimal::ONE - self.strategy.stop_loss_pct / dec!(100));

        let opened_at = Utc::now();
        let position = Position {
            id: format!("{}_{}", token_address, opened_at.timestamp_millis()),
            token_address: token_address.to_string(),
            entry_price,
            entry_amount_sol: sol_amount,
            token_amount,
            strategy_id: self.strategy.id,
            wallet_source: wallet_source.to_string(),
            opened_at,
            status: PositionStatus::Open,
            current_price: entry_price,
            highest_price: entry_price,
            trailing_stop_price: None,
            take_profit_price,
            stop_loss_price,
            exit_price: None,
            exit_amount_sol: None,
            closed_at: None,
            pnl_sol: None,
            pnl_percentage: None,
            close_reason: None,
        };

        book.open.insert(position.id.clone(), position.clone());
        drop(book);

        self.price_feed.add_token(token_address);

        info!(
            position = %position.id,
            entry = %entry_price,
            tp = %take_profit_price,
            sl = %stop_loss_price,
            "Opened position"
        );

        Ok(position)
    }

    /// Evaluate every open position once. Positions are checked sequentially
    /// so no two closes race on the ledger within one strategy.
    pub async fn check_all(&self) {
        let ids: Vec<String> = {
            let book = self.book.lock().await;
            book.open.keys().cloned().collect()
        };

        for id in ids {
            if let Some(reason) = self.evaluate(&id).await {
                match self.close(&id, reason, None).await {
                    Ok(true) => {}
                    Ok(false) => {
                        debug!(position = %id, "Close did not complete, will retry next tick");
                    }
                    Err(e) => {
                        debug!(position = %id, error = %e, "Close rejected");
                    }
                }
            }
        }
    }

    /// Update a position's price and pick the first matching exit rule.
    ///
    /// Priority order: max hold time, stop loss, take profit, trailing stop.
    /// The trailing stop arms once profit reaches the activation threshold
    /// and from then on only ratchets upward off the peak price.
    async fn evaluate(&self, id: &str) -> Option<CloseReason> {
        let mut book = self.book.lock().await;
        let position = book.open.get_mut(id)?;
        if position.status != PositionStatus::Open {
            return None;
        }

        let current_price = self.price_feed.get_price(&position.token_address)?;
        position.update_price(current_price);

        let max_hold = self.strategy.max_hold_time_secs;
        if max_hold > 0 && position.hold_time_secs() >= max_hold as i64 {
            return Some(CloseReason::MaxHoldTime);
        }

        if current_price <= position.stop_loss_price {
            return Some(CloseReason::StopLoss);
        }

        if current_price >= position.take_profit_price {
            return Some(CloseReason::TakeProfit);
        }

        if self.strategy.use_trailing_stop {
            let profit_pct = position.unrealized_pnl_pct();
            if profit_pct >= self.strategy.trailing_stop_activation {
                let candidate = position.highest_price
                    * (Decimal::ONE - self.strategy.trailing_stop_distance / dec!(100));
                match position.trailing_stop_price {
                    Some(current) if candidate <= current => {}
                    _ => position.trailing_stop_price = Some(candidate),
                }
            }

            if let Some(trailing) = position.trailing_stop_price {
                if current_price <= trailing {
                    return Some(CloseReason::TrailingStop);
                }
            }
        }

        None
    }

    /// Close a position: `Open -> PendingClose`, sell the full quantity,
    /// then finalize or roll back.
    ///
    /// `Ok(false)` means the close failed transiently (no price, executor
    /// error) and the position is back in `Open`; callers may retry on a
    /// later tick. `Err` means the request itself was invalid.
    pub async fn close(
        &self,
        id: &str,
        reason: CloseReason,
        price: Option<Decimal>,
    ) -> Result<bool, PositionError> {
        // Phase 1: validate and mark in-flight
        let (token_address, token_amount, close_price) = {
            let mut book = self.book.lock().await;
            let position = book
                .open
                .get_mut(id)
                .ok_or_else(|| PositionError::NotFound(id.to_string()))?;

            if position.status != PositionStatus::Open {
                return Err(PositionError::NotOpen {
                    id: id.to_string(),
                    status: position.status,
                });
            }

            let close_price = price.or_else(|| self.price_feed.get_price(&position.token_address));
            let Some(close_price) = close_price else {
                warn!(position = %id, "No price available for close");
                return Ok(false);
            };

            position.status = PositionStatus::PendingClose;
            (
                position.token_address.clone(),
                position.token_amount,
                close_price,
            )
        };

        // Phase 2: sell outside the lock
        let fill = match self.executor.sell(&token_address, token_amount).await {
            Ok(fill) => fill,
            Err(e) => {
                warn!(position = %id, error = %e, "Close execution failed, rolling back");
                let mut book = self.book.lock().await;
                if let Some(position) = book.open.get_mut(id) {
                    position.status = PositionStatus::Open;
                }
                return Ok(false);
            }
        };

        // Phase 3: finalize and move to history
        let closed = {
            let mut book = self.book.lock().await;
            let Some(mut position) = book.open.remove(id) else {
                return Err(PositionError::NotFound(id.to_string()));
            };

            position.exit_price = Some(close_price);
            position.exit_amount_sol = Some(fill.sol_amount);
            position.closed_at = Some(Utc::now());
            position.status = PositionStatus::Closed;
            position.close_reason = Some(reason);
            position.pnl_sol = Some(fill.sol_amount - position.entry_amount_sol);
            position.pnl_percentage = Some(percentage_change(position.entry_price, close_price));

            book.closed.push(position.clone());

            let token_still_held = book
                .open
                .values()
                .any(|p| p.token_address == token_address);
            if !token_still_held {
                self.price_feed.remove_token(&token_address);
            }

            position
        };

        // Proceeds already have fees netted out by the executor
        {
            let mut ledger = self.ledger.lock().await;
            if let Err(e) = ledger.credit(fill.sol_amount, format!("Close {id}: {reason}")) {
                error!(position = %id, error = %e, "Failed to credit close proceeds");
            }
        }

        let pnl_sol = closed.pnl_sol.unwrap_or_default();
        let pnl_pct = closed.pnl_percentage.unwrap_or_default();

        info!(
            position = %id,
            reason = %reason,
            pnl_sol = %pnl_sol,
            pnl_pct = %pnl_pct,
            "Closed position"
        );

        self.notifications
            .emit(TradeEvent::PositionClosed {
                strategy_id: self.strategy.id,
                position_id: closed.id.clone(),
                token_address: closed.token_address.clone(),
                reason,
                pnl_sol,
                pnl_percentage: pnl_pct,
                at: closed.closed_at.unwrap_or_else(Utc::now),
            })
            .await;

        Ok(true)
    }

    pub async fn open_count(&self) -> usize {
        self.book.lock().await.open.len()
    }

    /// SOL committed to open positions.
    pub async fn open_entry_total(&self) -> Decimal {
        self.book
            .lock()
            .await
            .open
            .values()
            .map(|p| p.entry_amount_sol)
            .sum()
    }

    pub async fn get(&self, id: &str) -> Option<Position> {
        let book = self.book.lock().await;
        book.open
            .get(id)
            .cloned()
            .or_else(|| book.closed.iter().find(|p| p.id == id).cloned())
    }

    pub async fn open_positions(&self) -> Vec<Position> {
        self.book.lock().await.open.values().cloned().collect()
    }

    pub async fn closed_positions(&self) -> Vec<Position> {
        self.book.lock().await.closed.clone()
    }

    /// Win/loss aggregates over closed positions.
    pub async fn statistics(&self) -> PositionStats {
        let book = self.book.lock().await;
        let closed = &book.closed;
        if closed.is_empty() {
            return PositionStats::default();
        }

        let pnls: Vec<Decimal> = closed
            .iter()
            .map(|p| p.pnl_sol.unwrap_or_default())
            .collect();
        let winning = pnls.iter().filter(|pnl| **pnl > Decimal::ZERO).count();
        let total: Decimal = pnls.iter().copied().sum();
        let count = Decimal::from(closed.len());

        PositionStats {
            total_trades: closed.len(),
            winning_trades: winning,
            losing_trades: closed.len() - winning,
            win_rate_pct: Decimal::from(winning) / count * dec!(100),
            total_pnl_sol: total,
            average_pnl_sol: total / count,
        }
    }

    /// Tick until `shutdown` is set; the in-flight tick always completes.
    pub async fn run(self: Arc<Self>, tick_interval: Duration, shutdown: Arc<AtomicBool>) {
        info!(
            strategy = %self.strategy.name,
            interval_ms = tick_interval.as_millis() as u64,
            "Position monitoring started"
        );
        let mut ticker = interval(tick_interval);

        loop {
            ticker.tick().await;
            if shutdown.load(Ordering::SeqCst) {
                break;
            }
            self.check_all().await;
        }

        info!(strategy = %self.strategy.name, "Position monitoring stopped");
    }

    #[cfg(test)]
    pub(crate) async fn backdate(&self, id: &str, secs: i64) {
        let mut book = self.book.lock().await;
        if let Some(position) = book.open.get_mut(id) {
            position.opened_at = Utc::now() - chrono::Duration::seconds(secs);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::PriceSource;
    use crate::trading::executor::Fill;
    use crate::trading::fees::{FeeBreakdown, FeeConfig, FeeModel};
    use anyhow::Result;
    use async_trait::async_trait;
    use std::sync::Mutex as StdMutex;

    struct MutablePrices(StdMutex<HashMap<String, Decimal>>);

    #[async_trait]
    impl PriceSource for MutablePrices {
        async fn price(&self, token: &str) -> Result<Option<Decimal>> {
            Ok(self.0.lock().unwrap().get(token).copied())
        }

        async fn prices(&self, tokens: &[String]) -> Result<HashMap<String, Decimal>> {
            let quotes = self.0.lock().unwrap();
            Ok(tokens
                .iter()
                .filter_map(|t| quotes.get(t).map(|p| (t.clone(), *p)))
                .collect())
        }
    }

    /// Executor that fills sells at a configured SOL output, or fails.
    struct ScriptedExecutor {
        sell_output: StdMutex<Decimal>,
        fail_sells: AtomicBool,
    }

    impl ScriptedExecutor {
        fn new(sell_output: Decimal) -> Self {
            Self {
                sell_output: StdMutex::new(sell_output),
                fail_sells: AtomicBool::new(false),
            }
        }

        fn set_sell_output(&self, amount: Decimal) {
            *self.sell_output.lock().unwrap() = amount;
        }

        fn dummy_fees() -> FeeBreakdown {
            FeeModel::with_seed(FeeConfig::default(), 1).quote(dec!(1.0), 100)
        }
    }

    #[async_trait]
    impl Executor for ScriptedExecutor {
        async fn buy(&self, _token: &str, sol_amount: Decimal) -> Result<Fill> {
            Ok(Fill {
                token_amount: dec!(1000),
                sol_amount,
                price: dec!(0.001),
                price_impact_pct: dec!(0.1),
                fees: Self::dummy_fees(),
            })
        }

        async fn sell(&self, _token: &str, token_amount: Decimal) -> Result<Fill> {
            if self.fail_sells.load(Ordering::SeqCst) {
                anyhow::bail!("sell rejected");
            }
            Ok(Fill {
                token_amount,
                sol_amount: *self.sell_output.lock().unwrap(),
                price: dec!(0.001),
                price_impact_pct: dec!(0.1),
                fees: Self::dummy_fees(),
            })
        }
    }

    struct Rig {
        source: Arc<MutablePrices>,
        feed: Arc<PriceFeed>,
        executor: Arc<ScriptedExecutor>,
        ledger: Arc<Mutex<BalanceLedger>>,
        manager: PositionManager,
    }

    impl Rig {
        fn new(strategy: StrategyConfig) -> Self {
            let source = Arc::new(MutablePrices(StdMutex::new(HashMap::new())));
            let feed = Arc::new(PriceFeed::new(source.clone()));
            let executor = Arc::new(ScriptedExecutor::new(dec!(1.0)));
            let ledger = Arc::new(Mutex::new(BalanceLedger::new(dec!(10.0))));
            let manager = PositionManager::new(
                strategy,
                feed.clone(),
                executor.clone(),
                ledger.clone(),
                Arc::new(EventBus::new()),
            );
            Self {
                source,
                feed,
                executor,
                ledger,
                manager,
            }
        }

        async fn set_price(&self, token: &str, price: Decimal) {
            self.source
                .0
                .lock()
                .unwrap()
                .insert(token.to_string(), price);
            self.feed.refresh_once().await.unwrap();
        }
    }

    fn strategy() -> StrategyConfig {
        StrategyConfig {
            take_profit_pct: dec!(10.0),
            stop_loss_pct: dec!(10.0),
            max_positions: 3,
            use_trailing_stop: false,
            max_hold_time_secs: 0,
            ..StrategyConfig::balanced()
        }
    }

    #[tokio::test]
    async fn open_rejects_beyond_max_positions() {
        let rig = Rig::new(strategy());

        for i in 0..3 {
            rig.manager
                .open(&format!("Mint{i}"), dec!(1.0), dec!(0.5), dec!(100), "W1")
                .await
                .unwrap();
        }

        let err = rig
            .manager
            .open("Mint3", dec!(1.0), dec!(0.5), dec!(100), "W1")
            .await
            .unwrap_err();
        assert!(matches!(err, PositionError::MaxPositionsReached(3)));
        assert_eq!(rig.manager.open_count().await, 3);

        // The rejected open left the ledger untouched
        assert_eq!(rig.ledger.lock().await.balance(), dec!(10.0));
    }

    #[tokio::test]
    async fn tp_and_sl_prices_derive_from_entry() {
        let rig = Rig::new(strategy());
        let position = rig
            .manager
            .open("MintA", dec!(100), dec!(1.0), dec!(1000), "W1")
            .await
            .unwrap();

        assert_eq!(position.take_profit_price, dec!(110.0));
        assert_eq!(position.stop_loss_price, dec!(90.0));
    }

    #[tokio::test]
    async fn max_hold_beats_price_thresholds() {
        let mut config = strategy();
        config.max_hold_time_secs = 100;
        let rig = Rig::new(config);

        let position = rig
            .manager
            .open("MintA", dec!(100), dec!(1.0), dec!(1000), "W1")
            .await
            .unwrap();
        rig.manager.backdate(&position.id, 150).await;

        // Price well inside both thresholds
        rig.set_price("MintA", dec!(95)).await;
        rig.manager.check_all().await;

        let closed = rig.manager.get(&position.id).await.unwrap();
        assert_eq!(closed.status, PositionStatus::Closed);
        assert_eq!(closed.close_reason, Some(CloseReason::MaxHoldTime));
    }

    #[tokio::test]
    async fn stop_loss_closes_and_credits_proceeds() {
        let rig = Rig::new(strategy());
        rig.executor.set_sell_output(dec!(0.85));

        let position = rig
            .manager
            .open("MintA", dec!(100), dec!(1.0), dec!(1000), "W1")
            .await
            .unwrap();

        rig.set_price("MintA", dec!(89)).await;
        rig.manager.check_all().await;

        let closed = rig.manager.get(&position.id).await.unwrap();
        assert_eq!(closed.close_reason, Some(CloseReason::StopLoss));
        assert_eq!(closed.exit_amount_sol, Some(dec!(0.85)));
        assert_eq!(closed.pnl_sol, Some(dec!(-0.15)));
        assert_eq!(closed.pnl_percentage, Some(dec!(-11)));

        assert_eq!(rig.ledger.lock().await.balance(), dec!(10.85));
        assert_eq!(rig.manager.open_count().await, 0);
    }

    #[tokio::test]
    async fn take_profit_pnl_is_exit_minus_entry() {
        let rig = Rig::new(strategy());
        rig.executor.set_sell_output(dec!(1.2));

        let position = rig
            .manager
            .open("MintA", dec!(100), dec!(1.0), dec!(1000), "W1")
            .await
            .unwrap();

        rig.set_price("MintA", dec!(120)).await;
        rig.manager.check_all().await;

        let closed = rig.manager.get(&position.id).await.unwrap();
        assert_eq!(closed.close_reason, Some(CloseReason::TakeProfit));
        assert_eq!(closed.pnl_sol, Some(dec!(0.2)));
        assert_eq!(closed.pnl_percentage, Some(dec!(20)));

        let stats = rig.manager.statistics().await;
        assert_eq!(stats.total_trades, 1);
        assert_eq!(stats.winning_trades, 1);
        assert_eq!(stats.losing_trades, 0);
        assert_eq!(stats.win_rate_pct, dec!(100));
        assert_eq!(stats.total_pnl_sol, dec!(0.2));
        assert_eq!(stats.average_pnl_sol, dec!(0.2));
    }

    #[tokio::test]
    async fn trailing_stop_ratchets_and_never_lowers() {
        let mut config = strategy();
        config.use_trailing_stop = true;
        config.trailing_stop_activation = dec!(10.0);
        config.trailing_stop_distance = dec!(10.0);
        config.take_profit_pct = dec!(100.0);
        config.stop_loss_pct = dec!(25.0);
        let rig = Rig::new(config);

        let position = rig
            .manager
            .open("MintA", dec!(1.0), dec!(1.0), dec!(1000), "W1")
            .await
            .unwrap();

        // +10% arms the stop at 1.1 * 0.9 = 0.99
        rig.set_price("MintA", dec!(1.1)).await;
        rig.manager.check_all().await;
        let p = rig.manager.get(&position.id).await.unwrap();
        assert_eq!(p.trailing_stop_price, Some(dec!(0.990)));

        // Profit dips under the activation level: the stop holds its level
        rig.set_price("MintA", dec!(1.05)).await;
        rig.manager.check_all().await;
        let p = rig.manager.get(&position.id).await.unwrap();
        assert_eq!(p.status, PositionStatus::Open);
        assert_eq!(p.trailing_stop_price, Some(dec!(0.990)));

        // New peak ratchets it up to 1.3 * 0.9 = 1.17
        rig.set_price("MintA", dec!(1.3)).await;
        rig.manager.check_all().await;
        let p = rig.manager.get(&position.id).await.unwrap();
        assert_eq!(p.trailing_stop_price, Some(dec!(1.170)));

        // Falling through the stop closes the position
        rig.set_price("MintA", dec!(1.15)).await;
        rig.manager.check_all().await;
        let p = rig.manager.get(&position.id).await.unwrap();
        assert_eq!(p.status, PositionStatus::Closed);
        assert_eq!(p.close_reason, Some(CloseReason::TrailingStop));
    }

    #[tokio::test]
    async fn failed_close_rolls_back_and_can_retry() {
        let rig = Rig::new(strategy());
        let position = rig
            .manager
            .open("MintA", dec!(100), dec!(1.0), dec!(1000), "W1")
            .await
            .unwrap();
        rig.set_price("MintA", dec!(89)).await;

        rig.executor.fail_sells.store(true, Ordering::SeqCst);
        let done = rig
            .manager
            .close(&position.id, CloseReason::StopLoss, None)
            .await
            .unwrap();
        assert!(!done);

        let p = rig.manager.get(&position.id).await.unwrap();
        assert_eq!(p.status, PositionStatus::Open);
        assert_eq!(rig.ledger.lock().await.balance(), dec!(10.0));

        // Retry succeeds once the executor recovers
        rig.executor.fail_sells.store(false, Ordering::SeqCst);
        let done = rig
            .manager
            .close(&position.id, CloseReason::StopLoss, None)
            .await
            .unwrap();
        assert!(done);
    }

    #[tokio::test]
    async fn closing_a_closed_position_is_rejected() {
        let rig = Rig::new(strategy());
        let position = rig
            .manager
            .open("MintA", dec!(100), dec!(1.0), dec!(1000), "W1")
            .await
            .unwrap();
        rig.set_price("MintA", dec!(100)).await;

        rig.manager
            .close(&position.id, CloseReason::Manual, None)
            .await
            .unwrap();

        let err = rig
            .manager
            .close(&position.id, CloseReason::Manual, None)
            .await
            .unwrap_err();
        assert!(matches!(err, PositionError::NotFound(_)));
    }
}

//! Per-strategy copy-trade decisioning.

use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::api::PriceSource;
use crate::events::{EventBus, TradeEvent};
use crate::models::{short_address, ChainEvent, TradeSide, TradeSignal};

use super::classifier::TradeClassifier;
use super::config::{EngineSettings, StrategyConfig};
use super::executor::Executor;
use super::ledger::BalanceLedger;
use super::position_manager::PositionManager;

/// Daily-loss circuit breaker state.
///
/// The reference balance starts at the session's starting balance and
/// re-baselines to the current portfolio value on the first check after a
/// full day has elapsed, so each day's losses are measured from that day's
/// starting point.
struct DailyLossGate {
    reference_balance: Option<Decimal>,
    last_reset: DateTime<Utc>,
}

/// Performance summary for one strategy engine.
#[derive(Debug, Clone)]
pub struct PerformanceStats {
    pub strategy_id: u32,
    pub strategy_name: String,
    pub starting_balance: Decimal,
    pub current_balance: Decimal,
    pub portfolio_value: Decimal,
    pub total_pnl_sol: Decimal,
    pub total_pnl_pct: Decimal,
    pub open_positions: usize,
    pub total_trades: usize,
    pub winning_trades: usize,
    pub losing_trades: usize,
    pub win_rate_pct: Decimal,
}

/// Decides whether and how large a copy trade to place for each incoming
/// signal, then drives execution, the ledger debit, and the position open
/// strictly in that order, so a failed execution leaves no trace.
pub struct StrategyEngine {
    strategy: StrategyConfig,
    settings: EngineSettings,
    classifier: Arc<dyn TradeClassifier>,
    prices: Arc<dyn PriceSource>,
    executor: Arc<dyn Executor>,
    ledger: Arc<Mutex<BalanceLedger>>,
    positions: Arc<PositionManager>,
    notifications: Arc<EventBus<TradeEvent>>,
    daily: Mutex<DailyLossGate>,
}

impl StrategyEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        strategy: StrategyConfig,
        settings: EngineSettings,
        classifier: Arc<dyn TradeClassifier>,
        prices: Arc<dyn PriceSource>,
        executor: Arc<dyn Executor>,
        ledger: Arc<Mutex<BalanceLedger>>,
        positions: Arc<PositionManager>,
        notifications: Arc<EventBus<TradeEvent>>,
    ) -> Self {
        info!(
            strategy = %strategy.name,
            strategy_id = strategy.id,
            "Strategy engine initialized"
        );
        Self {
            strategy,
            settings,
            classifier,
            prices,
            executor,
            ledger,
            positions,
            notifications,
            daily: Mutex::new(DailyLossGate {
                reference_balance: None,
                last_reset: Utc::now(),
            }),
        }
    }

    pub fn positions(&self) -> &Arc<PositionManager> {
        &self.positions
    }

    /// Handle one batch of new events for a wallet. A failure on one event
    /// never blocks the rest of the batch.
    pub async fn on_wallet_events(&self, wallet: &str, events: &[ChainEvent]) {
        for event in events {
            if let Err(e) = self.process_event(wallet, event).await {
                warn!(
                    wallet = %short_address(wallet),
                    signature = %event.signature,
                    error = %e,
                    "Failed to process event"
                );
            }
        }
    }

    async fn process_event(&self, wallet: &str, event: &ChainEvent) -> Result<()> {
        // "Not a trade" is the common case, not an error
        let Some(signal) = self.classifier.classify(wallet, event).await else {
            return Ok(());
        };

        // Sell-signal copying is out of scope for entries
        if signal.side != TradeSide::Buy {
            debug!(
                wallet = %short_address(wallet),
                side = %signal.side,
                "Skipping non-buy signal"
            );
            return Ok(());
        }

        if signal.sol_amount < self.strategy.min_wallet_trade_size {
            debug!(
                wallet = %short_address(wallet),
                size = %signal.sol_amount,
                min = %self.strategy.min_wallet_trade_size,
                "Source trade below minimum size"
            );
            return Ok(());
        }

        if self.daily_loss_tripped().await {
            warn!(
                strategy = %self.strategy.name,
                "Daily loss limit reached, not copying trade"
            );
            return Ok(());
        }

        self.copy_trade(&signal).await
    }

    /// Size and place the copy trade: price fetch, execute, debit, open.
    async fn copy_trade(&self, signal: &TradeSignal) -> Result<()> {
        let balance = self.ledger.lock().await.balance();

        let desired = balance * self.strategy.copy_percentage;
        let mut size = desired.clamp(self.settings.min_trade_size, self.settings.max_trade_size);

        let max_position_size = balance * self.strategy.position_size_pct;
        if size > max_position_size {
            size = max_position_size;
            info!(size = %size, "Trade size limited by position size cap");
        }

        if size > balance {
            warn!(
                balance = %balance,
                size = %size,
                "Insufficient balance for copy trade"
            );
            return Ok(());
        }

        // Early-out; the authoritative check happens inside open()
        if self.positions.open_count().await >= self.strategy.max_positions {
            debug!(
                max = self.strategy.max_positions,
                "Max positions reached, skipping signal"
            );
            return Ok(());
        }

        let token = &signal.token_address;
        let Some(price) = self.prices.price(token).await.context("price lookup failed")? else {
            warn!(token = %token, "No price for token, skipping trade");
            return Ok(());
        };

        info!(
            strategy = %self.strategy.name,
            token = %token,
            size = %size,
            quote = %price,
            source = %short_address(&signal.wallet),
            "Copying trade"
        );

        // Execution first: if it fails, no debit happens and no position opens
        let fill = match self.executor.buy(token, size).await {
            Ok(fill) => fill,
            Err(e) => {
                warn!(token = %token, error = %e, "Copy trade execution failed");
                return Ok(());
            }
        };

        // The debit is the trade size; fees are already netted out of the
        // executor's reported output
        {
            let mut ledger = self.ledger.lock().await;
            ledger
                .debit(size, format!("Copy trade {token}"))
                .map_err(|e| anyhow!("debit after fill failed: {e}"))?;
        }

        match self
            .positions
            .open(token, fill.price, size, fill.token_amount, &signal.wallet)
            .await
        {
            Ok(position) => {
                info!(
                    position = %position.id,
                    entry = %fill.price,
                    size = %size,
                    "Position opened"
                );

                self.notifications
                    .emit(TradeEvent::Executed {
                        strategy_id: self.strategy.id,
                        wallet_source: signal.wallet.clone(),
                        token_address: token.clone(),
                        side: TradeSide::Buy,
                        sol_amount: size,
                        price: fill.price,
                        at: Utc::now(),
                    })
                    .await;
            }
            Err(e) => {
                // The manager is authoritative; hand the reserved balance back
                error!(error = %e, "Position open rejected after debit, rolling back");
                let mut ledger = self.ledger.lock().await;
                if let Err(credit_err) = ledger.credit(size, format!("Rollback {token}")) {
                    error!(error = %credit_err, "Rollback credit failed");
                }
            }
        }

        Ok(())
    }

    /// True when the current day's losses have reached the limit.
    async fn daily_loss_tripped(&self) -> bool {
        let (balance, starting_balance) = {
            let ledger = self.ledger.lock().await;
            (ledger.balance(), ledger.starting_balance())
        };
        let current = balance + self.positions.open_entry_total().await;

        let mut gate = self.daily.lock().await;
        let now = Utc::now();
        if now - gate.last_reset >= Duration::days(1) {
            gate.last_reset = now;
            gate.reference_balance = Some(current);
        }

        let reference = *gate.reference_balance.get_or_insert(starting_balance);
        if reference <= Decimal::ZERO {
            return false;
        }

        let loss_pct = (reference - current) / reference * dec!(100);
        if loss_pct >= self.strategy.daily_loss_limit {
            warn!(
                loss_pct = %loss_pct,
                limit = %self.strategy.daily_loss_limit,
                "Daily loss limit reached"
            );
            return true;
        }
        false
    }

    /// Performance snapshot combining the ledger and the position book.
    pub async fn performance(&self) -> PerformanceStats {
        let (balance, starting_balance) = {
            let ledger = self.ledger.lock().await;
            (ledger.balance(), ledger.starting_balance())
        };

        let open = self.positions.open_positions().await;
        let open_value: Decimal = open
            .iter()
            .map(|p| p.entry_amount_sol + p.unrealized_pnl_sol())
            .sum();
        let portfolio_value = balance + open_value;

        let total_pnl = portfolio_value - starting_balance;
        let total_pnl_pct = if starting_balance.is_zero() {
            Decimal::ZERO
        } else {
            total_pnl / starting_balance * dec!(100)
        };

        let stats = self.positions.statistics().await;

        PerformanceStats {
            strategy_id: self.strategy.id,
            strategy_name: self.strategy.name.clone(),
            starting_balance,
            current_balance: balance,
            portfolio_value,
            total_pnl_sol: total_pnl,
            total_pnl_pct,
            open_positions: open.len(),
            total_trades: stats.total_trades,
            winning_trades: stats.winning_trades,
            losing_trades: stats.losing_trades,
            win_rate_pct: stats.win_rate_pct,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitor::PriceFeed;
    use crate::trading::executor::Fill;
    use crate::trading::fees::{FeeConfig, FeeModel};
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex as StdMutex;

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

    /// Classifier that resolves signatures through a fixed table.
    struct MapClassifier(HashMap<String, TradeSignal>);

    #[async_trait]
    impl TradeClassifier for MapClassifier {
        async fn classify(&self, _wallet: &str, event: &ChainEvent) -> Option<TradeSignal> {
            self.0.get(&event.signature).cloned()
        }
    }

    struct CountingExecutor {
        buys: AtomicUsize,
        fail_buys: AtomicBool,
    }

    impl CountingExecutor {
        fn new() -> Self {
            Self {
                buys: AtomicUsize::new(0),
                fail_buys: AtomicBool::new(false),
            }
        }
    }

    #[async_trait]
    impl Executor for CountingExecutor {
        async fn buy(&self, _token: &str, sol_amount: Decimal) -> Result<Fill> {
            if self.fail_buys.load(Ordering::SeqCst) {
                anyhow::bail!("buy rejected");
            }
            self.buys.fetch_add(1, Ordering::SeqCst);
            Ok(Fill {
                token_amount: sol_amount / dec!(0.001),
                sol_amount,
                price: dec!(0.001),
                price_impact_pct: dec!(0.1),
                fees: FeeModel::with_seed(FeeConfig::default(), 1).quote(sol_amount, 100),
            })
        }

        async fn sell(&self, _token: &str, token_amount: Decimal) -> Result<Fill> {
            Ok(Fill {
                token_amount,
                sol_amount: token_amount * dec!(0.001),
                price: dec!(0.001),
                price_impact_pct: dec!(0.1),
                fees: FeeModel::with_seed(FeeConfig::default(), 1).quote(dec!(1), 100),
            })
        }
    }

    struct Rig {
        engine: StrategyEngine,
        executor: Arc<CountingExecutor>,
        ledger: Arc<Mutex<BalanceLedger>>,
        manager: Arc<PositionManager>,
        events: Arc<StdMutex<Vec<TradeEvent>>>,
    }

    fn buy_signal(sol_amount: Decimal) -> TradeSignal {
        TradeSignal {
            wallet: "SourceWallet1".to_string(),
            token_address: "MintA".to_string(),
            side: TradeSide::Buy,
            sol_amount,
            observed_at: Utc::now(),
        }
    }

    fn chain_event(signature: &str) -> ChainEvent {
        ChainEvent {
            signature: signature.to_string(),
            slot: 1,
            block_time: Some(Utc::now()),
            raw: json!({}),
        }
    }

    async fn rig_with(
        engine_config: StrategyConfig,
        manager_config: StrategyConfig,
        signals: HashMap<String, TradeSignal>,
        balance: Decimal,
    ) -> Rig {
        let prices = Arc::new(FixedPrices(HashMap::from([(
            "MintA".to_string(),
            dec!(0.001),
        )])));
        let feed = Arc::new(PriceFeed::new(prices.clone()));
        let executor = Arc::new(CountingExecutor::new());
        let ledger = Arc::new(Mutex::new(BalanceLedger::new(balance)));
        let notifications = Arc::new(EventBus::new());

        let events = Arc::new(StdMutex::new(Vec::new()));
        let sink = events.clone();
        notifications
            .subscribe(move |event: TradeEvent| {
                let sink = sink.clone();
                async move {
                    sink.lock().unwrap().push(event);
                    Ok(())
                }
            })
            .await;

        let manager = Arc::new(PositionManager::new(
            manager_config,
            feed,
            executor.clone(),
            ledger.clone(),
            notifications.clone(),
        ));

        let engine = StrategyEngine::new(
            engine_config,
            EngineSettings::default(),
            Arc::new(MapClassifier(signals)),
            prices,
            executor.clone(),
            ledger.clone(),
            manager.clone(),
            notifications,
        );

        Rig {
            engine,
            executor,
            ledger,
            manager,
            events,
        }
    }

    fn test_strategy() -> StrategyConfig {
        StrategyConfig {
            copy_percentage: dec!(0.2),
            min_wallet_trade_size: dec!(0.01),
            position_size_pct: dec!(0.2),
            max_positions: 5,
            daily_loss_limit: dec!(15.0),
            ..StrategyConfig::balanced()
        }
    }

    #[tokio::test]
    async fn copy_size_is_clamped_by_global_and_position_limits() {
        // balance 10, copy 20% => desired 2.0, global max 1.0, position cap
        // 0.2 * 10 = 2.0 leaves it alone => final 1.0
        let signals = HashMap::from([("s1".to_string(), buy_signal(dec!(1.5)))]);
        let rig = rig_with(test_strategy(), test_strategy(), signals, dec!(10.0)).await;

        rig.engine
            .on_wallet_events("SourceWallet1", &[chain_event("s1")])
            .await;

        assert_eq!(rig.executor.buys.load(Ordering::SeqCst), 1);
        assert_eq!(rig.ledger.lock().await.balance(), dec!(9.0));

        let open = rig.manager.open_positions().await;
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].entry_amount_sol, dec!(1.0));
        assert_eq!(open[0].wallet_source, "SourceWallet1");

        let events = rig.events.lock().unwrap();
        assert!(matches!(
            events.first(),
            Some(TradeEvent::Executed { sol_amount, .. }) if *sol_amount == dec!(1.0)
        ));
    }

    #[tokio::test]
    async fn source_trades_below_minimum_are_skipped() {
        let mut strategy = test_strategy();
        strategy.min_wallet_trade_size = dec!(0.5);
        let signals = HashMap::from([("s1".to_string(), buy_signal(dec!(0.3)))]);
        let rig = rig_with(strategy.clone(), strategy, signals, dec!(10.0)).await;

        rig.engine
            .on_wallet_events("SourceWallet1", &[chain_event("s1")])
            .await;

        assert_eq!(rig.executor.buys.load(Ordering::SeqCst), 0);
        assert_eq!(rig.ledger.lock().await.balance(), dec!(10.0));
    }

    #[tokio::test]
    async fn sell_signals_are_ignored() {
        let mut signal = buy_signal(dec!(1.0));
        signal.side = TradeSide::Sell;
        let signals = HashMap::from([("s1".to_string(), signal)]);
        let rig = rig_with(test_strategy(), test_strategy(), signals, dec!(10.0)).await;

        rig.engine
            .on_wallet_events("SourceWallet1", &[chain_event("s1")])
            .await;

        assert_eq!(rig.executor.buys.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn unclassified_events_are_skipped_silently() {
        let rig = rig_with(test_strategy(), test_strategy(), HashMap::new(), dec!(10.0)).await;

        rig.engine
            .on_wallet_events("SourceWallet1", &[chain_event("mystery")])
            .await;

        assert_eq!(rig.executor.buys.load(Ordering::SeqCst), 0);
        assert_eq!(rig.manager.open_count().await, 0);
    }

    #[tokio::test]
    async fn failed_execution_leaves_no_debit_and_no_position() {
        let signals = HashMap::from([("s1".to_string(), buy_signal(dec!(1.0)))]);
        let rig = rig_with(test_strategy(), test_strategy(), signals, dec!(10.0)).await;
        rig.executor.fail_buys.store(true, Ordering::SeqCst);

        rig.engine
            .on_wallet_events("SourceWallet1", &[chain_event("s1")])
            .await;

        assert_eq!(rig.ledger.lock().await.balance(), dec!(10.0));
        assert_eq!(rig.manager.open_count().await, 0);
    }

    #[tokio::test]
    async fn max_positions_early_out_skips_execution() {
        let mut strategy = test_strategy();
        strategy.max_positions = 1;
        let signals = HashMap::from([
            ("s1".to_string(), buy_signal(dec!(1.0))),
            ("s2".to_string(), buy_signal(dec!(1.0))),
        ]);
        let rig = rig_with(strategy.clone(), strategy, signals, dec!(10.0)).await;

        rig.engine
            .on_wallet_events("SourceWallet1", &[chain_event("s1"), chain_event("s2")])
            .await;

        assert_eq!(rig.executor.buys.load(Ordering::SeqCst), 1);
        assert_eq!(rig.manager.open_count().await, 1);
    }

    #[tokio::test]
    async fn authoritative_open_rejection_rolls_the_debit_back() {
        // Engine believes it has room; the manager (authoritative) does not
        let mut manager_config = test_strategy();
        manager_config.max_positions = 0;
        let signals = HashMap::from([("s1".to_string(), buy_signal(dec!(1.0)))]);
        let rig = rig_with(test_strategy(), manager_config, signals, dec!(10.0)).await;

        rig.engine
            .on_wallet_events("SourceWallet1", &[chain_event("s1")])
            .await;

        assert_eq!(rig.manager.open_count().await, 0);
        assert_eq!(rig.ledger.lock().await.balance(), dec!(10.0));
    }

    #[tokio::test]
    async fn daily_loss_gate_blocks_new_copies() {
        let signals = HashMap::from([("s1".to_string(), buy_signal(dec!(1.0)))]);
        let rig = rig_with(test_strategy(), test_strategy(), signals, dec!(10.0)).await;

        // Burn 80% of the balance with no open positions backing it
        rig.ledger
            .lock()
            .await
            .debit(dec!(8.0), "realized loss")
            .unwrap();

        rig.engine
            .on_wallet_events("SourceWallet1", &[chain_event("s1")])
            .await;

        assert_eq!(rig.executor.buys.load(Ordering::SeqCst), 0);
        assert_eq!(rig.manager.open_count().await, 0);
    }

    #[tokio::test]
    async fn performance_reflects_balance_and_open_positions() {
        let signals = HashMap::from([("s1".to_string(), buy_signal(dec!(1.0)))]);
        let rig = rig_with(test_strategy(), test_strategy(), signals, dec!(10.0)).await;

        rig.engine
            .on_wallet_events("SourceWallet1", &[chain_event("s1")])
            .await;

        let stats = rig.engine.performance().await;
        assert_eq!(stats.current_balance, dec!(9.0));
        // Entry value carried at cost while the price is unchanged
        assert_eq!(stats.portfolio_value, dec!(10.0));
        assert_eq!(stats.open_positions, 1);
        assert_eq!(stats.total_trades, 0);
    }
}

//! Trading session: the explicit context object owning all engine state.
//!
//! One session owns its ledger, monitor, price feed, event buses, and one
//! engine/manager pair per active strategy. Everything is created at
//! startup, wired here, and torn down cooperatively on shutdown; there are
//! no process-wide globals.

use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::api::{ChainReader, PriceSource};
use crate::events::{EventBus, TradeEvent, WalletEvents};
use crate::models::TrackedWallet;
use crate::monitor::{PriceFeed, WalletTransactionMonitor};
use crate::trading::{
    BalanceLedger, EngineSettings, Executor, FeeConfig, PerformanceStats, PositionManager,
    StrategyConfig, StrategyEngine, TradeClassifier,
};

/// Session-level configuration.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Starting balance in SOL
    pub initial_balance: Decimal,

    /// Wallet polling cadence
    pub poll_interval: Duration,

    /// Price refresh cadence
    pub price_interval: Duration,

    /// Position evaluation cadence
    pub tick_interval: Duration,

    /// Signatures fetched per wallet per poll
    pub signature_fetch_limit: usize,

    /// Engine-wide trade limits
    pub settings: EngineSettings,

    /// Fee model parameters
    pub fees: FeeConfig,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            initial_balance: dec!(10.0),
            poll_interval: Duration::from_millis(2000),
            price_interval: Duration::from_millis(1000),
            tick_interval: Duration::from_millis(1000),
            signature_fetch_limit: 10,
            settings: EngineSettings::default(),
            fees: FeeConfig::default(),
        }
    }
}

impl SessionConfig {
    /// Build from `SOLCOPIER_*` environment variables, falling back to
    /// defaults for anything unset or unparsable.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let default_settings = EngineSettings::default();
        let default_fees = FeeConfig::default();

        Self {
            initial_balance: env_or("SOLCOPIER_INITIAL_BALANCE", defaults.initial_balance),
            poll_interval: Duration::from_millis(env_or("SOLCOPIER_POLL_INTERVAL_MS", 2000)),
            price_interval: Duration::from_millis(env_or("SOLCOPIER_PRICE_INTERVAL_MS", 1000)),
            tick_interval: Duration::from_millis(env_or("SOLCOPIER_TICK_INTERVAL_MS", 1000)),
            signature_fetch_limit: env_or("SOLCOPIER_FETCH_LIMIT", 10),
            settings: EngineSettings {
                min_trade_size: env_or("SOLCOPIER_MIN_TRADE_SIZE", default_settings.min_trade_size),
                max_trade_size: env_or("SOLCOPIER_MAX_TRADE_SIZE", default_settings.max_trade_size),
                slippage_bps: env_or("SOLCOPIER_SLIPPAGE_BPS", default_settings.slippage_bps),
            },
            fees: FeeConfig {
                base_network_fee: env_or(
                    "SOLCOPIER_BASE_NETWORK_FEE",
                    default_fees.base_network_fee,
                ),
                priority_fee_lamports: env_or(
                    "SOLCOPIER_PRIORITY_FEE_LAMPORTS",
                    default_fees.priority_fee_lamports,
                ),
                platform_fee_bps: env_or(
                    "SOLCOPIER_PLATFORM_FEE_BPS",
                    default_fees.platform_fee_bps,
                ),
            },
        }
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    match std::env::var(key) {
        Ok(raw) => match raw.parse() {
            Ok(value) => value,
            Err(_) => {
                warn!(key = key, value = %raw, "Unparsable setting, using default");
                default
            }
        },
        Err(_) => default,
    }
}

/// A running copy-trading session.
pub struct TradingSession {
    config: SessionConfig,
    ledger: Arc<Mutex<BalanceLedger>>,
    monitor: Arc<WalletTransactionMonitor>,
    price_feed: Arc<PriceFeed>,
    notifications: Arc<EventBus<TradeEvent>>,
    engines: Vec<Arc<StrategyEngine>>,
    shutdown: Arc<AtomicBool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl TradingSession {
    /// Build a session and wire each strategy engine into the monitor's
    /// event bus.
    pub async fn new(
        config: SessionConfig,
        reader: Arc<dyn ChainReader>,
        prices: Arc<dyn PriceSource>,
        classifier: Arc<dyn TradeClassifier>,
        executor: Arc<dyn Executor>,
        strategies: Vec<StrategyConfig>,
    ) -> Arc<Self> {
        let ledger = Arc::new(Mutex::new(BalanceLedger::new(config.initial_balance)));
        let monitor = Arc::new(WalletTransactionMonitor::new(
            reader,
            config.signature_fetch_limit,
        ));
        let price_feed = Arc::new(PriceFeed::new(prices.clone()));
        let notifications = Arc::new(EventBus::new());

        let mut engines = Vec::with_capacity(strategies.len());
        for strategy in strategies {
            let manager = Arc::new(PositionManager::new(
                strategy.clone(),
                price_feed.clone(),
                executor.clone(),
                ledger.clone(),
                notifications.clone(),
            ));

            let engine = Arc::new(StrategyEngine::new(
                strategy,
                config.settings.clone(),
                classifier.clone(),
                prices.clone(),
                executor.clone(),
                ledger.clone(),
                manager,
                notifications.clone(),
            ));

            let handler_engine = engine.clone();
            monitor
                .events()
                .subscribe(move |batch: WalletEvents| {
                    let engine = handler_engine.clone();
                    async move {
                        engine.on_wallet_events(&batch.wallet, &batch.events).await;
                        Ok(())
                    }
                })
                .await;

            engines.push(engine);
        }

        info!(
            strategies = engines.len(),
            initial_balance = %config.initial_balance,
            "Trading session created"
        );

        Arc::new(Self {
            config,
            ledger,
            monitor,
            price_feed,
            notifications,
            engines,
            shutdown: Arc::new(AtomicBool::new(false)),
            tasks: Mutex::new(Vec::new()),
        })
    }

    pub fn notifications(&self) -> &Arc<EventBus<TradeEvent>> {
        &self.notifications
    }

    pub fn monitor(&self) -> &Arc<WalletTransactionMonitor> {
        &self.monitor
    }

    pub fn engines(&self) -> &[Arc<StrategyEngine>] {
        &self.engines
    }

    pub async fn balance(&self) -> Decimal {
        self.ledger.lock().await.balance()
    }

    /// Start tracking a source wallet.
    pub async fn track_wallet(&self, address: &str, label: Option<String>) {
        let mut wallet = TrackedWallet::new(address);
        if let Some(label) = label {
            wallet = wallet.with_label(label);
        }
        self.monitor.track(wallet).await;
    }

    pub async fn untrack_wallet(&self, address: &str) {
        self.monitor.untrack(address).await;
    }

    /// Spawn the polling, pricing, and position-tick loops.
    pub async fn start(&self) {
        let mut tasks = self.tasks.lock().await;

        tasks.push(tokio::spawn(
            self.monitor
                .clone()
                .run(self.config.poll_interval, self.shutdown.clone()),
        ));
        tasks.push(tokio::spawn(
            self.price_feed
                .clone()
                .run(self.config.price_interval, self.shutdown.clone()),
        ));
        for engine in &self.engines {
            tasks.push(tokio::spawn(
                engine
                    .positions()
                    .clone()
                    .run(self.config.tick_interval, self.shutdown.clone()),
            ));
        }

        info!(tasks = tasks.len(), "Session loops started");
    }

    /// Cooperative shutdown: in-flight polls and ticks complete, then the
    /// loops exit and their tasks are joined.
    pub async fn stop(&self) {
        self.shutdown.store(true, Ordering::SeqCst);

        let mut tasks = self.tasks.lock().await;
        for task in tasks.drain(..) {
            if let Err(e) = task.await {
                warn!(error = %e, "Session task ended abnormally");
            }
        }

        info!("Session stopped");
    }

    /// Run until ctrl-c, then stop cleanly.
    pub async fn run_until_interrupted(&self) {
        self.start().await;

        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            tokio::signal::ctrl_c().await.ok();
            info!("Shutdown signal received");
            shutdown.store(true, Ordering::SeqCst);
        });

        while !self.shutdown.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_millis(250)).await;
        }

        self.stop().await;
    }

    /// Per-strategy performance snapshots.
    pub async fn performance(&self) -> Vec<PerformanceStats> {
        let mut stats = Vec::with_capacity(self.engines.len());
        for engine in &self.engines {
            stats.push(engine.performance().await);
        }
        stats
    }
}

//! Solana Copy-Trading Engine
//!
//! Watches tracked source wallets, mirrors their buys at a risk-managed
//! scale, and manages the resulting positions until exit.

mod api;
mod errors;
mod events;
mod models;
mod monitor;
mod session;
mod trading;

use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use rust_decimal::Decimal;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use crate::api::{DexClient, RpcClient};
use crate::events::TradeEvent;
use crate::session::{SessionConfig, TradingSession};
use crate::trading::{FeeModel, NoopClassifier, SimulatedExecutor, StrategyConfig};

/// Solana copy-trading engine CLI.
#[derive(Parser)]
#[command(name = "solcopier")]
#[command(about = "Copy trades from tracked Solana wallets", long_about = None)]
struct Cli {
    /// RPC endpoint
    #[arg(
        short,
        long,
        env = "SOLCOPIER_RPC_URL",
        default_value = "https://api.mainnet-beta.solana.com"
    )]
    rpc_url: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a paper-trading session over the given wallets
    Run {
        /// Source wallet address to copy (repeatable)
        #[arg(short, long = "wallet", required = true)]
        wallets: Vec<String>,

        /// Strategy preset id (1-5)
        #[arg(short, long, default_value = "2")]
        strategy: u32,

        /// Starting balance in SOL
        #[arg(short, long)]
        balance: Option<Decimal>,
    },

    /// Compare the built-in strategy presets
    Strategies,

    /// Show the fee breakdown for a trade size
    Fees {
        /// Trade amount in SOL
        #[arg(short, long, default_value = "1.0")]
        amount: Decimal,

        /// Slippage tolerance in basis points
        #[arg(short, long, default_value = "100")]
        slippage_bps: u32,
    },

    /// Show the effective session configuration
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let log_level = match cli.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match cli.command {
        Commands::Run {
            wallets,
            strategy,
            balance,
        } => {
            let Some(strategy) = StrategyConfig::by_id(strategy) else {
                println!("Unknown strategy id {strategy}. See 'solcopier strategies'.");
                return Ok(());
            };

            let mut config = SessionConfig::from_env();
            if let Some(balance) = balance {
                config.initial_balance = balance;
            }

            let reader = Arc::new(RpcClient::new(&cli.rpc_url)?);
            let prices = Arc::new(DexClient::new()?);
            let fees = Arc::new(FeeModel::new(config.fees.clone()));
            let executor = Arc::new(SimulatedExecutor::new(
                prices.clone(),
                fees,
                config.settings.slippage_bps,
            ));

            info!(
                strategy = %strategy.name,
                wallets = wallets.len(),
                balance = %config.initial_balance,
                "Starting copy-trading session"
            );

            let session = TradingSession::new(
                config.clone(),
                reader,
                prices,
                Arc::new(NoopClassifier),
                executor,
                vec![strategy.clone()],
            )
            .await;

            // Surface engine notifications on stdout; a chat front-end would
            // subscribe the same way
            session
                .notifications()
                .subscribe(|event: TradeEvent| async move {
                    match event {
                        TradeEvent::Executed {
                            strategy_id,
                            token_address,
                            side,
                            sol_amount,
                            price,
                            wallet_source,
                            at,
                        } => {
                            println!(
                                "[{}] [s{strategy_id}] TRADE {side} {sol_amount} SOL -> {token_address} @ {price} (copying {wallet_source})",
                                at.format("%H:%M:%S")
                            );
                        }
                        TradeEvent::PositionClosed {
                            strategy_id,
                            position_id,
                            token_address,
                            reason,
                            pnl_sol,
                            pnl_percentage,
                            at,
                        } => {
                            println!(
                                "[{}] [s{strategy_id}] CLOSE {token_address} ({position_id}): {reason}, PnL {pnl_sol} SOL ({pnl_percentage}%)",
                                at.format("%H:%M:%S")
                            );
                        }
                    }
                    Ok(())
                })
                .await;

            for wallet in &wallets {
                session.track_wallet(wallet, None).await;
            }

            println!("\n=== Solana Copy-Trading Session ===");
            println!("Strategy:  {} ({})", strategy.name, strategy.description);
            println!("Balance:   {} SOL", config.initial_balance);
            println!("Wallets:   {}", wallets.len());
            println!("Mode:      PAPER (simulated execution)");
            println!("\nPress Ctrl+C to stop.\n");

            session.run_until_interrupted().await;

            for stats in session.performance().await {
                println!("\n=== {} ===", stats.strategy_name);
                println!("Starting balance: {:.4} SOL", stats.starting_balance);
                println!("Final balance:    {:.4} SOL", stats.current_balance);
                println!("Portfolio value:  {:.4} SOL", stats.portfolio_value);
                println!(
                    "Total PnL:        {:.4} SOL ({:.2}%)",
                    stats.total_pnl_sol, stats.total_pnl_pct
                );
                println!(
                    "Trades:           {} (won {}, lost {}, win rate {:.1}%)",
                    stats.total_trades,
                    stats.winning_trades,
                    stats.losing_trades,
                    stats.win_rate_pct
                );
                println!("Open positions:   {}", stats.open_positions);
            }
        }

        Commands::Strategies => {
            println!(
                "\n{:<4} {:<14} {:>6} {:>6} {:>7} {:>9} {:>11} {:<40}",
                "ID", "NAME", "TP%", "SL%", "SLIP%", "MAX POS", "HOLD", "DESCRIPTION"
            );
            println!("{}", "-".repeat(104));

            for preset in StrategyConfig::presets() {
                let hold = if preset.max_hold_time_secs > 0 {
                    format!("{}s", preset.max_hold_time_secs)
                } else {
                    "unlimited".to_string()
                };
                println!(
                    "{:<4} {:<14} {:>6.1} {:>6.1} {:>7.1} {:>9} {:>11} {:<40}",
                    preset.id,
                    preset.name,
                    preset.take_profit_pct,
                    preset.stop_loss_pct,
                    preset.max_slippage,
                    preset.max_positions,
                    hold,
                    preset.description
                );
            }
        }

        Commands::Fees {
            amount,
            slippage_bps,
        } => {
            let config = SessionConfig::from_env();
            let model = FeeModel::new(config.fees);
            let quote = model.quote(amount, slippage_bps);

            println!("\nSwap of {amount} SOL at {slippage_bps} bps tolerance:\n");
            println!("{quote}");
            println!(
                "  Total Cost:    {:.6} SOL",
                amount + quote.total_fee
            );
            println!(
                "  Net Proceeds:  {:.6} SOL",
                amount - quote.total_fee
            );
            println!("  Fee Share:     {:.2}%", quote.total_fee_pct(amount));
        }

        Commands::Config => {
            let config = SessionConfig::from_env();

            println!("\n=== Session Configuration ===\n");
            println!("Initial Balance:    {} SOL", config.initial_balance);
            println!("Poll Interval:      {}ms", config.poll_interval.as_millis());
            println!("Price Interval:     {}ms", config.price_interval.as_millis());
            println!("Tick Interval:      {}ms", config.tick_interval.as_millis());
            println!("Fetch Limit:        {} signatures", config.signature_fetch_limit);

            println!("\nTrade Limits:");
            println!("  Min Trade Size:   {} SOL", config.settings.min_trade_size);
            println!("  Max Trade Size:   {} SOL", config.settings.max_trade_size);
            println!("  Slippage:         {} bps", config.settings.slippage_bps);

            println!("\nFees:");
            println!("  Network Fee:      {} SOL", config.fees.base_network_fee);
            println!(
                "  Priority Fee:     {} lamports",
                config.fees.priority_fee_lamports
            );
            println!("  Platform Fee:     {} bps", config.fees.platform_fee_bps);

            println!("\nRPC URL:            {}", cli.rpc_url);
        }
    }

    Ok(())
}

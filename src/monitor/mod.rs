//! Polling loops: wallet transactions and token prices.

mod price_feed;
mod transaction_monitor;

pub use price_feed::PriceFeed;
pub use transaction_monitor::{MonitorStatus, WalletTransactionMonitor};

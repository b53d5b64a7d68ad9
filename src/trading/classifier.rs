//! Trade classification seam.
//!
//! Turning a raw chain event into a normalized trade requires parsing DEX
//! program instructions, which lives outside this crate. The engine depends
//! on the capability, not an implementation.

use async_trait::async_trait;

use crate::models::{ChainEvent, TradeSignal};

/// Classifies a raw chain event as a trade, or not.
#[async_trait]
pub trait TradeClassifier: Send + Sync {
    /// `None` means "not a trade"; the event is silently skipped.
    async fn classify(&self, wallet: &str, event: &ChainEvent) -> Option<TradeSignal>;
}

/// Classifier that never detects a trade.
///
/// Stands in until a real instruction parser is plugged in; with it wired,
/// the pipeline runs end-to-end but places no copy trades.
pub struct NoopClassifier;

#[async_trait]
impl TradeClassifier for NoopClassifier {
    async fn classify(&self, _wallet: &str, _event: &ChainEvent) -> Option<TradeSignal> {
        None
    }
}

//! Typed event fan-out for new-transaction batches and trade notifications.
//!
//! Handlers are registered with [`EventBus::subscribe`], which returns a
//! token for clean unregistration. A handler error is logged and never
//! propagated to the emitter or to other handlers.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use rust_decimal::Decimal;
use tokio::sync::RwLock;
use tracing::warn;

use crate::models::{ChainEvent, CloseReason, TradeSide};

/// Opaque handle identifying a registered handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerToken(u64);

type Handler<E> = Arc<dyn Fn(E) -> BoxFuture<'static, Result<()>> + Send + Sync>;

/// A bus for one kind of event.
pub struct EventBus<E> {
    handlers: RwLock<HashMap<u64, Handler<E>>>,
    next_id: AtomicU64,
}

impl<E: Clone + Send + 'static> EventBus<E> {
    pub fn new() -> Self {
        Self {
            handlers: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register an async handler; the returned token unregisters it.
    pub async fn subscribe<F, Fut>(&self, handler: F) -> HandlerToken
    where
        F: Fn(E) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<()>> + Send + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let boxed: Handler<E> = Arc::new(move |event| Box::pin(handler(event)));
        self.handlers.write().await.insert(id, boxed);
        HandlerToken(id)
    }

    /// Remove a handler. Returns false if the token was already gone.
    pub async fn unsubscribe(&self, token: HandlerToken) -> bool {
        self.handlers.write().await.remove(&token.0).is_some()
    }

    /// Deliver an event to every handler, isolating failures per handler.
    pub async fn emit(&self, event: E) {
        let handlers: Vec<(u64, Handler<E>)> = {
            let guard = self.handlers.read().await;
            guard.iter().map(|(id, h)| (*id, h.clone())).collect()
        };

        for (id, handler) in handlers {
            if let Err(e) = handler(event.clone()).await {
                warn!(handler_id = id, error = %e, "Event handler failed");
            }
        }
    }

    pub async fn handler_count(&self) -> usize {
        self.handlers.read().await.len()
    }
}

impl<E: Clone + Send + 'static> Default for EventBus<E> {
    fn default() -> Self {
        Self::new()
    }
}

/// A batch of new confirmed transactions for one wallet.
#[derive(Debug, Clone)]
pub struct WalletEvents {
    pub wallet: String,
    pub events: Vec<ChainEvent>,
}

/// Outbound notifications for UI layers to subscribe to.
#[derive(Debug, Clone)]
pub enum TradeEvent {
    /// A copy trade was executed and a position opened.
    Executed {
        strategy_id: u32,
        wallet_source: String,
        token_address: String,
        side: TradeSide,
        sol_amount: Decimal,
        price: Decimal,
        at: DateTime<Utc>,
    },

    /// A position reached its terminal state.
    PositionClosed {
        strategy_id: u32,
        position_id: String,
        token_address: String,
        reason: CloseReason,
        pnl_sol: Decimal,
        pnl_percentage: Decimal,
        at: DateTime<Utc>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[tokio::test]
    async fn emit_reaches_all_handlers() {
        let bus: EventBus<u32> = EventBus::new();
        let seen = Arc::new(AtomicUsize::new(0));

        let s1 = seen.clone();
        bus.subscribe(move |v: u32| {
            let s = s1.clone();
            async move {
                s.fetch_add(v as usize, Ordering::SeqCst);
                Ok(())
            }
        })
        .await;

        let s2 = seen.clone();
        bus.subscribe(move |v: u32| {
            let s = s2.clone();
            async move {
                s.fetch_add(v as usize, Ordering::SeqCst);
                Ok(())
            }
        })
        .await;

        bus.emit(3).await;
        assert_eq!(seen.load(Ordering::SeqCst), 6);
    }

    #[tokio::test]
    async fn failing_handler_does_not_block_others() {
        let bus: EventBus<u32> = EventBus::new();
        let seen = Arc::new(AtomicUsize::new(0));

        bus.subscribe(|_v: u32| async { Err(anyhow::anyhow!("boom")) })
            .await;

        let s = seen.clone();
        bus.subscribe(move |_v: u32| {
            let s = s.clone();
            async move {
                s.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        })
        .await;

        bus.emit(1).await;
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unsubscribe_removes_handler() {
        let bus: EventBus<u32> = EventBus::new();
        let token = bus.subscribe(|_v: u32| async { Ok(()) }).await;

        assert_eq!(bus.handler_count().await, 1);
        assert!(bus.unsubscribe(token).await);
        assert!(!bus.unsubscribe(token).await);
        assert_eq!(bus.handler_count().await, 0);
    }
}

//! Periodic price refresh for the tracked token set.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tokio::time::interval;
use tracing::{debug, info, warn};

use crate::api::PriceSource;
use crate::models::percentage_change;

/// Price points kept per token.
const MAX_HISTORY: usize = 1000;

/// Read-mostly price map refreshed in batches.
///
/// Readers take a snapshot (one `Arc` clone under a short read lock) and the
/// refresh task swaps in a freshly built map, so lookups never wait on an
/// in-flight refresh.
pub struct PriceFeed {
    source: Arc<dyn PriceSource>,
    tracked: RwLock<HashSet<String>>,
    prices: RwLock<Arc<HashMap<String, Decimal>>>,
    history: Mutex<HashMap<String, VecDeque<(DateTime<Utc>, Decimal)>>>,
}

impl PriceFeed {
    pub fn new(source: Arc<dyn PriceSource>) -> Self {
        Self {
            source,
            tracked: RwLock::new(HashSet::new()),
            prices: RwLock::new(Arc::new(HashMap::new())),
            history: Mutex::new(HashMap::new()),
        }
    }

    /// Start refreshing a token's price.
    pub fn add_token(&self, token_address: impl Into<String>) {
        let token = token_address.into();
        if self.tracked.write().expect("tracked lock").insert(token.clone()) {
            debug!(token = %token, "Tracking token price");
        }
    }

    /// Stop refreshing a token and drop its cached state.
    pub fn remove_token(&self, token_address: &str) {
        self.tracked.write().expect("tracked lock").remove(token_address);
        self.history.lock().expect("history lock").remove(token_address);

        let mut prices = self.prices.write().expect("prices lock");
        if prices.contains_key(token_address) {
            let mut next = (**prices).clone();
            next.remove(token_address);
            *prices = Arc::new(next);
        }
    }

    /// Latest quoted price, if any.
    pub fn get_price(&self, token_address: &str) -> Option<Decimal> {
        self.snapshot().get(token_address).copied()
    }

    /// Current price map snapshot.
    pub fn snapshot(&self) -> Arc<HashMap<String, Decimal>> {
        self.prices.read().expect("prices lock").clone()
    }

    /// Tokens currently tracked.
    pub fn tracked_tokens(&self) -> Vec<String> {
        self.tracked
            .read()
            .expect("tracked lock")
            .iter()
            .cloned()
            .collect()
    }

    /// Fetch quotes for the tracked set and swap the snapshot.
    pub async fn refresh_once(&self) -> Result<()> {
        let tokens = self.tracked_tokens();
        if tokens.is_empty() {
            return Ok(());
        }

        let fetched = self.source.prices(&tokens).await?;
        if fetched.is_empty() {
            return Ok(());
        }

        let now = Utc::now();
        {
            let mut history = self.history.lock().expect("history lock");
            for (token, price) in &fetched {
                let points = history.entry(token.clone()).or_default();
                points.push_back((now, *price));
                while points.len() > MAX_HISTORY {
                    points.pop_front();
                }
            }
        }

        // Tokens missing from this batch keep their previous quote
        let mut next = (*self.snapshot()).clone();
        next.extend(fetched);
        *self.prices.write().expect("prices lock") = Arc::new(next);

        Ok(())
    }

    /// Price change percentage over the trailing window, or since tracking
    /// began when no window is given.
    pub fn price_change_pct(&self, token_address: &str, window_secs: Option<i64>) -> Option<Decimal> {
        let history = self.history.lock().expect("history lock");
        let points = history.get(token_address)?;
        if points.len() < 2 {
            return None;
        }

        let (_, current) = *points.back()?;
        let old = match window_secs {
            Some(secs) => {
                let cutoff = Utc::now() - chrono::Duration::seconds(secs);
                points
                    .iter()
                    .rev()
                    .skip(1)
                    .find(|(ts, _)| *ts <= cutoff)
                    .map(|(_, p)| *p)
                    .unwrap_or(points.front()?.1)
            }
            None => points.front()?.1,
        };

        if old.is_zero() {
            return None;
        }
        Some(percentage_change(old, current))
    }

    /// Refresh on an interval until `shutdown` is set.
    pub async fn run(self: Arc<Self>, update_interval: Duration, shutdown: Arc<AtomicBool>) {
        info!(
            interval_ms = update_interval.as_millis() as u64,
            "Price feed started"
        );
        let mut ticker = interval(update_interval);

        loop {
            ticker.tick().await;
            if shutdown.load(Ordering::SeqCst) {
                break;
            }
            if let Err(e) = self.refresh_once().await {
                warn!(error = %e, "Price refresh failed");
            }
        }

        info!("Price feed stopped");
    }
}

//! Wallet transaction polling with per-wallet de-duplication.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::DateTime;
use futures::future::join_all;
use tokio::sync::{Mutex, RwLock};
use tokio::time::interval;
use tracing::{debug, info, warn};

use crate::api::{ChainReader, SignatureEntry};
use crate::events::{EventBus, WalletEvents};
use crate::models::{short_address, ChainEvent, TrackedWallet};

/// Identifiers evaluated per wallet stay bounded; once full, the oldest
/// entry is evicted. The last-seen marker still stops most scans early, the
/// set only guards against upstream reordering inside one fetch window.
const SEEN_CAPACITY: usize = 512;

/// Insertion-ordered signature set with a fixed capacity.
#[derive(Debug, Default)]
struct SeenSignatures {
    order: VecDeque<String>,
    set: HashSet<String>,
}

impl SeenSignatures {
    fn contains(&self, signature: &str) -> bool {
        self.set.contains(signature)
    }

    fn insert(&mut self, signature: String) {
        if !self.set.insert(signature.clone()) {
            return;
        }
        self.order.push_back(signature);
        while self.order.len() > SEEN_CAPACITY {
            if let Some(evicted) = self.order.pop_front() {
                self.set.remove(&evicted);
            }
        }
    }

    fn len(&self) -> usize {
        self.order.len()
    }
}

/// Per-wallet polling cursor.
#[derive(Debug, Default)]
struct WalletCursor {
    /// Newest signature observed on the previous poll
    last_seen: Option<String>,
    seen: SeenSignatures,
}

/// Snapshot of the monitor's state.
#[derive(Debug, Clone)]
pub struct MonitorStatus {
    pub tracked_wallets: usize,
    pub active_wallets: usize,
}

/// Polls tracked wallets for new confirmed transactions and fans the
/// resulting event batches out to subscribers.
///
/// Delivery is at-most-once per signature per wallet, assuming the upstream
/// never re-orders already-returned signatures behind a rollback. A
/// chain-reorg that rewrites finalized history would break that assumption;
/// the monitor does not try to detect it.
pub struct WalletTransactionMonitor {
    reader: Arc<dyn ChainReader>,
    fetch_limit: usize,
    wallets: RwLock<HashMap<String, TrackedWallet>>,
    cursors: Mutex<HashMap<String, WalletCursor>>,
    bus: EventBus<WalletEvents>,
}

impl WalletTransactionMonitor {
    pub fn new(reader: Arc<dyn ChainReader>, fetch_limit: usize) -> Self {
        Self {
            reader,
            fetch_limit,
            wallets: RwLock::new(HashMap::new()),
            cursors: Mutex::new(HashMap::new()),
            bus: EventBus::new(),
        }
    }

    /// Bus carrying `(wallet, new events)` batches.
    pub fn events(&self) -> &EventBus<WalletEvents> {
        &self.bus
    }

    /// Start polling a wallet. The first poll only records the newest
    /// signature so history is not replayed as fresh activity.
    pub async fn track(&self, wallet: TrackedWallet) {
        let address = wallet.address.clone();
        let name = wallet.display_name();
        self.wallets.write().await.insert(address.clone(), wallet);
        self.cursors
            .lock()
            .await
            .entry(address.clone())
            .or_default();
        info!(wallet = %short_address(&address), name = %name, "Tracking wallet");
    }

    /// Stop polling a wallet and drop its dedup state.
    pub async fn untrack(&self, address: &str) {
        self.wallets.write().await.remove(address);
        self.cursors.lock().await.remove(address);
        info!(wallet = %short_address(address), "Untracked wallet");
    }

    /// Currently tracked wallets.
    pub async fn wallets(&self) -> Vec<TrackedWallet> {
        self.wallets.read().await.values().cloned().collect()
    }

    pub async fn status(&self) -> MonitorStatus {
        let wallets = self.wallets.read().await;
        MonitorStatus {
            tracked_wallets: wallets.len(),
            active_wallets: wallets.values().filter(|w| w.active).count(),
        }
    }

    /// Poll one wallet and return its new confirmed events, oldest first.
    ///
    /// The newest fetched signature becomes the new cursor even when nothing
    /// below it is new, bounding cursor drift to one poll cycle. Unfinalized
    /// and failed entries are skipped without being marked seen, so they are
    /// re-evaluated once finalized.
    pub async fn poll_wallet(&self, address: &str) -> Result<Vec<ChainEvent>> {
        let entries = self
            .reader
            .recent_signatures(address, self.fetch_limit)
            .await?;

        if entries.is_empty() {
            return Ok(Vec::new());
        }

        let fresh = {
            let mut cursors = self.cursors.lock().await;
            let cursor = cursors.entry(address.to_string()).or_default();
            Self::advance_cursor(cursor, &entries)
        };

        if fresh.is_empty() {
            return Ok(Vec::new());
        }

        debug!(
            wallet = %short_address(address),
            count = fresh.len(),
            "New confirmed transactions"
        );

        // Detail fetches happen outside any lock; a failed fetch drops that
        // event for good (it is already marked seen), matching at-most-once
        // delivery rather than risking a replay.
        let mut events = Vec::with_capacity(fresh.len());
        for entry in fresh {
            match self.reader.transaction_detail(&entry.signature).await {
                Ok(Some(raw)) => events.push(ChainEvent {
                    signature: entry.signature,
                    slot: entry.slot,
                    block_time: entry
                        .block_time
                        .and_then(|t| DateTime::from_timestamp(t, 0)),
                    raw,
                }),
                Ok(None) => {
                    debug!(signature = %entry.signature, "Transaction detail not available");
                }
                Err(e) => {
                    warn!(
                        signature = %entry.signature,
                        error = %e,
                        "Failed to fetch transaction detail"
                    );
                }
            }
        }

        Ok(events)
    }

    /// Walk `entries` newest to oldest, stopping at the previous cursor, and
    /// return the deliverable remainder oldest-first. Delivered signatures
    /// are marked seen before the cursor moves.
    fn advance_cursor(cursor: &mut WalletCursor, entries: &[SignatureEntry]) -> Vec<SignatureEntry> {
        let newest = entries[0].signature.clone();

        // Bootstrap: record the starting point, deliver nothing
        let Some(last_seen) = cursor.last_seen.clone() else {
            cursor.last_seen = Some(newest);
            return Vec::new();
        };

        let mut fresh: Vec<SignatureEntry> = Vec::new();
        for entry in entries {
            if entry.signature == last_seen {
                break;
            }
            if !entry.is_finalized() || entry.is_failed() {
                continue;
            }
            if cursor.seen.contains(&entry.signature) {
                continue;
            }
            fresh.push(entry.clone());
        }

        fresh.reverse();
        for entry in &fresh {
            cursor.seen.insert(entry.signature.clone());
        }
        cursor.last_seen = Some(newest);

        fresh
    }

    /// Poll every active wallet concurrently and fan out the batches.
    /// A failing wallet is logged and simply retried next cycle.
    pub async fn poll_cycle(&self) {
        let addresses: Vec<String> = {
            let wallets = self.wallets.read().await;
            wallets
                .values()
                .filter(|w| w.active)
                .map(|w| w.address.clone())
                .collect()
        };

        let polls = addresses.iter().map(|address| async move {
            (address.clone(), self.poll_wallet(address).await)
        });

        for (address, result) in join_all(polls).await {
            match result {
                Ok(events) if !events.is_empty() => {
                    self.bus
                        .emit(WalletEvents {
                            wallet: address,
                            events,
                        })
                        .await;
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(
                        wallet = %short_address(&address),
                        error = %e,
                        "Wallet poll failed, retrying next cycle"
                    );
                }
            }
        }
    }

    /// Poll on an interval until `shutdown` is set. The in-flight cycle
    /// always completes before the loop exits.
    pub async fn run(self: Arc<Self>, poll_interval: Duration, shutdown: Arc<AtomicBool>) {
        info!(interval_ms = poll_interval.as_millis() as u64, "Transaction monitor started");
        let mut ticker = interval(poll_interval);

        loop {
            ticker.tick().await;
            if shutdown.load(Ordering::SeqCst) {
                break;
            }
            self.poll_cycle().await;
        }

        info!("Transaction monitor stopped");
    }
}

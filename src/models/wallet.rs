//! Tracked source wallet model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A source wallet whose trades are being mirrored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackedWallet {
    /// Wallet address (base58 public key)
    pub address: String,

    /// Optional display label
    #[serde(default)]
    pub label: Option<String>,

    /// Whether the wallet is currently being polled
    pub active: bool,

    /// When the wallet was added to tracking
    pub added_at: DateTime<Utc>,
}

impl TrackedWallet {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            label: None,
            active: true,
            added_at: Utc::now(),
        }
    }

    /// Attach a display label.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Label if present, otherwise a shortened address.
    pub fn display_name(&self) -> String {
        match &self.label {
            Some(l) if !l.is_empty() => l.clone(),
            _ => short_address(&self.address),
        }
    }
}

/// Shorten an address for log output (`"9xQe...R1bz"`).
pub fn short_address(address: &str) -> String {
    if address.len() <= 12 {
        address.to_string()
    } else {
        format!("{}...{}", &address[..4], &address[address.len() - 4..])
    }
}

//! DEX aggregator client for token prices.

use std::collections::HashMap;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use rust_decimal::Decimal;
use tracing::debug;

use super::types::PriceApiResponse;

const DEFAULT_PRICE_API: &str = "https://price.jup.ag/v4";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Quoted prices for tracked tokens.
#[async_trait]
pub trait PriceSource: Send + Sync {
    /// Current price for one token, `None` if unquoted.
    async fn price(&self, token: &str) -> Result<Option<Decimal>>;

    /// Current prices for a batch of tokens; unquoted tokens are absent.
    async fn prices(&self, tokens: &[String]) -> Result<HashMap<String, Decimal>>;
}

/// HTTP client for an aggregator price API.
pub struct DexClient {
    client: Client,
    base_url: String,
}

impl DexClient {
    /// Create a client with the default public endpoint.
    pub fn new() -> Result<Self> {
        Self::with_base_url(DEFAULT_PRICE_API.to_string())
    }

    /// Create with custom base URL (for testing).
    pub fn with_base_url(base_url: String) -> Result<Self> {
        let client = Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self { client, base_url })
    }
}

#[async_trait]
impl PriceSource for DexClient {
    async fn price(&self, token: &str) -> Result<Option<Decimal>> {
        let tokens = vec![token.to_string()];
        let prices = self.prices(&tokens).await?;
        Ok(prices.get(token).copied())
    }

    async fn prices(&self, tokens: &[String]) -> Result<HashMap<String, Decimal>> {
        if tokens.is_empty() {
            return Ok(HashMap::new());
        }

        let url = format!("{}/price?ids={}", self.base_url, tokens.join(","));
        debug!(tokens = tokens.len(), "Fetching token prices");

        let response: PriceApiResponse = self
            .client
            .get(&url)
            .send()
            .await
            .context("Price request failed")?
            .json()
            .await
            .context("Price response was not valid JSON")?;

        Ok(response
            .data
            .into_iter()
            .map(|(mint, entry)| (mint, entry.price))
            .collect())
    }
}

//! RPC node client for reading wallet activity.

use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use backoff::ExponentialBackoff;
use reqwest::Client;
use serde_json::{json, Value};
use tracing::debug;

use super::types::{RpcResponse, SignatureEntry};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
const MAX_RETRY_ELAPSED: Duration = Duration::from_secs(10);

/// Read-only access to confirmed chain activity.
///
/// The monitor consumes this; request timeouts and retry policy live here,
/// not in the polling loop.
#[async_trait]
pub trait ChainReader: Send + Sync {
    /// Most recent transaction signatures for a wallet, newest-first.
    async fn recent_signatures(&self, wallet: &str, limit: usize) -> Result<Vec<SignatureEntry>>;

    /// Full transaction payload for a signature, if available.
    async fn transaction_detail(&self, signature: &str) -> Result<Option<Value>>;
}

/// JSON-RPC client for a Solana-style node.
pub struct RpcClient {
    client: Client,
    rpc_url: String,
}

impl RpcClient {
    /// Create a client against the given RPC endpoint.
    pub fn new(rpc_url: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            rpc_url: rpc_url.into(),
        })
    }

    fn retry_policy() -> ExponentialBackoff {
        ExponentialBackoff {
            max_elapsed_time: Some(MAX_RETRY_ELAPSED),
            ..ExponentialBackoff::default()
        }
    }

    /// Issue one JSON-RPC call with retry on transport errors.
    ///
    /// A `null` result is returned as `None` (e.g. an unknown transaction),
    /// an error object as `Err`.
    async fn call<T: serde::de::DeserializeOwned + Default>(
        &self,
        method: &str,
        params: Value,
    ) -> Result<Option<T>> {
        let body = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": method,
            "params": params,
        });

        let response: RpcResponse<T> = backoff::future::retry(Self::retry_policy(), || async {
            let resp = self
                .client
                .post(&self.rpc_url)
                .json(&body)
                .send()
                .await
                .map_err(|e| backoff::Error::transient(anyhow!(e)))?;

            resp.json()
                .await
                .map_err(|e| backoff::Error::transient(anyhow!(e)))
        })
        .await
        .with_context(|| format!("RPC call {method} failed"))?;

        if let Some(err) = response.error {
            return Err(anyhow!("RPC error {}: {}", err.code, err.message));
        }

        Ok(response.result)
    }
}

#[async_trait]
impl ChainReader for RpcClient {
    async fn recent_signatures(&self, wallet: &str, limit: usize) -> Result<Vec<SignatureEntry>> {
        debug!(wallet = %wallet, limit = limit, "Fetching recent signatures");

        let entries = self
            .call(
                "getSignaturesForAddress",
                json!([wallet, { "limit": limit }]),
            )
            .await?;

        Ok(entries.unwrap_or_default())
    }

    async fn transaction_detail(&self, signature: &str) -> Result<Option<Value>> {
        debug!(signature = %signature, "Fetching transaction detail");

        self.call(
            "getTransaction",
            json!([signature, {
                "encoding": "json",
                "maxSupportedTransactionVersion": 0,
            }]),
        )
        .await
    }
}

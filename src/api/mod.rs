//! External collaborator clients: RPC node reader and DEX price source.

mod dex_client;
mod rpc_client;
mod types;

pub use dex_client::{DexClient, PriceSource};
pub use rpc_client::{ChainReader, RpcClient};
pub use types::*;

//! Capabilities the harvester needs from a chain node.
//!
//! [`RpcClient`](crate::rpc::RpcClient) implements both against a JSON-RPC
//! endpoint; tests provide scripted implementations.

use std::future::Future;

use alloy::rpc::types::Log;
use alloy_primitives::{Address, B256, U256};
use anyhow::Result;

/// `eth_getLogs` for a single contract and event over an inclusive block range.
pub trait LogSource: Send + Sync {
    fn query_logs(
        &self,
        contract: Address,
        event_signature: B256,
        from_block: u64,
        to_block: u64,
    ) -> impl Future<Output = Result<Vec<Log>>> + Send;
}

/// Token balance of `owner` as of `block`.
pub trait BalanceSource: Send + Sync {
    fn balance_at(
        &self,
        token: Address,
        owner: Address,
        block: u64,
    ) -> impl Future<Output = Result<U256>> + Send;
}

use crate::events::tokenCall;
use crate::rpc::RpcClient;
use alloy_primitives::Address;
use anyhow::Result;
use std::future::Future;
use tracing::info;

/// Token to harvest: configured directly, or read from a TokenManager's `token()`.
pub async fn resolve_token_address(
    client: &RpcClient,
    token_address: Option<Address>,
    token_manager_address: Option<Address>,
) -> Result<Address> {
    if let Some(address) = token_address {
        return Ok(address);
    }
    let Some(manager) = token_manager_address else {
        anyhow::bail!("No token address or token manager configured");
    };

    info!("Fetching token address from TokenManager {:?}", manager);
    let token = client.call_contract(manager, tokenCall {}, None).await?;
    info!("Token address: {:?}", token);
    Ok(token)
}

pub async fn find_deployment_block(
    client: &RpcClient,
    address: Address,
    latest_block: u64,
) -> Result<u64> {
    info!("Searching for deployment block of contract {:?}", address);

    let code = client.get_code_at_block(address, latest_block).await?;
    if code.is_empty() {
        anyhow::bail!("Address {:?} is not a deployed contract", address);
    }

    let block = first_block_where(0, latest_block, |block| async move {
        Ok(!client.get_code_at_block(address, block).await?.is_empty())
    })
    .await?;

    info!("Contract deployed at block {}", block);
    Ok(block)
}

/// Lowest block in `left..=right` for which the monotone `probe` holds.
/// `probe(right)` is assumed to hold.
async fn first_block_where<F, Fut>(mut left: u64, mut right: u64, probe: F) -> Result<u64>
where
    F: Fn(u64) -> Fut,
    Fut: Future<Output = Result<bool>>,
{
    while left < right {
        let mid = left + (right - left) / 2;

        if probe(mid).await? {
            right = mid;
        } else {
            left = mid + 1;
        }
    }
    Ok(left)
}

use crate::config::BalanceMethod;
use crate::events::{balanceOfAtCall, balanceOfCall};
use crate::source::{BalanceSource, LogSource};
use alloy::providers::fillers::FillProvider;
use alloy::providers::{Provider, ProviderBuilder};
use alloy::rpc::types::{BlockId, BlockNumberOrTag, Filter, Log, TransactionRequest};
use alloy::sol_types::SolCall;
use alloy_primitives::{Address, B256, Bytes, U256};
use anyhow::Result;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::time::timeout;
use tokio_retry::Retry;
use tokio_retry::strategy::{ExponentialBackoff, jitter};
use tracing::{debug, warn};

type AlloyFullProvider = FillProvider<
    alloy::providers::fillers::JoinFill<
        alloy::providers::Identity,
        alloy::providers::fillers::JoinFill<
            alloy::providers::fillers::GasFiller,
            alloy::providers::fillers::JoinFill<
                alloy::providers::fillers::BlobGasFiller,
                alloy::providers::fillers::JoinFill<
                    alloy::providers::fillers::NonceFiller,
                    alloy::providers::fillers::ChainIdFiller,
                >,
            >,
        >,
    >,
    alloy::providers::RootProvider,
>;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(120); // 2 minutes timeout per request

/// Provider messages meaning "too many results"; the scanner shrinks instead of retrying.
const RESULT_CAP_MARKERS: [&str; 4] = [
    "exceeds max results",
    "query returned more than",
    "response size exceeded",
    "block range is too large",
];

#[derive(Clone)]
pub struct RpcClient {
    providers: Vec<AlloyFullProvider>,
    urls: Vec<String>,
    current_provider: Arc<AtomicUsize>,
    max_retries: usize,
    balance_method: BalanceMethod,
}

impl RpcClient {
    pub fn new(rpc_urls: &[String]) -> Result<Self> {
        if rpc_urls.is_empty() {
            return Err(anyhow::anyhow!("At least one RPC URL must be provided"));
        }

        let mut providers = Vec::new();
        for url in rpc_urls {
            let parsed_url = url
                .parse()
                .map_err(|_| anyhow::anyhow!("Invalid RPC URL: {}", url))?;
            let provider: AlloyFullProvider = ProviderBuilder::new().connect_http(parsed_url);
            providers.push(provider);
        }

        Ok(RpcClient {
            providers,
            urls: rpc_urls.to_vec(),
            current_provider: Arc::new(AtomicUsize::new(0)),
            max_retries: 5,
            balance_method: BalanceMethod::BalanceOfAt,
        })
    }

    pub fn with_balance_method(mut self, balance_method: BalanceMethod) -> Self {
        self.balance_method = balance_method;
        self
    }

    fn get_provider(&self) -> &AlloyFullProvider {
        let index = self.current_provider.load(Ordering::Relaxed) % self.providers.len();
        &self.providers[index]
    }

    pub fn get_current_url(&self) -> &str {
        let index = self.current_provider.load(Ordering::Relaxed) % self.urls.len();
        &self.urls[index]
    }

    pub fn rotate_provider(&self) {
        let current = self.current_provider.load(Ordering::Relaxed);
        let next = (current + 1) % self.providers.len();
        self.current_provider.store(next, Ordering::Relaxed);

        if self.providers.len() > 1 {
            debug!("Rotating to RPC provider #{}", next);
        }
    }

    fn get_retry_strategy(&self) -> impl Iterator<Item = Duration> {
        ExponentialBackoff::from_millis(100)
            .factor(2)
            .max_delay(Duration::from_secs(10))
            .map(jitter)
            .take(self.max_retries)
    }

    fn handle_error(&self, error_str: &str) {
        let current_url = self.get_current_url();
        warn!(
            "RPC error on {}: {}, rotating provider",
            current_url, error_str
        );
        self.rotate_provider();
    }

    fn handle_timeout(&self) -> anyhow::Error {
        let current_url = self.get_current_url();
        warn!(
            "Request timeout after {} seconds on {}, rotating provider",
            REQUEST_TIMEOUT.as_secs(),
            current_url
        );
        self.rotate_provider();
        anyhow::anyhow!(
            "Request timeout after {} seconds",
            REQUEST_TIMEOUT.as_secs()
        )
    }

    pub async fn get_latest_block(&self) -> Result<u64> {
        let client = self.clone();
        Retry::spawn(self.get_retry_strategy(), move || {
            let client = client.clone();
            async move {
                let provider = client.get_provider();
                match timeout(REQUEST_TIMEOUT, provider.get_block_number()).await {
                    Ok(Ok(block_number)) => Ok(block_number),
                    Ok(Err(e)) => {
                        let error_str = e.to_string();
                        client.handle_error(&error_str);
                        Err(anyhow::anyhow!("{}", e))
                    }
                    Err(_) => Err(client.handle_timeout()),
                }
            }
        })
        .await
    }

    pub async fn get_code_at_block(&self, address: Address, block_number: u64) -> Result<Bytes> {
        let client = self.clone();
        Retry::spawn(self.get_retry_strategy(), move || {
            let client = client.clone();
            async move {
                let provider = client.get_provider();
                let future = provider
                    .get_code_at(address)
                    .block_id(BlockNumberOrTag::Number(block_number).into());

                match timeout(REQUEST_TIMEOUT, future).await {
                    Ok(Ok(result)) => Ok(result),
                    Ok(Err(e)) => {
                        let error_str = e.to_string();
                        client.handle_error(&error_str);
                        Err(anyhow::anyhow!("{}", e))
                    }
                    Err(_) => Err(client.handle_timeout()),
                }
            }
        })
        .await
    }

    /// `eth_call` of a view function, at `block` or at the latest block.
    pub async fn call_contract<C: SolCall>(
        &self,
        address: Address,
        call: C,
        block: Option<u64>,
    ) -> Result<C::Return> {
        let input = Bytes::from(call.abi_encode());
        let block_id = block
            .map(|number| BlockId::from(BlockNumberOrTag::Number(number)))
            .unwrap_or(BlockId::latest());
        let client = self.clone();

        let output = Retry::spawn(self.get_retry_strategy(), move || {
            let client = client.clone();
            let input = input.clone();
            async move {
                let provider = client.get_provider();
                let tx = TransactionRequest::default().to(address).input(input.into());

                match timeout(REQUEST_TIMEOUT, provider.call(tx).block(block_id)).await {
                    Ok(Ok(output)) => Ok(Ok(output)),
                    Ok(Err(e)) => {
                        let error_str = e.to_string();
                        if error_str.contains("revert") {
                            // a revert is an answer, not a transport failure
                            Ok(Err(anyhow::anyhow!("{}", e)))
                        } else {
                            client.handle_error(&error_str);
                            Err(anyhow::anyhow!("{}", e))
                        }
                    }
                    Err(_) => Err(client.handle_timeout()),
                }
            }
        })
        .await
        .and_then(|r| r)?;

        Ok(C::abi_decode_returns(&output)?)
    }

    pub async fn get_logs(
        &self,
        from_block: u64,
        to_block: u64,
        contract_address: Address,
        topic0: B256,
    ) -> Result<Vec<Log>> {
        let client = self.clone();
        Retry::spawn(self.get_retry_strategy(), move || {
            let client = client.clone();
            async move {
                let provider = client.get_provider();
                let filter = Filter::new()
                    .address(contract_address)
                    .event_signature(topic0)
                    .from_block(from_block)
                    .to_block(to_block);

                match timeout(REQUEST_TIMEOUT, provider.get_logs(&filter)).await {
                    Ok(Ok(logs)) => Ok(Ok(logs)),
                    Ok(Err(e)) => {
                        let error_str = e.to_string();

                        if is_result_cap_error(&error_str) {
                            debug!(
                                "Max results exceeded for blocks {}-{}, leaving the split to the scanner",
                                from_block, to_block
                            );
                            // hack since we don't want to retry on this specific error
                            Ok(Err(anyhow::anyhow!("{}", e)))
                        } else {
                            client.handle_error(&error_str);
                            Err(anyhow::anyhow!("{}", e))
                        }
                    }
                    Err(_) => Err(client.handle_timeout()),
                }
            }
        })
        .await
        .and_then(|r| r)
    }
}

fn is_result_cap_error(error_str: &str) -> bool {
    let lower = error_str.to_lowercase();
    RESULT_CAP_MARKERS.iter().any(|marker| lower.contains(marker))
}

impl LogSource for RpcClient {
    async fn query_logs(
        &self,
        contract: Address,
        event_signature: B256,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<Log>> {
        self.get_logs(from_block, to_block, contract, event_signature).await
    }
}

impl BalanceSource for RpcClient {
    async fn balance_at(&self, token: Address, owner: Address, block: u64) -> Result<U256> {
        match self.balance_method {
            BalanceMethod::BalanceOfAt => {
                let call = balanceOfAtCall {
                    owner,
                    blockNumber: U256::from(block),
                };
                self.call_contract(token, call, None).await
            }
            BalanceMethod::BalanceOf => {
                self.call_contract(token, balanceOfCall { owner }, Some(block)).await
            }
        }
    }
}

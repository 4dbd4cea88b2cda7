use crate::burn::{BurnScript, DEFAULT_BURN_FROM, DEFAULT_SPENDER};
use crate::sampler::{DEFAULT_CONCURRENCY, SnapshotBlocks};
use crate::scanner::{INITIAL_CHUNK_SIZE, MIN_CHUNK_SIZE, RPC_LOG_LIMIT, ScanConfig};
use alloy_primitives::Address;
use anyhow::{Context, Result};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Which view function answers historical balance queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BalanceMethod {
    /// MiniMe `balanceOfAt(owner, block)` evaluated at the latest state.
    BalanceOfAt,
    /// Plain ERC20 `balanceOf(owner)` evaluated at `block` (needs an archive node).
    BalanceOf,
}

impl FromStr for BalanceMethod {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "balanceofat" => Ok(BalanceMethod::BalanceOfAt),
            "balanceof" => Ok(BalanceMethod::BalanceOf),
            other => Err(anyhow::anyhow!("Unknown balance method: {}", other)),
        }
    }
}

/// Settings every command needs: where the tables live and how burns are rendered.
#[derive(Debug, Clone)]
pub struct Config {
    pub output_dir: PathBuf,
    pub burn_script: BurnScript,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();

        let burn_script = BurnScript {
            spender: std::env::var("BURN_SPENDER").unwrap_or_else(|_| DEFAULT_SPENDER.to_string()),
            burn_from: std::env::var("BURN_FROM").unwrap_or_else(|_| DEFAULT_BURN_FROM.to_string()),
            decimals: optional_var("TOKEN_DECIMALS")?.unwrap_or(18),
        };

        Ok(Config {
            output_dir: std::env::var("OUTPUT_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("./output")),
            burn_script,
        })
    }
}

/// Settings for the stages that talk to a node.
#[derive(Debug, Clone)]
pub struct ChainConfig {
    pub json_rpc_urls: Vec<String>,
    pub token_address: Option<Address>,
    pub token_manager_address: Option<Address>,
    pub scan_from_block: Option<u64>,
    pub scan_to_block: Option<u64>,
    pub snapshot: SnapshotBlocks,
    pub scan: ScanConfig,
    pub balance_concurrency: usize,
    pub balance_method: BalanceMethod,
}

impl ChainConfig {
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();

        let json_rpc_urls: Vec<String> = std::env::var("JSON_RPC_URLS")
            .or_else(|_| std::env::var("JSON_RPC_URL"))
            .context("JSON_RPC_URLS must be set in .env")?
            .split(',')
            .map(|url| url.trim().to_string())
            .filter(|url| !url.is_empty())
            .collect();

        let token_address = optional_var::<Address>("TOKEN_ADDRESS")?;
        let token_manager_address = optional_var::<Address>("TOKEN_MANAGER_ADDRESS")?;
        if token_address.is_none() && token_manager_address.is_none() {
            anyhow::bail!("Either TOKEN_ADDRESS or TOKEN_MANAGER_ADDRESS must be set in .env");
        }

        let block_before = optional_var::<u64>("BLOCK_BEFORE")?
            .context("BLOCK_BEFORE must be set in .env")?;
        let block_after = optional_var::<u64>("BLOCK_AFTER")?
            .context("BLOCK_AFTER must be set in .env")?;
        let snapshot = SnapshotBlocks::new(block_before, block_after)?;

        let scan = ScanConfig {
            log_limit: optional_var("RPC_LOG_LIMIT")?.unwrap_or(RPC_LOG_LIMIT),
            min_chunk: optional_var("MIN_CHUNK_SIZE")?.unwrap_or(MIN_CHUNK_SIZE),
            initial_chunk: optional_var("INITIAL_CHUNK_SIZE")?.unwrap_or(INITIAL_CHUNK_SIZE),
            request_interval: optional_var("REQUEST_INTERVAL_MS")?
                .map(Duration::from_millis)
                .unwrap_or(ScanConfig::default().request_interval),
        };
        scan.validate().context("Invalid scanner chunk settings")?;

        Ok(ChainConfig {
            json_rpc_urls,
            token_address,
            token_manager_address,
            scan_from_block: optional_var("SCAN_FROM_BLOCK")?,
            scan_to_block: optional_var("SCAN_TO_BLOCK")?,
            snapshot,
            scan,
            balance_concurrency: optional_var("BALANCE_CONCURRENCY")?.unwrap_or(DEFAULT_CONCURRENCY),
            balance_method: optional_var("BALANCE_METHOD")?.unwrap_or(BalanceMethod::BalanceOfAt),
        })
    }
}

fn optional_var<T>(name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| anyhow::anyhow!("Invalid {} value {:?}: {}", name, raw, e)),
        _ => Ok(None),
    }
}

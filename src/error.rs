use alloy_primitives::Address;
use thiserror::Error;

/// Errors that stop a range scan.
#[derive(Error, Debug)]
pub enum ScanError {
    #[error("invalid block range {start}-{end}: start is after end")]
    InvalidRange { start: u64, end: u64 },

    #[error("invalid chunk bounds: min {min}, initial {initial}, log limit {log_limit}")]
    InvalidChunkBounds {
        min: u64,
        initial: u64,
        log_limit: usize,
    },

    /// The query for `start..=stop` failed even at the minimum chunk size.
    #[error("failed to fetch blocks {start}-{stop} with minimum chunk size {min_chunk}: {source}")]
    Transport {
        start: u64,
        stop: u64,
        min_chunk: u64,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

/// A log entry that could not be turned into a transfer record.
#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("log does not match Transfer(address,address,uint256): {0}")]
    Malformed(#[from] alloy::sol_types::Error),

    #[error("log is missing its {0}")]
    MissingField(&'static str),
}

/// A balance query for one address failed; the address is left out of the sample.
#[derive(Error, Debug)]
#[error("balance query for {address} at block {block} failed: {source}")]
pub struct BalanceQueryError {
    pub address: Address,
    pub block: u64,
    #[source]
    pub source: Box<dyn std::error::Error + Send + Sync>,
}

#[derive(Error, Debug)]
pub enum ArtifactError {
    #[error("artifact io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    #[error("line {line}: invalid {field} value {value:?}")]
    Parse {
        line: u64,
        field: &'static str,
        value: String,
    },
}

/// The running burn total no longer fits in 256 bits.
#[derive(Error, Debug)]
#[error("burn total overflowed 256 bits after {commands} commands")]
pub struct TotalOverflow {
    pub commands: usize,
}

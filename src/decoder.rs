use crate::error::DecodeError;
use crate::events::decode_transfer_event;
use alloy::rpc::types::Log;
use alloy_primitives::{Address, B256, U256};
use std::collections::BTreeSet;
use tracing::{info, warn};

/// One decoded `Transfer` event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferRecord {
    pub block_number: u64,
    pub log_index: u64,
    pub transaction_hash: B256,
    pub from: Address,
    pub to: Address,
    pub value: U256,
}

#[derive(Debug, Default)]
pub struct DecodedTransfers {
    pub records: Vec<TransferRecord>,
    pub skipped: usize,
}

pub fn decode_transfer(log: &Log) -> Result<TransferRecord, DecodeError> {
    let event = decode_transfer_event(log)?;
    Ok(TransferRecord {
        block_number: log.block_number.ok_or(DecodeError::MissingField("block number"))?,
        log_index: log.log_index.ok_or(DecodeError::MissingField("log index"))?,
        transaction_hash: log
            .transaction_hash
            .ok_or(DecodeError::MissingField("transaction hash"))?,
        from: event.from,
        to: event.to,
        value: event.value,
    })
}

/// Decodes every log, skipping (and counting) the ones that do not fit the Transfer shape.
pub fn decode_transfers(logs: &[Log]) -> DecodedTransfers {
    let mut decoded = DecodedTransfers::default();
    for log in logs {
        match decode_transfer(log) {
            Ok(record) => decoded.records.push(record),
            Err(e) => {
                warn!(
                    "Failed to decode transfer event in tx {:?}: {}",
                    log.transaction_hash, e
                );
                decoded.skipped += 1;
            }
        }
    }

    info!(
        "Decoded {} transfers, skipped {} malformed logs",
        decoded.records.len(),
        decoded.skipped
    );
    decoded
}

/// Every address that sent or received tokens, sorted.
pub fn address_set<'a>(records: impl IntoIterator<Item = &'a TransferRecord>) -> BTreeSet<Address> {
    records
        .into_iter()
        .flat_map(|record| [record.from, record.to])
        .collect()
}

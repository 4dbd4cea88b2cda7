use crate::error::ScanError;
use crate::events::Transfer as EventTransfer;
use crate::source::LogSource;
use alloy::rpc::types::Log;
use alloy::sol_types::SolEvent;
use alloy_primitives::{Address, B256};
use std::collections::HashSet;
use std::fmt;
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tracing::{debug, info, warn};

/// Most hosted providers (Alchemy, Infura, dRPC) silently cap `eth_getLogs` at 10k entries.
pub const RPC_LOG_LIMIT: usize = 10_000;
pub const MIN_CHUNK_SIZE: u64 = 100;
pub const INITIAL_CHUNK_SIZE: u64 = 10_000;
const RATE_LIMIT_DELAY_MS: u64 = 200; // 5 requests per second
/// Quiet chunks required before a rejected chunk size may be tried again; doubles on every retry.
const GROWTH_COOLDOWN: u32 = 4;

/// Inclusive block interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockRange {
    pub start: u64,
    pub end: u64,
}

impl BlockRange {
    pub fn new(start: u64, end: u64) -> Result<Self, ScanError> {
        if start > end {
            return Err(ScanError::InvalidRange { start, end });
        }
        Ok(Self { start, end })
    }

    /// Number of blocks covered, saturating at `u64::MAX` for the full range.
    #[allow(clippy::len_without_is_empty)]
    pub fn len(&self) -> u64 {
        (self.end - self.start).saturating_add(1)
    }
}

impl fmt::Display for BlockRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start, self.end)
    }
}

#[derive(Debug, Clone)]
pub struct ScanConfig {
    /// Result count at or above which a response is assumed truncated.
    pub log_limit: usize,
    pub min_chunk: u64,
    /// Starting chunk size, also the ceiling for regrowth.
    pub initial_chunk: u64,
    /// Minimum spacing between two consecutive requests.
    pub request_interval: Duration,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            log_limit: RPC_LOG_LIMIT,
            min_chunk: MIN_CHUNK_SIZE,
            initial_chunk: INITIAL_CHUNK_SIZE,
            request_interval: Duration::from_millis(RATE_LIMIT_DELAY_MS),
        }
    }
}

impl ScanConfig {
    pub fn validate(&self) -> Result<(), ScanError> {
        if self.log_limit == 0 || self.min_chunk == 0 || self.min_chunk > self.initial_chunk {
            return Err(ScanError::InvalidChunkBounds {
                min: self.min_chunk,
                initial: self.initial_chunk,
                log_limit: self.log_limit,
            });
        }
        Ok(())
    }
}

/// Cursor and chunk size of the adaptive loop.
///
/// `ceiling` is the narrowest width that was rejected (capped or failed). Growth stays
/// strictly below it until `cooldown` consecutive quiet chunks have been accepted; each
/// time the ceiling is lifted the next cooldown doubles, so a density that keeps
/// rejecting the wider size is probed a logarithmic number of times.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ChunkState {
    start: u64,
    chunk_size: u64,
    ceiling: Option<u64>,
    quiet: u32,
    cooldown: u32,
}

impl ChunkState {
    fn new(start: u64, chunk_size: u64) -> Self {
        Self {
            start,
            chunk_size,
            ceiling: None,
            quiet: 0,
            cooldown: GROWTH_COOLDOWN,
        }
    }

    fn chunk(&self, end: u64) -> BlockRange {
        let stop = self
            .start
            .saturating_add(self.chunk_size - 1)
            .min(end);
        BlockRange {
            start: self.start,
            end: stop,
        }
    }

    /// Shrinks after a capped response so the next query is strictly narrower than `chunk`.
    /// Returns false when `chunk` is already at or below the floor.
    fn shrink_after_cap(&mut self, chunk: BlockRange, min_chunk: u64) -> bool {
        let span = chunk.len();
        if span <= min_chunk {
            return false;
        }
        self.reject(span);
        self.chunk_size = (self.chunk_size.min(span) / 2).max(min_chunk);
        true
    }

    /// Halves the chunk size after a failed query. The retried range may be identical
    /// when the chunk was clamped to the range end. Returns false at the floor.
    fn shrink_after_error(&mut self, chunk: BlockRange, min_chunk: u64) -> bool {
        if self.chunk_size <= min_chunk {
            return false;
        }
        self.reject(chunk.len());
        self.chunk_size = (self.chunk_size / 2).max(min_chunk);
        true
    }

    fn reject(&mut self, width: u64) {
        self.ceiling = Some(self.ceiling.map_or(width, |ceiling| ceiling.min(width)));
        self.quiet = 0;
    }

    /// Records an accepted chunk with few results and doubles the chunk size when allowed.
    fn grow(&mut self, max_chunk: u64) {
        self.quiet = self.quiet.saturating_add(1);
        if self.ceiling.is_some() && self.quiet >= self.cooldown {
            self.ceiling = None;
            self.quiet = 0;
            self.cooldown = self.cooldown.saturating_mul(2);
        }

        let next = self.chunk_size.saturating_mul(2).min(max_chunk);
        if self.ceiling.is_none_or(|ceiling| next < ceiling) {
            self.chunk_size = next;
        }
    }
}

/// Everything a finished scan produced.
#[derive(Debug, Default)]
pub struct ScanOutcome {
    /// Logs in ascending chunk order, each chunk sorted by block and log index.
    pub logs: Vec<Log>,
    /// Sub-ranges whose results were accepted, in order. They partition the scanned range.
    pub chunks: Vec<BlockRange>,
    /// Accepted sub-ranges that hit the log limit at the minimum chunk size.
    pub truncation_risks: Vec<BlockRange>,
    pub requests: usize,
    pub duplicates_dropped: usize,
}

impl ScanOutcome {
    pub fn is_complete(&self) -> bool {
        self.truncation_risks.is_empty()
    }
}

pub struct RangeScanner<'a, S> {
    source: &'a S,
    contract_address: Address,
    event_signature: B256,
    config: ScanConfig,
}

impl<'a, S: LogSource> RangeScanner<'a, S> {
    pub fn new(source: &'a S, contract_address: Address, config: ScanConfig) -> Result<Self, ScanError> {
        config.validate()?;
        Ok(RangeScanner {
            source,
            contract_address,
            event_signature: EventTransfer::SIGNATURE_HASH,
            config,
        })
    }

    pub async fn scan(&self, range: BlockRange) -> Result<ScanOutcome, ScanError> {
        let mut outcome = ScanOutcome::default();
        let mut seen: HashSet<(B256, u64)> = HashSet::new();
        let mut state = ChunkState::new(range.start, self.config.initial_chunk);
        let mut last_request: Option<Instant> = None;

        info!(
            "Scanning blocks {} for {:?} (initial chunk size {})",
            range, self.contract_address, state.chunk_size
        );

        loop {
            let chunk = state.chunk(range.end);
            self.pace(&mut last_request).await;

            debug!(
                "Fetching logs for blocks {} (chunk size {})",
                chunk, state.chunk_size
            );
            outcome.requests += 1;

            let mut logs = match self
                .source
                .query_logs(self.contract_address, self.event_signature, chunk.start, chunk.end)
                .await
            {
                Ok(logs) => logs,
                Err(e) => {
                    if state.shrink_after_error(chunk, self.config.min_chunk) {
                        warn!(
                            "Error fetching blocks {}: {:#}, reducing chunk size to {}",
                            chunk, e, state.chunk_size
                        );
                        continue;
                    }
                    return Err(ScanError::Transport {
                        start: chunk.start,
                        stop: chunk.end,
                        min_chunk: self.config.min_chunk,
                        source: e.into(),
                    });
                }
            };

            let count = logs.len();
            if count >= self.config.log_limit {
                if state.shrink_after_cap(chunk, self.config.min_chunk) {
                    info!(
                        "Got {} logs for blocks {} (at limit {}), reducing chunk size to {}",
                        count, chunk, self.config.log_limit, state.chunk_size
                    );
                    continue;
                }
                warn!(
                    "Chunk size at minimum but blocks {} still returned {} logs; transfers may be missing",
                    chunk, count
                );
                outcome.truncation_risks.push(chunk);
            }

            logs.sort_by_key(|log| (log.block_number, log.log_index));
            for log in logs {
                if let (Some(hash), Some(index)) = (log.transaction_hash, log.log_index) {
                    if !seen.insert((hash, index)) {
                        outcome.duplicates_dropped += 1;
                        continue;
                    }
                }
                outcome.logs.push(log);
            }
            outcome.chunks.push(chunk);

            debug!(
                "Received {} logs for blocks {} (total so far: {})",
                count,
                chunk,
                outcome.logs.len()
            );

            if count < self.config.log_limit / 2 {
                let previous = state.chunk_size;
                state.grow(self.config.initial_chunk);
                if state.chunk_size > previous {
                    debug!("Increasing chunk size to {}", state.chunk_size);
                }
            }

            if chunk.end == range.end {
                break;
            }
            state.start = chunk.end + 1;
        }

        info!(
            "Scan of blocks {} finished: {} logs in {} chunks, {} requests, {} truncation risks",
            range,
            outcome.logs.len(),
            outcome.chunks.len(),
            outcome.requests,
            outcome.truncation_risks.len()
        );

        Ok(outcome)
    }

    async fn pace(&self, last_request: &mut Option<Instant>) {
        if let Some(previous) = last_request {
            let elapsed = previous.elapsed();
            if elapsed < self.config.request_interval {
                sleep(self.config.request_interval - elapsed).await;
            }
        }
        *last_request = Some(Instant::now());
    }
}

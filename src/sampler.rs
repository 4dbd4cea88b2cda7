use crate::error::BalanceQueryError;
use crate::source::BalanceSource;
use alloy_primitives::{Address, U256};
use anyhow::Result;
use futures::stream::{self, StreamExt};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{info, warn};

pub const DEFAULT_CONCURRENCY: usize = 16;
const PROGRESS_EVERY: usize = 100;

/// The two snapshot heights of one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SnapshotBlocks {
    pub before: u64,
    pub after: u64,
}

impl SnapshotBlocks {
    pub fn new(before: u64, after: u64) -> Result<Self> {
        if before >= after {
            anyhow::bail!(
                "Snapshot block before ({}) must be lower than block after ({})",
                before,
                after
            );
        }
        Ok(Self { before, after })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BalanceSample {
    pub address: Address,
    pub before: U256,
    pub after: U256,
}

#[derive(Debug, Default)]
pub struct SampleOutcome {
    /// Ordered by address.
    pub samples: Vec<BalanceSample>,
    pub failures: Vec<BalanceQueryError>,
}

pub struct BalanceSampler<'a, S> {
    source: &'a S,
    token_address: Address,
    blocks: SnapshotBlocks,
    concurrency: usize,
}

impl<'a, S: BalanceSource> BalanceSampler<'a, S> {
    pub fn new(source: &'a S, token_address: Address, blocks: SnapshotBlocks) -> Self {
        Self {
            source,
            token_address,
            blocks,
            concurrency: DEFAULT_CONCURRENCY,
        }
    }

    /// Caps the number of addresses in flight; each address issues two queries.
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub async fn sample(&self, addresses: &BTreeSet<Address>) -> SampleOutcome {
        info!(
            "Fetching balances of {} addresses at blocks {} and {} ({} concurrent)",
            addresses.len(),
            self.blocks.before,
            self.blocks.after,
            self.concurrency
        );

        let mut results = stream::iter(addresses.iter().copied())
            .map(|address| self.sample_one(address))
            .buffer_unordered(self.concurrency);

        let mut samples = BTreeMap::new();
        let mut failures = Vec::new();
        let mut processed = 0;
        while let Some(result) = results.next().await {
            match result {
                Ok(sample) => {
                    samples.insert(sample.address, sample);
                }
                Err(e) => {
                    warn!("{}", e);
                    failures.push(e);
                }
            }
            processed += 1;
            if processed % PROGRESS_EVERY == 0 {
                info!("Processed {}/{} addresses...", processed, addresses.len());
            }
        }

        failures.sort_by_key(|e: &BalanceQueryError| e.address);
        info!(
            "Fetched balances for {} addresses, {} failed",
            samples.len(),
            failures.len()
        );

        SampleOutcome {
            samples: samples.into_values().collect(),
            failures,
        }
    }

    async fn sample_one(&self, address: Address) -> Result<BalanceSample, BalanceQueryError> {
        let (before, after) = tokio::join!(
            self.source
                .balance_at(self.token_address, address, self.blocks.before),
            self.source
                .balance_at(self.token_address, address, self.blocks.after),
        );
        let before = before.map_err(|source| BalanceQueryError {
            address,
            block: self.blocks.before,
            source: source.into(),
        })?;
        let after = after.map_err(|source| BalanceQueryError {
            address,
            block: self.blocks.after,
            source: source.into(),
        })?;
        Ok(BalanceSample {
            address,
            before,
            after,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Balance is the address's last byte times the block, except for `failing`.
    struct FakeBalances {
        failing: Option<Address>,
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    impl FakeBalances {
        fn new(failing: Option<Address>) -> Self {
            Self {
                failing,
                in_flight: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
            }
        }
    }

    impl BalanceSource for FakeBalances {
        async fn balance_at(&self, _token: Address, owner: Address, block: u64) -> anyhow::Result<U256> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(2)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            if Some(owner) == self.failing {
                return Err(anyhow!("execution reverted"));
            }
            Ok(U256::from(owner.as_slice()[19]) * U256::from(block))
        }
    }

    fn addresses(n: u8) -> BTreeSet<Address> {
        (1..=n).map(Address::with_last_byte).collect()
    }

    #[test]
    fn test_snapshot_blocks_must_be_ordered() {
        assert!(SnapshotBlocks::new(10, 10).is_err());
        assert!(SnapshotBlocks::new(11, 10).is_err());
        assert!(SnapshotBlocks::new(138_850_000, 144_200_000).is_ok());
    }

    #[tokio::test]
    async fn test_one_failing_address_is_omitted() {
        let failing = Address::with_last_byte(5);
        let source = FakeBalances::new(Some(failing));
        let sampler = BalanceSampler::new(&source, Address::ZERO, SnapshotBlocks::new(2, 3).unwrap());

        let outcome = sampler.sample(&addresses(10)).await;

        assert_eq!(outcome.samples.len(), 9);
        assert_eq!(outcome.failures.len(), 1);
        assert_eq!(outcome.failures[0].address, failing);
        assert!(outcome.samples.iter().all(|s| s.address != failing));
        assert_eq!(
            outcome.samples[0],
            BalanceSample {
                address: Address::with_last_byte(1),
                before: U256::from(2),
                after: U256::from(3),
            }
        );
    }

    #[tokio::test]
    async fn test_samples_are_ordered_by_address() {
        let source = FakeBalances::new(None);
        let sampler = BalanceSampler::new(&source, Address::ZERO, SnapshotBlocks::new(1, 2).unwrap())
            .with_concurrency(8);

        let outcome = sampler.sample(&addresses(40)).await;

        let got: Vec<Address> = outcome.samples.iter().map(|s| s.address).collect();
        let want: Vec<Address> = addresses(40).into_iter().collect();
        assert_eq!(got, want);
    }

    #[tokio::test]
    async fn test_concurrency_is_bounded() {
        let source = FakeBalances::new(None);
        let sampler = BalanceSampler::new(&source, Address::ZERO, SnapshotBlocks::new(1, 2).unwrap())
            .with_concurrency(3);

        sampler.sample(&addresses(30)).await;

        let peak = source.peak.load(Ordering::SeqCst);
        assert!(peak <= 6, "peak in-flight queries {peak}");
        assert!(peak > 1);
    }
}

use crate::sampler::BalanceSample;
use alloy_primitives::{Address, U256};

/// A changed balance with the amount to claw back.
///
/// `diff` is `after - min(before, after)`: zero when the balance dropped,
/// the increase when it grew.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BalanceDiff {
    pub address: Address,
    pub before: U256,
    pub after: U256,
    pub min: U256,
    pub diff: U256,
}

/// Returns `None` for unchanged balances.
pub fn compute_diff(sample: &BalanceSample) -> Option<BalanceDiff> {
    if sample.before == sample.after {
        return None;
    }
    let min = sample.before.min(sample.after);
    Some(BalanceDiff {
        address: sample.address,
        before: sample.before,
        after: sample.after,
        min,
        diff: sample.after - min,
    })
}

pub fn compute_diffs<'a>(samples: impl IntoIterator<Item = &'a BalanceSample>) -> Vec<BalanceDiff> {
    samples.into_iter().filter_map(compute_diff).collect()
}

use crate::diff::BalanceDiff;
use crate::error::TotalOverflow;
use alloy_primitives::utils::format_units;
use alloy_primitives::{Address, U256};
use std::fmt::Write;

pub const DEFAULT_SPENDER: &str = "$spender";
pub const DEFAULT_BURN_FROM: &str = "$giveth";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BurnCommand {
    pub address: Address,
    pub amount: U256,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BurnPlan {
    /// Same order as the diffs they came from.
    pub commands: Vec<BurnCommand>,
    pub total: U256,
}

/// Turns non-zero diffs into burn commands and sums them.
pub fn generate_burn_commands<'a>(
    diffs: impl IntoIterator<Item = &'a BalanceDiff>,
) -> Result<BurnPlan, TotalOverflow> {
    let mut plan = BurnPlan::default();
    for diff in diffs {
        if diff.diff.is_zero() {
            continue;
        }
        plan.total = plan
            .total
            .checked_add(diff.diff)
            .ok_or(TotalOverflow {
                commands: plan.commands.len(),
            })?;
        plan.commands.push(BurnCommand {
            address: diff.address,
            amount: diff.diff,
        });
    }
    Ok(plan)
}

/// Placeholders substituted into each rendered command line.
#[derive(Debug, Clone)]
pub struct BurnScript {
    pub spender: String,
    pub burn_from: String,
    pub decimals: u8,
}

impl Default for BurnScript {
    fn default() -> Self {
        Self {
            spender: DEFAULT_SPENDER.to_string(),
            burn_from: DEFAULT_BURN_FROM.to_string(),
            decimals: 18,
        }
    }
}

impl BurnScript {
    pub fn command_line(&self, command: &BurnCommand) -> String {
        format!(
            "exec {} burn(address,uint) {} {} --from {}",
            self.spender,
            command.address.to_checksum(None),
            command.amount,
            self.burn_from
        )
    }

    /// One command per line, then a comment with the exact and formatted total.
    pub fn render(&self, plan: &BurnPlan) -> String {
        let mut out = String::new();
        for command in &plan.commands {
            out.push_str(&self.command_line(command));
            out.push('\n');
        }
        let formatted = format_units(plan.total, self.decimals).unwrap_or_else(|_| plan.total.to_string());
        let _ = writeln!(
            out,
            "# total: {} ({} tokens) across {} commands",
            plan.total,
            formatted,
            plan.commands.len()
        );
        out
    }
}

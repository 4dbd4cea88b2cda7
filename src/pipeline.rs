//! Stage orchestration.
//!
//! Each stage reads the previous stage's table from the output directory and
//! writes its own, so a run can be resumed from any stage.

use crate::artifacts::{
    self, BALANCE_CHANGES_FILE, BALANCES_FILE, BURN_COMMANDS_FILE, TRANSFERS_FILE,
};
use crate::burn::{BurnPlan, BurnScript, generate_burn_commands};
use crate::decoder::{address_set, decode_transfers};
use crate::diff::compute_diffs;
use crate::sampler::{BalanceSampler, SnapshotBlocks};
use crate::scanner::{BlockRange, RangeScanner, ScanConfig};
use crate::source::{BalanceSource, LogSource};
use alloy_primitives::{Address, U256};
use anyhow::{Context, Result};
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Transfers,
    Balances,
    Changes,
    Burns,
}

impl Stage {
    pub const ALL: [Stage; 4] = [Stage::Transfers, Stage::Balances, Stage::Changes, Stage::Burns];

    pub fn artifact(&self) -> &'static str {
        match self {
            Stage::Transfers => TRANSFERS_FILE,
            Stage::Balances => BALANCES_FILE,
            Stage::Changes => BALANCE_CHANGES_FILE,
            Stage::Burns => BURN_COMMANDS_FILE,
        }
    }

    /// Whether the stage queries a node; the others only transform local tables.
    pub fn needs_chain(&self) -> bool {
        matches!(self, Stage::Transfers | Stage::Balances)
    }
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub token_address: Address,
    /// Only needed by the transfers stage.
    pub scan_range: Option<BlockRange>,
    pub snapshot: SnapshotBlocks,
    pub scan: ScanConfig,
    pub balance_concurrency: usize,
    pub burn_script: BurnScript,
    pub output_dir: PathBuf,
}

/// What each executed stage produced, with everything that was skipped.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub transfers: Option<usize>,
    pub skipped_logs: usize,
    pub truncation_risks: Vec<BlockRange>,
    pub balances: Option<usize>,
    pub failed_addresses: Vec<Address>,
    pub changes: Option<usize>,
    pub burn_commands: Option<usize>,
    pub burn_total: Option<U256>,
}

pub struct Pipeline<'a, L, B> {
    logs: &'a L,
    balances: &'a B,
    config: PipelineConfig,
}

impl<'a, L: LogSource, B: BalanceSource> Pipeline<'a, L, B> {
    pub fn new(logs: &'a L, balances: &'a B, config: PipelineConfig) -> Self {
        Self {
            logs,
            balances,
            config,
        }
    }

    pub fn artifact_path(&self, stage: Stage) -> PathBuf {
        self.config.output_dir.join(stage.artifact())
    }

    pub async fn run(&self, stages: &[Stage]) -> Result<RunSummary> {
        let mut summary = RunSummary::default();
        for &stage in stages {
            let started = Instant::now();
            info!("Running stage {:?}", stage);
            match stage {
                Stage::Transfers => self.harvest_transfers(&mut summary).await?,
                Stage::Balances => self.sample_balances(&mut summary).await?,
                Stage::Changes => compute_changes(&self.config.output_dir, &mut summary)?,
                Stage::Burns => {
                    generate_burns(&self.config.output_dir, &self.config.burn_script, &mut summary)?
                }
            }
            stage_finished(stage, &self.config.output_dir, started);
        }
        Ok(summary)
    }

    async fn harvest_transfers(&self, summary: &mut RunSummary) -> Result<()> {
        let range = self
            .config
            .scan_range
            .context("A scan range is required to harvest transfers")?;

        let scanner = RangeScanner::new(self.logs, self.config.token_address, self.config.scan.clone())?;
        let outcome = scanner.scan(range).await?;
        for risk in &outcome.truncation_risks {
            warn!("Blocks {} may have missing transfers", risk);
        }

        let decoded = decode_transfers(&outcome.logs);
        let path = self.artifact_path(Stage::Transfers);
        artifacts::write_atomic(&path, |w| artifacts::write_transfers(w, &decoded.records))
            .with_context(|| format!("Failed to write {}", path.display()))?;

        info!(
            "Saved {} transfers to {} ({} logs skipped, {} duplicates dropped)",
            decoded.records.len(),
            path.display(),
            decoded.skipped,
            outcome.duplicates_dropped
        );
        summary.transfers = Some(decoded.records.len());
        summary.skipped_logs = decoded.skipped;
        summary.truncation_risks = outcome.truncation_risks;
        Ok(())
    }

    async fn sample_balances(&self, summary: &mut RunSummary) -> Result<()> {
        let transfers = artifacts::read_transfers(open(&self.artifact_path(Stage::Transfers))?)?;
        let addresses = address_set(&transfers);
        info!("Found {} unique addresses", addresses.len());

        let sampler = BalanceSampler::new(self.balances, self.config.token_address, self.config.snapshot)
            .with_concurrency(self.config.balance_concurrency);
        let outcome = sampler.sample(&addresses).await;

        let path = self.artifact_path(Stage::Balances);
        artifacts::write_atomic(&path, |w| artifacts::write_balances(w, &outcome.samples))
            .with_context(|| format!("Failed to write {}", path.display()))?;

        info!(
            "Saved balances for {} addresses to {} ({} failed)",
            outcome.samples.len(),
            path.display(),
            outcome.failures.len()
        );
        summary.balances = Some(outcome.samples.len());
        summary.failed_addresses = outcome.failures.iter().map(|f| f.address).collect();
        Ok(())
    }
}

/// Runs the stages that only transform tables already in `output_dir`.
pub fn run_offline(output_dir: &Path, burn_script: &BurnScript, stages: &[Stage]) -> Result<RunSummary> {
    let mut summary = RunSummary::default();
    for &stage in stages {
        let started = Instant::now();
        info!("Running stage {:?}", stage);
        match stage {
            Stage::Changes => compute_changes(output_dir, &mut summary)?,
            Stage::Burns => generate_burns(output_dir, burn_script, &mut summary)?,
            Stage::Transfers | Stage::Balances => {
                anyhow::bail!("Stage {:?} needs an RPC connection", stage)
            }
        }
        stage_finished(stage, output_dir, started);
    }
    Ok(summary)
}

fn compute_changes(output_dir: &Path, summary: &mut RunSummary) -> Result<()> {
    let samples = artifacts::read_balances(open(&output_dir.join(BALANCES_FILE))?)?;
    let diffs = compute_diffs(&samples);

    let path = output_dir.join(BALANCE_CHANGES_FILE);
    artifacts::write_atomic(&path, |w| artifacts::write_balance_changes(w, &diffs))
        .with_context(|| format!("Failed to write {}", path.display()))?;

    info!(
        "Filtered {} balances to {} changed rows in {}",
        samples.len(),
        diffs.len(),
        path.display()
    );
    summary.changes = Some(diffs.len());
    Ok(())
}

fn generate_burns(output_dir: &Path, burn_script: &BurnScript, summary: &mut RunSummary) -> Result<()> {
    let plan = load_burn_plan(output_dir)?;

    let path = output_dir.join(BURN_COMMANDS_FILE);
    let script = burn_script.render(&plan);
    artifacts::write_atomic(&path, |w| {
        use std::io::Write;
        w.write_all(script.as_bytes())?;
        Ok(())
    })
    .with_context(|| format!("Failed to write {}", path.display()))?;

    info!(
        "Saved {} burn commands totalling {} to {}",
        plan.commands.len(),
        plan.total,
        path.display()
    );
    summary.burn_commands = Some(plan.commands.len());
    summary.burn_total = Some(plan.total);
    Ok(())
}

fn stage_finished(stage: Stage, output_dir: &Path, started: Instant) {
    info!(
        "Stage {:?} wrote {} in {:?}",
        stage,
        output_dir.join(stage.artifact()).display(),
        started.elapsed()
    );
}

/// Rebuilds the burn plan from the balance changes table in `output_dir`.
pub fn load_burn_plan(output_dir: &Path) -> Result<BurnPlan> {
    let diffs = artifacts::read_balance_changes(open(&output_dir.join(BALANCE_CHANGES_FILE))?)?;
    Ok(generate_burn_commands(&diffs)?)
}

fn open(path: &Path) -> Result<BufReader<File>> {
    let file = File::open(path).with_context(|| {
        format!(
            "Failed to open {}; run the previous stage first",
            path.display()
        )
    })?;
    Ok(BufReader::new(file))
}

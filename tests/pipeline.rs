use alloy::primitives::{Address, B256, Bytes, LogData, U256};
use alloy::rpc::types::Log;
use alloy::sol_types::SolEvent;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use token_remediation::burn::BurnScript;
use token_remediation::events::Transfer;
use token_remediation::pipeline::{Pipeline, PipelineConfig, RunSummary, Stage, run_offline};
use token_remediation::sampler::SnapshotBlocks;
use token_remediation::scanner::{BlockRange, ScanConfig};
use token_remediation::source::{BalanceSource, LogSource};

const TOKEN: Address = Address::with_last_byte(0xee);
const LOG_LIMIT: usize = 20;
const BLOCK_BEFORE: u64 = 138_850_000;
const BLOCK_AFTER: u64 = 144_200_000;

fn holder(n: u8) -> Address {
    Address::with_last_byte(n)
}

/// A node that silently drops everything past `LOG_LIMIT` entries.
struct TruncatingNode {
    logs: Vec<Log>,
    requests: AtomicUsize,
}

impl TruncatingNode {
    fn new() -> Self {
        let mut logs: Vec<Log> = (0..300u64)
            .map(|i| {
                let block = 100 + i * 3;
                let event = Transfer {
                    from: holder((i % 6) as u8 + 1),
                    to: holder(((i + 1) % 6) as u8 + 1),
                    value: U256::from(i + 1),
                };
                Log {
                    inner: alloy::primitives::Log {
                        address: TOKEN,
                        data: event.encode_log_data(),
                    },
                    block_number: Some(block),
                    log_index: Some(0),
                    transaction_hash: Some(B256::left_padding_from(&block.to_be_bytes())),
                    ..Default::default()
                }
            })
            .collect();

        // Transfer topic without the indexed addresses
        let mut malformed = logs[133].clone();
        malformed.log_index = Some(1);
        malformed.inner.data = LogData::new_unchecked(
            vec![Transfer::SIGNATURE_HASH],
            Bytes::from(U256::from(1).to_be_bytes_vec()),
        );
        logs.insert(134, malformed);

        Self {
            logs,
            requests: AtomicUsize::new(0),
        }
    }
}

impl LogSource for TruncatingNode {
    async fn query_logs(
        &self,
        contract: Address,
        _event_signature: B256,
        from_block: u64,
        to_block: u64,
    ) -> anyhow::Result<Vec<Log>> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        assert_eq!(contract, TOKEN);
        let mut matching: Vec<Log> = self
            .logs
            .iter()
            .filter(|log| (from_block..=to_block).contains(&log.block_number.unwrap_or_default()))
            .cloned()
            .collect();
        matching.truncate(LOG_LIMIT);
        Ok(matching)
    }
}

/// Fixed snapshot balances; holder 5 always reverts.
struct SnapshotNode;

impl BalanceSource for SnapshotNode {
    async fn balance_at(&self, token: Address, owner: Address, block: u64) -> anyhow::Result<U256> {
        assert_eq!(token, TOKEN);
        let before = block == BLOCK_BEFORE;
        let big = U256::from(1) << 70;
        let value = match owner.as_slice()[19] {
            1 => if before { U256::from(100) } else { U256::from(40) },
            2 => if before { U256::from(40) } else { U256::from(100) },
            3 => U256::from(5),
            4 => if before { big } else { big + (U256::from(1) << 65) },
            5 => anyhow::bail!("execution reverted"),
            6 => if before { U256::ZERO } else { U256::from(7) },
            other => anyhow::bail!("unexpected holder {other}"),
        };
        Ok(value)
    }
}

fn output_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!(
        "token-remediation-{}-{}",
        std::process::id(),
        name
    ));
    let _ = fs::remove_dir_all(&dir);
    dir
}

fn pipeline_config(output_dir: PathBuf) -> PipelineConfig {
    PipelineConfig {
        token_address: TOKEN,
        scan_range: Some(BlockRange::new(100, 1_099).unwrap()),
        snapshot: SnapshotBlocks::new(BLOCK_BEFORE, BLOCK_AFTER).unwrap(),
        scan: ScanConfig {
            log_limit: LOG_LIMIT,
            min_chunk: 10,
            initial_chunk: 200,
            request_interval: Duration::ZERO,
        },
        balance_concurrency: 4,
        burn_script: BurnScript::default(),
        output_dir,
    }
}

fn read_artifacts(dir: &Path) -> Vec<Vec<u8>> {
    Stage::ALL
        .iter()
        .map(|stage| fs::read(dir.join(stage.artifact())).unwrap())
        .collect()
}

async fn run_all(dir: PathBuf) -> RunSummary {
    let node = TruncatingNode::new();
    let pipeline = Pipeline::new(&node, &SnapshotNode, pipeline_config(dir));
    pipeline.run(&Stage::ALL).await.unwrap()
}

#[tokio::test]
async fn test_full_pipeline_recovers_truncated_logs() {
    let dir = output_dir("full");

    let summary = run_all(dir.clone()).await;

    let expected_total = (U256::from(1) << 65) + U256::from(67);
    assert_eq!(summary.transfers, Some(300));
    assert_eq!(summary.skipped_logs, 1);
    assert!(summary.truncation_risks.is_empty());
    assert_eq!(summary.balances, Some(5));
    assert_eq!(summary.failed_addresses, vec![holder(5)]);
    assert_eq!(summary.changes, Some(4));
    assert_eq!(summary.burn_commands, Some(3));
    assert_eq!(summary.burn_total, Some(expected_total));

    let transfers = fs::read_to_string(dir.join("transfers.csv")).unwrap();
    assert_eq!(transfers.lines().count(), 301);

    let changes = fs::read_to_string(dir.join("balance_changes.csv")).unwrap();
    assert_eq!(
        changes.lines().collect::<Vec<_>>(),
        vec![
            "address,before,after,min,diff".to_string(),
            format!("{},100,40,40,0", holder(1).to_checksum(None)),
            format!("{},40,100,40,60", holder(2).to_checksum(None)),
            format!("{},1180591620717411303424,1217485108864830406656,1180591620717411303424,36893488147419103232", holder(4).to_checksum(None)),
            format!("{},0,7,0,7", holder(6).to_checksum(None)),
        ]
    );

    let burns = fs::read_to_string(dir.join("burn_commands.txt")).unwrap();
    let lines: Vec<&str> = burns.lines().collect();
    assert_eq!(lines.len(), 4);
    assert_eq!(
        lines[0],
        format!("exec $spender burn(address,uint) {} 60 --from $giveth", holder(2).to_checksum(None))
    );
    assert!(lines[1].contains(" 36893488147419103232 "));
    assert!(lines[3].starts_with(&format!("# total: {expected_total} ")));
    assert_eq!(U256::from_str("36893488147419103299").unwrap(), expected_total);

    fs::remove_dir_all(&dir).unwrap();
}

#[tokio::test]
async fn test_rerun_produces_identical_artifacts() {
    let first = output_dir("first");
    let second = output_dir("second");

    run_all(first.clone()).await;
    run_all(second.clone()).await;

    assert_eq!(read_artifacts(&first), read_artifacts(&second));

    fs::remove_dir_all(&first).unwrap();
    fs::remove_dir_all(&second).unwrap();
}

#[tokio::test]
async fn test_stages_resume_from_disk() {
    let full = output_dir("resume-full");
    let staged = output_dir("resume-staged");
    run_all(full.clone()).await;

    let node = TruncatingNode::new();
    Pipeline::new(&node, &SnapshotNode, pipeline_config(staged.clone()))
        .run(&[Stage::Transfers])
        .await
        .unwrap();

    // Later stages never touch the log source.
    let idle = TruncatingNode::new();
    let mut config = pipeline_config(staged.clone());
    config.scan_range = None;
    let summary = Pipeline::new(&idle, &SnapshotNode, config)
        .run(&[Stage::Balances, Stage::Changes, Stage::Burns])
        .await
        .unwrap();

    assert_eq!(idle.requests.load(Ordering::SeqCst), 0);
    assert_eq!(summary.transfers, None);
    assert_eq!(summary.burn_commands, Some(3));
    assert_eq!(read_artifacts(&full), read_artifacts(&staged));

    fs::remove_dir_all(&full).unwrap();
    fs::remove_dir_all(&staged).unwrap();
}

#[tokio::test]
async fn test_missing_previous_artifact_is_an_error() {
    let dir = output_dir("missing");
    let node = TruncatingNode::new();

    let err = Pipeline::new(&node, &SnapshotNode, pipeline_config(dir.clone()))
        .run(&[Stage::Changes])
        .await
        .unwrap_err();

    assert!(format!("{err:#}").contains("balances.csv"));
    assert!(!dir.join("balance_changes.csv").exists());
}

#[tokio::test]
async fn test_local_stages_run_without_a_node() {
    let dir = output_dir("offline");
    run_all(dir.clone()).await;
    let expected = read_artifacts(&dir);
    fs::remove_file(dir.join("balance_changes.csv")).unwrap();
    fs::remove_file(dir.join("burn_commands.txt")).unwrap();

    let summary = run_offline(&dir, &BurnScript::default(), &[Stage::Changes, Stage::Burns]).unwrap();

    assert_eq!(summary.changes, Some(4));
    assert_eq!(summary.burn_commands, Some(3));
    assert_eq!(read_artifacts(&dir), expected);
    assert!(run_offline(&dir, &BurnScript::default(), &[Stage::Balances]).is_err());

    fs::remove_dir_all(&dir).unwrap();
}

use anyhow::Result;
use clap::{Parser, Subcommand};
use token_remediation::config::{ChainConfig, Config};
use token_remediation::pipeline::{Pipeline, PipelineConfig, RunSummary, Stage, load_burn_plan, run_offline};
use token_remediation::report::{OutputFormat, format_burn_plan, format_run_summary};
use token_remediation::rpc::RpcClient;
use token_remediation::scanner::BlockRange;
use token_remediation::token::{find_deployment_block, resolve_token_address};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "remediate")]
#[command(about = "Harvest token transfers and derive burn commands from balance changes", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "table")]
    format: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scan Transfer logs into transfers.csv
    Transfers,
    /// Sample balances of every transfer participant into balances.csv
    Balances,
    /// Keep changed balances with min/diff into balance_changes.csv
    Changes,
    /// Render burn_commands.txt from balance_changes.csv
    Burns,
    /// Run every stage in order
    All,
    /// Print the burn plan derived from balance_changes.csv
    Summary,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let format = OutputFormat::from(cli.format.as_str());

    let config = Config::from_env()?;
    info!("Configuration loaded");
    info!("Output directory: {}", config.output_dir.display());

    let stages: Vec<Stage> = match cli.command {
        Commands::Summary => {
            let plan = load_burn_plan(&config.output_dir)?;
            println!("{}", format_burn_plan(&plan, config.burn_script.decimals, &format));
            return Ok(());
        }
        Commands::Transfers => vec![Stage::Transfers],
        Commands::Balances => vec![Stage::Balances],
        Commands::Changes => vec![Stage::Changes],
        Commands::Burns => vec![Stage::Burns],
        Commands::All => Stage::ALL.to_vec(),
    };

    let result = if stages.iter().any(Stage::needs_chain) {
        run_chain_stages(&config, &stages).await
    } else {
        run_offline(&config.output_dir, &config.burn_script, &stages)
    };

    match result {
        Ok(summary) => {
            println!("{}", format_run_summary(&summary, &format));
            Ok(())
        }
        Err(e) => {
            error!("Pipeline error: {:#}", e);
            Err(e)
        }
    }
}

async fn run_chain_stages(config: &Config, stages: &[Stage]) -> Result<RunSummary> {
    let chain = ChainConfig::from_env()?;
    info!(
        "RPC URLs: {} endpoint(s) configured",
        chain.json_rpc_urls.len()
    );
    let client = RpcClient::new(&chain.json_rpc_urls)?.with_balance_method(chain.balance_method);

    let token_address =
        resolve_token_address(&client, chain.token_address, chain.token_manager_address).await?;

    let scan_range = if stages.contains(&Stage::Transfers) {
        let latest_block = client.get_latest_block().await?;
        let end = chain.scan_to_block.unwrap_or(latest_block);
        let start = match chain.scan_from_block {
            Some(block) => block,
            None => find_deployment_block(&client, token_address, latest_block).await?,
        };
        info!("Harvest range: blocks {} to {}", start, end);
        Some(BlockRange::new(start, end)?)
    } else {
        None
    };

    let pipeline = Pipeline::new(
        &client,
        &client,
        PipelineConfig {
            token_address,
            scan_range,
            snapshot: chain.snapshot,
            scan: chain.scan,
            balance_concurrency: chain.balance_concurrency,
            burn_script: config.burn_script.clone(),
            output_dir: config.output_dir.clone(),
        },
    );
    pipeline.run(stages).await
}

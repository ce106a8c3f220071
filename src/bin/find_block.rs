use anyhow::Context;
use clap::Parser;
use evm_history_rs::block_locator::{locate_with, DEFAULT_TOLERANCE_SECS};
use evm_history_rs::client::{connect_http, latest_block_number, Web3BlockSource};
use evm_history_rs::env_log::init_with_default_level;
use futures::future::join_all;
use log::info;
use std::time::Duration;
use tokio::time::timeout;

#[derive(Parser, Debug)]
#[command(about, long_about = None)]
struct Args {
    /// url of web3 node to connect to
    #[arg(long, env = "NODE_URL")]
    node_url: String,

    /// unix timestamp to resolve into a block number, may be repeated
    #[arg(long = "timestamp", required = true, allow_hyphen_values = true)]
    timestamps: Vec<i64>,

    /// seconds between block and target timestamp accepted as a match
    #[arg(long, default_value_t = DEFAULT_TOLERANCE_SECS)]
    tolerance: i64,

    /// upper bound for a single lookup, in seconds
    #[arg(long, default_value_t = 60)]
    timeout_secs: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_with_default_level();
    let args = Args::parse();

    let web3 = connect_http(&args.node_url)?;
    let latest = latest_block_number(&web3).await?;
    info!("chain head is block {}", latest);

    let source = Web3BlockSource::new(web3);
    let tolerance = args.tolerance;
    let limit = Duration::from_secs(args.timeout_secs);

    // each lookup owns its search window
    let lookups = args.timestamps.iter().map(|&target| {
        let source = &source;
        async move {
            let res = timeout(limit, locate_with(source, target, latest, tolerance)).await;
            (target, res)
        }
    });

    for (target, res) in join_all(lookups).await {
        let block = res
            .with_context(|| format!("timestamp {} lookup timed out", target))?
            .with_context(|| format!("timestamp {} lookup", target))?;
        info!("timestamp {} -> block {}", target, block);
        println!("{} {}", target, block);
    }

    Ok(())
}

use anyhow::Context;
use clap::Parser;
use evm_history_rs::block_locator::DEFAULT_TOLERANCE_SECS;
use evm_history_rs::client::{connect_http, find_block_by_timestamp};
use evm_history_rs::env_log::init_with_default_level;
use evm_history_rs::token::{format_units, TokenReader};
use log::info;
use web3::types::Address;

#[derive(Parser, Debug)]
#[command(about, long_about = None)]
struct Args {
    /// url of web3 node to connect to, must serve historical state for old blocks
    #[arg(long, env = "NODE_URL")]
    node_url: String,

    /// ERC-20 token contract
    #[arg(long)]
    token: Address,

    /// account whose balance is read
    #[arg(long)]
    holder: Address,

    /// block to read state at (default - latest)
    #[arg(long, conflicts_with = "timestamp")]
    block: Option<u64>,

    /// unix timestamp to read state at, resolved to the closest block
    #[arg(long)]
    timestamp: Option<i64>,

    /// seconds of slack when resolving the timestamp
    #[arg(long, default_value_t = DEFAULT_TOLERANCE_SECS)]
    tolerance: i64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_with_default_level();
    let args = Args::parse();

    let web3 = connect_http(&args.node_url)?;

    let at = match (args.block, args.timestamp) {
        (Some(block), _) => Some(block),
        (None, Some(ts)) => {
            let block = find_block_by_timestamp(&web3, ts, args.tolerance).await?;
            info!("timestamp {} resolved to block {}", ts, block);
            Some(block)
        }
        (None, None) => None,
    };

    let reader = TokenReader::new(web3)?;
    let token = reader
        .metadata(args.token)
        .await
        .with_context(|| format!("token: {:?} lookup", args.token))?;
    let decimals = token.decimals.unwrap_or(0);

    let balance = reader.balance_of(args.token, args.holder, at).await?;
    let supply = reader.total_supply(args.token, at).await?;

    let at_label = at.map_or_else(|| "latest".to_string(), |n| n.to_string());
    println!(
        "{:?} held {} {} at block {} (total supply {})",
        args.holder,
        format_units(balance, decimals),
        token.symbol,
        at_label,
        format_units(supply, decimals)
    );

    Ok(())
}

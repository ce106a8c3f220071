use anyhow::{anyhow, Context};
use clap::Parser;
use evm_history_rs::block_locator::DEFAULT_TOLERANCE_SECS;
use evm_history_rs::client::{connect_http, find_block_by_timestamp, latest_block_number};
use evm_history_rs::env_log::init_with_default_level;
use evm_history_rs::token::TokenReader;
use evm_history_rs::transfer_logs::{TransferFilter, TransferLogScanner, DEFAULT_CHUNK_SIZE};
use log::info;
use web3::transports::Http;
use web3::types::Address;
use web3::Web3;

#[derive(Parser, Debug)]
#[command(about, long_about = None)]
struct Args {
    /// url of web3 node to connect to
    #[arg(long, env = "NODE_URL")]
    node_url: String,

    /// ERC-20 token contract to scan
    #[arg(long)]
    token: Address,

    /// first block to scan
    #[arg(long, conflicts_with = "from_timestamp")]
    from_block: Option<u64>,

    /// first block to scan, given as a unix timestamp
    #[arg(long)]
    from_timestamp: Option<i64>,

    /// last block to scan (default - latest)
    #[arg(long, conflicts_with = "to_timestamp")]
    to_block: Option<u64>,

    /// last block to scan, given as a unix timestamp
    #[arg(long)]
    to_timestamp: Option<i64>,

    /// only transfers sent by this address
    #[arg(long)]
    sender: Option<Address>,

    /// only transfers received by this address
    #[arg(long)]
    recipient: Option<Address>,

    /// max number of blocks per eth_getLogs request
    #[arg(long, default_value_t = DEFAULT_CHUNK_SIZE)]
    chunk_size: u64,

    /// seconds of slack when resolving timestamps to blocks
    #[arg(long, default_value_t = DEFAULT_TOLERANCE_SECS)]
    tolerance: i64,
}

async fn resolve_block(
    web3: &Web3<Http>,
    block: Option<u64>,
    timestamp: Option<i64>,
    tolerance: i64,
) -> anyhow::Result<Option<u64>> {
    if let Some(block) = block {
        return Ok(Some(block));
    }
    match timestamp {
        Some(ts) => Ok(Some(find_block_by_timestamp(web3, ts, tolerance).await?)),
        None => Ok(None),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_with_default_level();
    let args = Args::parse();

    let web3 = connect_http(&args.node_url)?;

    let from_block = resolve_block(&web3, args.from_block, args.from_timestamp, args.tolerance)
        .await?
        .ok_or_else(|| anyhow!("either --from-block or --from-timestamp is required"))?;
    let to_block = match resolve_block(&web3, args.to_block, args.to_timestamp, args.tolerance)
        .await?
    {
        Some(block) => block,
        None => latest_block_number(&web3).await?,
    };

    let token_reader = TokenReader::new(web3.clone())?;
    let token = token_reader
        .metadata(args.token)
        .await
        .with_context(|| format!("token: {:?} lookup", args.token))?;

    let scanner = TransferLogScanner::new(web3)?;
    let transfers = scanner
        .fetch_transfers(
            &TransferFilter {
                token: args.token,
                from_block,
                to_block,
                sender: args.sender,
                recipient: args.recipient,
            },
            args.chunk_size,
        )
        .await?;

    info!(
        "{} {} transfers in blocks {}..={}",
        transfers.len(),
        token.symbol,
        from_block,
        to_block
    );
    for transfer in &transfers {
        let line = transfer.formatted(token.decimals.unwrap_or(0), &token.symbol);
        println!("{}", serde_json::to_string(&line)?);
    }

    Ok(())
}

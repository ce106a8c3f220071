use anyhow::{anyhow, Context};
use clap::Parser;
use evm_history_rs::client::connect_http;
use evm_history_rs::env_log::init_with_default_level;
use evm_history_rs::lending::LendingPool;
use log::info;
use std::str::FromStr;
use secp256k1::SecretKey;
use web3::signing::Key;
use web3::types::{Address, U256};

#[derive(Parser, Debug)]
#[command(about, long_about = None)]
struct Args {
    /// url of web3 node to connect to
    #[arg(long, env = "NODE_URL")]
    node_url: String,

    /// hex encoded private key of the supplying account
    #[arg(long, env = "PRIVATE_KEY", hide_env_values = true)]
    private_key: String,

    /// lending pool contract
    #[arg(long)]
    pool: Address,

    /// ERC-20 asset to supply
    #[arg(long)]
    asset: Address,

    /// amount in the asset's smallest unit
    #[arg(long)]
    amount: String,

    /// account credited with the supply (default - the signer)
    #[arg(long)]
    on_behalf_of: Option<Address>,

    /// gas limit of each sent transaction
    #[arg(long, default_value_t = 300_000)]
    gas_limit: u64,

    /// confirmations to wait for per transaction
    #[arg(long, default_value_t = 1)]
    confirmations: usize,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_with_default_level();
    let args = Args::parse();

    let secret_key = SecretKey::from_str(args.private_key.trim_start_matches("0x"))
        .map_err(|err| anyhow!("private key: {}", err))?;
    let signer = (&secret_key).address();
    let amount = U256::from_dec_str(&args.amount)
        .map_err(|err| anyhow!("amount {}: {:?}", args.amount, err))?;

    let web3 = connect_http(&args.node_url)?;
    let pool = LendingPool::new(web3, args.pool)?
        .with_gas_limit(args.gas_limit)
        .with_confirmations(args.confirmations);

    let receipt = pool
        .supply(
            args.asset,
            amount,
            args.on_behalf_of.unwrap_or(signer),
            &secret_key,
        )
        .await
        .with_context(|| "supply")?;
    info!(
        "supplied {} of {:?} in tx {:?} (block {:?})",
        amount, args.asset, receipt.transaction_hash, receipt.block_number
    );

    let account = pool.user_account_data(signer).await?;
    println!("{}", serde_json::to_string_pretty(&account)?);
    Ok(())
}

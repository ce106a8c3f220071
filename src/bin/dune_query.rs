use anyhow::{anyhow, Context};
use clap::Parser;
use evm_history_rs::env_log::init_with_default_level;
use evm_history_rs::indexer::dune::{DuneClient, DUNE_API_URL};
use log::info;
use serde_json::{Map, Value};
use std::time::Duration;
use tokio::time::timeout;

#[derive(Parser, Debug)]
#[command(about, long_about = None)]
struct Args {
    /// Dune API key
    #[arg(long, env = "DUNE_API_KEY", hide_env_values = true)]
    api_key: String,

    /// id of the saved query to execute
    #[arg(long)]
    query_id: u64,

    /// query parameter as name=value, may be repeated
    #[arg(long = "param", value_parser = parse_param)]
    params: Vec<(String, String)>,

    /// API base url
    #[arg(long, default_value = DUNE_API_URL)]
    base_url: String,

    /// seconds between execution status polls
    #[arg(long, default_value_t = 5)]
    poll_interval_secs: u64,

    /// give up waiting for the execution after this many seconds
    #[arg(long, default_value_t = 300)]
    timeout_secs: u64,
}

fn parse_param(s: &str) -> anyhow::Result<(String, String)> {
    let (name, value) = s
        .split_once('=')
        .ok_or_else(|| anyhow!("expected name=value, got {}", s))?;
    Ok((name.to_string(), value.to_string()))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_with_default_level();
    let args = Args::parse();

    let parameters: Map<String, Value> = args
        .params
        .into_iter()
        .map(|(name, value)| (name, Value::String(value)))
        .collect();

    let client = DuneClient::new_with_base_url(args.api_key, args.base_url);
    let results = timeout(
        Duration::from_secs(args.timeout_secs),
        client.run_query(
            args.query_id,
            &parameters,
            Duration::from_secs(args.poll_interval_secs),
        ),
    )
    .await
    .with_context(|| format!("query {} timed out", args.query_id))?
    .with_context(|| format!("query {}", args.query_id))?;

    info!(
        "query {} returned {} rows (columns: {})",
        args.query_id,
        results.rows.len(),
        results.metadata.column_names.join(", ")
    );
    for row in results.rows {
        println!("{}", Value::Object(row));
    }
    Ok(())
}

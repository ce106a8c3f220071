use anyhow::Context;
use clap::Parser;
use evm_history_rs::env_log::init_with_default_level;
use evm_history_rs::indexer::subgraph::SubgraphClient;
use log::info;
use serde_json::Value;
use tokio::fs::File;
use tokio::io::AsyncReadExt;

#[derive(Parser, Debug)]
#[command(about, long_about = None)]
struct Args {
    /// GraphQL endpoint of the subgraph
    #[arg(long, env = "SUBGRAPH_URL")]
    endpoint: String,

    /// file holding the GraphQL query
    #[arg(long)]
    query_file: String,

    /// query variables as a JSON object
    #[arg(long, default_value = "{}")]
    variables: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_with_default_level();
    let args = Args::parse();

    let mut query_file = File::open(&args.query_file)
        .await
        .with_context(|| format!("open {}", args.query_file))?;
    let mut query = String::new();
    query_file.read_to_string(&mut query).await?;

    let variables: Value =
        serde_json::from_str(&args.variables).with_context(|| "variables: invalid JSON")?;

    let client = SubgraphClient::new(args.endpoint);
    let data: Value = client
        .query(&query, variables)
        .await
        .with_context(|| "subgraph query")?;

    info!("subgraph query from {} answered", args.query_file);
    println!("{}", serde_json::to_string_pretty(&data)?);
    Ok(())
}

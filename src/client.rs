use anyhow::{anyhow, Context};
use log::debug;
use std::future::Future;
use web3::transports::Http;
use web3::types::{BlockId, BlockNumber};
use web3::{Transport, Web3};

use crate::block_locator::{self, BlockTimestampSource};

/// Builds an http web3 client. Every component takes the client explicitly.
pub fn connect_http(node_url: &str) -> anyhow::Result<Web3<Http>> {
    let transport = Http::new(node_url).with_context(|| "http transport create")?;
    Ok(Web3::new(transport))
}

pub async fn latest_block_number<T: Transport>(web3: &Web3<T>) -> anyhow::Result<u64> {
    let number = web3
        .eth()
        .block_number()
        .await
        .with_context(|| "eth block number")?;
    Ok(number.as_u64())
}

/// Block timestamps served by `eth_getBlockByNumber`.
#[derive(Clone)]
pub struct Web3BlockSource<T: Transport> {
    web3: Web3<T>,
}

impl<T: Transport> Web3BlockSource<T> {
    pub fn new(web3: Web3<T>) -> Self {
        Self { web3 }
    }
}

impl<T> BlockTimestampSource for Web3BlockSource<T>
where
    T: Transport + Send + Sync,
    T::Out: Send,
{
    fn block_timestamp(&self, number: u64) -> impl Future<Output = anyhow::Result<u64>> + Send {
        async move {
            let block = self
                .web3
                .eth()
                .block(BlockId::Number(BlockNumber::Number(number.into())))
                .await
                .with_context(|| format!("eth block {}", number))?
                .ok_or_else(|| anyhow!("block {} not found", number))?;
            if block.timestamp.bits() > 64 {
                return Err(anyhow!(
                    "block {} timestamp {} out of range",
                    number,
                    block.timestamp
                ));
            }
            let timestamp = block.timestamp.as_u64();
            debug!("block {} timestamp {}", number, timestamp);
            Ok(timestamp)
        }
    }
}

/// Resolves a unix timestamp to the closest block on the chain behind `web3`.
pub async fn find_block_by_timestamp<T>(
    web3: &Web3<T>,
    target: i64,
    tolerance: i64,
) -> anyhow::Result<u64>
where
    T: Transport + Send + Sync,
    T::Out: Send,
{
    let latest = latest_block_number(web3).await?;
    let source = Web3BlockSource::new(web3.clone());
    let block = block_locator::locate_with(&source, target, latest, tolerance)
        .await
        .with_context(|| format!("locate block for timestamp {}", target))?;
    debug!("timestamp {} -> block {} (head {})", target, block, latest);
    Ok(block)
}

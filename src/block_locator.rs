use std::future::Future;

use thiserror::Error;

/// Acceptance window used when the caller has no opinion.
pub const DEFAULT_TOLERANCE_SECS: i64 = 15;

#[derive(Error, Debug)]
pub enum LocateError {
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("block {block} timestamp lookup failed: {source}")]
    Lookup {
        block: u64,
        #[source]
        source: anyhow::Error,
    },
    #[error("no block timestamp could be fetched")]
    NotFound,
}

/// Something that can tell the timestamp of a block by its number.
///
/// Implemented for the web3 client in [`crate::client::Web3BlockSource`];
/// tests and callers with their own transport can use [`locate`] with a plain closure.
pub trait BlockTimestampSource {
    fn block_timestamp(&self, number: u64) -> impl Future<Output = anyhow::Result<u64>> + Send;
}

/// Binary search for the block whose timestamp is closest to `target`.
///
/// Stops as soon as a fetched block lies within `tolerance` seconds of the target,
/// otherwise returns the closest block seen once the window `[low, high]` is exhausted.
/// Assumes timestamps are non-decreasing in block number; on chains where that does
/// not hold the answer is only approximate.
pub async fn locate<F, Fut>(
    target: i64,
    mut fetch_block_timestamp: F,
    latest: u64,
    tolerance: i64,
) -> Result<u64, LocateError>
where
    F: FnMut(u64) -> Fut,
    Fut: Future<Output = anyhow::Result<u64>>,
{
    if tolerance < 0 {
        return Err(LocateError::InvalidInput(format!(
            "tolerance must not be negative, got {}",
            tolerance
        )));
    }

    let target = i128::from(target);
    let tolerance = i128::from(tolerance);
    let mut low = 0u64;
    let mut high = latest;
    // (block, distance to target)
    let mut best: Option<(u64, i128)> = None;

    while low <= high {
        let mid = low + (high - low) / 2;
        let timestamp = fetch_block_timestamp(mid)
            .await
            .map_err(|source| LocateError::Lookup { block: mid, source })?;
        let timestamp = i128::from(timestamp);
        let distance = (timestamp - target).abs();

        if distance <= tolerance {
            return Ok(mid);
        }
        if best.map_or(true, |(_, best_distance)| distance < best_distance) {
            best = Some((mid, distance));
        }

        if timestamp < target {
            match mid.checked_add(1) {
                Some(next_low) => low = next_low,
                // window is [u64::MAX + 1, u64::MAX]
                None => break,
            }
        } else {
            match mid.checked_sub(1) {
                Some(next_high) => high = next_high,
                // window is [0, -1]
                None => break,
            }
        }
    }

    best.map(|(block, _)| block).ok_or(LocateError::NotFound)
}

/// [`locate`] driven by a [`BlockTimestampSource`].
pub async fn locate_with<S: BlockTimestampSource>(
    source: &S,
    target: i64,
    latest: u64,
    tolerance: i64,
) -> Result<u64, LocateError> {
    locate(target, move |n| source.block_timestamp(n), latest, tolerance).await
}

use anyhow::{anyhow, bail, Context};
use ethabi::{Log, RawLog, Token};
use hex_literal::hex;
use log::{debug, info};
use serde::Serialize;
use std::collections::HashMap;
use web3::contract::tokens::Tokenizable;
use web3::types::{Address, BlockNumber, FilterBuilder, H256, U256};
use web3::{Transport, Web3};

use crate::token::{format_units, ERC20_ABI};

/// keccak256("Transfer(address,address,uint256)")
pub const TRANSFER_TOPIC: H256 = H256(hex!(
    "ddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3ef"
));

/// Block span most public providers accept for one `eth_getLogs` call.
pub const DEFAULT_CHUNK_SIZE: u64 = 2_000;

#[derive(Debug, Clone)]
pub struct TransferFilter {
    pub token: Address,
    pub from_block: u64,
    pub to_block: u64,
    pub sender: Option<Address>,
    pub recipient: Option<Address>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransferEvent {
    pub from: Address,
    pub to: Address,
    pub value: U256,
    pub block_number: Option<u64>,
    pub transaction_hash: Option<H256>,
}

/// A transfer with its value rendered in token units, for printing.
#[derive(Debug, Serialize)]
pub struct FormattedTransfer<'a> {
    #[serde(flatten)]
    pub transfer: &'a TransferEvent,
    pub amount: String,
    pub symbol: &'a str,
}

impl TransferEvent {
    pub fn formatted<'a>(&'a self, decimals: u8, symbol: &'a str) -> FormattedTransfer<'a> {
        FormattedTransfer {
            transfer: self,
            amount: format_units(self.value, decimals),
            symbol,
        }
    }
}

/// Splits `[from, to]` into inclusive windows of at most `chunk_size` blocks.
pub fn block_ranges(from: u64, to: u64, chunk_size: u64) -> anyhow::Result<Vec<(u64, u64)>> {
    if chunk_size == 0 {
        bail!("chunk size must be positive");
    }
    let mut ranges = Vec::new();
    let mut start = from;
    while start <= to {
        let end = start.saturating_add(chunk_size - 1).min(to);
        ranges.push((start, end));
        if end == u64::MAX {
            break;
        }
        start = end + 1;
    }
    Ok(ranges)
}

pub struct TransferLogScanner<T: Transport> {
    web3: Web3<T>,
    transfer_event: ethabi::Event,
}

impl<T: Transport> TransferLogScanner<T> {
    pub fn new(web3: Web3<T>) -> anyhow::Result<Self> {
        let contract = ethabi::Contract::load(ERC20_ABI).with_context(|| "erc20 abi load")?;
        let transfer_event = contract.event("Transfer")?.clone();
        Ok(Self {
            web3,
            transfer_event,
        })
    }

    /// Pages through `eth_getLogs` one chunk at a time. Any failing chunk fails the scan.
    pub async fn fetch_transfers(
        &self,
        filter: &TransferFilter,
        chunk_size: u64,
    ) -> anyhow::Result<Vec<TransferEvent>> {
        let ranges = block_ranges(filter.from_block, filter.to_block, chunk_size)?;
        info!(
            "scanning transfers of {:?} in blocks {}..={} ({} chunks)",
            filter.token,
            filter.from_block,
            filter.to_block,
            ranges.len()
        );

        let mut transfers = Vec::new();
        for (start, end) in ranges {
            let chunk = self
                .fetch_chunk(filter, start, end)
                .await
                .with_context(|| format!("transfer logs for blocks {}..={}", start, end))?;
            debug!("blocks {}..={}: {} transfers", start, end, chunk.len());
            transfers.extend(chunk);
        }
        Ok(transfers)
    }

    async fn fetch_chunk(
        &self,
        filter: &TransferFilter,
        start: u64,
        end: u64,
    ) -> anyhow::Result<Vec<TransferEvent>> {
        let log_filter = FilterBuilder::default()
            .address(vec![filter.token])
            .topics(
                Some(vec![self.transfer_event.signature()]),
                filter.sender.map(|a| vec![H256::from(a)]),
                filter.recipient.map(|a| vec![H256::from(a)]),
                None,
            )
            .from_block(BlockNumber::Number(start.into()))
            .to_block(BlockNumber::Number(end.into()))
            .build();

        let logs = self
            .web3
            .eth()
            .logs(log_filter)
            .await
            .with_context(|| "eth raw logs")?;

        logs.into_iter()
            .map(|l| parse_transfer(&self.transfer_event, l))
            .collect()
    }
}

pub fn parse_transfer(
    event: &ethabi::Event,
    log: web3::types::Log,
) -> anyhow::Result<TransferEvent> {
    let block_number = log.block_number.map(|n| n.as_u64());
    let transaction_hash = log.transaction_hash;
    let decoded = event.parse_log(RawLog {
        topics: log.topics,
        data: log.data.0,
    })?;
    let mut transfer = TransferEvent::try_from(decoded)?;
    transfer.block_number = block_number;
    transfer.transaction_hash = transaction_hash;
    Ok(transfer)
}

impl TryFrom<Log> for TransferEvent {
    type Error = anyhow::Error;

    fn try_from(log: Log) -> Result<Self, Self::Error> {
        let param_map: HashMap<String, Token> = log
            .params
            .into_iter()
            .map(|p| (p.name, p.value))
            .collect();

        fn extract_parameter<R: Tokenizable>(
            param_map: &HashMap<String, Token>,
            name: &str,
        ) -> anyhow::Result<R> {
            param_map
                .get(name)
                .map(|t| R::from_token(t.clone()))
                .transpose()?
                .ok_or_else(|| anyhow!("missing parameter for: {}", name))
        }

        Ok(Self {
            from: extract_parameter(&param_map, "from")?,
            to: extract_parameter(&param_map, "to")?,
            value: extract_parameter(&param_map, "value")?,
            block_number: None,
            transaction_hash: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ethabi::LogParam;
    use serde_json::json;

    fn transfer_event() -> ethabi::Event {
        ethabi::Contract::load(ERC20_ABI)
            .unwrap()
            .event("Transfer")
            .unwrap()
            .clone()
    }

    #[test]
    fn ranges_cover_interval_without_overlap() {
        let ranges = block_ranges(100, 1_050, 250).unwrap();
        assert_eq!(
            ranges,
            vec![(100, 349), (350, 599), (600, 849), (850, 1_050)]
        );
    }

    #[test]
    fn single_block_range() {
        assert_eq!(block_ranges(7, 7, 2_000).unwrap(), vec![(7, 7)]);
    }

    #[test]
    fn empty_when_from_after_to() {
        assert!(block_ranges(10, 9, 5).unwrap().is_empty());
    }

    #[test]
    fn zero_chunk_size_rejected() {
        assert!(block_ranges(0, 10, 0).is_err());
    }

    #[test]
    fn range_ending_at_u64_max_terminates() {
        let ranges = block_ranges(u64::MAX - 2, u64::MAX, 2).unwrap();
        assert_eq!(ranges, vec![(u64::MAX - 2, u64::MAX - 1), (u64::MAX, u64::MAX)]);
    }

    #[test]
    fn transfer_topic_matches_abi() {
        assert_eq!(transfer_event().signature(), TRANSFER_TOPIC);
    }

    #[test]
    fn transfer_from_decoded_log() {
        let from = Address::repeat_byte(0x11);
        let to = Address::repeat_byte(0x22);
        let log = Log {
            params: vec![
                LogParam {
                    name: "from".to_string(),
                    value: Token::Address(from),
                },
                LogParam {
                    name: "to".to_string(),
                    value: Token::Address(to),
                },
                LogParam {
                    name: "value".to_string(),
                    value: Token::Uint(U256::from(1_000u64)),
                },
            ],
        };
        let transfer = TransferEvent::try_from(log).unwrap();
        assert_eq!(transfer.from, from);
        assert_eq!(transfer.to, to);
        assert_eq!(transfer.value, U256::from(1_000u64));
    }

    #[test]
    fn missing_parameter_is_an_error() {
        let log = Log {
            params: vec![LogParam {
                name: "from".to_string(),
                value: Token::Address(Address::zero()),
            }],
        };
        let err = TransferEvent::try_from(log).unwrap_err();
        assert!(err.to_string().contains("to"));
    }

    #[test]
    fn parse_raw_rpc_log() {
        let raw = json!({
            "address": "0xa0b86991c6218b36c1d19d4a2e9eb0ce3606eb48",
            "topics": [
                "0xddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3ef",
                "0x0000000000000000000000001111111111111111111111111111111111111111",
                "0x0000000000000000000000002222222222222222222222222222222222222222"
            ],
            "data": "0x00000000000000000000000000000000000000000000000000000000000f4240",
            "blockNumber": "0x10",
            "transactionHash": "0x3333333333333333333333333333333333333333333333333333333333333333"
        });
        let log: web3::types::Log = serde_json::from_value(raw).unwrap();

        let transfer = parse_transfer(&transfer_event(), log).unwrap();
        assert_eq!(transfer.from, Address::repeat_byte(0x11));
        assert_eq!(transfer.to, Address::repeat_byte(0x22));
        assert_eq!(transfer.value, U256::from(1_000_000u64));
        assert_eq!(transfer.block_number, Some(16));
        assert_eq!(transfer.transaction_hash, Some(H256::repeat_byte(0x33)));
    }

    #[test]
    fn formatted_transfer_serializes_event_fields_and_amount() {
        let transfer = TransferEvent {
            from: Address::repeat_byte(0x11),
            to: Address::repeat_byte(0x22),
            value: U256::from(2_500_000u64),
            block_number: Some(16),
            transaction_hash: None,
        };
        let line = serde_json::to_value(transfer.formatted(6, "USDC")).unwrap();
        assert_eq!(line["amount"], "2.5");
        assert_eq!(line["symbol"], "USDC");
        assert_eq!(line["block_number"], 16);
        assert_eq!(line["from"], "0x1111111111111111111111111111111111111111");
        assert!(line["transaction_hash"].is_null());
        assert!(line.get("value").is_some());
    }

    #[test]
    fn log_with_wrong_signature_rejected() {
        let raw = json!({
            "address": "0xa0b86991c6218b36c1d19d4a2e9eb0ce3606eb48",
            "topics": ["0x0000000000000000000000000000000000000000000000000000000000000001"],
            "data": "0x"
        });
        let log: web3::types::Log = serde_json::from_value(raw).unwrap();
        assert!(parse_transfer(&transfer_event(), log).is_err());
    }
}

use anyhow::{anyhow, bail, Context};
use log::debug;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use web3::types::{Address, BlockId, BlockNumber, CallRequest, U256};
use web3::{Transport, Web3};

pub(crate) const ERC20_ABI: &[u8] = include_bytes!("abi/ERC20TokenAbi.json");

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenMetadata {
    pub name: String,
    pub symbol: String,
    pub address: Address,
    pub decimals: Option<u8>,
}

/// Reads ERC-20 state with raw `eth_call`s, either at the chain head or at a past block.
/// Past blocks need an archive node once they fall out of the node's state window.
#[derive(Clone)]
pub struct TokenReader<T: Transport> {
    web3: Web3<T>,
    abi: ethabi::Contract,
    known_tokens: Arc<RwLock<HashMap<Address, TokenMetadata>>>,
}

fn block_id(at: Option<u64>) -> Option<BlockId> {
    at.map(|n| BlockId::Number(BlockNumber::Number(n.into())))
}

impl<T: Transport> TokenReader<T> {
    pub fn new(web3: Web3<T>) -> anyhow::Result<Self> {
        Ok(Self {
            web3,
            abi: ethabi::Contract::load(ERC20_ABI).with_context(|| "erc20 abi load")?,
            known_tokens: Default::default(),
        })
    }

    /// Name, symbol and decimals as of the chain head. Metadata is immutable in
    /// practice, so every token is read once per reader.
    pub async fn metadata(&self, token: Address) -> anyhow::Result<TokenMetadata> {
        if let Some(known) = self.known_tokens.read().await.get(&token) {
            return Ok(known.clone());
        }

        let symbol = decode_text(&self.call_view(token, "symbol", &[], None).await?)
            .with_context(|| format!("symbol of {:?}", token))?;
        let name = decode_text(&self.call_view(token, "name", &[], None).await?)
            .with_context(|| format!("name of {:?}", token))?;
        // decimals() is optional in ERC-20
        let decimals = match self.call_view(token, "decimals", &[], None).await {
            Ok(raw) => self
                .decode_uint("decimals", &raw)
                .ok()
                .and_then(|d| u8::try_from(d).ok()),
            Err(err) => {
                debug!("no decimals for {:?}: {:#}", token, err);
                None
            }
        };

        let metadata = TokenMetadata {
            name,
            symbol,
            address: token,
            decimals,
        };
        self.known_tokens
            .write()
            .await
            .insert(token, metadata.clone());
        Ok(metadata)
    }

    /// `balanceOf(holder)` as of block `at`, or latest when `None`.
    pub async fn balance_of(
        &self,
        token: Address,
        holder: Address,
        at: Option<u64>,
    ) -> anyhow::Result<U256> {
        debug!("balanceOf {:?} on {:?} at {:?}", holder, token, at);
        let raw = self
            .call_view(token, "balanceOf", &[ethabi::Token::Address(holder)], at)
            .await?;
        self.decode_uint("balanceOf", &raw)
    }

    pub async fn total_supply(&self, token: Address, at: Option<u64>) -> anyhow::Result<U256> {
        let raw = self.call_view(token, "totalSupply", &[], at).await?;
        self.decode_uint("totalSupply", &raw)
    }

    async fn call_view(
        &self,
        token: Address,
        function: &str,
        params: &[ethabi::Token],
        at: Option<u64>,
    ) -> anyhow::Result<Vec<u8>> {
        let data = self.abi.function(function)?.encode_input(params)?;
        let request = CallRequest::builder().to(token).data(data.into()).build();
        let output = self
            .web3
            .eth()
            .call(request, block_id(at))
            .await
            .with_context(|| format!("eth_call {} on {:?} at {:?}", function, token, at))?;
        Ok(output.0)
    }

    fn decode_uint(&self, function: &str, raw: &[u8]) -> anyhow::Result<U256> {
        let tokens = self.abi.function(function)?.decode_output(raw)?;
        match tokens.into_iter().next() {
            Some(ethabi::Token::Uint(value)) => Ok(value),
            other => Err(anyhow!("{}: expected uint, got {:?}", function, other)),
        }
    }
}

/// Decodes a `name()`/`symbol()` return value. Most tokens return an abi-encoded
/// `string`; older ones (MKR, SAI) return a nul-padded `bytes32`.
pub fn decode_text(raw: &[u8]) -> anyhow::Result<String> {
    let is_string_offset = raw.len() >= 64
        && raw[..31].iter().all(|b| *b == 0)
        && raw[31] == 0x20;
    if is_string_offset {
        return match ethabi::decode(&[ethabi::ParamType::String], raw)?.pop() {
            Some(ethabi::Token::String(text)) => Ok(text),
            other => Err(anyhow!("expected string, got {:?}", other)),
        };
    }
    if raw.len() == 32 {
        let text: Vec<u8> = raw.iter().copied().filter(|b| *b != 0).collect();
        return Ok(String::from_utf8_lossy(&text).into_owned());
    }
    bail!("unexpected {} byte text return value", raw.len())
}

/// Renders a raw token amount with `decimals` fractional digits, trailing zeros trimmed.
pub fn format_units(value: U256, decimals: u8) -> String {
    if value.bits() <= 96 {
        if let Ok(d) = Decimal::try_from_i128_with_scale(value.as_u128() as i128, decimals.into()) {
            return d.normalize().to_string();
        }
    }

    // beyond Decimal's 96-bit mantissa or 28 digit scale
    let decimals = usize::from(decimals);
    let digits = format!("{:0>width$}", value.to_string(), width = decimals + 1);
    let (int_part, frac_part) = digits.split_at(digits.len() - decimals);
    let frac_part = frac_part.trim_end_matches('0');
    if frac_part.is_empty() {
        int_part.to_string()
    } else {
        format!("{}.{}", int_part, frac_part)
    }
}

use anyhow::{anyhow, bail, Context};
use log::info;
use serde::Serialize;
use web3::contract::{Contract, Options};
use web3::signing::Key;
use web3::types::{Address, TransactionReceipt, U256, U64};
use web3::{Transport, Web3};

use crate::token::ERC20_ABI;

const LENDING_POOL_ABI: &[u8] = include_bytes!("abi/LendingPoolAbi.json");
const DEFAULT_GAS_LIMIT: u64 = 300_000;

/// Output of `getUserAccountData`. Base amounts use the pool's base currency decimals,
/// the health factor has 18 decimals.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AccountData {
    pub total_collateral_base: U256,
    pub total_debt_base: U256,
    pub available_borrows_base: U256,
    pub current_liquidation_threshold: U256,
    pub ltv: U256,
    pub health_factor: U256,
}

impl From<(U256, U256, U256, U256, U256, U256)> for AccountData {
    fn from(v: (U256, U256, U256, U256, U256, U256)) -> Self {
        Self {
            total_collateral_base: v.0,
            total_debt_base: v.1,
            available_borrows_base: v.2,
            current_liquidation_threshold: v.3,
            ltv: v.4,
            health_factor: v.5,
        }
    }
}

pub struct LendingPool<T: Transport> {
    web3: Web3<T>,
    contract: Contract<T>,
    erc20_abi: ethabi::Contract,
    gas_limit: u64,
    confirmations: usize,
}

impl<T: Transport> LendingPool<T> {
    pub fn new(web3: Web3<T>, pool_address: Address) -> anyhow::Result<Self> {
        let contract = Contract::from_json(web3.eth(), pool_address, LENDING_POOL_ABI)
            .with_context(|| "lending pool contract create")?;
        Ok(Self {
            web3,
            contract,
            erc20_abi: ethabi::Contract::load(ERC20_ABI)?,
            gas_limit: DEFAULT_GAS_LIMIT,
            confirmations: 1,
        })
    }

    pub fn with_gas_limit(mut self, gas_limit: u64) -> Self {
        self.gas_limit = gas_limit;
        self
    }

    pub fn with_confirmations(mut self, confirmations: usize) -> Self {
        self.confirmations = confirmations;
        self
    }

    pub fn address(&self) -> Address {
        self.contract.address()
    }

    /// Supplies `amount` of `asset` on behalf of `on_behalf_of`, approving the pool first
    /// when the signer's allowance is too small. Returns the supply receipt.
    pub async fn supply<K: Key + Clone>(
        &self,
        asset: Address,
        amount: U256,
        on_behalf_of: Address,
        key: K,
    ) -> anyhow::Result<TransactionReceipt> {
        if amount.is_zero() {
            bail!("supply amount must be positive");
        }
        let owner = key.address();
        let token = Contract::new(self.web3.eth(), asset, self.erc20_abi.clone());

        let allowance: U256 = token
            .query(
                "allowance",
                (owner, self.address()),
                None,
                Options::default(),
                None,
            )
            .await
            .with_context(|| "query: allowance")?;

        if allowance < amount {
            info!(
                "approving {} of {:?} for pool {:?} (allowance {})",
                amount,
                asset,
                self.address(),
                allowance
            );
            let receipt = token
                .signed_call_with_confirmations(
                    "approve",
                    (self.address(), amount),
                    self.tx_options(),
                    self.confirmations,
                    key.clone(),
                )
                .await
                .with_context(|| "approve transaction")?;
            ensure_success(&receipt).with_context(|| "approve transaction")?;
        }

        info!(
            "supplying {} of {:?} on behalf of {:?}",
            amount, asset, on_behalf_of
        );
        let receipt = self
            .contract
            .signed_call_with_confirmations(
                "supply",
                (asset, amount, on_behalf_of, 0u16),
                self.tx_options(),
                self.confirmations,
                key,
            )
            .await
            .with_context(|| "supply transaction")?;
        ensure_success(&receipt).with_context(|| "supply transaction")?;
        Ok(receipt)
    }

    pub async fn user_account_data(&self, user: Address) -> anyhow::Result<AccountData> {
        let raw: (U256, U256, U256, U256, U256, U256) = self
            .contract
            .query("getUserAccountData", (user,), None, Options::default(), None)
            .await
            .with_context(|| "query: getUserAccountData")?;
        Ok(raw.into())
    }

    fn tx_options(&self) -> Options {
        Options::with(|opt| opt.gas = Some(self.gas_limit.into()))
    }
}

fn ensure_success(receipt: &TransactionReceipt) -> anyhow::Result<()> {
    match receipt.status {
        Some(status) if status == U64::from(1) => Ok(()),
        Some(_) => Err(anyhow!(
            "transaction {:?} reverted",
            receipt.transaction_hash
        )),
        // pre-byzantium receipts carry no status
        None => Ok(()),
    }
}

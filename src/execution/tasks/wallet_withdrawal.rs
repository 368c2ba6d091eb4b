//! Wallet → exchange deposit
//!
//! ERC-20 transfer to the exchange deposit address, gated by a gas
//! preflight: if moving the funds costs more than the configured cap the
//! task aborts before touching the chain.

use crate::chain::pool::to_units;
use crate::chain::WalletService;
use crate::exchange::CoinbaseClient;
use crate::execution::tasks::WITHDRAWAL_PRIORITY;
use crate::execution::{ExecutionError, Task};
use crate::types::Asset;
use alloy::primitives::Address;
use alloy::providers::Provider;
use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

const TRANSFER_TIMEOUT_SECS: u64 = 120;

pub struct WalletWithdrawalTask<P> {
    asset: Asset,
    token: Address,
    deposit_address: Address,
    amount: f64,
    max_gas_usd: f64,
    wallet: Arc<WalletService<P>>,
    exchange: Arc<CoinbaseClient>,
}

impl<P: Provider + 'static> WalletWithdrawalTask<P> {
    pub fn new(
        asset: Asset,
        token: Address,
        deposit_address: Address,
        amount: f64,
        max_gas_usd: f64,
        wallet: Arc<WalletService<P>>,
        exchange: Arc<CoinbaseClient>,
    ) -> Self {
        Self {
            asset,
            token,
            deposit_address,
            amount,
            max_gas_usd,
            wallet,
            exchange,
        }
    }
}

#[async_trait]
impl<P: Provider + 'static> Task for WalletWithdrawalTask<P> {
    fn name(&self) -> String {
        format!("deposit {:.2} {} to exchange", self.amount, self.asset)
    }

    fn priority(&self) -> u8 {
        WITHDRAWAL_PRIORITY
    }

    async fn run(&self) -> Result<String> {
        if self.amount <= 0.0 {
            return Err(ExecutionError::InvalidParameters(format!(
                "deposit amount {} must be positive",
                self.amount
            ))
            .into());
        }

        let available = self
            .wallet
            .balance(self.token, self.asset.decimals())
            .await?;
        if available < self.amount {
            return Err(ExecutionError::InsufficientFunds {
                asset: format!("{} (wallet)", self.asset),
                needed: self.amount,
                available,
            }
            .into());
        }

        let raw_amount = to_units(self.amount, self.asset.decimals());

        // Gas preflight: refuse to burn more than the cap moving funds.
        let eth_price = self.exchange.get_eth_price().await?;
        let cost = self
            .wallet
            .transfer_costs(self.token, self.deposit_address, raw_amount, eth_price)
            .await?;
        if cost > self.max_gas_usd {
            return Err(ExecutionError::GasSafetyAbort {
                cost,
                cap: self.max_gas_usd,
            }
            .into());
        }

        let tx = self
            .wallet
            .transfer(
                self.token,
                self.deposit_address,
                raw_amount,
                Duration::from_secs(TRANSFER_TIMEOUT_SECS),
            )
            .await?;
        info!(
            "Deposit sent: {:.2} {} -> {:?} ({:?}, gas ${:.3})",
            self.amount, self.asset, self.deposit_address, tx, cost
        );

        Ok(format!(
            "{:.2} {} deposited to exchange ({:?})",
            self.amount, self.asset, tx
        ))
    }
}

//! Wallet service
//!
//! ERC-20 balance reads, transfers with gas preflight, and the polling
//! helpers the rebalance tasks rely on: waiting for a transfer to mine and
//! waiting for withdrawn coins to arrive on-chain.

use crate::contracts::IERC20;
use crate::execution::with_timeout;
use alloy::primitives::{Address, TxHash, U256};
use alloy::providers::Provider;
use anyhow::{bail, Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Poll interval while waiting for withdrawn coins to arrive.
const ARRIVAL_POLL_SECS: u64 = 5;

pub struct WalletService<P> {
    provider: Arc<P>,
    pub address: Address,
}

impl<P: Provider + 'static> WalletService<P> {
    pub fn new(provider: Arc<P>, address: Address) -> Self {
        Self { provider, address }
    }

    /// ERC-20 balance of the wallet, in raw units.
    pub async fn balance_raw(&self, token: Address) -> Result<U256> {
        IERC20::new(token, self.provider.clone())
            .balanceOf(self.address)
            .call()
            .await
            .with_context(|| format!("Failed to get balance of {:?}", token))
    }

    /// ERC-20 balance of the wallet, as a decimal amount.
    pub async fn balance(&self, token: Address, decimals: u8) -> Result<f64> {
        let raw = self.balance_raw(token).await?;
        Ok(raw.to::<u128>() as f64 / 10_f64.powi(decimals as i32))
    }

    /// Estimated USD cost of transferring `amount` of `token` to `to`,
    /// at the current gas price.
    pub async fn transfer_costs(
        &self,
        token: Address,
        to: Address,
        amount: U256,
        eth_price_usd: f64,
    ) -> Result<f64> {
        let erc20 = IERC20::new(token, self.provider.clone());
        let gas = erc20
            .transfer(to, amount)
            .estimate_gas()
            .await
            .context("Failed to estimate transfer gas")?;
        let gas_price = self
            .provider
            .get_gas_price()
            .await
            .context("Failed to get gas price")?;

        Ok(gas as f64 * gas_price as f64 / 1e18 * eth_price_usd)
    }

    /// Transfer `amount` of `token` to `to` and wait for it to mine.
    /// Returns the transaction hash.
    pub async fn transfer(
        &self,
        token: Address,
        to: Address,
        amount: U256,
        timeout: Duration,
    ) -> Result<TxHash> {
        debug!("Transferring {} of {:?} to {:?}", amount, token, to);

        let pending = IERC20::new(token, self.provider.clone())
            .transfer(to, amount)
            .send()
            .await
            .context("Failed to send transfer")?;

        let receipt = with_timeout("transfer confirmation", timeout, pending.get_receipt())
            .await?
            .context("Transfer not mined")?;

        if !receipt.status() {
            bail!("Transfer reverted: {:?}", receipt.transaction_hash);
        }

        info!("Transfer mined: {:?}", receipt.transaction_hash);
        Ok(receipt.transaction_hash)
    }

    /// Wait until the wallet's balance of `token` rises above `baseline`
    /// (coins arriving from an exchange withdrawal). Polls every few
    /// seconds; fails after `timeout`.
    pub async fn wait_coins_arrive(
        &self,
        token: Address,
        baseline: U256,
        timeout: Duration,
    ) -> Result<U256> {
        let poll = async {
            loop {
                let balance = self.balance_raw(token).await?;
                if balance > baseline {
                    let delta = balance - baseline;
                    info!("Coins arrived: +{} of {:?}", delta, token);
                    return Ok(delta);
                }
                tokio::time::sleep(Duration::from_secs(ARRIVAL_POLL_SECS)).await;
            }
        };

        with_timeout(
            &format!("coins arriving ({:?}, baseline {})", token, baseline),
            timeout,
            poll,
        )
        .await?
    }
}

//! Exchange → wallet withdrawal
//!
//! Requests a crypto withdrawal from the exchange to the trading wallet
//! and waits until the coins actually show up on-chain, so the next
//! detector cycle sees the moved balance.

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

/// Exchange withdrawals settle in minutes, not blocks.
const ARRIVAL_TIMEOUT_SECS: u64 = 15 * 60;

pub struct ExchangeWithdrawalTask<P> {
    asset: Asset,
    token: Address,
    amount: f64,
    exchange: Arc<CoinbaseClient>,
    wallet: Arc<WalletService<P>>,
}

impl<P: Provider + 'static> ExchangeWithdrawalTask<P> {
    pub fn new(
        asset: Asset,
        token: Address,
        amount: f64,
        exchange: Arc<CoinbaseClient>,
        wallet: Arc<WalletService<P>>,
    ) -> Self {
        Self {
            asset,
            token,
            amount,
            exchange,
            wallet,
        }
    }
}

#[async_trait]
impl<P: Provider + 'static> Task for ExchangeWithdrawalTask<P> {
    fn name(&self) -> String {
        format!("withdraw {:.2} {} to wallet", self.amount, self.asset)
    }

    fn priority(&self) -> u8 {
        WITHDRAWAL_PRIORITY
    }

    async fn run(&self) -> Result<String> {
        if self.amount <= 0.0 {
            return Err(ExecutionError::InvalidParameters(format!(
                "withdrawal amount {} must be positive",
                self.amount
            ))
            .into());
        }

        let available = self.exchange.get_balance(self.asset.code()).await?;
        if available < self.amount {
            return Err(ExecutionError::InsufficientFunds {
                asset: format!("{} (exchange)", self.asset),
                needed: self.amount,
                available,
            }
            .into());
        }

        let baseline = self.wallet.balance_raw(self.token).await?;

        let withdrawal_id = self
            .exchange
            .withdraw(
                self.asset.code(),
                self.amount,
                &format!("{:?}", self.wallet.address),
            )
            .await?;
        info!(
            "Withdrawal {} requested: {:.2} {} -> {:?}",
            withdrawal_id, self.amount, self.asset, self.wallet.address
        );

        self.wallet
            .wait_coins_arrive(
                self.token,
                baseline,
                Duration::from_secs(ARRIVAL_TIMEOUT_SECS),
            )
            .await?;

        Ok(format!(
            "{:.2} {} arrived in wallet (withdrawal {})",
            self.amount, self.asset, withdrawal_id
        ))
    }
}

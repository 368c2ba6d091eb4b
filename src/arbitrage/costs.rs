//! Cost model
//!
//! Everything that eats into a detected edge: the exchange taker fee, gas
//! for the AMM swap, the exchange's withdrawal fee, and the wallet-side
//! transfer gas. Gas figures are converted to USD via the ETH-USD
//! reference price; the withdrawal fee is cached because the exchange
//! reprices it slowly.

use crate::chain::UniswapPool;
use crate::exchange::CoinbaseClient;
use alloy::providers::Provider;
use anyhow::{Context, Result};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

/// Gas used by a plain ERC-20 transfer; models both the exchange's
/// withdrawal fee and our own deposit transfer.
pub const TRANSFER_GAS_ESTIMATE: u64 = 65_000;

/// How long a withdrawal-fee estimate stays fresh.
const WITHDRAWAL_FEE_TTL: Duration = Duration::from_secs(30 * 60);

/// USD cost of `gas_units` at `gas_price_wei`, with ETH at `eth_price_usd`.
pub fn gas_cost_usd(gas_units: u64, gas_price_wei: u128, eth_price_usd: f64) -> f64 {
    gas_units as f64 * gas_price_wei as f64 / 1e18 * eth_price_usd
}

/// Exchange taker fee on a notional, in quote units.
pub fn taker_fee(notional: f64, rate: f64) -> f64 {
    notional * rate
}

/// Full cost breakdown for one two-leg trade.
#[derive(Debug, Clone, Copy, Default)]
pub struct TradeCosts {
    pub taker_fee: f64,
    pub swap_gas: f64,
    pub withdrawal_fee: f64,
    pub transfer_gas: f64,
}

impl TradeCosts {
    pub fn total(&self) -> f64 {
        self.taker_fee + self.swap_gas + self.withdrawal_fee + self.transfer_gas
    }
}

pub struct CostModel<P> {
    provider: Arc<P>,
    exchange: Arc<CoinbaseClient>,
    pool: Arc<UniswapPool<P>>,
    taker_fee_rate: f64,
    withdrawal_fee_cache: Mutex<Option<(Instant, f64)>>,
}

impl<P: Provider + 'static> CostModel<P> {
    pub fn new(
        provider: Arc<P>,
        exchange: Arc<CoinbaseClient>,
        pool: Arc<UniswapPool<P>>,
        taker_fee_rate: f64,
    ) -> Self {
        Self {
            provider,
            exchange,
            pool,
            taker_fee_rate,
            withdrawal_fee_cache: Mutex::new(None),
        }
    }

    /// Withdrawal fee the exchange charges (one ERC-20 transfer at current
    /// gas), cached for 30 minutes.
    pub async fn withdrawal_fee(&self, eth_price_usd: f64) -> Result<f64> {
        if let Some((at, fee)) = *self.withdrawal_fee_cache.lock() {
            if at.elapsed() < WITHDRAWAL_FEE_TTL {
                return Ok(fee);
            }
        }

        let gas_price = self
            .provider
            .get_gas_price()
            .await
            .context("Failed to get gas price")?;
        let fee = gas_cost_usd(TRANSFER_GAS_ESTIMATE, gas_price, eth_price_usd);
        *self.withdrawal_fee_cache.lock() = Some((Instant::now(), fee));
        debug!("Withdrawal fee refreshed: ${:.4}", fee);
        Ok(fee)
    }

    /// All costs for a trade of `notional` quote units.
    pub async fn trade_costs(&self, notional: f64) -> Result<TradeCosts> {
        let eth_price = self.exchange.get_eth_price().await?;
        let swap_gas = self.pool.swap_costs(eth_price).await?;
        let withdrawal_fee = self.withdrawal_fee(eth_price).await?;
        let gas_price = self
            .provider
            .get_gas_price()
            .await
            .context("Failed to get gas price")?;
        let transfer_gas = gas_cost_usd(TRANSFER_GAS_ESTIMATE, gas_price, eth_price);

        Ok(TradeCosts {
            taker_fee: taker_fee(notional, self.taker_fee_rate),
            swap_gas,
            withdrawal_fee,
            transfer_gas,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gas_cost_usd() {
        // 65k gas at 10 gwei with ETH at $3000: 65000 * 1e10 / 1e18 * 3000
        let cost = gas_cost_usd(65_000, 10_000_000_000, 3000.0);
        assert!((cost - 1.95).abs() < 1e-9);
    }

    #[test]
    fn test_taker_fee() {
        let fee = taker_fee(3000.0, 0.00001);
        assert!((fee - 0.03).abs() < 1e-12);
    }

    #[test]
    fn test_trade_costs_total() {
        let costs = TradeCosts {
            taker_fee: 0.03,
            swap_gas: 0.25,
            withdrawal_fee: 0.10,
            transfer_gas: 0.08,
        };
        assert!((costs.total() - 0.46).abs() < 1e-12);
    }

    #[test]
    fn test_thin_edge_eaten_by_costs() {
        // A 0.001/unit edge over 1000 units grosses 1.00; realistic gas
        // plus fees exceed that, so the net must come out non-positive.
        let gross = 0.001 * 1000.0;
        let costs = TradeCosts {
            taker_fee: taker_fee(1000.0, 0.00001),
            swap_gas: gas_cost_usd(280_493, 10_000_000_000, 3000.0),
            withdrawal_fee: gas_cost_usd(65_000, 10_000_000_000, 3000.0),
            transfer_gas: gas_cost_usd(65_000, 10_000_000_000, 3000.0),
        };
        assert!(gross - costs.total() <= 0.0);
    }
}

//! Uniswap V3 pool venue (EURC/USDC)
//!
//! Quotes both sides of the pool through QuoterV2 for a concrete size,
//! executes swaps through the router, and derives spot prices from ticks.
//!
//! V3 pools sort token0 < token1 by address, so the EURC/USDC orientation
//! is discovered from the pool contract at startup, not assumed.

use crate::config::BotConfig;
use crate::contracts::{
    addresses_for, fee_to_u24, ChainAddresses, IQuoterV2, ISwapRouter, UniswapV3Pool, IERC20,
};
use crate::execution::with_timeout;
use alloy::primitives::{Address, TxHash, U160, U256};
use alloy::providers::Provider;
use anyhow::{bail, Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Static gas estimate for a single-hop V3 swap, measured from live fills.
pub const SWAP_GAS_ESTIMATE: u64 = 280_493;

/// Swap deadline window in seconds.
const SWAP_DEADLINE_SECS: i64 = 300;

/// How long to wait for a sent transaction to mine before giving up.
const RECEIPT_TIMEOUT_SECS: u64 = 120;

/// Derive a human price from a V3 tick: token1 per token0, decimal-adjusted.
pub fn price_from_tick(tick: i32, token0_decimals: u8, token1_decimals: u8) -> f64 {
    1.0001_f64.powi(tick) * 10_f64.powi(token0_decimals as i32 - token1_decimals as i32)
}

/// Convert a decimal token amount to raw units.
pub fn to_units(amount: f64, decimals: u8) -> U256 {
    U256::from((amount * 10_f64.powi(decimals as i32)).round() as u128)
}

/// Convert raw units to a decimal token amount.
pub fn from_units(amount: U256, decimals: u8) -> f64 {
    amount.to::<u128>() as f64 / 10_f64.powi(decimals as i32)
}

/// The EURC/USDC pool with its quoting and execution surface.
pub struct UniswapPool<P> {
    provider: Arc<P>,
    pub address: Address,
    /// Pool fee tier (e.g. 500 = 0.05%).
    pub fee: u32,
    /// Whether EURC is the pool's token0 (address-sorted).
    eurc_is_token0: bool,
    addrs: ChainAddresses,
    wallet: Address,
}

impl<P: Provider + 'static> UniswapPool<P> {
    /// Discover pool orientation and fee tier, and verify the pool actually
    /// holds the configured pair.
    pub async fn new(provider: Arc<P>, config: &BotConfig, wallet: Address) -> Result<Self> {
        let addrs = addresses_for(config.chain_id)?;
        let pool = UniswapV3Pool::new(config.pool_address, provider.clone());

        let token0 = pool.token0().call().await.context("Failed to get token0")?;
        let token1 = pool.token1().call().await.context("Failed to get token1")?;
        let fee = pool.fee().call().await.context("Failed to get fee")?;

        let eurc_is_token0 = if token0 == addrs.eurc && token1 == addrs.usdc {
            true
        } else if token0 == addrs.usdc && token1 == addrs.eurc {
            false
        } else {
            bail!(
                "Pool {:?} holds {:?}/{:?}, expected EURC/USDC",
                config.pool_address,
                token0,
                token1
            );
        };

        info!(
            "Pool {:?} ready: fee tier {} | EURC is token{}",
            config.pool_address,
            fee.to::<u32>(),
            if eurc_is_token0 { 0 } else { 1 }
        );

        Ok(Self {
            provider,
            address: config.pool_address,
            fee: fee.to::<u32>(),
            eurc_is_token0,
            addrs,
            wallet,
        })
    }

    /// Price (USDC per EURC) to BUY `base_amount` EURC from the pool.
    /// Quoted exact-output so the cost covers the full size.
    pub async fn ask_price(&self, base_amount: f64) -> Result<f64> {
        let quoter = IQuoterV2::new(self.addrs.quoter_v2, self.provider.clone());
        let amount_out = to_units(base_amount, 6);

        let quote = quoter
            .quoteExactOutputSingle(IQuoterV2::QuoteExactOutputSingleParams {
                tokenIn: self.addrs.usdc,
                tokenOut: self.addrs.eurc,
                amount: amount_out,
                fee: fee_to_u24(self.fee),
                sqrtPriceLimitX96: U160::ZERO,
            })
            .call()
            .await
            .context("quoteExactOutputSingle failed")?;

        let cost = from_units(quote.amountIn, 6);
        Ok(cost / base_amount)
    }

    /// Price (USDC per EURC) received SELLING `base_amount` EURC into the
    /// pool. Quoted exact-input.
    pub async fn bid_price(&self, base_amount: f64) -> Result<f64> {
        let quoter = IQuoterV2::new(self.addrs.quoter_v2, self.provider.clone());
        let amount_in = to_units(base_amount, 6);

        let quote = quoter
            .quoteExactInputSingle(IQuoterV2::QuoteExactInputSingleParams {
                tokenIn: self.addrs.eurc,
                tokenOut: self.addrs.usdc,
                amountIn: amount_in,
                fee: fee_to_u24(self.fee),
                sqrtPriceLimitX96: U160::ZERO,
            })
            .call()
            .await
            .context("quoteExactInputSingle failed")?;

        let proceeds = from_units(quote.amountOut, 6);
        Ok(proceeds / base_amount)
    }

    /// Spot price (USDC per EURC) at a historical block, derived from the
    /// tick. Used by the indexer to record entry prices at mint blocks.
    pub async fn price_at_block(&self, block_number: u64) -> Result<f64> {
        let pool = UniswapV3Pool::new(self.address, self.provider.clone());
        let slot0 = pool
            .slot0()
            .block(block_number.into())
            .call()
            .await
            .with_context(|| format!("Failed to get slot0 at block {}", block_number))?;

        let tick = i32::try_from(slot0.tick).unwrap_or(0);
        let token1_per_token0 = price_from_tick(tick, 6, 6);
        Ok(if self.eurc_is_token0 {
            token1_per_token0
        } else {
            1.0 / token1_per_token0
        })
    }

    /// Swap `amount_in` of `token_in` through the router. Approves the
    /// router first if the current allowance is insufficient.
    /// Returns the transaction hash once the swap is mined.
    pub async fn swap(
        &self,
        token_in: Address,
        token_out: Address,
        amount_in: U256,
        min_amount_out: U256,
    ) -> Result<TxHash> {
        self.ensure_approval(token_in, amount_in).await?;

        let deadline = chrono::Utc::now().timestamp() + SWAP_DEADLINE_SECS;
        let router = ISwapRouter::new(self.addrs.swap_router, self.provider.clone());

        debug!(
            "Swapping {} of {:?} -> {:?} (min out {})",
            amount_in, token_in, token_out, min_amount_out
        );

        let pending = router
            .exactInputSingle(ISwapRouter::ExactInputSingleParams {
                tokenIn: token_in,
                tokenOut: token_out,
                fee: fee_to_u24(self.fee),
                recipient: self.wallet,
                deadline: U256::from(deadline),
                amountIn: amount_in,
                amountOutMinimum: min_amount_out,
                sqrtPriceLimitX96: U160::ZERO,
            })
            .send()
            .await
            .context("Failed to send swap")?;

        let receipt = with_timeout(
            "swap confirmation",
            Duration::from_secs(RECEIPT_TIMEOUT_SECS),
            pending.get_receipt(),
        )
        .await?
        .context("Swap not mined")?;

        if !receipt.status() {
            bail!("Swap reverted: {:?}", receipt.transaction_hash);
        }

        Ok(receipt.transaction_hash)
    }

    /// Estimated gas cost of one swap in USD, at the current gas price.
    pub async fn swap_costs(&self, eth_price_usd: f64) -> Result<f64> {
        let gas_price = self
            .provider
            .get_gas_price()
            .await
            .context("Failed to get gas price")?;
        Ok(SWAP_GAS_ESTIMATE as f64 * gas_price as f64 / 1e18 * eth_price_usd)
    }

    /// Current pool tick.
    pub async fn current_tick(&self) -> Result<i32> {
        let pool = UniswapV3Pool::new(self.address, self.provider.clone());
        let slot0 = pool.slot0().call().await.context("Failed to get slot0")?;
        Ok(i32::try_from(slot0.tick).unwrap_or(0))
    }

    pub fn eurc_is_token0(&self) -> bool {
        self.eurc_is_token0
    }

    pub fn usdc(&self) -> Address {
        self.addrs.usdc
    }

    pub fn eurc(&self) -> Address {
        self.addrs.eurc
    }

    async fn ensure_approval(&self, token: Address, amount: U256) -> Result<()> {
        let erc20 = IERC20::new(token, self.provider.clone());
        let allowance = erc20
            .allowance(self.wallet, self.addrs.swap_router)
            .call()
            .await
            .context("Failed to get allowance")?;

        if allowance >= amount {
            return Ok(());
        }

        info!("Approving router for {:?}", token);
        let pending = erc20
            .approve(self.addrs.swap_router, U256::MAX)
            .send()
            .await
            .context("Failed to send approval")?;

        let receipt = with_timeout(
            "approval confirmation",
            Duration::from_secs(RECEIPT_TIMEOUT_SECS),
            pending.get_receipt(),
        )
        .await?
        .context("Approval not mined")?;

        if !receipt.status() {
            bail!("Approval reverted for {:?}", token);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_price_from_tick_equal_decimals() {
        // Tick 0 with equal decimals is exactly 1.0
        assert!((price_from_tick(0, 6, 6) - 1.0).abs() < 1e-12);
        // Positive tick raises the token1/token0 price
        assert!(price_from_tick(100, 6, 6) > 1.0);
        assert!(price_from_tick(-100, 6, 6) < 1.0);
    }

    #[test]
    fn test_price_from_tick_decimal_adjustment() {
        // 18-decimal token0 vs 6-decimal token1 shifts by 1e12
        let p = price_from_tick(0, 18, 6);
        assert!((p - 1e12).abs() / 1e12 < 1e-9);
    }

    #[test]
    fn test_unit_conversion_round_trip() {
        let amount = 3000.25_f64;
        let raw = to_units(amount, 6);
        assert_eq!(raw, U256::from(3_000_250_000_u64));
        assert!((from_units(raw, 6) - amount).abs() < 1e-9);
    }
}

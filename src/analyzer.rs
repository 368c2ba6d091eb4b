//! Position analyzer
//!
//! Values the LP positions the indexer discovered: current token amounts
//! from the liquidity math, claimable fees via a simulated collect on the
//! position manager, and impermanent loss against simply holding the
//! deposited amounts. Runs only while the indexer reports itself synced;
//! analyzing against a stale position set produces nonsense.

use crate::chain::UniswapPool;
use crate::contracts::INonfungiblePositionManager;
use crate::store::{Position, SqliteStore};
use alloy::primitives::Address;
use alloy::providers::Provider;
use anyhow::{Context, Result};
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Pause between analysis cycles (and while waiting for the indexer).
const CYCLE_SLEEP_SECS: u64 = 10;

/// sqrt(1.0001^tick): the square root of the pool price at a tick.
pub fn tick_to_sqrt_price(tick: i32) -> f64 {
    1.0001_f64.powf(tick as f64 / 2.0)
}

/// Token amounts (raw units) represented by `liquidity` between two ticks,
/// at the current sqrt price. Standard three-branch V3 math: fully in
/// token0 below the range, fully in token1 above it, mixed inside.
pub fn amounts_for_liquidity(
    liquidity: u128,
    sqrt_price: f64,
    tick_lower: i32,
    tick_upper: i32,
) -> (f64, f64) {
    let sa = tick_to_sqrt_price(tick_lower);
    let sb = tick_to_sqrt_price(tick_upper);
    let l = liquidity as f64;

    if sqrt_price <= sa {
        (l * (1.0 / sa - 1.0 / sb), 0.0)
    } else if sqrt_price >= sb {
        (0.0, l * (sb - sa))
    } else {
        (l * (1.0 / sqrt_price - 1.0 / sb), l * (sqrt_price - sa))
    }
}

/// Impermanent loss of a 50/50 constant-product position for a given
/// price ratio (current/entry). Zero at ratio 1, negative elsewhere.
pub fn constant_product_il(price_ratio: f64) -> f64 {
    2.0 * price_ratio.sqrt() / (1.0 + price_ratio) - 1.0
}

/// Ranged-position IL: LP value (fees included) against holding the
/// deposited amounts.
pub fn lp_vs_hodl_il(lp_value: f64, hodl_value: f64) -> f64 {
    if hodl_value <= 0.0 {
        return 0.0;
    }
    (lp_value - hodl_value) / hodl_value
}

pub struct PositionAnalyzer<P> {
    provider: Arc<P>,
    store: SqliteStore,
    pool: Arc<UniswapPool<P>>,
    position_manager: Address,
    account: Address,
}

impl<P: Provider + 'static> PositionAnalyzer<P> {
    pub fn new(
        provider: Arc<P>,
        store: SqliteStore,
        pool: Arc<UniswapPool<P>>,
        position_manager: Address,
        account: Address,
    ) -> Self {
        Self {
            provider,
            store,
            pool,
            position_manager,
            account,
        }
    }

    /// Main loop. Never returns.
    pub async fn run(&self) {
        info!("Position analyzer started");
        loop {
            match self.store.cursor() {
                Ok(cursor) if cursor.synced => {
                    if let Err(e) = self.analyze_all().await {
                        warn!("Position analysis failed: {:#}", e);
                    }
                }
                Ok(_) => debug!("Indexer not synced yet, waiting"),
                Err(e) => warn!("Failed to read cursor: {:#}", e),
            }
            tokio::time::sleep(Duration::from_secs(CYCLE_SLEEP_SECS)).await;
        }
    }

    async fn analyze_all(&self) -> Result<()> {
        let positions = self.store.active_positions()?;
        if positions.is_empty() {
            return Ok(());
        }

        // All positions analyzed concurrently against the same tick.
        let tick = self.pool.current_tick().await?;
        let results =
            join_all(positions.iter().map(|pos| self.analyze_position(pos, tick))).await;
        for (pos, result) in positions.iter().zip(results) {
            if let Err(e) = result {
                warn!("Analysis of position {} failed: {:#}", pos.token_id, e);
            }
        }
        Ok(())
    }

    async fn analyze_position(&self, pos: &Position, current_tick: i32) -> Result<()> {
        let sqrt_price = tick_to_sqrt_price(current_tick);
        let (raw0, raw1) =
            amounts_for_liquidity(pos.liquidity, sqrt_price, pos.tick_lower, pos.tick_upper);
        let amount0 = raw0 / 1e6;
        let amount1 = raw1 / 1e6;

        let (fees0, fees1) = self.claimable_fees(pos.token_id).await?;

        // Value everything in quote (USDC) at the current pool price.
        let token1_per_token0 = sqrt_price * sqrt_price;
        let eurc_price = if self.pool.eurc_is_token0() {
            token1_per_token0
        } else {
            1.0 / token1_per_token0
        };
        let value_of = |a0: f64, a1: f64| {
            if self.pool.eurc_is_token0() {
                a0 * eurc_price + a1
            } else {
                a0 + a1 * eurc_price
            }
        };

        let lp_value = value_of(amount0 + fees0, amount1 + fees1);
        let dep0 = pos.deposited_amount0.parse::<u128>().unwrap_or(0) as f64 / 1e6;
        let dep1 = pos.deposited_amount1.parse::<u128>().unwrap_or(0) as f64 / 1e6;
        let hodl_value = value_of(dep0, dep1);

        let il = lp_vs_hodl_il(lp_value, hodl_value);
        let cp_il = if pos.entry_price > 0.0 {
            constant_product_il(eurc_price / pos.entry_price)
        } else {
            0.0
        };

        self.store
            .set_current_amounts(pos.token_id, amount0, amount1)?;

        info!(
            "Position {}: {:.2} / {:.2} (+fees {:.2} / {:.2}) | LP {:.2} vs HODL {:.2} | IL {:.3}% (cp ref {:.3}%)",
            pos.token_id,
            amount0,
            amount1,
            fees0,
            fees1,
            lp_value,
            hodl_value,
            il * 100.0,
            cp_il * 100.0
        );

        Ok(())
    }

    /// Fees claimable right now, via a simulated max-collect from the
    /// position owner. Nothing is sent on-chain.
    async fn claimable_fees(&self, token_id: u64) -> Result<(f64, f64)> {
        let npm = INonfungiblePositionManager::new(self.position_manager, self.provider.clone());
        let result = npm
            .collect(INonfungiblePositionManager::CollectParams {
                tokenId: alloy::primitives::U256::from(token_id),
                recipient: self.account,
                amount0Max: u128::MAX,
                amount1Max: u128::MAX,
            })
            .from(self.account)
            .call()
            .await
            .with_context(|| format!("collect simulation failed for position {}", token_id))?;

        Ok((
            result.amount0.to::<u128>() as f64 / 1e6,
            result.amount1.to::<u128>() as f64 / 1e6,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tick_to_sqrt_price_at_zero() {
        assert!((tick_to_sqrt_price(0) - 1.0).abs() < 1e-12);
        // Two ticks apart squares to one tick of price movement.
        let p = tick_to_sqrt_price(100);
        assert!((p * p - 1.0001_f64.powi(100)).abs() < 1e-9);
    }

    #[test]
    fn test_amounts_below_range_all_token0() {
        let (a0, a1) = amounts_for_liquidity(1_000_000, tick_to_sqrt_price(-500), -100, 100);
        assert!(a0 > 0.0);
        assert_eq!(a1, 0.0);

        // Exact: L * (1/sa - 1/sb)
        let sa = tick_to_sqrt_price(-100);
        let sb = tick_to_sqrt_price(100);
        assert!((a0 - 1_000_000.0 * (1.0 / sa - 1.0 / sb)).abs() < 1e-6);
    }

    #[test]
    fn test_amounts_above_range_all_token1() {
        let (a0, a1) = amounts_for_liquidity(1_000_000, tick_to_sqrt_price(500), -100, 100);
        assert_eq!(a0, 0.0);
        assert!(a1 > 0.0);

        let sa = tick_to_sqrt_price(-100);
        let sb = tick_to_sqrt_price(100);
        assert!((a1 - 1_000_000.0 * (sb - sa)).abs() < 1e-6);
    }

    #[test]
    fn test_amounts_in_range_mixed() {
        let (a0, a1) = amounts_for_liquidity(1_000_000, 1.0, -100, 100);
        assert!(a0 > 0.0);
        assert!(a1 > 0.0);
        // Dead center of a symmetric range holds near-equal value.
        assert!((a0 - a1).abs() / a0 < 0.01);
    }

    #[test]
    fn test_amounts_continuous_at_boundaries() {
        let l = 1_000_000_u128;
        let sa = tick_to_sqrt_price(-100);
        let (below0, _) = amounts_for_liquidity(l, sa - 1e-9, -100, 100);
        let (at0, at1) = amounts_for_liquidity(l, sa, -100, 100);
        assert!((below0 - at0).abs() < 1.0);
        assert_eq!(at1, 0.0);
    }

    #[test]
    fn test_constant_product_il() {
        // No price move, no loss.
        assert!(constant_product_il(1.0).abs() < 1e-12);
        // 4x move: 2*2/5 - 1 = -0.2
        assert!((constant_product_il(4.0) + 0.2).abs() < 1e-12);
        // Symmetric in ratio and 1/ratio.
        assert!(
            (constant_product_il(2.0) - constant_product_il(0.5)).abs() < 1e-12
        );
        // Always a loss away from 1.
        assert!(constant_product_il(1.5) < 0.0);
    }

    #[test]
    fn test_lp_vs_hodl_il() {
        assert!((lp_vs_hodl_il(95.0, 100.0) + 0.05).abs() < 1e-12);
        assert!((lp_vs_hodl_il(105.0, 100.0) - 0.05).abs() < 1e-12);
        assert_eq!(lp_vs_hodl_il(100.0, 0.0), 0.0);
    }
}

//! Two-leg arbitrage execution
//!
//! Leg order is fixed: the AMM swap goes first because it carries the
//! execution risk (it can revert on slippage); only once it lands does the
//! exchange limit order go out at the pre-computed VWAP. Realized profit is
//! measured from balance snapshots around the whole trade, valuing any EURC
//! delta at the exchange leg's price.

use crate::account::AccountManager;
use crate::chain::pool::to_units;
use crate::chain::UniswapPool;
use crate::exchange::{CoinbaseClient, Side};
use crate::execution::tasks::ARBITRAGE_PRIORITY;
use crate::execution::{ExecutionError, Task};
use crate::types::{Direction, Opportunity};
use alloy::providers::Provider;
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

pub struct ArbitrageExecuteTask<P> {
    opportunity: Opportunity,
    exchange: Arc<CoinbaseClient>,
    pool: Arc<UniswapPool<P>>,
    accounts: Arc<AccountManager<P>>,
    slippage: f64,
    order_timeout: Duration,
}

impl<P: Provider + 'static> ArbitrageExecuteTask<P> {
    pub fn new(
        opportunity: Opportunity,
        exchange: Arc<CoinbaseClient>,
        pool: Arc<UniswapPool<P>>,
        accounts: Arc<AccountManager<P>>,
        slippage: f64,
        order_timeout: Duration,
    ) -> Self {
        Self {
            opportunity,
            exchange,
            pool,
            accounts,
            slippage,
            order_timeout,
        }
    }
}

#[async_trait]
impl<P: Provider + 'static> Task for ArbitrageExecuteTask<P> {
    fn name(&self) -> String {
        format!(
            "arbitrage {:?} {:.1} EURC",
            self.opportunity.direction, self.opportunity.volume
        )
    }

    fn priority(&self) -> u8 {
        ARBITRAGE_PRIORITY
    }

    async fn run(&self) -> Result<String> {
        let opp = &self.opportunity;
        let pre = self.accounts.balances().await?;

        let (swap_tx, fill) = match opp.direction {
            Direction::BuyExchangeSellAmm => {
                // Sell EURC into the pool, buy it back on the exchange book.
                if pre.eurc.wallet < opp.volume {
                    return Err(ExecutionError::InsufficientFunds {
                        asset: "EURC (wallet)".to_string(),
                        needed: opp.volume,
                        available: pre.eurc.wallet,
                    }
                    .into());
                }
                let quote_needed = opp.volume * opp.exchange_price;
                if pre.usdc.exchange < quote_needed {
                    return Err(ExecutionError::InsufficientFunds {
                        asset: "USDC (exchange)".to_string(),
                        needed: quote_needed,
                        available: pre.usdc.exchange,
                    }
                    .into());
                }

                let amount_in = to_units(opp.volume, 6);
                let min_out = to_units(opp.volume * opp.amm_price * (1.0 - self.slippage), 6);
                let tx = self
                    .pool
                    .swap(self.pool.eurc(), self.pool.usdc(), amount_in, min_out)
                    .await
                    .context("AMM leg failed")?;

                let order_id = self
                    .exchange
                    .create_limit_order(Side::Buy, opp.exchange_price, opp.volume)
                    .await
                    .context("Exchange leg failed after AMM leg landed")?;
                let fill = self
                    .exchange
                    .wait_order_filled(&order_id, self.order_timeout)
                    .await?;
                (tx, fill)
            }
            Direction::BuyAmmSellExchange => {
                // Buy EURC from the pool, sell it into the exchange bids.
                let quote_needed = opp.volume * opp.amm_price * (1.0 + self.slippage);
                if pre.usdc.wallet < quote_needed {
                    return Err(ExecutionError::InsufficientFunds {
                        asset: "USDC (wallet)".to_string(),
                        needed: quote_needed,
                        available: pre.usdc.wallet,
                    }
                    .into());
                }
                if pre.eurc.exchange < opp.volume {
                    return Err(ExecutionError::InsufficientFunds {
                        asset: "EURC (exchange)".to_string(),
                        needed: opp.volume,
                        available: pre.eurc.exchange,
                    }
                    .into());
                }

                let amount_in = to_units(opp.volume * opp.amm_price, 6);
                let min_out = to_units(opp.volume * (1.0 - self.slippage), 6);
                let tx = self
                    .pool
                    .swap(self.pool.usdc(), self.pool.eurc(), amount_in, min_out)
                    .await
                    .context("AMM leg failed")?;

                let order_id = self
                    .exchange
                    .create_limit_order(Side::Sell, opp.exchange_price, opp.volume)
                    .await
                    .context("Exchange leg failed after AMM leg landed")?;
                let fill = self
                    .exchange
                    .wait_order_filled(&order_id, self.order_timeout)
                    .await?;
                (tx, fill)
            }
        };

        // Realized P&L from the balance delta, valuing leftover EURC at the
        // exchange price actually traded.
        let post = self.accounts.balances().await?;
        let realized =
            post.total_value(opp.exchange_price) - pre.total_value(opp.exchange_price);

        info!(
            "Arbitrage complete: {:?} | {:.1} EURC | swap {:?} | filled {:.1} | realized {:+.2} USDC",
            opp.direction, opp.volume, swap_tx, fill.filled_size, realized
        );

        Ok(format!(
            "{:?}: {:.1} EURC @ ex {:.5} / amm {:.5}, filled {:.1}, realized {:+.2} USDC (est. {:+.2})",
            opp.direction,
            opp.volume,
            opp.exchange_price,
            opp.amm_price,
            fill.filled_size,
            realized,
            opp.net_profit
        ))
    }
}

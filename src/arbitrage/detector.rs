//! Opportunity Detector
//!
//! Polls the exchange order book and the pool's quoter, looking for price
//! dislocations between the two venues in either direction. Sizing walks
//! the book level by level up to the AMM counter-price, so the limit order
//! placed later can never cross its own profitability bound.
//!
//! Before sizing anything the detector checks WHERE the balances are: an
//! opportunity is only executable if the needed assets sit at the venues
//! the legs trade on. When they don't, rebalance withdrawals are enqueued
//! instead of a trade, and the cycle ends.
//!
//! The detector goes quiet whenever the executor has work (queued or in
//! flight); analysis against balances that a running task is about to
//! change would produce phantom opportunities.

use crate::account::AccountManager;
use crate::arbitrage::costs::CostModel;
use crate::chain::{UniswapPool, WalletService};
use crate::config::BotConfig;
use crate::exchange::CoinbaseClient;
use crate::execution::tasks::{
    ArbitrageExecuteTask, ExchangeWithdrawalTask, WalletWithdrawalTask,
};
use crate::execution::TaskQueue;
use crate::types::{
    Asset, BookLevel, Direction, FillEstimate, Opportunity, PortfolioBalances,
    RebalanceDirective, Venue, VenueBalances,
};
use alloy::providers::Provider;
use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Rebalance swaps below this many quote units aren't worth the gas.
const REBALANCE_MIN_QUOTE: f64 = 100.0;

/// Walk one side of the book, consuming levels until the limit price, the
/// target quantity, or the book runs out.
///
/// For asks (buying), a level at or above `limit` is not profitable and
/// stops the walk; for bids (selling), a level at or below `limit` stops
/// it. Returns `None` when not a single unit is fillable.
pub fn walk_book(
    levels: &[BookLevel],
    limit: f64,
    target_qty: f64,
    is_ask: bool,
) -> Option<FillEstimate> {
    let mut filled = 0.0_f64;
    let mut notional = 0.0_f64;

    for level in levels {
        if is_ask && level.price >= limit {
            break;
        }
        if !is_ask && level.price <= limit {
            break;
        }

        let take = level.size.min(target_qty - filled);
        filled += take;
        notional += take * level.price;

        if filled >= target_qty {
            break;
        }
    }

    if filled <= 0.0 {
        return None;
    }

    Some(FillEstimate {
        avg_price: notional / filled,
        volume: filled,
    })
}

/// Check that at least `threshold` of an asset sits at the venue that
/// needs it. Returns the directive to move the off-venue remainder when
/// it doesn't. A zero total balance yields no directive (there is nothing
/// to move; the sizing step will produce no trade).
pub fn check_location(
    balances: &VenueBalances,
    asset: Asset,
    venue: Venue,
    threshold: f64,
) -> Option<RebalanceDirective> {
    let total = balances.total();
    if total <= 0.0 {
        return None;
    }

    let ratio = balances.at(venue) / total;
    if ratio >= threshold {
        return None;
    }

    let other = match venue {
        Venue::Exchange => Venue::Wallet,
        Venue::Wallet => Venue::Exchange,
    };

    Some(RebalanceDirective {
        asset,
        required_venue: venue,
        amount: balances.at(other),
    })
}

/// Target 50/50 split of portfolio value between the two assets.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RebalancePlan {
    /// True: convert USDC into EURC; false: the other way.
    pub buy_eurc: bool,
    /// Quote units to convert.
    pub quote_amount: f64,
}

impl RebalancePlan {
    pub fn is_significant(&self) -> bool {
        self.quote_amount > REBALANCE_MIN_QUOTE
    }
}

/// How far the portfolio is from a 50/50 USDC/EURC value split at the
/// given price. Advisory: logged at startup, never auto-executed.
pub fn calculate_rebalance(balances: &PortfolioBalances, eurc_price: f64) -> RebalancePlan {
    let usdc_value = balances.usdc.total();
    let eurc_value = balances.eurc.total() * eurc_price;
    let target = (usdc_value + eurc_value) / 2.0;
    let excess_usdc = usdc_value - target;

    RebalancePlan {
        buy_eurc: excess_usdc > 0.0,
        quote_amount: excess_usdc.abs(),
    }
}

pub struct OpportunityDetector<P> {
    config: BotConfig,
    exchange: Arc<CoinbaseClient>,
    pool: Arc<UniswapPool<P>>,
    wallet: Arc<WalletService<P>>,
    accounts: Arc<AccountManager<P>>,
    costs: Arc<CostModel<P>>,
    queue: Arc<TaskQueue>,
}

impl<P: Provider + 'static> OpportunityDetector<P> {
    pub fn new(
        config: BotConfig,
        exchange: Arc<CoinbaseClient>,
        pool: Arc<UniswapPool<P>>,
        wallet: Arc<WalletService<P>>,
        accounts: Arc<AccountManager<P>>,
        costs: Arc<CostModel<P>>,
        queue: Arc<TaskQueue>,
    ) -> Self {
        Self {
            config,
            exchange,
            pool,
            wallet,
            accounts,
            costs,
            queue,
        }
    }

    /// Main loop. Never returns.
    pub async fn run(&self) {
        if let Err(e) = self.log_portfolio_health().await {
            warn!("Portfolio health report failed: {:#}", e);
        }

        info!(
            "Opportunity detector started: target {:.0} EURC, poll every {}s",
            self.config.target_quantity, self.config.poll_interval_secs
        );

        loop {
            if !self.queue.is_idle() {
                debug!(
                    "Executor busy ({} queued), backing off {}s",
                    self.queue.len(),
                    self.config.queue_backoff_secs
                );
                tokio::time::sleep(Duration::from_secs(self.config.queue_backoff_secs)).await;
                continue;
            }

            if let Err(e) = self.cycle().await {
                warn!("Analysis cycle failed: {:#}", e);
            }

            tokio::time::sleep(Duration::from_secs(self.config.poll_interval_secs)).await;
        }
    }

    /// One analysis cycle: compare both venues in both directions and
    /// process at most one opportunity.
    async fn cycle(&self) -> Result<()> {
        let book = self
            .exchange
            .get_order_book()
            .await
            .context("Failed to fetch order book")?;

        let qty = self.config.target_quantity;
        let (amm_bid, amm_ask) = tokio::try_join!(self.pool.bid_price(qty), self.pool.ask_price(qty))
            .context("Failed to quote pool")?;

        debug!(
            "Prices: amm bid {:.5} / ask {:.5} | book bid {:.5} / ask {:.5}",
            amm_bid,
            amm_ask,
            book.bids.first().map(|l| l.price).unwrap_or(0.0),
            book.asks.first().map(|l| l.price).unwrap_or(0.0),
        );

        if let Some(best_ask) = book.asks.first() {
            if amm_bid > best_ask.price {
                return self
                    .process_opportunity(Direction::BuyExchangeSellAmm, &book.asks, amm_bid)
                    .await;
            }
        }

        if let Some(best_bid) = book.bids.first() {
            if best_bid.price > amm_ask {
                return self
                    .process_opportunity(Direction::BuyAmmSellExchange, &book.bids, amm_ask)
                    .await;
            }
        }

        Ok(())
    }

    /// Size, cost, and enqueue one opportunity — or the rebalance
    /// withdrawals that would make it executable.
    async fn process_opportunity(
        &self,
        direction: Direction,
        levels: &[BookLevel],
        amm_price: f64,
    ) -> Result<()> {
        let balances = self.accounts.balances().await?;

        let requirements: [(Asset, Venue); 2] = match direction {
            Direction::BuyExchangeSellAmm => {
                [(Asset::Usdc, Venue::Exchange), (Asset::Eurc, Venue::Wallet)]
            }
            Direction::BuyAmmSellExchange => {
                [(Asset::Usdc, Venue::Wallet), (Asset::Eurc, Venue::Exchange)]
            }
        };

        let directives: Vec<RebalanceDirective> = requirements
            .iter()
            .filter_map(|&(asset, venue)| {
                check_location(
                    balances.asset(asset),
                    asset,
                    venue,
                    self.config.location_threshold,
                )
            })
            .collect();

        if !directives.is_empty() {
            self.enqueue_rebalances(&directives);
            return Ok(());
        }

        // Cap the trade by the base we can actually deliver on the sell leg.
        let base_available = match direction {
            Direction::BuyExchangeSellAmm => balances.eurc.wallet,
            Direction::BuyAmmSellExchange => balances.eurc.exchange,
        };
        let qty_cap = self
            .config
            .target_quantity
            .min(base_available * self.config.location_threshold);
        if qty_cap <= 0.0 {
            return Ok(());
        }

        let is_ask = direction == Direction::BuyExchangeSellAmm;
        let fill = match walk_book(levels, amm_price, qty_cap, is_ask) {
            Some(f) => f,
            None => {
                debug!("No fillable volume within limit {:.5}", amm_price);
                return Ok(());
            }
        };

        let gross = match direction {
            Direction::BuyExchangeSellAmm => (amm_price - fill.avg_price) * fill.volume,
            Direction::BuyAmmSellExchange => (fill.avg_price - amm_price) * fill.volume,
        };

        let costs = self.costs.trade_costs(fill.avg_price * fill.volume).await?;
        let net = gross - costs.total();

        if net <= 0.0 {
            debug!(
                "Edge {:.4} eaten by costs {:.4} ({:?}), skipping",
                gross,
                costs.total(),
                costs
            );
            return Ok(());
        }

        info!(
            "🎯 OPPORTUNITY: {:?} | {:.1} EURC | ex vwap {:.5} / amm {:.5} | gross {:.2} | net {:.2}",
            direction, fill.volume, fill.avg_price, amm_price, gross, net
        );

        let opportunity = Opportunity {
            direction,
            exchange_price: fill.avg_price,
            amm_price,
            volume: fill.volume,
            gross_profit: gross,
            net_profit: net,
        };

        self.queue.push(Box::new(ArbitrageExecuteTask::new(
            opportunity,
            Arc::clone(&self.exchange),
            Arc::clone(&self.pool),
            Arc::clone(&self.accounts),
            self.config.slippage,
            Duration::from_secs(self.config.order_timeout_secs),
        )));

        Ok(())
    }

    fn enqueue_rebalances(&self, directives: &[RebalanceDirective]) {
        for d in directives {
            if d.amount <= 0.0 {
                debug!(
                    "{} short at {} but nothing to move from the other venue",
                    d.asset, d.required_venue
                );
                continue;
            }

            info!(
                "⚖️  Rebalance: moving {:.2} {} to {}",
                d.amount, d.asset, d.required_venue
            );

            let token = self.accounts.token(d.asset);
            match d.required_venue {
                Venue::Wallet => self.queue.push(Box::new(ExchangeWithdrawalTask::new(
                    d.asset,
                    token,
                    d.amount,
                    Arc::clone(&self.exchange),
                    Arc::clone(&self.wallet),
                ))),
                Venue::Exchange => {
                    let deposit = match d.asset {
                        Asset::Usdc => self.config.usdc_deposit_address,
                        Asset::Eurc => self.config.eurc_deposit_address,
                    };
                    self.queue.push(Box::new(WalletWithdrawalTask::new(
                        d.asset,
                        token,
                        deposit,
                        d.amount,
                        self.config.max_transfer_gas_usd,
                        Arc::clone(&self.wallet),
                        Arc::clone(&self.exchange),
                    )))
                }
            }
        }
    }

    /// Startup report: where the value sits and how far from a 50/50 split.
    async fn log_portfolio_health(&self) -> Result<()> {
        let balances = self.accounts.balances().await?;
        let eurc_price = self
            .pool
            .bid_price(self.config.target_quantity)
            .await
            .unwrap_or(1.0);

        info!(
            "Portfolio: USDC {:.2} (ex {:.2} / w {:.2}) | EURC {:.2} (ex {:.2} / w {:.2}) | total {:.2} USDC",
            balances.usdc.total(),
            balances.usdc.exchange,
            balances.usdc.wallet,
            balances.eurc.total(),
            balances.eurc.exchange,
            balances.eurc.wallet,
            balances.total_value(eurc_price),
        );

        let plan = calculate_rebalance(&balances, eurc_price);
        if plan.is_significant() {
            info!(
                "Portfolio skewed: converting {:.2} USDC {} EURC would restore 50/50",
                plan.quote_amount,
                if plan.buy_eurc { "into" } else { "out of" },
            );
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn level(price: f64, size: f64) -> BookLevel {
        BookLevel { price, size }
    }

    #[test]
    fn test_walk_book_stops_at_limit_on_bids() {
        // Selling into descending bids with the AMM ask at 1.002: the
        // second level is at the limit and must be excluded.
        let bids = vec![level(1.0035, 600.0), level(1.0020, 500.0)];
        let fill = walk_book(&bids, 1.002, 3000.0, false).unwrap();
        assert!((fill.volume - 600.0).abs() < 1e-9);
        assert!((fill.avg_price - 1.0035).abs() < 1e-9);
    }

    #[test]
    fn test_walk_book_stops_at_limit_on_asks() {
        let asks = vec![level(1.0010, 1000.0), level(1.0030, 1000.0)];
        let fill = walk_book(&asks, 1.0030, 1500.0, true).unwrap();
        assert!((fill.volume - 1000.0).abs() < 1e-9);
        assert!((fill.avg_price - 1.0010).abs() < 1e-9);
    }

    #[test]
    fn test_walk_book_respects_target() {
        let asks = vec![level(1.0010, 1000.0), level(1.0020, 1000.0)];
        let fill = walk_book(&asks, 1.01, 1500.0, true).unwrap();
        assert!((fill.volume - 1500.0).abs() < 1e-9);
        // VWAP of 1000@1.0010 + 500@1.0020
        let expected = (1000.0 * 1.0010 + 500.0 * 1.0020) / 1500.0;
        assert!((fill.avg_price - expected).abs() < 1e-12);
    }

    #[test]
    fn test_walk_book_no_eligible_levels() {
        let asks = vec![level(1.0050, 1000.0)];
        assert!(walk_book(&asks, 1.0030, 1000.0, true).is_none());
        assert!(walk_book(&[], 1.0030, 1000.0, true).is_none());
    }

    #[test]
    fn test_walk_book_vwap_never_crosses_limit() {
        let asks = vec![
            level(1.0010, 300.0),
            level(1.0015, 300.0),
            level(1.0025, 300.0),
        ];
        let limit = 1.0020;
        let fill = walk_book(&asks, limit, 10_000.0, true).unwrap();
        assert!(fill.avg_price < limit);
        assert!((fill.volume - 600.0).abs() < 1e-9);
    }

    #[test]
    fn test_check_location_satisfied() {
        let b = VenueBalances {
            exchange: 960.0,
            wallet: 40.0,
        };
        assert!(check_location(&b, Asset::Usdc, Venue::Exchange, 0.95).is_none());
    }

    #[test]
    fn test_check_location_emits_directive() {
        // 100 on the exchange, 900 in the wallet: 10% at the required venue.
        let b = VenueBalances {
            exchange: 100.0,
            wallet: 900.0,
        };
        let d = check_location(&b, Asset::Usdc, Venue::Exchange, 0.95).unwrap();
        assert_eq!(d.asset, Asset::Usdc);
        assert_eq!(d.required_venue, Venue::Exchange);
        assert!((d.amount - 900.0).abs() < 1e-9);
    }

    #[test]
    fn test_check_location_zero_balance() {
        let b = VenueBalances {
            exchange: 0.0,
            wallet: 0.0,
        };
        assert!(check_location(&b, Asset::Eurc, Venue::Wallet, 0.95).is_none());
    }

    #[test]
    fn test_calculate_rebalance_balanced() {
        let p = PortfolioBalances {
            usdc: VenueBalances {
                exchange: 1000.0,
                wallet: 0.0,
            },
            eurc: VenueBalances {
                exchange: 0.0,
                wallet: 1000.0,
            },
        };
        let plan = calculate_rebalance(&p, 1.0);
        assert!((plan.quote_amount).abs() < 1e-9);
        assert!(!plan.is_significant());
    }

    #[test]
    fn test_calculate_rebalance_usdc_heavy() {
        let p = PortfolioBalances {
            usdc: VenueBalances {
                exchange: 3000.0,
                wallet: 0.0,
            },
            eurc: VenueBalances {
                exchange: 0.0,
                wallet: 1000.0,
            },
        };
        let plan = calculate_rebalance(&p, 1.0);
        assert!(plan.buy_eurc);
        assert!((plan.quote_amount - 1000.0).abs() < 1e-9);
        assert!(plan.is_significant());
    }

    #[test]
    fn test_calculate_rebalance_eurc_heavy_at_price() {
        let p = PortfolioBalances {
            usdc: VenueBalances {
                exchange: 1000.0,
                wallet: 0.0,
            },
            eurc: VenueBalances {
                exchange: 2000.0,
                wallet: 0.0,
            },
        };
        // EURC worth 2160 USDC; target 1580 each; sell 580 of EURC value.
        let plan = calculate_rebalance(&p, 1.08);
        assert!(!plan.buy_eurc);
        assert!((plan.quote_amount - 580.0).abs() < 1e-9);
    }
}

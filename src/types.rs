//! Core domain types
//!
//! Shared types for the CEX↔AMM arbitrage pipeline: assets, venues,
//! order-book levels, detected opportunities, and rebalance directives.

use serde::{Deserialize, Serialize};

/// The two assets of the traded pair. The pool and the exchange product
/// both quote EURC in USDC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Asset {
    Usdc,
    Eurc,
}

impl Asset {
    /// Exchange currency code (as used by the REST API).
    pub fn code(&self) -> &'static str {
        match self {
            Asset::Usdc => "USDC",
            Asset::Eurc => "EURC",
        }
    }

    /// On-chain decimals. Both stablecoins use 6.
    pub fn decimals(&self) -> u8 {
        6
    }
}

impl std::fmt::Display for Asset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}

/// Where a balance lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Venue {
    Exchange,
    Wallet,
}

impl std::fmt::Display for Venue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Venue::Exchange => f.write_str("exchange"),
            Venue::Wallet => f.write_str("wallet"),
        }
    }
}

/// Trade direction for a detected opportunity.
///
/// `BuyExchangeSellAmm`: walk the exchange asks (buy EURC with USDC on the
/// book), sell EURC into the pool. Requires USDC on the exchange and EURC in
/// the wallet.
///
/// `BuyAmmSellExchange`: swap USDC→EURC in the pool, sell EURC into the
/// exchange bids. Requires USDC in the wallet and EURC on the exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    BuyExchangeSellAmm,
    BuyAmmSellExchange,
}

/// One price level of an exchange order book (level-2 aggregated).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BookLevel {
    pub price: f64,
    pub size: f64,
}

/// Level-2 order book snapshot. Bids descending, asks ascending,
/// as returned by the exchange.
#[derive(Debug, Clone, Default)]
pub struct OrderBook {
    pub bids: Vec<BookLevel>,
    pub asks: Vec<BookLevel>,
}

/// Result of walking one side of the book up to a limit price.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FillEstimate {
    /// Volume-weighted average price of the consumed levels.
    pub avg_price: f64,
    /// Base volume actually fillable within the limit.
    pub volume: f64,
}

/// A fully-costed opportunity, ready to hand to the executor.
#[derive(Debug, Clone)]
pub struct Opportunity {
    pub direction: Direction,
    /// VWAP on the exchange leg (limit order price).
    pub exchange_price: f64,
    /// Quoted AMM price for the full volume.
    pub amm_price: f64,
    /// Base (EURC) volume to trade.
    pub volume: f64,
    /// Gross edge before costs, in quote units.
    pub gross_profit: f64,
    /// Edge after taker fee, swap gas, withdrawal fee, and transfer gas.
    pub net_profit: f64,
}

/// Instruction to move funds so an opportunity becomes executable.
/// Emitted when less than the location threshold of an asset sits at the
/// venue that needs it.
#[derive(Debug, Clone, Copy)]
pub struct RebalanceDirective {
    pub asset: Asset,
    /// Venue the funds must end up at.
    pub required_venue: Venue,
    /// Amount to move, in asset units.
    pub amount: f64,
}

/// Per-asset balances across both venues.
#[derive(Debug, Clone, Copy, Default)]
pub struct VenueBalances {
    pub exchange: f64,
    pub wallet: f64,
}

impl VenueBalances {
    pub fn total(&self) -> f64 {
        self.exchange + self.wallet
    }

    pub fn at(&self, venue: Venue) -> f64 {
        match venue {
            Venue::Exchange => self.exchange,
            Venue::Wallet => self.wallet,
        }
    }
}

/// Snapshot of the full portfolio (both assets, both venues).
#[derive(Debug, Clone, Copy, Default)]
pub struct PortfolioBalances {
    pub usdc: VenueBalances,
    pub eurc: VenueBalances,
}

impl PortfolioBalances {
    pub fn asset(&self, asset: Asset) -> &VenueBalances {
        match asset {
            Asset::Usdc => &self.usdc,
            Asset::Eurc => &self.eurc,
        }
    }

    /// Total portfolio value in quote units at the given EURC price.
    pub fn total_value(&self, eurc_price: f64) -> f64 {
        self.usdc.total() + self.eurc.total() * eurc_price
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_venue_balances_total() {
        let b = VenueBalances {
            exchange: 1500.0,
            wallet: 500.0,
        };
        assert_eq!(b.total(), 2000.0);
        assert_eq!(b.at(Venue::Exchange), 1500.0);
        assert_eq!(b.at(Venue::Wallet), 500.0);
    }

    #[test]
    fn test_portfolio_value_at_price() {
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
        // 1000 USDC + 1000 EURC @ 1.08
        assert!((p.total_value(1.08) - 2080.0).abs() < 1e-9);
    }
}

//! Account manager
//!
//! One view over both venues: exchange account balances plus on-chain
//! wallet balances, fetched concurrently per cycle.

use crate::chain::WalletService;
use crate::exchange::CoinbaseClient;
use crate::types::{Asset, PortfolioBalances, VenueBalances};
use alloy::primitives::Address;
use alloy::providers::Provider;
use anyhow::Result;
use std::sync::Arc;
use tracing::debug;

pub struct AccountManager<P> {
    exchange: Arc<CoinbaseClient>,
    wallet: Arc<WalletService<P>>,
    usdc: Address,
    eurc: Address,
}

impl<P: Provider + 'static> AccountManager<P> {
    pub fn new(
        exchange: Arc<CoinbaseClient>,
        wallet: Arc<WalletService<P>>,
        usdc: Address,
        eurc: Address,
    ) -> Self {
        Self {
            exchange,
            wallet,
            usdc,
            eurc,
        }
    }

    /// On-chain token address for an asset.
    pub fn token(&self, asset: Asset) -> Address {
        match asset {
            Asset::Usdc => self.usdc,
            Asset::Eurc => self.eurc,
        }
    }

    /// Snapshot of all four balances (both assets, both venues).
    /// All four reads fire concurrently.
    pub async fn balances(&self) -> Result<PortfolioBalances> {
        let (usdc_ex, eurc_ex, usdc_w, eurc_w) = tokio::try_join!(
            self.exchange.get_balance(Asset::Usdc.code()),
            self.exchange.get_balance(Asset::Eurc.code()),
            self.wallet.balance(self.usdc, Asset::Usdc.decimals()),
            self.wallet.balance(self.eurc, Asset::Eurc.decimals()),
        )?;

        let balances = PortfolioBalances {
            usdc: VenueBalances {
                exchange: usdc_ex,
                wallet: usdc_w,
            },
            eurc: VenueBalances {
                exchange: eurc_ex,
                wallet: eurc_w,
            },
        };

        debug!(
            "Balances: USDC ex={:.2} w={:.2} | EURC ex={:.2} w={:.2}",
            balances.usdc.exchange, balances.usdc.wallet, balances.eurc.exchange, balances.eurc.wallet
        );

        Ok(balances)
    }
}

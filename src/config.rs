//! Configuration management
//! Load settings from .env file

use alloy::primitives::Address;
use anyhow::{Context, Result};
use std::str::FromStr;

/// Runtime configuration, loaded once at startup.
#[derive(Debug, Clone)]
pub struct BotConfig {
    // Chain
    pub rpc_url: String,
    pub chain_id: u64,
    pub private_key: String,
    /// EURC/USDC Uniswap V3 pool to trade against.
    pub pool_address: Address,

    // Exchange
    pub product_id: String,
    pub api_url: String,
    pub api_key: String,
    pub api_secret: String,
    pub api_passphrase: String,
    /// Exchange deposit addresses for wallet→exchange transfers.
    pub usdc_deposit_address: Address,
    pub eurc_deposit_address: Address,

    // Strategy
    /// Base quantity targeted per arbitrage cycle.
    pub target_quantity: f64,
    pub taker_fee_rate: f64,
    /// Fraction of an asset that must sit at the required venue.
    pub location_threshold: f64,
    pub slippage: f64,
    /// Abort wallet transfers costing more than this (USD).
    pub max_transfer_gas_usd: f64,

    // Timing
    pub poll_interval_secs: u64,
    pub queue_backoff_secs: u64,
    pub order_timeout_secs: u64,

    // Indexer
    pub indexer_start_block: u64,
    pub blocks_per_call: u64,
    pub db_path: String,

    // Notifications (optional)
    pub telegram_token: Option<String>,
    pub telegram_chat_id: Option<String>,
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn parse_or<T: FromStr>(key: &str, default: T) -> Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(key) {
        Ok(v) => v
            .parse()
            .with_context(|| format!("Invalid value for {}", key)),
        Err(_) => Ok(default),
    }
}

pub fn load_config() -> Result<BotConfig> {
    dotenv::dotenv().ok();

    Ok(BotConfig {
        rpc_url: std::env::var("RPC_URL").context("RPC_URL not set")?,
        chain_id: parse_or("CHAIN_ID", 8453)?,
        private_key: std::env::var("PRIVATE_KEY").context("PRIVATE_KEY not set")?,
        pool_address: Address::from_str(&env_or(
            "POOL_ADDRESS",
            "0x95DBB3C7546F22BCE375900AbFdd64a4E5bD73d6",
        ))
        .context("Invalid POOL_ADDRESS")?,

        product_id: env_or("PRODUCT_ID", "EURC-USDC"),
        api_url: env_or("COINBASE_API_URL", "https://api.exchange.coinbase.com"),
        api_key: std::env::var("COINBASE_API_KEY").context("COINBASE_API_KEY not set")?,
        api_secret: std::env::var("COINBASE_API_SECRET").context("COINBASE_API_SECRET not set")?,
        api_passphrase: std::env::var("COINBASE_API_PASSPHRASE")
            .context("COINBASE_API_PASSPHRASE not set")?,
        usdc_deposit_address: Address::from_str(
            &std::env::var("USDC_DEPOSIT_ADDRESS").context("USDC_DEPOSIT_ADDRESS not set")?,
        )
        .context("Invalid USDC_DEPOSIT_ADDRESS")?,
        eurc_deposit_address: Address::from_str(
            &std::env::var("EURC_DEPOSIT_ADDRESS").context("EURC_DEPOSIT_ADDRESS not set")?,
        )
        .context("Invalid EURC_DEPOSIT_ADDRESS")?,

        target_quantity: parse_or("TARGET_QUANTITY", 3000.0)?,
        taker_fee_rate: parse_or("TAKER_FEE_RATE", 0.00001)?,
        location_threshold: parse_or("LOCATION_THRESHOLD", 0.95)?,
        slippage: parse_or("SLIPPAGE", 0.001)?,
        max_transfer_gas_usd: parse_or("MAX_TRANSFER_GAS_USD", 1.0)?,

        poll_interval_secs: parse_or("POLL_INTERVAL_SECS", 20)?,
        queue_backoff_secs: parse_or("QUEUE_BACKOFF_SECS", 30)?,
        order_timeout_secs: parse_or("ORDER_TIMEOUT_SECS", 120)?,

        indexer_start_block: parse_or("INDEXER_START_BLOCK", 24_454_082)?,
        blocks_per_call: parse_or("BLOCKS_PER_CALL", 2000)?,
        db_path: env_or("DB_PATH", "cexarb.db"),

        telegram_token: std::env::var("TELEGRAM_TOKEN").ok(),
        telegram_chat_id: std::env::var("TELEGRAM_CHAT_ID").ok(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_or_uses_default_when_unset() {
        std::env::remove_var("CEXARB_TEST_MISSING");
        let v: u64 = parse_or("CEXARB_TEST_MISSING", 42).unwrap();
        assert_eq!(v, 42);
    }

    #[test]
    fn test_parse_or_rejects_garbage() {
        std::env::set_var("CEXARB_TEST_GARBAGE", "not-a-number");
        let v: Result<u64> = parse_or("CEXARB_TEST_GARBAGE", 1);
        assert!(v.is_err());
        std::env::remove_var("CEXARB_TEST_GARBAGE");
    }
}

//! CEX-DEX Arbitrage Bot Library
//!
//! Components for arbitraging a Coinbase Exchange product against its
//! Uniswap V3 pool: opportunity detection, prioritized task execution,
//! LP position indexing, and position analytics.

pub mod account;
pub mod analyzer;
pub mod arbitrage;
pub mod chain;
pub mod config;
pub mod contracts;
pub mod exchange;
pub mod execution;
pub mod indexer;
pub mod notify;
pub mod store;
pub mod types;

// Re-export commonly used types
pub use account::AccountManager;
pub use arbitrage::{CostModel, OpportunityDetector};
pub use config::{load_config, BotConfig};
pub use execution::{TaskExecutor, TaskQueue};
pub use types::{Asset, Direction, Opportunity, OrderBook};

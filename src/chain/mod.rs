//! On-chain venue: pool quoting/swapping and wallet transfers

pub mod pool;
pub mod wallet;

pub use pool::UniswapPool;
pub use wallet::WalletService;

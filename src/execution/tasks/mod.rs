//! Concrete task implementations.

pub mod arbitrage;
pub mod exchange_withdrawal;
pub mod wallet_withdrawal;

pub use arbitrage::ArbitrageExecuteTask;
pub use exchange_withdrawal::ExchangeWithdrawalTask;
pub use wallet_withdrawal::WalletWithdrawalTask;

/// Arbitrage trades yield to rebalance work.
pub const ARBITRAGE_PRIORITY: u8 = 1;
/// Withdrawals run first so funds land where the next trade needs them.
pub const WITHDRAWAL_PRIORITY: u8 = 5;

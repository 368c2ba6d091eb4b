//! The unit of work handed to the executor.

use anyhow::Result;
use async_trait::async_trait;

/// A queued unit of work. Higher `priority` runs first; ties run in
/// insertion order. `run` consumes external side effects (orders, swaps,
/// transfers) and returns a human-readable outcome summary on success.
#[async_trait]
pub trait Task: Send + Sync {
    fn name(&self) -> String;

    /// Scheduling priority. Rebalance withdrawals (5) outrank arbitrage (1)
    /// so funds land where the next opportunity needs them.
    fn priority(&self) -> u8;

    async fn run(&self) -> Result<String>;
}
